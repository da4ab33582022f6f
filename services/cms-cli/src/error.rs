//! CLI-specific error types
//!
//! Library errors are wrapped with `anyhow` context in `main`; these cover
//! outcomes that only exist at the command line.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The command needs a session and there is none.
    #[error("not signed in, log in at {location}")]
    SignedOut { location: String },

    #[error("could not read password: {0}")]
    Password(String),

    #[error("request failed with status {status}")]
    RequestFailed { status: u16 },
}

/// Result alias using CLI Error
pub type Result<T> = std::result::Result<T, Error>;
