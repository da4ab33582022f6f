//! Error types for backend auth operations

/// Errors from auth endpoint calls and credential storage.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("auth endpoint returned {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    /// Map a transport error, keeping timeouts distinguishable.
    pub(crate) fn from_reqwest(context: &str, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(format!("{context}: {e}"))
        } else {
            Error::Http(format!("{context}: {e}"))
        }
    }
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
