//! Common types shared by the CMS session crates

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
