//! CMS backend authentication library
//!
//! Wire types and bare-transport calls for the `/api/auth/*` endpoints, the
//! persisted credential pair, and local JWT expiry checks. This crate has no
//! notion of retries or sessions; `auth-client` builds the request pipeline on
//! top of it.
//!
//! Credential flow:
//! 1. Controller calls `endpoints::login()` / `endpoints::register()`
//! 2. Returned pair stored via `credentials::CredentialStore::set()`
//! 3. Pipeline reads `CredentialStore::access_token()` on every request
//! 4. On a 401 the refresh coordinator calls `endpoints::refresh_token()`
//! 5. Renewed pair replaces the old one in a single `set()`
//! 6. Logout or unrecoverable failure calls `CredentialStore::clear()`

pub mod constants;
pub mod credentials;
pub mod endpoints;
pub mod error;
pub mod jwt;

pub use constants::*;
pub use credentials::{CredentialPair, CredentialStore};
pub use endpoints::{
    AuthResponse, LoginRequest, MeResponse, RegisterRequest, TokenResponse, UserProfile, login,
    logout, refresh_token, register,
};
pub use error::{Error, Result};
