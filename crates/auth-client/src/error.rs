//! Error types for the request pipeline, refresh coordinator and session
//! controller

/// Errors surfaced to callers of the request pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Transport(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    /// The session could not be recovered; credentials have been cleared.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response body: {0}")]
    Decode(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    pub(crate) fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else {
            Error::Transport(e.to_string())
        }
    }

    /// Whether this error ended the session.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Error::Unauthorized(_))
    }
}

/// Outcome of a failed refresh exchange.
///
/// `Clone` because one exchange result is fanned out to every request that
/// was waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    #[error("no refresh token stored")]
    NoRefreshToken,

    #[error("refresh token rejected: {0}")]
    Rejected(String),

    #[error("refresh request failed: {0}")]
    Transport(String),

    #[error("malformed refresh response: {0}")]
    Malformed(String),

    #[error("failed to store refreshed credentials: {0}")]
    Storage(String),

    /// The session was cleared or replaced while the exchange was in flight.
    #[error("session changed during refresh")]
    Superseded,
}

impl From<backend_auth::Error> for RefreshError {
    fn from(e: backend_auth::Error) -> Self {
        use backend_auth::Error as E;
        match e {
            E::InvalidCredentials(msg) => RefreshError::Rejected(msg),
            E::Rejected { status, message } => {
                RefreshError::Rejected(format!("status {status}: {message}"))
            }
            E::Http(msg) | E::Timeout(msg) => RefreshError::Transport(msg),
            E::MalformedResponse(msg) | E::CredentialParse(msg) => RefreshError::Malformed(msg),
            E::Io(msg) => RefreshError::Storage(msg),
        }
    }
}

impl From<RefreshError> for Error {
    fn from(e: RefreshError) -> Self {
        Error::Unauthorized(e.to_string())
    }
}

/// Errors from login and register.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("auth request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("auth request failed: {0}")]
    Transport(String),

    #[error("malformed auth response: {0}")]
    Malformed(String),

    #[error("failed to store credentials: {0}")]
    Storage(String),
}

impl From<backend_auth::Error> for AuthError {
    fn from(e: backend_auth::Error) -> Self {
        use backend_auth::Error as E;
        match e {
            E::InvalidCredentials(msg) => AuthError::InvalidCredentials(msg),
            E::Rejected { status, message } => AuthError::Rejected { status, message },
            E::Http(msg) | E::Timeout(msg) => AuthError::Transport(msg),
            E::MalformedResponse(msg) => AuthError::Malformed(msg),
            E::CredentialParse(msg) | E::Io(msg) => AuthError::Storage(msg),
        }
    }
}

/// Result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;
