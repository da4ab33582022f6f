//! Bare-transport calls to the CMS auth endpoints
//!
//! These functions talk to the backend with a plain `reqwest::Client` and no
//! credential injection or 401 handling. The session controller uses them for
//! login/register/logout (no token exists yet, or it is being discarded) and
//! the refresh coordinator uses `refresh_token` so a failing refresh can never
//! recurse into another refresh.

use common::Secret;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::{LOGIN_PATH, LOGOUT_PATH, REFRESH_PATH, REGISTER_PATH};
use crate::credentials::CredentialPair;
use crate::error::{Error, Result};

/// Longest slice of an error body carried into an error message
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Identity payload returned by the backend.
///
/// The client does not own this schema; only the display accessors below look
/// inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserProfile(serde_json::Value);

impl UserProfile {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_json(&self) -> &serde_json::Value {
        &self.0
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.as_str())
    }

    /// Best display label: `name`, then `username`, then `email`.
    pub fn display_name(&self) -> Option<&str> {
        self.str_field("name")
            .or_else(|| self.str_field("username"))
            .or_else(|| self.str_field("email"))
    }

    pub fn email(&self) -> Option<&str> {
        self.str_field("email")
    }

    pub fn role(&self) -> Option<&str> {
        self.str_field("role")
    }
}

/// Body of `POST /api/auth/login`.
#[derive(Debug, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: Secret<String>,
}

/// Body of `POST /api/auth/register`.
///
/// `extra` carries any additional profile fields the backend accepts.
#[derive(Debug, Serialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: Secret<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Response of login and register.
#[derive(Debug, Deserialize)]
pub struct AuthResponse {
    pub token: Secret<String>,
    #[serde(rename = "refreshToken")]
    pub refresh_token: Secret<String>,
    pub user: UserProfile,
}

impl AuthResponse {
    pub fn into_parts(self) -> (CredentialPair, UserProfile) {
        (
            CredentialPair {
                access: self.token,
                refresh: self.refresh_token,
            },
            self.user,
        )
    }
}

/// Response of the refresh endpoint.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub token: Secret<String>,
    #[serde(rename = "refreshToken")]
    pub refresh_token: Secret<String>,
}

impl From<TokenResponse> for CredentialPair {
    fn from(response: TokenResponse) -> Self {
        CredentialPair {
            access: response.token,
            refresh: response.refresh_token,
        }
    }
}

/// Response of the identity endpoint.
#[derive(Debug, Deserialize)]
pub struct MeResponse {
    pub user: UserProfile,
}

#[derive(Serialize)]
struct RefreshBody<'a> {
    #[serde(rename = "refreshToken")]
    refresh_token: &'a str,
}

/// Join a backend base URL and an endpoint path.
pub fn endpoint_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Pull a human-readable message out of an error body.
///
/// Prefers a JSON `message` (or `error`) string; falls back to the raw body,
/// truncated.
pub fn error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body)
        && let Some(msg) = value
            .get("message")
            .or_else(|| value.get("error"))
            .and_then(|m| m.as_str())
    {
        return msg.to_string();
    }
    truncate_body(body)
}

fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
}

async fn read_failure(response: reqwest::Response) -> (u16, String) {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("<no body>"));
    (status, error_message(&body))
}

async fn post_credentials<B: Serialize>(
    client: &reqwest::Client,
    base_url: &str,
    path: &str,
    body: &B,
) -> Result<AuthResponse> {
    let response = client
        .post(endpoint_url(base_url, path))
        .json(body)
        .send()
        .await
        .map_err(|e| Error::from_reqwest("auth request failed", e))?;

    if !response.status().is_success() {
        let (status, message) = read_failure(response).await;
        // 400/401 on these endpoints is the backend rejecting what the user typed
        if status == 400 || status == 401 {
            return Err(Error::InvalidCredentials(message));
        }
        return Err(Error::Rejected { status, message });
    }

    response
        .json::<AuthResponse>()
        .await
        .map_err(|e| Error::MalformedResponse(format!("invalid auth response: {e}")))
}

/// Exchange email and password for a credential pair and the user profile.
pub async fn login(
    client: &reqwest::Client,
    base_url: &str,
    request: &LoginRequest,
) -> Result<AuthResponse> {
    debug!(email = %request.email, "login request");
    post_credentials(client, base_url, LOGIN_PATH, request).await
}

/// Create an account; same response contract as [`login`].
pub async fn register(
    client: &reqwest::Client,
    base_url: &str,
    request: &RegisterRequest,
) -> Result<AuthResponse> {
    debug!(email = %request.email, "register request");
    post_credentials(client, base_url, REGISTER_PATH, request).await
}

/// Exchange a refresh token for a new access/refresh pair.
///
/// 401/403 means the refresh token is revoked or expired and maps to
/// `InvalidCredentials`.
pub async fn refresh_token(
    client: &reqwest::Client,
    base_url: &str,
    refresh: &str,
) -> Result<TokenResponse> {
    let response = client
        .post(endpoint_url(base_url, REFRESH_PATH))
        .json(&RefreshBody {
            refresh_token: refresh,
        })
        .send()
        .await
        .map_err(|e| Error::from_reqwest("token refresh request failed", e))?;

    if !response.status().is_success() {
        let (status, message) = read_failure(response).await;
        if status == 401 || status == 403 {
            return Err(Error::InvalidCredentials(format!(
                "refresh token rejected ({status}): {message}"
            )));
        }
        return Err(Error::Rejected { status, message });
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::MalformedResponse(format!("invalid refresh response: {e}")))
}

/// Tell the backend to revoke a refresh token.
pub async fn logout(client: &reqwest::Client, base_url: &str, refresh: &str) -> Result<()> {
    let response = client
        .post(endpoint_url(base_url, LOGOUT_PATH))
        .json(&RefreshBody {
            refresh_token: refresh,
        })
        .send()
        .await
        .map_err(|e| Error::from_reqwest("logout request failed", e))?;

    if !response.status().is_success() {
        let (status, message) = read_failure(response).await;
        return Err(Error::Rejected { status, message });
    }
    Ok(())
}
