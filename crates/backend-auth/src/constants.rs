//! CMS backend auth constants
//!
//! Endpoint paths are relative to the configured backend base URL.

/// Login endpoint (`{email, password}` -> `{token, refreshToken, user}`)
pub const LOGIN_PATH: &str = "/api/auth/login";

/// Registration endpoint (profile -> `{token, refreshToken, user}`)
pub const REGISTER_PATH: &str = "/api/auth/register";

/// Refresh endpoint (`{refreshToken}` -> `{token, refreshToken}`)
pub const REFRESH_PATH: &str = "/api/auth/refresh-token";

/// Identity endpoint, bearer credential required (-> `{user}`)
pub const ME_PATH: &str = "/api/auth/me";

/// Server-side logout (`{refreshToken}`), best effort
pub const LOGOUT_PATH: &str = "/api/auth/logout";

/// Login entry point the client navigates to on unrecoverable auth failure
pub const LOGIN_ROUTE: &str = "/login";

/// Query parameter carrying the originally requested path on the login route
pub const REDIRECT_PARAM: &str = "redirect";
