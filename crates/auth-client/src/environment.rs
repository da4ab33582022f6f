//! Capabilities the pipeline borrows from its host: navigation and time

use std::time::{SystemTime, UNIX_EPOCH};

use backend_auth::{LOGIN_ROUTE, REDIRECT_PARAM};

/// Navigation capability of the host application.
///
/// The pipeline calls `navigate` once per torn-down session; the host decides
/// what "navigate" means (browser route change, CLI prompt, test recorder).
pub trait Navigator: Send + Sync {
    /// Path the user is currently on, if the host tracks one.
    fn current_path(&self) -> Option<String>;

    fn navigate(&self, location: &str);
}

/// Wall clock used for local token expiry checks.
pub trait Clock: Send + Sync {
    fn now_unix_secs(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

/// Where to send an unauthenticated user, and where to bring them back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRedirect {
    login_route: String,
    return_to: Option<String>,
}

impl LoginRedirect {
    pub fn new(login_route: impl Into<String>, return_to: Option<String>) -> Self {
        let login_route = login_route.into();
        // Returning to the login page itself would loop
        let return_to = return_to.filter(|p| !p.is_empty() && !is_login_path(p, &login_route));
        Self {
            login_route,
            return_to,
        }
    }

    /// Redirect to the default login route.
    pub fn to_default_login(return_to: Option<String>) -> Self {
        Self::new(LOGIN_ROUTE, return_to)
    }

    pub fn login_route(&self) -> &str {
        &self.login_route
    }

    pub fn return_to(&self) -> Option<&str> {
        self.return_to.as_deref()
    }

    /// Location string, e.g. `/login?redirect=%2Fadmin%2Fnews`.
    pub fn location(&self) -> String {
        match &self.return_to {
            Some(path) => {
                let query = url::form_urlencoded::Serializer::new(String::new())
                    .append_pair(REDIRECT_PARAM, path)
                    .finish();
                format!("{}?{query}", self.login_route)
            }
            None => self.login_route.clone(),
        }
    }
}

/// Whether `path` points at the login page, ignoring query, fragment and a
/// trailing slash.
fn is_login_path(path: &str, login_route: &str) -> bool {
    let page = path.split(['?', '#']).next().unwrap_or_default();
    page.trim_end_matches('/') == login_route.trim_end_matches('/')
}
