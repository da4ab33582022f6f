//! Command implementations

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use auth_client::{ApiRequest, AuthClient, AuthSession, Navigator, SessionGate, View};
use backend_auth::{CredentialStore, RegisterRequest};
use common::Secret;
use tracing::{info, warn};

use crate::cli::Command;
use crate::config::Config;
use crate::error::Error;

/// Navigator for a terminal: "navigating" tells the user where to log in.
#[derive(Default)]
pub struct CliNavigator {
    current: Mutex<Option<String>>,
    redirected_to: Mutex<Option<String>>,
}

impl CliNavigator {
    fn set_current(&self, path: &str) {
        if let Ok(mut current) = self.current.lock() {
            *current = Some(path.to_string());
        }
    }

    /// Last login location the pipeline sent us to.
    fn redirected_to(&self) -> Option<String> {
        self.redirected_to.lock().ok().and_then(|r| r.clone())
    }
}

impl Navigator for CliNavigator {
    fn current_path(&self) -> Option<String> {
        self.current.lock().ok().and_then(|c| c.clone())
    }

    fn navigate(&self, location: &str) {
        warn!(location = %location, "session expired");
        if let Ok(mut redirected) = self.redirected_to.lock() {
            *redirected = Some(location.to_string());
        }
    }
}

fn read_password() -> Result<Secret<String>> {
    if let Ok(password) = std::env::var("CMS_PASSWORD") {
        return Ok(Secret::new(password));
    }
    let password = rpassword::prompt_password("Password: ")
        .map_err(|e| Error::Password(e.to_string()))?;
    Ok(Secret::new(password))
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("formatting JSON output")?
    );
    Ok(())
}

/// Build the session from config, revalidate it, and run `command`.
pub async fn run(config: Config, command: Command) -> Result<()> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.backend.timeout_secs))
        .build()
        .context("building HTTP client")?;

    let store = CredentialStore::load(config.session.credentials_path.clone())
        .await
        .with_context(|| {
            format!(
                "loading credentials from {}",
                config.session.credentials_path.display()
            )
        })?;

    let navigator = Arc::new(CliNavigator::default());
    let client = AuthClient::new(
        http,
        config.backend.base_url.clone(),
        Arc::new(store),
        navigator.clone(),
    )
    .with_login_route(config.session.login_route.clone());
    let session = AuthSession::new(Arc::new(client));

    let restored = session.init().await;
    info!(authenticated = restored.is_authenticated(), "session initialized");

    match command {
        Command::Login { email } => {
            let password = read_password()?;
            let user = session
                .login(email, password)
                .await
                .context("login failed")?;
            println!("logged in as {}", user.display_name().unwrap_or("unknown user"));
        }
        Command::Register { name, email } => {
            let password = read_password()?;
            let request = RegisterRequest {
                name,
                email,
                password,
                extra: serde_json::Map::new(),
            };
            let user = session
                .register(request)
                .await
                .context("registration failed")?;
            println!("registered as {}", user.display_name().unwrap_or("unknown user"));
        }
        Command::Whoami { destination } => {
            navigator.set_current(&destination);
            let gate =
                SessionGate::with_login_route(destination, session.client().login_route());
            gate.verify(session.client()).await;
            match gate.render(|user| user.clone()) {
                View::Content(user) => print_json(user.as_json())?,
                View::Redirect(redirect) => {
                    return Err(Error::SignedOut {
                        location: redirect.location(),
                    }
                    .into());
                }
                View::Loading => anyhow::bail!("session verification did not complete"),
            }
        }
        Command::Get { path } => {
            navigator.set_current(&path);
            let response = match session.client().send(ApiRequest::get(&path)).await {
                Ok(response) => response,
                Err(e) if e.is_unauthorized() => {
                    let location = navigator
                        .redirected_to()
                        .unwrap_or_else(|| session.client().login_route().to_string());
                    return Err(Error::SignedOut { location }.into());
                }
                Err(e) => return Err(e).with_context(|| format!("GET {path}")),
            };

            let status = response.status();
            let body = response.text().await.context("reading response body")?;
            match serde_json::from_str::<serde_json::Value>(&body) {
                Ok(value) => print_json(&value)?,
                Err(_) => println!("{body}"),
            }
            if !status.is_success() {
                return Err(Error::RequestFailed {
                    status: status.as_u16(),
                }
                .into());
            }
        }
        Command::Logout => {
            if let Some(notify) = session.logout().await {
                // The local session is already gone; wait only so the
                // notification is not cut off by process exit
                if let Err(e) = notify.await {
                    warn!(error = %e, "logout notification task failed");
                }
            }
            println!("logged out");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn navigator_records_redirect() {
        let navigator = CliNavigator::default();
        navigator.set_current("/api/news");
        assert_eq!(navigator.current_path().as_deref(), Some("/api/news"));

        navigator.navigate("/login?redirect=%2Fapi%2Fnews");
        assert_eq!(
            navigator.redirected_to().as_deref(),
            Some("/login?redirect=%2Fapi%2Fnews")
        );
    }

    #[test]
    fn fresh_navigator_has_no_location() {
        let navigator = CliNavigator::default();
        assert_eq!(navigator.current_path(), None);
        assert_eq!(navigator.redirected_to(), None);
    }
}
