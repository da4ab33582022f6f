//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The login password is never stored in the TOML; it comes from
//! `CMS_PASSWORD` or an interactive prompt at login time.

use backend_auth::LOGIN_ROUTE;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub backend: BackendConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// CMS backend connection settings
#[derive(Debug, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Local session settings
#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    /// Where the credential pair is persisted between runs
    #[serde(default = "default_credentials_path")]
    pub credentials_path: PathBuf,
    #[serde(default = "default_login_route")]
    pub login_route: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            credentials_path: default_credentials_path(),
            login_route: default_login_route(),
        }
    }
}

fn default_timeout() -> u64 {
    30
}

fn default_credentials_path() -> PathBuf {
    PathBuf::from("cms-credentials.json")
}

fn default_login_route() -> String {
    LOGIN_ROUTE.to_string()
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// `CMS_API_URL` replaces `backend.base_url` before validation.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(url) = std::env::var("CMS_API_URL")
            && !url.trim().is_empty()
        {
            config.backend.base_url = url.trim().to_owned();
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        if !self.backend.base_url.starts_with("http://")
            && !self.backend.base_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                self.backend.base_url
            )));
        }

        if self.backend.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if !self.session.login_route.starts_with('/') {
            return Err(common::Error::Config(format!(
                "login_route must be an absolute path, got: {}",
                self.session.login_route
            )));
        }

        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&Path>) -> PathBuf {
        if let Some(p) = cli_path {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("cms-session.toml")
    }
}
