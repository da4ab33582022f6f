//! Auth session controller
//!
//! One explicit instance per application, injected where it is needed. It
//! owns the current user and drives login, register, logout and startup
//! revalidation. Bearer traffic goes through the shared `AuthClient`;
//! login/register/logout use the bare transport.

use std::sync::Arc;

use backend_auth::{LoginRequest, RegisterRequest, UserProfile};
use common::Secret;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::AuthError;
use crate::pipeline::AuthClient;

/// Snapshot of the session as seen by consumers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub user: Option<UserProfile>,
}

impl Session {
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }
}

/// User tagged with the pipeline epoch it was confirmed in.
#[derive(Debug, Clone)]
struct StampedUser {
    user: UserProfile,
    epoch: u64,
}

pub struct AuthSession {
    client: Arc<AuthClient>,
    user: RwLock<Option<StampedUser>>,
}

impl AuthSession {
    pub fn new(client: Arc<AuthClient>) -> Self {
        Self {
            client,
            user: RwLock::new(None),
        }
    }

    pub fn client(&self) -> &Arc<AuthClient> {
        &self.client
    }

    /// Revalidate persisted credentials at startup.
    ///
    /// Without a stored token the session is simply unauthenticated. With one,
    /// the identity endpoint decides: success sets the user, any failure
    /// clears the store.
    pub async fn init(&self) -> Session {
        if self.client.store().access_token().await.is_none() {
            debug!("no stored credentials, starting unauthenticated");
            *self.user.write().await = None;
            return Session::default();
        }

        match self.client.current_user().await {
            Ok(user) => {
                info!(user = user.display_name().unwrap_or("unknown"), "session restored");
                self.set_user(user).await;
            }
            Err(e) => {
                info!(error = %e, "stored session is no longer valid");
                self.client.clear_session().await;
                *self.user.write().await = None;
            }
        }
        self.session().await
    }

    /// Log in with email and password.
    ///
    /// On failure the store and the current user are left as they were.
    pub async fn login(
        &self,
        email: impl Into<String>,
        password: Secret<String>,
    ) -> Result<UserProfile, AuthError> {
        let request = LoginRequest {
            email: email.into(),
            password,
        };
        let response =
            backend_auth::login(self.client.http(), self.client.base_url(), &request).await?;
        self.establish(response).await
    }

    pub async fn register(&self, request: RegisterRequest) -> Result<UserProfile, AuthError> {
        let response =
            backend_auth::register(self.client.http(), self.client.base_url(), &request).await?;
        self.establish(response).await
    }

    async fn establish(
        &self,
        response: backend_auth::AuthResponse,
    ) -> Result<UserProfile, AuthError> {
        let (pair, user) = response.into_parts();
        self.client
            .store()
            .set(pair)
            .await
            .map_err(|e| AuthError::Storage(e.to_string()))?;
        self.set_user(user.clone()).await;
        info!(user = user.display_name().unwrap_or("unknown"), "authenticated");
        Ok(user)
    }

    /// End the session locally and notify the backend in the background.
    ///
    /// Local state is cleared before this returns. The returned handle
    /// resolves once the server notification settles; dropping it is fine.
    pub async fn logout(&self) -> Option<JoinHandle<()>> {
        let refresh = self.client.store().refresh_token().await;
        self.client.clear_session().await;
        *self.user.write().await = None;
        info!("logged out");

        let refresh = refresh?;
        let http = self.client.http().clone();
        let base_url = self.client.base_url().to_string();
        Some(tokio::spawn(async move {
            match backend_auth::logout(&http, &base_url, refresh.expose_str()).await {
                Ok(()) => debug!("server-side logout completed"),
                Err(e) => debug!(error = %e, "server-side logout failed, ignoring"),
            }
        }))
    }

    /// Current user, unless the pipeline tore the session down since it was set.
    pub async fn current_user(&self) -> Option<UserProfile> {
        let epoch = self.client.session_epoch();
        let guard = self.user.read().await;
        match guard.as_ref() {
            Some(stamped) if stamped.epoch == epoch => Some(stamped.user.clone()),
            Some(_) => {
                debug!("session torn down since user was set");
                None
            }
            None => None,
        }
    }

    pub async fn session(&self) -> Session {
        Session {
            user: self.current_user().await,
        }
    }

    pub async fn is_authenticated(&self) -> bool {
        self.current_user().await.is_some()
    }

    async fn set_user(&self, user: UserProfile) {
        let epoch = self.client.session_epoch();
        *self.user.write().await = Some(StampedUser { user, epoch });
    }
}
