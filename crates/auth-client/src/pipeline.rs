//! Authenticated request pipeline
//!
//! Every outbound call goes through `AuthClient::send`:
//! 1. Attach the stored access token as a bearer credential (if any)
//! 2. If the token is a JWT that has visibly expired, refresh first
//! 3. Send; on 401 refresh once through the coordinator and re-send once
//! 4. A refresh failure, or a 401 on the re-sent request, tears the session
//!    down (clear credentials, redirect to login) and returns `Unauthorized`
//!
//! A refresh superseded by a newer login returns `Unauthorized` but leaves
//! the new session alone.
//!
//! Every other status is returned to the caller untouched. The single retry
//! is structural: the first attempt may call `retry_after_refresh`, which
//! never calls back into the retry path.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;

use backend_auth::endpoints::{endpoint_url, error_message};
use backend_auth::{CredentialPair, CredentialStore, LOGIN_ROUTE, ME_PATH, MeResponse, UserProfile};
use common::Secret;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::environment::{Clock, LoginRedirect, Navigator, SystemClock};
use crate::error::{Error, RefreshError, Result};
use crate::refresh::RefreshCoordinator;

/// Tokens expiring within this window are refreshed before sending
const EXPIRY_LEEWAY_SECS: u64 = 10;

/// Description of one logical request. Re-sent verbatim on retry.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    headers: HeaderMap,
    body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Add a header. `Authorization` is owned by the pipeline and is dropped
    /// at send time.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self> {
        let value = serde_json::to_value(body)
            .map_err(|e| Error::InvalidRequest(format!("serializing request body: {e}")))?;
        self.body = Some(value);
        Ok(self)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Which send of a logical request is being made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    First,
    /// The request's one refresh cycle has been spent
    Retry,
}

/// HTTP client that injects credentials and recovers from expired tokens.
pub struct AuthClient {
    http: reqwest::Client,
    base_url: String,
    store: Arc<CredentialStore>,
    refresher: RefreshCoordinator,
    navigator: Arc<dyn Navigator>,
    clock: Arc<dyn Clock>,
    login_route: String,
    /// Access token whose failure last redirected to login
    redirected_for: Mutex<Option<Secret<String>>>,
    /// Incremented every time the session is cleared
    session_epoch: AtomicU64,
}

impl AuthClient {
    /// `http` should carry the request timeout; the same client is reused as
    /// the bare transport for refresh exchanges.
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        store: Arc<CredentialStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        let base_url = base_url.into();
        let refresher = RefreshCoordinator::new(http.clone(), base_url.clone(), store.clone());
        Self {
            http,
            base_url,
            store,
            refresher,
            navigator,
            clock: Arc::new(SystemClock),
            login_route: LOGIN_ROUTE.to_string(),
            redirected_for: Mutex::new(None),
            session_epoch: AtomicU64::new(0),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_login_route(mut self, route: impl Into<String>) -> Self {
        self.login_route = route.into();
        self
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn refresher(&self) -> &RefreshCoordinator {
        &self.refresher
    }

    pub fn login_route(&self) -> &str {
        &self.login_route
    }

    pub fn session_epoch(&self) -> u64 {
        self.session_epoch.load(Ordering::Acquire)
    }

    /// Send a request with credentials, refreshing and retrying once on 401.
    pub async fn send(&self, request: ApiRequest) -> Result<reqwest::Response> {
        let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
        let span = info_span!(
            "api_request",
            request_id = %request_id,
            method = %request.method,
            path = %request.path,
        );

        let result = self.send_with_refresh(&request).instrument(span).await;
        let outcome = match &result {
            Ok(_) => "response",
            Err(Error::Unauthorized(_)) => "unauthorized",
            Err(_) => "error",
        };
        metrics::counter!("auth_client_requests_total", "outcome" => outcome).increment(1);
        result
    }

    async fn send_with_refresh(&self, request: &ApiRequest) -> Result<reqwest::Response> {
        let stored = self.store.access_token().await;

        // `stale` is what the session held when this request began
        let (attempt, stale, access) = match stored {
            Some(token) if self.expired_locally(&token) => {
                debug!("access token expired locally, refreshing before send");
                let pair = self.renew(Some(&token)).await?;
                (Attempt::Retry, Some(token), Some(pair.access))
            }
            other => (Attempt::First, other.clone(), other),
        };

        let response = self.dispatch(request, access.as_ref()).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        match attempt {
            Attempt::First => {
                debug!("received 401, attempting refresh");
                self.retry_after_refresh(request, access.as_ref()).await
            }
            Attempt::Retry => Err(self
                .unrecoverable(stale.as_ref(), "authorization rejected after refresh")
                .await),
        }
    }

    async fn retry_after_refresh(
        &self,
        request: &ApiRequest,
        sent_with: Option<&Secret<String>>,
    ) -> Result<reqwest::Response> {
        let pair = self.renew(sent_with).await?;
        let response = self.dispatch(request, Some(&pair.access)).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(self
                .unrecoverable(sent_with, "authorization rejected after refresh")
                .await);
        }
        debug!(status = response.status().as_u16(), "retried request completed");
        Ok(response)
    }

    fn expired_locally(&self, token: &Secret<String>) -> bool {
        backend_auth::jwt::is_expired(
            token.expose_str(),
            self.clock.now_unix_secs(),
            EXPIRY_LEEWAY_SECS,
        )
    }

    async fn renew(&self, sent_with: Option<&Secret<String>>) -> Result<CredentialPair> {
        match self
            .refresher
            .refresh(sent_with.map(|t| t.expose_str()))
            .await
        {
            Ok(pair) => Ok(pair),
            Err(e @ RefreshError::Superseded) => {
                if self.store.is_empty().await {
                    return Err(self.unrecoverable(sent_with, &e.to_string()).await);
                }
                info!("session replaced during refresh, keeping the new one");
                Err(e.into())
            }
            Err(e) => {
                warn!(error = %e, "could not refresh credentials");
                Err(self.unrecoverable(sent_with, &e.to_string()).await)
            }
        }
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        access: Option<&Secret<String>>,
    ) -> Result<reqwest::Response> {
        let mut headers = request.headers.clone();
        headers.remove(AUTHORIZATION);
        if let Some(token) = access {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose_str()))
                .map_err(|e| Error::InvalidRequest(format!("invalid token value: {e}")))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let mut builder = self
            .http
            .request(request.method.clone(), endpoint_url(&self.base_url, &request.path))
            .headers(headers);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            warn!(error = %e, "request failed");
            Error::from_reqwest(e)
        })?;
        debug!(status = response.status().as_u16(), "response received");
        Ok(response)
    }

    /// Tear the session down and build the error returned to the caller.
    ///
    /// Requests of one failing burst were all sent with the same token, so
    /// only the first of them redirects. Requests sent without a token
    /// redirect every time.
    async fn unrecoverable(&self, failed: Option<&Secret<String>>, reason: &str) -> Error {
        self.clear_session().await;
        let repeat = match failed {
            Some(token) => {
                let mut last = self.redirected_for.lock().await;
                let repeat = last
                    .as_ref()
                    .is_some_and(|t| t.expose_str() == token.expose_str());
                *last = Some(token.clone());
                repeat
            }
            None => false,
        };
        if repeat {
            debug!("session already torn down for this token, skipping redirect");
        } else {
            self.redirect_to_login();
        }
        Error::Unauthorized(reason.to_string())
    }

    /// Clear credentials and redirect to login.
    pub async fn teardown(&self) {
        self.clear_session().await;
        self.redirect_to_login();
    }

    fn redirect_to_login(&self) {
        let redirect = LoginRedirect::new(&self.login_route, self.navigator.current_path());
        let location = redirect.location();
        info!(location = %location, "session ended, redirecting to login");
        self.navigator.navigate(&location);
    }

    /// Clear credentials without navigating. Returns the store revision.
    pub async fn clear_session(&self) -> u64 {
        let revision = self.store.clear().await;
        self.session_epoch.fetch_add(1, Ordering::AcqRel);
        revision
    }

    /// Send and decode a JSON response, mapping non-success statuses to
    /// `Error::Status`.
    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        let response = check_status(self.send(request).await?).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| Error::Decode(e.to_string()))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send_json(ApiRequest::get(path)).await
    }

    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.send_json(ApiRequest::post(path).json(body)?).await
    }

    pub async fn put_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.send_json(ApiRequest::put(path).json(body)?).await
    }

    /// DELETE with no response body expected.
    pub async fn delete(&self, path: &str) -> Result<()> {
        check_status(self.send(ApiRequest::delete(path)).await?).await?;
        Ok(())
    }

    /// Identity of the current bearer, via the pipeline.
    pub async fn current_user(&self) -> Result<UserProfile> {
        let me: MeResponse = self.get_json(ME_PATH).await?;
        Ok(me.user)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::Status {
        status: status.as_u16(),
        body: error_message(&body),
    })
}
