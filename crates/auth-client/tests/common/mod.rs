//! Shared fixtures for the auth-client integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use auth_client::{AuthClient, Clock, Navigator};
use backend_auth::{CredentialPair, CredentialStore, REFRESH_PATH};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Navigator that records every location it is sent to.
#[derive(Default)]
pub struct RecordingNavigator {
    current: Mutex<Option<String>>,
    visits: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub fn at(path: &str) -> Arc<Self> {
        Arc::new(Self {
            current: Mutex::new(Some(path.to_string())),
            visits: Mutex::new(Vec::new()),
        })
    }

    pub fn visits(&self) -> Vec<String> {
        self.visits.lock().unwrap().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn current_path(&self) -> Option<String> {
        self.current.lock().unwrap().clone()
    }

    fn navigate(&self, location: &str) {
        self.visits.lock().unwrap().push(location.to_string());
        *self.current.lock().unwrap() = Some(location.to_string());
    }
}

pub struct FixedClock(pub u64);

impl Clock for FixedClock {
    fn now_unix_secs(&self) -> u64 {
        self.0
    }
}

pub struct Harness {
    pub server: MockServer,
    pub store: Arc<CredentialStore>,
    pub navigator: Arc<RecordingNavigator>,
    pub client: Arc<AuthClient>,
}

impl Harness {
    /// Empty store, user on `/admin/news`.
    pub async fn signed_out() -> Self {
        Self::build(CredentialStore::in_memory()).await
    }

    /// Store seeded with `access`/`refresh`, user on `/admin/news`.
    pub async fn signed_in(access: &str, refresh: &str) -> Self {
        Self::build(CredentialStore::with_pair(CredentialPair::new(access, refresh))).await
    }

    pub async fn build(store: CredentialStore) -> Self {
        let server = MockServer::start().await;
        let store = Arc::new(store);
        let navigator = RecordingNavigator::at("/admin/news");
        let client = Arc::new(AuthClient::new(
            reqwest::Client::new(),
            server.uri(),
            store.clone(),
            navigator.clone(),
        ));
        Self {
            server,
            store,
            navigator,
            client,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        let client = AuthClient::new(
            reqwest::Client::new(),
            self.server.uri(),
            self.store.clone(),
            self.navigator.clone(),
        )
        .with_clock(clock);
        self.client = Arc::new(client);
        self
    }

    /// Requests the mock server saw for `request_path`.
    pub async fn requests_to(&self, request_path: &str) -> Vec<wiremock::Request> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.url.path() == request_path)
            .collect()
    }
}

pub fn token_pair(access: &str, refresh: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_json(serde_json::json!({"token": access, "refreshToken": refresh}))
}

/// Mount a refresh endpoint that renews `from` into `access`/`refresh`.
pub async fn mount_refresh(
    server: &MockServer,
    from: &str,
    access: &str,
    refresh: &str,
    times: u64,
) {
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .and(body_json(serde_json::json!({"refreshToken": from})))
        .respond_with(token_pair(access, refresh))
        .expect(times)
        .mount(server)
        .await;
}

/// Unsigned JWT with the given `exp` claim.
pub fn jwt_expiring_at(exp: u64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(serde_json::json!({"sub": "1", "exp": exp}).to_string());
    format!("{header}.{payload}.c2ln")
}

pub fn authorization(request: &wiremock::Request) -> Option<String> {
    request
        .headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
