//! Single-flight token refresh
//!
//! When several requests fail with 401 at once they must share one refresh
//! exchange: refresh tokens rotate on use, so a second exchange with the same
//! refresh token would be rejected and log the user out.
//!
//! The coordinator keeps at most one in-flight exchange in a slot. The first
//! caller creates it as a `Shared` future; everyone arriving while it runs
//! clones and awaits the same handle. The exchange writes the store and then
//! empties the slot itself as it settles, so a caller that finds the slot
//! empty always sees the post-exchange store.
//!
//! The exchange remembers the store revision it started from and only writes
//! back (or clears) if the store is still at that revision. A logout or login
//! that lands while the exchange is in flight wins, and the exchange settles
//! as `Superseded`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use backend_auth::{CredentialPair, CredentialStore};
use common::Secret;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::RefreshError;

pub type RefreshOutcome = std::result::Result<CredentialPair, RefreshError>;

type SharedExchange = Shared<BoxFuture<'static, RefreshOutcome>>;

struct InFlight {
    id: u64,
    exchange: SharedExchange,
}

struct Inner {
    http: reqwest::Client,
    base_url: String,
    store: Arc<CredentialStore>,
    slot: Mutex<Option<InFlight>>,
    next_id: AtomicU64,
    exchanges_started: AtomicU64,
}

/// Exchanges the stored refresh token for a new pair, one exchange at a time.
///
/// Cheap to clone; clones share the slot.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    /// `http` must be a bare client: nothing here goes through the pipeline.
    pub fn new(http: reqwest::Client, base_url: String, store: Arc<CredentialStore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                http,
                base_url,
                store,
                slot: Mutex::new(None),
                next_id: AtomicU64::new(1),
                exchanges_started: AtomicU64::new(0),
            }),
        }
    }

    /// Renew the credential pair after `stale_access` was rejected.
    ///
    /// - An exchange already in flight is joined, whatever token it renews.
    /// - An empty store fails with `NoRefreshToken` without any network call.
    /// - If the stored access token is no longer `stale_access`, an earlier
    ///   exchange already renewed it and the stored pair is returned as-is.
    /// - Otherwise a new exchange starts.
    pub async fn refresh(&self, stale_access: Option<&str>) -> RefreshOutcome {
        let exchange = {
            let mut slot = self.inner.slot.lock().await;
            if let Some(in_flight) = slot.as_ref() {
                debug!(exchange_id = in_flight.id, "joining in-flight refresh");
                in_flight.exchange.clone()
            } else {
                let (pair, revision) = self.inner.store.snapshot().await;
                let Some(pair) = pair else {
                    debug!("no refresh token stored, refresh impossible");
                    metrics::counter!("auth_client_refresh_total", "outcome" => "no_refresh_token")
                        .increment(1);
                    return Err(RefreshError::NoRefreshToken);
                };

                if stale_access != Some(pair.access.expose_str()) {
                    debug!("access token already renewed, reusing stored pair");
                    return Ok(pair);
                }

                let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                let exchange = run_exchange(self.inner.clone(), id, revision, pair.refresh)
                    .boxed()
                    .shared();
                *slot = Some(InFlight {
                    id,
                    exchange: exchange.clone(),
                });
                exchange
            }
        };

        exchange.await
    }

    /// Whether an exchange is currently running.
    pub async fn is_refreshing(&self) -> bool {
        self.inner.slot.lock().await.is_some()
    }

    /// Number of refresh exchanges started against the backend.
    pub fn exchanges_started(&self) -> u64 {
        self.inner.exchanges_started.load(Ordering::Relaxed)
    }
}

async fn run_exchange(
    inner: Arc<Inner>,
    id: u64,
    revision: u64,
    refresh: Secret<String>,
) -> RefreshOutcome {
    inner.exchanges_started.fetch_add(1, Ordering::Relaxed);
    debug!(exchange_id = id, revision, "starting refresh exchange");

    let outcome = match backend_auth::refresh_token(&inner.http, &inner.base_url, refresh.expose_str())
        .await
    {
        Ok(tokens) => {
            let pair = CredentialPair::from(tokens);
            match inner.store.set_if_revision(pair.clone(), revision).await {
                Ok(true) => Ok(pair),
                Ok(false) => {
                    revoke_orphan(&inner, id, &pair.refresh).await;
                    Err(RefreshError::Superseded)
                }
                Err(e) => Err(RefreshError::Storage(e.to_string())),
            }
        }
        Err(e) => Err(RefreshError::from(e)),
    };

    let outcome = match outcome {
        Ok(pair) => {
            info!(exchange_id = id, "token refresh succeeded");
            metrics::counter!("auth_client_refresh_total", "outcome" => "success").increment(1);
            Ok(pair)
        }
        Err(RefreshError::Superseded) => {
            info!(exchange_id = id, "session changed during refresh, discarding result");
            metrics::counter!("auth_client_refresh_total", "outcome" => "superseded").increment(1);
            Err(RefreshError::Superseded)
        }
        Err(e) => {
            metrics::counter!("auth_client_refresh_total", "outcome" => "failure").increment(1);
            // Late 401s must find an empty store, not the dead refresh token
            if inner.store.clear_if_revision(revision).await {
                warn!(exchange_id = id, error = %e, "token refresh failed, credentials cleared");
                Err(e)
            } else {
                info!(exchange_id = id, error = %e, "token refresh failed after session changed");
                Err(RefreshError::Superseded)
            }
        }
    };

    let mut slot = inner.slot.lock().await;
    if slot.as_ref().is_some_and(|f| f.id == id) {
        *slot = None;
    }
    outcome
}

/// Best-effort revocation of a pair nobody will ever use.
async fn revoke_orphan(inner: &Inner, id: u64, refresh: &Secret<String>) {
    if let Err(e) = backend_auth::logout(&inner.http, &inner.base_url, refresh.expose_str()).await {
        debug!(exchange_id = id, error = %e, "could not revoke discarded refresh token");
    }
}
