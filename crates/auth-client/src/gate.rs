//! Session gate for protected views
//!
//! Pure state machine: `handle_event` receives events and returns
//! `(new_state, action)`. `SessionGate::verify` executes the I/O implied by
//! each action against an `AuthClient`.
//!
//! States:
//! - `Verifying`: initial; the view renders a neutral loading state
//! - `Authorized`: identity confirmed; the view renders protected content
//! - `Unauthorized`: terminal; the view redirects to login with the original
//!   destination attached

use std::sync::atomic::{AtomicBool, Ordering};

use backend_auth::{LOGIN_ROUTE, UserProfile};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::environment::LoginRedirect;
use crate::pipeline::AuthClient;

#[derive(Debug, Clone, PartialEq)]
pub enum GateState {
    Verifying,
    Authorized(UserProfile),
    Unauthorized(LoginRedirect),
}

impl GateState {
    pub fn label(&self) -> &'static str {
        match self {
            GateState::Verifying => "verifying",
            GateState::Authorized(_) => "authorized",
            GateState::Unauthorized(_) => "unauthorized",
        }
    }
}

#[derive(Debug)]
pub enum GateEvent {
    /// No access token in the store
    TokenMissing,
    /// An access token exists and must be checked against the backend
    TokenPresent,
    /// Identity endpoint returned the user
    IdentityConfirmed(UserProfile),
    /// Identity call failed, including a failed refresh along the way
    IdentityRejected(String),
}

#[derive(Debug, PartialEq, Eq)]
pub enum GateAction {
    /// Call the identity endpoint through the pipeline
    VerifyIdentity,
    /// Drop the stored credentials
    ClearCredentials,
    None,
}

/// What a protected view should show right now.
#[derive(Debug, PartialEq)]
pub enum View<T> {
    Loading,
    Content(T),
    Redirect(LoginRedirect),
}

/// Apply one event. Authorized and Unauthorized ignore further events.
pub fn handle_event(
    state: GateState,
    event: GateEvent,
    redirect: &LoginRedirect,
) -> (GateState, GateAction) {
    match (state, event) {
        (GateState::Verifying, GateEvent::TokenMissing) => {
            (GateState::Unauthorized(redirect.clone()), GateAction::None)
        }
        (GateState::Verifying, GateEvent::TokenPresent) => {
            (GateState::Verifying, GateAction::VerifyIdentity)
        }
        (GateState::Verifying, GateEvent::IdentityConfirmed(user)) => {
            (GateState::Authorized(user), GateAction::None)
        }
        (GateState::Verifying, GateEvent::IdentityRejected(_)) => (
            GateState::Unauthorized(redirect.clone()),
            GateAction::ClearCredentials,
        ),
        (state, _) => (state, GateAction::None),
    }
}

/// Guard for one protected view instance.
pub struct SessionGate {
    redirect: LoginRedirect,
    state: watch::Sender<GateState>,
    started: AtomicBool,
    torn_down: AtomicBool,
}

impl SessionGate {
    /// Gate for `destination` using the default login route.
    pub fn new(destination: impl Into<String>) -> Self {
        Self::with_login_route(destination, LOGIN_ROUTE)
    }

    pub fn with_login_route(destination: impl Into<String>, login_route: &str) -> Self {
        Self {
            redirect: LoginRedirect::new(login_route, Some(destination.into())),
            state: watch::Sender::new(GateState::Verifying),
            started: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> GateState {
        self.state.borrow().clone()
    }

    /// Observe state transitions.
    pub fn subscribe(&self) -> watch::Receiver<GateState> {
        self.state.subscribe()
    }

    /// Detach the gate from its view. Results arriving later are discarded.
    pub fn teardown(&self) {
        self.torn_down.store(true, Ordering::Release);
    }

    fn apply(&self, event: GateEvent) -> GateAction {
        let current = self.state();
        let (next, action) = handle_event(current, event, &self.redirect);
        debug!(state = next.label(), ?action, "gate transition");
        self.state.send_replace(next);
        action
    }

    /// Run verification once and return the resulting state.
    ///
    /// A second call while verification is running returns `Verifying`
    /// without starting another identity call.
    pub async fn verify(&self, client: &AuthClient) -> GateState {
        if self.started.swap(true, Ordering::AcqRel) {
            return self.state();
        }

        let event = if client.store().access_token().await.is_some() {
            GateEvent::TokenPresent
        } else {
            GateEvent::TokenMissing
        };
        if self.apply(event) != GateAction::VerifyIdentity {
            return self.state();
        }

        let event = match client.current_user().await {
            Ok(user) => GateEvent::IdentityConfirmed(user),
            Err(e) => GateEvent::IdentityRejected(e.to_string()),
        };

        if self.torn_down.load(Ordering::Acquire) {
            debug!("gate torn down during verification, discarding result");
            return self.state();
        }

        if let GateEvent::IdentityRejected(reason) = &event {
            info!(reason = %reason, "session verification failed");
        }
        if self.apply(event) == GateAction::ClearCredentials {
            client.clear_session().await;
        }
        self.state()
    }

    /// Render for the current state. `content` runs only when Authorized.
    pub fn render<T>(&self, content: impl FnOnce(&UserProfile) -> T) -> View<T> {
        match &*self.state.borrow() {
            GateState::Verifying => View::Loading,
            GateState::Authorized(user) => View::Content(content(user)),
            GateState::Unauthorized(redirect) => View::Redirect(redirect.clone()),
        }
    }
}
