//! Authenticated HTTP client for the CMS backend
//!
//! Wraps every outbound request with credential injection and transparent
//! recovery from expired access tokens, and provides the session gate and
//! controller that sit on top of it.
//!
//! Request lifecycle:
//! 1. Caller builds an `ApiRequest` and hands it to `AuthClient::send`
//! 2. Stored access token attached as `Authorization: Bearer ...`
//! 3. 401 → `RefreshCoordinator::refresh` (one exchange per burst) → re-send once
//! 4. Refresh failure or a second 401 → credentials cleared, host navigated
//!    to `/login?redirect=...`, caller gets `Error::Unauthorized`
//! 5. Any other status is returned untouched

pub mod environment;
pub mod error;
pub mod gate;
pub mod pipeline;
pub mod refresh;
pub mod session;

pub use environment::{Clock, LoginRedirect, Navigator, SystemClock};
pub use error::{AuthError, Error, RefreshError, Result};
pub use gate::{GateAction, GateEvent, GateState, SessionGate, View, handle_event};
pub use pipeline::{ApiRequest, AuthClient};
pub use refresh::{RefreshCoordinator, RefreshOutcome};
pub use session::{AuthSession, Session};
