//! Session/token lifecycle: persistence, login, refresh, escalation.
//!
//! The session moves through an explicit state machine:
//!
//! ```text
//! Unauthenticated --login--> Authenticating --ok--> Authenticated
//!                                           --err-> Unauthenticated
//! Authenticated --refresh--> Refreshing --ok--> Authenticated
//!                                       --err-> Degraded(n)
//! Degraded(n>=2) --refresh err--> ForcedLogout (terminal until login)
//! any state --logout--> Unauthenticated
//! ```
//!
//! [`TokenStore`] is the only reader/writer of the persisted token pair;
//! [`AuthSessionManager`] is the only owner of the in-memory session.

mod client;
mod error;
mod manager;
mod store;

pub use client::{AuthApi, HttpAuthClient, LoginResponse};
pub use error::AuthError;
pub use manager::{AuthSessionManager, FORCED_LOGOUT_DELAY, Session, SessionState};
pub use store::{PersistedTokens, StoreError, TokenStore};
