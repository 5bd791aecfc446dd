//! Core library for the workboard dashboard client.
//!
//! The load-bearing piece is the session/token lifecycle in [`auth`]: an
//! explicit state machine that owns the bearer-token pair, persists it
//! across restarts, coalesces concurrent refresh attempts into a single
//! endpoint call, and escalates repeated refresh failures into a forced
//! logout. Next to it, [`metrics`] and [`dashboard`] derive the summary
//! statistics shown on the dashboard from a filtered dataset fetched on a
//! polling interval driven by [`poll`].
//!
//! All shared state has a single logical owner; consumers observe changes
//! through returned values or `tokio::sync::watch` subscriptions instead of
//! mutating another component's state.

pub mod auth;
pub mod config;
pub mod dashboard;
pub mod metrics;
pub mod poll;
pub mod search;

pub use auth::{AuthError, AuthSessionManager, Session, SessionState, TokenStore};
pub use dashboard::DashboardFeed;
pub use metrics::{DerivedMetrics, FilterSpec, QueryError, RawRecord};
pub use poll::PollingScheduler;
