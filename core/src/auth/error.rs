//! Error types for the session/token lifecycle.

use thiserror::Error;

use super::store::StoreError;

/// Failures surfaced by login, refresh, and token persistence.
///
/// Cloneable so a single in-flight refresh outcome can be handed to every
/// caller that coalesced onto it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The auth endpoint rejected the supplied credentials.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// The endpoint was unreachable or answered with a server error.
    #[error("network error: {0}")]
    Network(String),

    /// A refresh was requested but no refresh token is available.
    #[error("no refresh token available")]
    NoRefreshToken,

    /// The token endpoint rejected the refresh token.
    #[error("refresh rejected by the token endpoint")]
    RefreshRejected,

    /// Token persistence failed.
    #[error("token store error: {0}")]
    Store(String),
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        AuthError::Store(err.to_string())
    }
}
