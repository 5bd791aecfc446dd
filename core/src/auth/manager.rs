//! Session state machine: login, logout, refresh, failure escalation.
//!
//! The manager is the single owner of the in-memory [`Session`]. Consumers
//! observe state changes through [`AuthSessionManager::subscribe`]; nothing
//! outside this module mutates session state directly.
//!
//! Concurrency rules:
//! - At most one refresh call is ever in flight. Concurrent `refresh()`
//!   callers queue on a gate; whoever acquires it first performs the
//!   attempt, and everyone who arrived while it ran receives that same
//!   outcome without issuing a second endpoint call.
//! - Login and refresh completions are epoch-tagged: if a logout (or a
//!   newer login) tore the session down while the request was in flight,
//!   the late result is discarded instead of overwriting fresher state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, watch};

use super::client::AuthApi;
use super::error::AuthError;
use super::store::TokenStore;

/// Delay between a forced logout and the client reset hook, giving the
/// host a chance to flush pending output.
pub const FORCED_LOGOUT_DELAY: Duration = Duration::from_millis(1500);

/// Consecutive refresh failures tolerated before the session is torn down.
const MAX_REFRESH_FAILURES: u32 = 3;

/// Where the session currently sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    /// A login call is in flight.
    Authenticating,
    Authenticated,
    /// A refresh call is in flight.
    Refreshing,
    /// `n` consecutive refreshes have failed; `n` is never zero.
    Degraded(u32),
    /// Terminal until the next `login`.
    ForcedLogout,
}

/// In-memory session owned by [`AuthSessionManager`].
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    /// Only meaningful while both tokens are present. Empty when the
    /// session was restored from persisted tokens.
    pub identity: String,
    pub failure_count: u32,
}

struct Inner {
    session: Session,
    state: SessionState,
    /// Bumped whenever the session is torn down or replaced. An async
    /// operation applies its result only if the epoch it captured is
    /// still current.
    epoch: u64,
}

struct RefreshGate {
    /// Outcome of the most recent attempt, fanned out to coalesced
    /// waiters.
    last_outcome: Option<Result<(), AuthError>>,
}

/// Owns the session lifecycle: login, logout, token refresh, and the
/// escalation of repeated refresh failures into a forced logout.
pub struct AuthSessionManager {
    api: Arc<dyn AuthApi>,
    store: TokenStore,
    inner: Mutex<Inner>,
    gate: Mutex<RefreshGate>,
    /// Completed refresh attempts. Read before taking the gate so a
    /// caller that queued behind an in-flight attempt can tell that an
    /// attempt finished while it waited.
    refresh_attempts: AtomicU64,
    state_tx: watch::Sender<SessionState>,
    forced_logout_delay: Duration,
    reset_hook: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl AuthSessionManager {
    /// Creates a manager, restoring a persisted session when both tokens
    /// are present. Persisted tokens are trusted until an actual call
    /// rejects them; no network traffic happens here.
    pub fn new(api: Arc<dyn AuthApi>, store: TokenStore) -> Result<Self, AuthError> {
        let tokens = store.load()?;
        let (session, state) = if tokens.is_complete() {
            tracing::info!("restored persisted session");
            (
                Session {
                    access_token: tokens.access_token,
                    refresh_token: tokens.refresh_token,
                    identity: String::new(),
                    failure_count: 0,
                },
                SessionState::Authenticated,
            )
        } else {
            (Session::default(), SessionState::Unauthenticated)
        };

        let (state_tx, _) = watch::channel(state);
        Ok(Self {
            api,
            store,
            inner: Mutex::new(Inner {
                session,
                state,
                epoch: 0,
            }),
            gate: Mutex::new(RefreshGate { last_outcome: None }),
            refresh_attempts: AtomicU64::new(0),
            state_tx,
            forced_logout_delay: FORCED_LOGOUT_DELAY,
            reset_hook: None,
        })
    }

    /// Installs the hook run after a forced logout (the host's "full
    /// client reset" seam).
    pub fn with_reset_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.reset_hook = Some(Arc::new(hook));
        self
    }

    /// Overrides the forced-logout delay.
    pub fn with_forced_logout_delay(mut self, delay: Duration) -> Self {
        self.forced_logout_delay = delay;
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Subscribes to lifecycle state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Snapshot of the in-memory session.
    pub async fn session(&self) -> Session {
        self.inner.lock().await.session.clone()
    }

    /// The current access token, if authenticated.
    pub async fn access_token(&self) -> Option<String> {
        self.inner.lock().await.session.access_token.clone()
    }

    /// Authenticates against the auth endpoint.
    ///
    /// On success both tokens are persisted, the identity is taken from
    /// the credentials used, and any failure escalation is reset. On
    /// failure the session stays `Unauthenticated` and the error carries
    /// a human-readable message.
    pub async fn login(&self, email: &str, password: &str) -> Result<(), AuthError> {
        let epoch = {
            let mut inner = self.inner.lock().await;
            inner.epoch += 1;
            self.set_state(&mut inner, SessionState::Authenticating);
            inner.epoch
        };

        let result = self.api.authenticate(email, password).await;

        let mut inner = self.inner.lock().await;
        if inner.epoch != epoch {
            tracing::debug!("discarding superseded login result");
            return result.map(|_| ());
        }

        match result {
            Ok(body) => match (body.token, body.refresh_token) {
                (Some(access), Some(refresh)) => {
                    if let Err(err) = self.store.save(&access, &refresh) {
                        self.set_state(&mut inner, SessionState::Unauthenticated);
                        return Err(err.into());
                    }
                    inner.session = Session {
                        access_token: Some(access),
                        refresh_token: Some(refresh),
                        identity: email.to_string(),
                        failure_count: 0,
                    };
                    self.set_state(&mut inner, SessionState::Authenticated);
                    tracing::info!(login_count = body.login_count, "login succeeded");
                    Ok(())
                }
                _ => {
                    self.set_state(&mut inner, SessionState::Unauthenticated);
                    Err(AuthError::Network(
                        "authenticate response missing tokens".to_string(),
                    ))
                }
            },
            Err(err) => {
                tracing::warn!("login failed: {err}");
                self.set_state(&mut inner, SessionState::Unauthenticated);
                Err(err)
            }
        }
    }

    /// Mints a new access token from the stored refresh token.
    ///
    /// Callers invoke this when the data layer judges the access token
    /// stale (typically on a 401). Concurrent callers coalesce onto the
    /// single in-flight attempt and all resolve with its outcome; the
    /// endpoint never sees two simultaneous refresh calls for one session.
    pub async fn refresh(&self) -> Result<(), AuthError> {
        let observed = self.refresh_attempts.load(Ordering::Acquire);

        let mut gate = self.gate.lock().await;
        if self.refresh_attempts.load(Ordering::Acquire) != observed {
            // An attempt completed while this caller waited for the gate;
            // adopt its outcome instead of issuing another call.
            tracing::debug!("refresh coalesced onto completed attempt");
            return gate.last_outcome.clone().unwrap_or(Ok(()));
        }

        let outcome = self.refresh_attempt().await;
        gate.last_outcome = Some(outcome.clone());
        self.refresh_attempts.fetch_add(1, Ordering::Release);
        outcome
    }

    /// Clears all session state, persisted and in memory. Valid from any
    /// state, including `ForcedLogout`.
    pub async fn logout(&self) -> Result<(), AuthError> {
        let mut inner = self.inner.lock().await;
        self.store.clear()?;
        inner.session = Session::default();
        inner.epoch += 1;
        self.set_state(&mut inner, SessionState::Unauthenticated);
        tracing::info!("logged out");
        Ok(())
    }

    async fn refresh_attempt(&self) -> Result<(), AuthError> {
        let (refresh_token, epoch) = {
            let mut inner = self.inner.lock().await;
            if inner.state == SessionState::ForcedLogout {
                return Err(AuthError::NoRefreshToken);
            }
            match inner.session.refresh_token.clone() {
                Some(token) => {
                    self.set_state(&mut inner, SessionState::Refreshing);
                    (token, inner.epoch)
                }
                None => {
                    // Nothing to retry with; counts as a refresh failure.
                    return Err(self.escalate(&mut inner, AuthError::NoRefreshToken));
                }
            }
        };

        let result = self.api.generate_access_token(&refresh_token).await;

        let mut inner = self.inner.lock().await;
        if inner.epoch != epoch {
            tracing::debug!("discarding superseded refresh result");
            return result.map(|_| ());
        }

        match result {
            Ok(access) => {
                if let Err(err) = self.store.save_access(&access) {
                    tracing::warn!("refreshed token could not be persisted: {err}");
                }
                inner.session.access_token = Some(access);
                inner.session.failure_count = 0;
                self.set_state(&mut inner, SessionState::Authenticated);
                tracing::info!("access token refreshed");
                Ok(())
            }
            Err(err @ AuthError::Network(_)) => {
                // Transport trouble is not evidence the refresh token is
                // bad: restore the prior state, leave the counter and the
                // stored tokens untouched.
                let prior = if inner.session.failure_count == 0 {
                    SessionState::Authenticated
                } else {
                    SessionState::Degraded(inner.session.failure_count)
                };
                self.set_state(&mut inner, prior);
                Err(err)
            }
            Err(err) => Err(self.escalate(&mut inner, err)),
        }
    }

    /// Records a refresh failure: bump the counter, drop the persisted
    /// tokens, and either degrade or, at the third consecutive failure,
    /// force a logout.
    fn escalate(&self, inner: &mut Inner, err: AuthError) -> AuthError {
        inner.session.failure_count += 1;
        let failures = inner.session.failure_count;

        if let Err(store_err) = self.store.clear() {
            tracing::warn!("failed to clear persisted tokens: {store_err}");
        }

        if failures >= MAX_REFRESH_FAILURES {
            tracing::error!(failures, "refresh failed repeatedly, forcing logout");
            inner.session = Session::default();
            inner.epoch += 1;
            self.set_state(inner, SessionState::ForcedLogout);
            self.schedule_reset();
        } else {
            tracing::warn!(failures, "refresh failed: {err}");
            inner.session.access_token = None;
            self.set_state(inner, SessionState::Degraded(failures));
        }
        err
    }

    fn schedule_reset(&self) {
        let Some(hook) = self.reset_hook.clone() else {
            return;
        };
        let delay = self.forced_logout_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            hook();
        });
    }

    fn set_state(&self, inner: &mut Inner, state: SessionState) {
        inner.state = state;
        self.state_tx.send_replace(state);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::auth::client::LoginResponse;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::tempdir;
    use tokio::sync::Semaphore;

    fn ok_login() -> LoginResponse {
        LoginResponse {
            status: true,
            token: Some("acc-1".to_string()),
            refresh_token: Some("ref-1".to_string()),
            login_count: 1,
        }
    }

    /// Scripted endpoint double: pops queued results, or falls back to a
    /// default success.
    struct ScriptedApi {
        login_results: std::sync::Mutex<VecDeque<Result<LoginResponse, AuthError>>>,
        refresh_results: std::sync::Mutex<VecDeque<Result<String, AuthError>>>,
        refresh_calls: AtomicUsize,
    }

    impl ScriptedApi {
        fn new() -> Self {
            Self {
                login_results: std::sync::Mutex::new(VecDeque::new()),
                refresh_results: std::sync::Mutex::new(VecDeque::new()),
                refresh_calls: AtomicUsize::new(0),
            }
        }

        fn push_login(&self, result: Result<LoginResponse, AuthError>) {
            self.login_results.lock().unwrap().push_back(result);
        }

        fn push_refresh(&self, result: Result<String, AuthError>) {
            self.refresh_results.lock().unwrap().push_back(result);
        }
    }

    #[async_trait]
    impl AuthApi for ScriptedApi {
        async fn authenticate(&self, _: &str, _: &str) -> Result<LoginResponse, AuthError> {
            self.login_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ok_login()))
        }

        async fn generate_access_token(&self, _: &str) -> Result<String, AuthError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            self.refresh_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("acc-fresh".to_string()))
        }
    }

    fn manager_with(api: Arc<ScriptedApi>, dir: &tempfile::TempDir) -> AuthSessionManager {
        AuthSessionManager::new(api, TokenStore::new(dir.path())).unwrap()
    }

    #[tokio::test]
    async fn login_success_persists_tokens_and_resets_failures() {
        let dir = tempdir().unwrap();
        let api = Arc::new(ScriptedApi::new());
        let manager = manager_with(Arc::clone(&api), &dir);

        manager.login("a@b.c", "pw").await.unwrap();

        assert_eq!(SessionState::Authenticated, manager.state());
        let session = manager.session().await;
        assert_eq!("a@b.c", session.identity);
        assert_eq!(0, session.failure_count);

        let stored = TokenStore::new(dir.path()).load().unwrap();
        assert_eq!(Some("acc-1".to_string()), stored.access_token);
        assert_eq!(Some("ref-1".to_string()), stored.refresh_token);
    }

    #[tokio::test]
    async fn login_failure_leaves_session_unauthenticated() {
        let dir = tempdir().unwrap();
        let api = Arc::new(ScriptedApi::new());
        api.push_login(Err(AuthError::InvalidCredentials));
        let manager = manager_with(Arc::clone(&api), &dir);

        let err = manager.login("a@b.c", "wrong").await.unwrap_err();
        assert_eq!(AuthError::InvalidCredentials, err);
        assert_eq!(SessionState::Unauthenticated, manager.state());
        assert!(manager.access_token().await.is_none());
    }

    #[tokio::test]
    async fn startup_restores_persisted_session_without_network() {
        let dir = tempdir().unwrap();
        TokenStore::new(dir.path()).save("acc-0", "ref-0").unwrap();

        let api = Arc::new(ScriptedApi::new());
        let manager = manager_with(Arc::clone(&api), &dir);

        assert_eq!(SessionState::Authenticated, manager.state());
        assert_eq!(Some("acc-0".to_string()), manager.access_token().await);
        // Identity is not recoverable from persisted tokens.
        assert_eq!("", manager.session().await.identity);
    }

    #[tokio::test]
    async fn startup_with_incomplete_tokens_is_unauthenticated() {
        let dir = tempdir().unwrap();
        let api = Arc::new(ScriptedApi::new());
        let manager = manager_with(Arc::clone(&api), &dir);
        assert_eq!(SessionState::Unauthenticated, manager.state());
    }

    #[tokio::test]
    async fn refresh_success_persists_new_access_token() {
        let dir = tempdir().unwrap();
        let api = Arc::new(ScriptedApi::new());
        let manager = manager_with(Arc::clone(&api), &dir);
        manager.login("a@b.c", "pw").await.unwrap();

        api.push_refresh(Ok("acc-2".to_string()));
        manager.refresh().await.unwrap();

        assert_eq!(SessionState::Authenticated, manager.state());
        assert_eq!(0, manager.session().await.failure_count);
        let stored = TokenStore::new(dir.path()).load().unwrap();
        assert_eq!(Some("acc-2".to_string()), stored.access_token);
        assert_eq!(Some("ref-1".to_string()), stored.refresh_token);
    }

    #[tokio::test]
    async fn rejected_refresh_degrades_and_clears_persisted_tokens() {
        let dir = tempdir().unwrap();
        let api = Arc::new(ScriptedApi::new());
        let manager = manager_with(Arc::clone(&api), &dir);
        manager.login("a@b.c", "pw").await.unwrap();

        api.push_refresh(Err(AuthError::RefreshRejected));
        let err = manager.refresh().await.unwrap_err();

        assert_eq!(AuthError::RefreshRejected, err);
        assert_eq!(SessionState::Degraded(1), manager.state());
        assert!(!TokenStore::new(dir.path()).load().unwrap().is_complete());
        // The refresh token stays in memory so a retry is possible.
        assert!(manager.session().await.refresh_token.is_some());
    }

    #[tokio::test]
    async fn third_consecutive_rejection_forces_logout() {
        let dir = tempdir().unwrap();
        let api = Arc::new(ScriptedApi::new());
        let manager = manager_with(Arc::clone(&api), &dir);
        manager.login("a@b.c", "pw").await.unwrap();

        for _ in 0..3 {
            api.push_refresh(Err(AuthError::RefreshRejected));
            let _ = manager.refresh().await;
        }

        assert_eq!(SessionState::ForcedLogout, manager.state());
        let session = manager.session().await;
        assert!(session.access_token.is_none());
        assert!(session.refresh_token.is_none());
    }

    #[tokio::test]
    async fn two_rejections_do_not_force_logout() {
        let dir = tempdir().unwrap();
        let api = Arc::new(ScriptedApi::new());
        let manager = manager_with(Arc::clone(&api), &dir);
        manager.login("a@b.c", "pw").await.unwrap();

        for _ in 0..2 {
            api.push_refresh(Err(AuthError::RefreshRejected));
            let _ = manager.refresh().await;
        }
        assert_eq!(SessionState::Degraded(2), manager.state());
    }

    #[tokio::test]
    async fn successful_refresh_resets_the_escalation_counter() {
        let dir = tempdir().unwrap();
        let api = Arc::new(ScriptedApi::new());
        let manager = manager_with(Arc::clone(&api), &dir);
        manager.login("a@b.c", "pw").await.unwrap();

        for _ in 0..2 {
            api.push_refresh(Err(AuthError::RefreshRejected));
            let _ = manager.refresh().await;
        }
        api.push_refresh(Ok("acc-2".to_string()));
        manager.refresh().await.unwrap();

        // Two further rejections only degrade again; the window restarted.
        for _ in 0..2 {
            api.push_refresh(Err(AuthError::RefreshRejected));
            let _ = manager.refresh().await;
        }
        assert_eq!(SessionState::Degraded(2), manager.state());
    }

    #[tokio::test]
    async fn network_failure_during_refresh_does_not_escalate() {
        let dir = tempdir().unwrap();
        let api = Arc::new(ScriptedApi::new());
        let manager = manager_with(Arc::clone(&api), &dir);
        manager.login("a@b.c", "pw").await.unwrap();

        api.push_refresh(Err(AuthError::Network("timed out".to_string())));
        let err = manager.refresh().await.unwrap_err();

        assert!(matches!(err, AuthError::Network(_)));
        assert_eq!(SessionState::Authenticated, manager.state());
        assert_eq!(0, manager.session().await.failure_count);
        assert!(TokenStore::new(dir.path()).load().unwrap().is_complete());
    }

    #[tokio::test]
    async fn refresh_without_token_escalates_no_refresh_token() {
        let dir = tempdir().unwrap();
        let api = Arc::new(ScriptedApi::new());
        let manager = manager_with(Arc::clone(&api), &dir);

        let err = manager.refresh().await.unwrap_err();
        assert_eq!(AuthError::NoRefreshToken, err);
        assert_eq!(SessionState::Degraded(1), manager.state());
        assert_eq!(0, api.refresh_calls.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn logout_is_valid_from_any_state() {
        let dir = tempdir().unwrap();
        let api = Arc::new(ScriptedApi::new());
        let manager = manager_with(Arc::clone(&api), &dir);
        manager.login("a@b.c", "pw").await.unwrap();

        api.push_refresh(Err(AuthError::RefreshRejected));
        let _ = manager.refresh().await;
        assert_eq!(SessionState::Degraded(1), manager.state());

        manager.logout().await.unwrap();
        assert_eq!(SessionState::Unauthenticated, manager.state());
        assert_eq!(0, manager.session().await.failure_count);
        assert!(!TokenStore::new(dir.path()).load().unwrap().is_complete());
    }

    #[tokio::test]
    async fn forced_logout_notifies_observers_and_runs_reset_hook() {
        let dir = tempdir().unwrap();
        let api = Arc::new(ScriptedApi::new());
        let fired = Arc::new(AtomicBool::new(false));
        let fired_by_hook = Arc::clone(&fired);
        let manager = manager_with(Arc::clone(&api), &dir)
            .with_forced_logout_delay(Duration::from_millis(10))
            .with_reset_hook(move || {
                fired_by_hook.store(true, Ordering::SeqCst);
            });
        manager.login("a@b.c", "pw").await.unwrap();

        let mut states = manager.subscribe();
        for _ in 0..3 {
            api.push_refresh(Err(AuthError::RefreshRejected));
            let _ = manager.refresh().await;
        }

        states
            .wait_for(|state| *state == SessionState::ForcedLogout)
            .await
            .unwrap();
        assert!(!fired.load(Ordering::SeqCst), "hook must run after delay");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn login_restarts_the_cycle_after_forced_logout() {
        let dir = tempdir().unwrap();
        let api = Arc::new(ScriptedApi::new());
        let manager = manager_with(Arc::clone(&api), &dir);
        manager.login("a@b.c", "pw").await.unwrap();

        for _ in 0..3 {
            api.push_refresh(Err(AuthError::RefreshRejected));
            let _ = manager.refresh().await;
        }
        assert_eq!(SessionState::ForcedLogout, manager.state());

        manager.login("a@b.c", "pw").await.unwrap();
        assert_eq!(SessionState::Authenticated, manager.state());
        assert_eq!(0, manager.session().await.failure_count);
    }

    /// Endpoint double whose refresh call blocks until released, so a
    /// test can pile callers onto one in-flight attempt.
    struct BlockingApi {
        release: Semaphore,
        refresh_calls: AtomicUsize,
    }

    #[async_trait]
    impl AuthApi for BlockingApi {
        async fn authenticate(&self, _: &str, _: &str) -> Result<LoginResponse, AuthError> {
            Ok(ok_login())
        }

        async fn generate_access_token(&self, _: &str) -> Result<String, AuthError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            let permit = self.release.acquire().await.unwrap();
            permit.forget();
            Ok("acc-fresh".to_string())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_refreshes_coalesce_into_one_call() {
        let dir = tempdir().unwrap();
        let api = Arc::new(BlockingApi {
            release: Semaphore::new(0),
            refresh_calls: AtomicUsize::new(0),
        });
        let manager = Arc::new(
            AuthSessionManager::new(Arc::clone(&api) as Arc<dyn AuthApi>, TokenStore::new(dir.path()))
                .unwrap(),
        );
        manager.login("a@b.c", "pw").await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..5 {
            let manager = Arc::clone(&manager);
            handles.push(tokio::spawn(async move { manager.refresh().await }));
        }

        // Let every caller reach the gate, then release the one in-flight
        // endpoint call.
        tokio::time::sleep(Duration::from_millis(20)).await;
        api.release.add_permits(1);

        for outcome in futures::future::join_all(handles).await {
            outcome.unwrap().unwrap();
        }
        assert_eq!(1, api.refresh_calls.load(Ordering::SeqCst));
        assert_eq!(SessionState::Authenticated, manager.state());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn coalesced_waiters_share_a_failed_outcome() {
        struct RejectingBlockingApi {
            release: Semaphore,
            refresh_calls: AtomicUsize,
        }

        #[async_trait]
        impl AuthApi for RejectingBlockingApi {
            async fn authenticate(&self, _: &str, _: &str) -> Result<LoginResponse, AuthError> {
                Ok(ok_login())
            }

            async fn generate_access_token(&self, _: &str) -> Result<String, AuthError> {
                self.refresh_calls.fetch_add(1, Ordering::SeqCst);
                let permit = self.release.acquire().await.unwrap();
                permit.forget();
                Err(AuthError::RefreshRejected)
            }
        }

        let dir = tempdir().unwrap();
        let api = Arc::new(RejectingBlockingApi {
            release: Semaphore::new(0),
            refresh_calls: AtomicUsize::new(0),
        });
        let manager = Arc::new(
            AuthSessionManager::new(Arc::clone(&api) as Arc<dyn AuthApi>, TokenStore::new(dir.path()))
                .unwrap(),
        );
        manager.login("a@b.c", "pw").await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let manager = Arc::clone(&manager);
            handles.push(tokio::spawn(async move { manager.refresh().await }));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        api.release.add_permits(1);

        for outcome in futures::future::join_all(handles).await {
            assert_eq!(AuthError::RefreshRejected, outcome.unwrap().unwrap_err());
        }
        // One endpoint call, one counted failure.
        assert_eq!(1, api.refresh_calls.load(Ordering::SeqCst));
        assert_eq!(SessionState::Degraded(1), manager.state());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn logout_discards_in_flight_refresh_result() {
        let dir = tempdir().unwrap();
        let api = Arc::new(BlockingApi {
            release: Semaphore::new(0),
            refresh_calls: AtomicUsize::new(0),
        });
        let manager = Arc::new(
            AuthSessionManager::new(Arc::clone(&api) as Arc<dyn AuthApi>, TokenStore::new(dir.path()))
                .unwrap(),
        );
        manager.login("a@b.c", "pw").await.unwrap();

        let refresh = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.refresh().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        manager.logout().await.unwrap();
        api.release.add_permits(1);
        refresh.await.unwrap().unwrap();

        // The late refresh result must not resurrect the session.
        assert_eq!(SessionState::Unauthenticated, manager.state());
        assert!(manager.access_token().await.is_none());
        assert!(!TokenStore::new(dir.path()).load().unwrap().is_complete());
    }
}
