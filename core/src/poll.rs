//! Cancellable fixed-interval driver for the fetch+compute cycle.

use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct ActivePoll {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Drives a recurring action every fixed interval.
///
/// Ticks are allowed to overlap: each tick spawns the action rather than
/// awaiting it, so a slow cycle never delays the next one. `stop` and
/// `reset` are race-free (the active poll lives behind one mutex-guarded
/// slot); cancellation suppresses future ticks but does not abort an
/// action that is already running.
#[derive(Default)]
pub struct PollingScheduler {
    active: Mutex<Option<ActivePoll>>,
}

impl PollingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begins invoking `action` every `interval`, replacing and cancelling
    /// any poll that was already running. The first invocation lands one
    /// interval after start.
    pub fn start<F, Fut>(&self, interval: Duration, action: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let tick_token = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // interval() fires immediately; swallow the zeroth tick.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = tick_token.cancelled() => break,
                    _ = ticker.tick() => {
                        tokio::spawn(action());
                    }
                }
            }
        });

        if let Some(previous) = self.slot().replace(ActivePoll { token, handle }) {
            previous.token.cancel();
        }
    }

    /// Cancels pending invocations. An action already running finishes on
    /// its own; stale-response suppression downstream handles its result.
    pub fn stop(&self) {
        if let Some(active) = self.slot().take() {
            active.token.cancel();
            active.handle.abort();
        }
    }

    /// Atomically stops the running poll and starts a new one, so the next
    /// tick uses the new interval and action instead of a stale closure.
    pub fn reset<F, Fut>(&self, interval: Duration, action: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.start(interval, action);
    }

    /// Whether a poll is currently scheduled.
    pub fn is_running(&self) -> bool {
        self.slot()
            .as_ref()
            .is_some_and(|active| !active.token.is_cancelled())
    }

    fn slot(&self) -> MutexGuard<'_, Option<ActivePoll>> {
        match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for PollingScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
