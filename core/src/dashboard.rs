//! Fetch-and-aggregate cycle with completion-order stale suppression.
//!
//! Responses are applied in completion order, not issue order: every fetch
//! is tagged with the sequence number it was issued under, and a completed
//! response is discarded when a later-issued fetch has already been
//! applied. A filter change does not retroactively cancel an in-flight
//! fetch (its result still applies unless a newer one landed first);
//! logout does, via [`DashboardFeed::invalidate`]. There is no hard abort
//! of the network call, only suppression of its effect.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, watch};

use crate::metrics::{
    self, DerivedMetrics, FilterSpec, QueryApi, QueryError, RawRecord, UserExpense,
};

struct FeedState {
    filter: FilterSpec,
    /// Sequence number of the most recently issued fetch.
    issued: u64,
    /// Sequence number of the most recently applied response.
    applied: u64,
    records: Vec<RawRecord>,
    expenses: Vec<UserExpense>,
}

/// Owns the dashboard dataset and its derived metrics.
pub struct DashboardFeed {
    api: Arc<dyn QueryApi>,
    state: Mutex<FeedState>,
    metrics_tx: watch::Sender<DerivedMetrics>,
}

impl DashboardFeed {
    pub fn new(api: Arc<dyn QueryApi>) -> Self {
        let (metrics_tx, _) = watch::channel(DerivedMetrics::default());
        Self {
            api,
            state: Mutex::new(FeedState {
                filter: FilterSpec::default(),
                issued: 0,
                applied: 0,
                records: Vec::new(),
                expenses: Vec::new(),
            }),
            metrics_tx,
        }
    }

    /// Subscribes to derived-metrics updates.
    pub fn subscribe(&self) -> watch::Receiver<DerivedMetrics> {
        self.metrics_tx.subscribe()
    }

    /// Latest applied metrics.
    pub fn metrics(&self) -> DerivedMetrics {
        self.metrics_tx.borrow().clone()
    }

    /// Installs a new filter; the next fetch uses it. Fetches already in
    /// flight under the previous filter stay valid until a newer response
    /// is applied.
    pub async fn set_filter(&self, filter: FilterSpec) {
        self.state.lock().await.filter = filter;
    }

    /// Suppresses every in-flight fetch and clears the dataset. Used on
    /// logout so a late response cannot repopulate a dead session's view.
    pub async fn invalidate(&self) {
        let mut state = self.state.lock().await;
        state.applied = state.issued;
        state.records.clear();
        state.expenses.clear();
        self.metrics_tx.send_replace(DerivedMetrics::default());
    }

    /// One fetch+compute cycle under the current filter.
    ///
    /// Errors leave the applied dataset untouched. A response that lost
    /// the completion-order race is discarded and the current metrics are
    /// returned instead.
    pub async fn refresh(&self, access_token: &str) -> Result<DerivedMetrics, QueryError> {
        let (seq, filter) = {
            let mut state = self.state.lock().await;
            state.issued += 1;
            (state.issued, state.filter.clone())
        };

        let response = self.api.fetch(&filter, access_token).await?;

        let mut state = self.state.lock().await;
        if seq <= state.applied {
            tracing::debug!(seq, applied = state.applied, "discarding stale fetch result");
            return Ok(self.metrics());
        }

        state.applied = seq;
        state.records = response.build_space;
        state.expenses = response.user_expense;
        let derived = metrics::compute(&state.records, Utc::now());
        tracing::debug!(
            total = derived.total_projects,
            "applied fetch result {seq}"
        );
        self.metrics_tx.send_replace(derived.clone());
        Ok(derived)
    }

    /// Per-user spend from the last applied response.
    pub async fn expenses(&self) -> Vec<UserExpense> {
        self.state.lock().await.expenses.clone()
    }
}
