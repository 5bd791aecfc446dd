//! Derived dashboard metrics over the project dataset.
//!
//! [`compute`] is a pure function of a record collection and a reference
//! time; fetching the collection is the separate concern of
//! [`HttpQueryClient`].

mod client;
mod filter;

pub use client::{HttpQueryClient, QueryApi, QueryError, QueryResponse, UserExpense};
pub use filter::FilterSpec;

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

/// One project/workspace entry as returned by the data endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(default)]
    pub project_id: String,

    #[serde(default)]
    pub status: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub owner: String,

    #[serde(default)]
    pub created_by: String,

    /// Role to username; values may repeat across roles.
    #[serde(default)]
    pub members: HashMap<String, String>,

    #[serde(default)]
    pub cost: f64,

    #[serde(default)]
    pub items: u64,

    pub created_on: DateTime<Utc>,

    #[serde(default)]
    pub repo: Option<String>,
}

/// Summary statistics surfaced on the dashboard.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DerivedMetrics {
    pub total_projects: usize,
    pub new_projects_this_month: usize,
    pub total_developers: usize,
    pub generated_artifacts: usize,
    pub total_cost: f64,
    pub average_engagement: f64,
}

/// Derives the dashboard summary from a record collection.
///
/// Pure and deterministic: one pass over the records plus a string-set
/// union for developer uniqueness. `new_projects_this_month` compares the
/// calendar month and year of `now`, not an elapsed duration.
/// `average_engagement` is 0 for an empty collection, never NaN.
pub fn compute(records: &[RawRecord], now: DateTime<Utc>) -> DerivedMetrics {
    let mut developers: HashSet<&str> = HashSet::new();
    let mut new_this_month = 0;
    let mut artifacts = 0;
    let mut total_cost = 0.0;
    let mut total_items: u64 = 0;

    for record in records {
        if record.created_on.month() == now.month() && record.created_on.year() == now.year() {
            new_this_month += 1;
        }

        // Creator, owner, and every member value count toward the
        // developer set; comparison is exact-string, empties excluded.
        for name in [record.created_by.as_str(), record.owner.as_str()]
            .into_iter()
            .chain(record.members.values().map(String::as_str))
        {
            if !name.is_empty() {
                developers.insert(name);
            }
        }

        if record.repo.as_deref().is_some_and(|repo| !repo.trim().is_empty()) {
            artifacts += 1;
        }

        total_cost += record.cost;
        total_items += record.items;
    }

    let total_projects = records.len();
    let average_engagement = if total_projects > 0 {
        total_items as f64 / total_projects as f64
    } else {
        0.0
    };

    DerivedMetrics {
        total_projects,
        new_projects_this_month: new_this_month,
        total_developers: developers.len(),
        generated_artifacts: artifacts,
        total_cost,
        average_engagement,
    }
}
