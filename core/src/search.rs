//! Persisted history of recent search terms.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::StoreError;

/// File holding the search history.
const SEARCHES_FILE: &str = "recent_searches.json";

/// Maximum number of remembered terms.
const MAX_ENTRIES: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchEntry {
    pub term: String,
    pub last_used: DateTime<Utc>,
    pub frequency: u32,
}

/// The last few search terms, most frequent first with recency breaking
/// ties, capped at [`MAX_ENTRIES`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchHistory {
    #[serde(default)]
    entries: Vec<SearchEntry>,
}

impl SearchHistory {
    /// Records one use of `term`. A known term gets its frequency and
    /// timestamp bumped; a new term evicts the least-ranked entry once
    /// the cap is reached. Blank terms are ignored.
    pub fn record(&mut self, term: &str, now: DateTime<Utc>) {
        let term = term.trim();
        if term.is_empty() {
            return;
        }

        match self.entries.iter_mut().find(|entry| entry.term == term) {
            Some(entry) => {
                entry.frequency += 1;
                entry.last_used = now;
            }
            None => self.entries.push(SearchEntry {
                term: term.to_string(),
                last_used: now,
                frequency: 1,
            }),
        }

        self.entries.sort_by(|a, b| {
            b.frequency
                .cmp(&a.frequency)
                .then(b.last_used.cmp(&a.last_used))
        });
        self.entries.truncate(MAX_ENTRIES);
    }

    pub fn entries(&self) -> &[SearchEntry] {
        &self.entries
    }

    /// Loads the history from the profile dir; a missing file reads as an
    /// empty history.
    pub fn load(home: &Path) -> Result<Self, StoreError> {
        let path = home.join(SEARCHES_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    }

    /// Saves the history into the profile dir.
    pub fn save(&self, home: &Path) -> Result<(), StoreError> {
        std::fs::create_dir_all(home)?;
        std::fs::write(
            home.join(SEARCHES_FILE),
            serde_json::to_string_pretty(self)?,
        )?;
        Ok(())
    }
}
