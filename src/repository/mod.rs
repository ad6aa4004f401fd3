//! Durable run state
//!
//! State is loaded once at run start and flushed once at run end through a
//! [`StateStore`]; nothing is written mid-run.

mod json_file;
mod memory;

pub use json_file::JsonFileStore;
pub use memory::MemoryStateStore;

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::SourceState;

/// Everything carried from one run to the next
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    /// Every normalized URL ever seen
    pub history: BTreeSet<String>,
    /// Alive sources published by the previous run
    pub live: Vec<String>,
    /// Rate-limit records by URL; entries are never removed
    pub rate_limits: BTreeMap<String, SourceState>,
    /// Date each URL was first seen alive
    pub first_seen: BTreeMap<String, NaiveDate>,
    /// Registration date by key hash
    pub registration_dates: BTreeMap<String, NaiveDate>,
    /// URLs a new-source notification was already sent for
    pub notified: BTreeSet<String>,
}

impl PersistedState {
    /// Record first-seen dates for newly alive sources; existing dates are kept
    pub fn record_first_seen<'a>(
        &mut self,
        urls: impl IntoIterator<Item = &'a String>,
        today: NaiveDate,
    ) {
        for url in urls {
            self.first_seen.entry(url.clone()).or_insert(today);
        }
    }
}

/// Load/flush access to the durable state
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self) -> Result<PersistedState>;

    async fn flush(&self, state: &PersistedState) -> Result<()>;
}
