//! One end-to-end run
//!
//! Load state, refresh key quotas, discover candidates, fetch every source
//! on a bounded worker pool, aggregate in candidate order, announce new
//! sources, flush state and publish.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::aggregate::Aggregator;
use crate::config::Config;
use crate::error::{Result, SubError};
use crate::fetch::FetchEngine;
use crate::keys::KeyScheduler;
use crate::models::{RunSummary, SourceReport};
use crate::repository::{PersistedState, StateStore};
use crate::source::{normalize, SubscriptionUrl};

use super::discovery::Discovery;
use super::notify::{announce_new_sources, Notifier};
use super::publisher::Publisher;

/// Wires the collaborators of one run together
pub struct Pipeline {
    config: Config,
    store: Arc<dyn StateStore>,
    engine: Arc<FetchEngine>,
    discoveries: Vec<Arc<dyn Discovery>>,
    scheduler: Option<Arc<KeyScheduler>>,
    notifier: Arc<dyn Notifier>,
    aggregator: Aggregator,
    publisher: Publisher,
}

impl Pipeline {
    pub fn new(
        config: Config,
        store: Arc<dyn StateStore>,
        engine: Arc<FetchEngine>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let aggregator = Aggregator::new(config.aggregate.clone());
        let publisher = Publisher::new(config.paths.output_dir.clone());
        Self {
            config,
            store,
            engine,
            discoveries: Vec::new(),
            scheduler: None,
            notifier,
            aggregator,
            publisher,
        }
    }

    pub fn with_discovery(mut self, discovery: Arc<dyn Discovery>) -> Self {
        self.discoveries.push(discovery);
        self
    }

    pub fn with_scheduler(mut self, scheduler: Arc<KeyScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Load state from the store, then run
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<RunSummary> {
        let state = self.store.load().await?;
        self.run_with_state(state, shutdown).await
    }

    /// Run against already-loaded state
    ///
    /// State is flushed even when no source is usable; published artifacts
    /// are only replaced when at least one source is alive.
    #[instrument(skip_all, fields(history = state.history.len()))]
    pub async fn run_with_state(
        &self,
        mut state: PersistedState,
        shutdown: watch::Receiver<bool>,
    ) -> Result<RunSummary> {
        let started = Instant::now();

        let quota = match &self.scheduler {
            Some(scheduler) if !scheduler.is_empty() => {
                if let Err(e) = scheduler.refresh(false).await {
                    warn!("Quota refresh failed: {}", e);
                }
                Some(scheduler.snapshot())
            }
            _ => None,
        };

        let candidates = self.collect_candidates(&state).await;
        if *shutdown.borrow() {
            return Err(SubError::Cancelled);
        }

        self.engine.tracker().load(state.rate_limits.clone());
        let reports = self.process_all(&candidates, shutdown).await;
        if reports.len() < candidates.len() {
            warn!(
                processed = reports.len(),
                candidates = candidates.len(),
                "Run stopped before every candidate was scheduled"
            );
        }

        let now = Utc::now();
        let alive: Vec<String> = reports
            .iter()
            .filter(|r| r.outcome.is_alive())
            .map(|r| r.url.as_str().to_string())
            .collect();
        state.record_first_seen(&alive, now.date_naive());

        let mut snapshot = self
            .aggregator
            .aggregate(&reports, &state.live, &state.first_seen, now);
        snapshot.summary.quota = quota;

        state
            .history
            .extend(candidates.iter().map(|u| u.as_str().to_string()));
        state.rate_limits = self.engine.tracker().snapshot();

        if snapshot.alive_sources.is_empty() {
            self.store.flush(&state).await?;
            warn!(
                sources = snapshot.summary.sources_total,
                "No usable source, keeping previously published artifacts"
            );
            return Err(SubError::NoUsableSources);
        }

        let announced =
            announce_new_sources(self.notifier.as_ref(), &snapshot, &mut state.notified).await;
        state.live = snapshot.alive_sources.clone();
        self.store.flush(&state).await?;
        self.publisher.publish(&snapshot).await?;

        info!(
            alive = snapshot.summary.sources_alive,
            new = snapshot.summary.sources_new,
            removed = snapshot.summary.sources_removed,
            announced,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Run complete"
        );
        Ok(snapshot.summary)
    }

    /// Seeds, discovered URLs and history, normalized and deduplicated
    async fn collect_candidates(&self, state: &PersistedState) -> Vec<SubscriptionUrl> {
        let mut candidates: BTreeSet<SubscriptionUrl> = BTreeSet::new();

        for discovery in &self.discoveries {
            match discovery.discover().await {
                Ok(urls) => {
                    debug!(source = discovery.name(), found = urls.len(), "Discovery done");
                    candidates.extend(urls);
                }
                Err(SubError::NoCredentials) => {
                    debug!(source = discovery.name(), "No credentials, discovery skipped");
                }
                Err(e) => warn!("Discovery {} failed: {}", discovery.name(), e),
            }
        }

        let discovered = candidates.len();
        candidates.extend(
            state
                .history
                .iter()
                .chain(state.live.iter())
                .filter_map(|raw| normalize(raw)),
        );

        info!(
            discovered,
            total = candidates.len(),
            "Collected candidate sources"
        );
        candidates.into_iter().collect()
    }

    /// Process candidates concurrently; reports come back in candidate order
    ///
    /// No new source is scheduled once shutdown is signalled or the run
    /// deadline passes; sources already in flight finish or time out.
    async fn process_all(
        &self,
        candidates: &[SubscriptionUrl],
        shutdown: watch::Receiver<bool>,
    ) -> Vec<SourceReport> {
        let workers = self.config.fetch.workers.max(1);
        let deadline = self.config.fetch.run_deadline().map(|d| Instant::now() + d);
        let engine = &self.engine;

        let mut reports: Vec<SourceReport> = stream::iter(candidates.iter().enumerate())
            .take_while(|_| {
                let expired = deadline.is_some_and(|d| Instant::now() >= d);
                futures::future::ready(!*shutdown.borrow() && !expired)
            })
            .map(|(index, url)| async move {
                let outcome = engine.process(url, Utc::now()).await;
                SourceReport {
                    index,
                    url: url.clone(),
                    outcome,
                }
            })
            .buffer_unordered(workers)
            .collect()
            .await;

        reports.sort_by_key(|r| r.index);
        reports
    }
}
