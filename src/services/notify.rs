//! New-source notifications
//!
//! Every alive source is announced exactly once over its lifetime; the set
//! of announced URLs is part of the durable state.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{Result, SubError};
use crate::models::{AggregationSnapshot, SourceMeta};

/// Payload sent for a newly alive source
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewSourceEvent {
    pub event: &'static str,
    pub url: String,
    pub host: String,
    pub nodes: usize,
    pub protocols: BTreeMap<String, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_gb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expire_date: Option<NaiveDate>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &NewSourceEvent) -> Result<()>;
}

/// Writes events to the log
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &NewSourceEvent) -> Result<()> {
        info!(
            url = %event.url,
            nodes = event.nodes,
            remaining_gb = ?event.remaining_gb,
            "New subscription source"
        );
        Ok(())
    }
}

/// POSTs each event as JSON
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    http: Client,
    url: String,
    timeout: Duration,
}

impl WebhookNotifier {
    pub fn new(http: Client, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http,
            url: url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: &NewSourceEvent) -> Result<()> {
        let response = self
            .http
            .post(&self.url)
            .json(event)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(SubError::from_request)?;

        if !response.status().is_success() {
            return Err(SubError::HttpStatus {
                url: self.url.clone(),
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}

/// Announce alive sources not yet in `notified`; returns how many were sent
///
/// A failed delivery leaves the URL out of `notified` so the next run retries.
pub async fn announce_new_sources(
    notifier: &dyn Notifier,
    snapshot: &AggregationSnapshot,
    notified: &mut BTreeSet<String>,
) -> usize {
    let pending: Vec<&SourceMeta> = snapshot
        .sources
        .iter()
        .filter(|m| m.status == "alive" && !notified.contains(&m.url))
        .collect();

    let mut sent = 0;
    for meta in pending {
        let event = NewSourceEvent {
            event: "new_source",
            url: meta.url.clone(),
            host: meta.host.clone(),
            nodes: meta.nodes,
            protocols: meta.protocol_counts.clone(),
            remaining_gb: meta.traffic.remaining_gb,
            expire_date: meta.traffic.expire_date,
        };

        match notifier.notify(&event).await {
            Ok(()) => {
                notified.insert(meta.url.clone());
                sent += 1;
            }
            Err(e) => warn!("Notification for {} failed: {}", meta.url, e),
        }
    }
    sent
}
