use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::node::{NodeRecord, Protocol, Region};
use super::quota::QuotaSnapshot;
use super::source::DecodePath;
use super::traffic::TrafficInfo;

/// Sources that appeared or disappeared since the previous run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDelta {
    pub new: Vec<String>,
    pub removed: Vec<String>,
}

/// Published metadata for one source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMeta {
    /// First 12 hex chars of the URL's SHA-256
    pub id: String,
    pub url: String,
    pub host: String,
    pub status: String,
    pub nodes: usize,
    pub protocol_counts: BTreeMap<String, usize>,
    pub traffic: TrafficInfo,
    pub response_ms: Option<u64>,
    pub quality_score: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_seen: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decode_path: Option<DecodePath>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Counters describing one run, published as health.json
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub sources_total: usize,
    pub sources_alive: usize,
    pub sources_exhausted: usize,
    pub sources_skipped: usize,
    pub sources_failed: usize,
    pub sources_new: usize,
    pub sources_removed: usize,
    pub nodes_before_dedup: usize,
    pub nodes_after_dedup: usize,
    pub nodes_published: usize,
    /// Share of decoded nodes removed as duplicates
    pub dedup_ratio: f64,
    /// Share of contacted sources that yielded nodes
    pub parse_ok_rate: f64,
    pub protocol_counts: BTreeMap<String, usize>,
    pub region_counts: BTreeMap<String, usize>,
    pub failure_kinds: BTreeMap<String, usize>,
    pub good_count: usize,
    pub top_count: usize,
    pub remaining_gb_total: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quota: Option<QuotaSnapshot>,
}

/// Everything one run publishes
#[derive(Debug, Clone)]
pub struct AggregationSnapshot {
    /// Deduplicated, capped nodes in source order
    pub nodes: Vec<NodeRecord>,
    pub by_protocol: BTreeMap<Protocol, Vec<NodeRecord>>,
    pub by_region: BTreeMap<Region, Vec<NodeRecord>>,
    /// Curated subset with low-quality names removed
    pub good: Vec<NodeRecord>,
    /// Highest-ranked slice of the curated subset
    pub top: Vec<NodeRecord>,
    /// Alive source URLs in candidate order
    pub alive_sources: Vec<String>,
    pub delta: SourceDelta,
    pub sources: Vec<SourceMeta>,
    pub summary: RunSummary,
}

impl AggregationSnapshot {
    pub fn nodes_for(&self, protocol: Protocol) -> &[NodeRecord] {
        self.by_protocol
            .get(&protocol)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn nodes_in(&self, region: Region) -> &[NodeRecord] {
        self.by_region.get(&region).map(Vec::as_slice).unwrap_or(&[])
    }
}
