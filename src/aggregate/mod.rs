//! Aggregation and classification
//!
//! Turns the ordered per-source reports of one run into the published
//! snapshot: a deduplicated node list, per-protocol and per-region views,
//! the curated and top-ranked subsets, source metadata and run counters.

pub mod curate;
pub mod delta;
pub mod score;

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::AggregateConfig;
use crate::models::{
    AggregationSnapshot, NodeRecord, Protocol, Region, RunSummary, SourceMeta, SourceOutcome,
    SourceReport,
};

pub use curate::{is_low_quality, keyword_bonus, low_quality_marker};
pub use delta::compute_delta;
pub use score::{preference_bonus, source_quality, NodeScorer};

/// Remove repeated share links, keeping the first occurrence and order
pub fn dedup_links<T, F>(items: Vec<T>, key: F) -> Vec<T>
where
    F: Fn(&T) -> &str,
{
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(key(item).to_string()))
        .collect()
}

/// Builds the published snapshot from one run's reports
#[derive(Debug, Clone)]
pub struct Aggregator {
    config: AggregateConfig,
}

impl Aggregator {
    pub fn new(config: AggregateConfig) -> Self {
        Self { config }
    }

    /// Aggregate reports that are already in candidate order
    pub fn aggregate(
        &self,
        reports: &[SourceReport],
        previous_live: &[String],
        first_seen: &BTreeMap<String, NaiveDate>,
        now: DateTime<Utc>,
    ) -> AggregationSnapshot {
        let mut summary = RunSummary {
            run_id: Uuid::new_v4(),
            generated_at: now,
            sources_total: reports.len(),
            ..Default::default()
        };

        let mut collected: Vec<(NodeRecord, u32)> = Vec::new();
        let mut alive_sources = Vec::new();
        let mut sources = Vec::with_capacity(reports.len());
        let mut contacted = 0usize;
        let mut yielded = 0usize;

        for report in reports {
            let url = report.url.as_str().to_string();
            let latency = report.outcome.latency_ms();
            let decoded = report.outcome.decoded();
            let node_count = decoded.map(|d| d.nodes.len()).unwrap_or(0);
            let quality = source_quality(latency, node_count);

            match &report.outcome {
                SourceOutcome::Alive(decoded) => {
                    summary.sources_alive += 1;
                    alive_sources.push(url.clone());
                    collected.extend(decoded.nodes.iter().cloned().map(|n| (n, quality)));
                    if let Some(remaining) = decoded.traffic.remaining_gb {
                        summary.remaining_gb_total += remaining;
                    }
                }
                SourceOutcome::Exhausted { .. } => summary.sources_exhausted += 1,
                SourceOutcome::Skipped { .. } => summary.sources_skipped += 1,
                SourceOutcome::Failed { kind, .. } => {
                    summary.sources_failed += 1;
                    *summary
                        .failure_kinds
                        .entry(kind.as_str().to_string())
                        .or_default() += 1;
                }
            }

            if !matches!(report.outcome, SourceOutcome::Skipped { .. }) {
                contacted += 1;
                if node_count > 0 {
                    yielded += 1;
                }
            }

            sources.push(SourceMeta {
                id: report.url.id(),
                url: url.clone(),
                host: report.url.host(),
                status: report.outcome.as_str().to_string(),
                nodes: node_count,
                protocol_counts: decoded.map(protocol_counts).unwrap_or_default(),
                traffic: decoded.map(|d| d.traffic.clone()).unwrap_or_default(),
                response_ms: latency,
                quality_score: quality,
                first_seen: first_seen.get(&url).copied(),
                decode_path: decoded.map(|d| d.path),
                reason: outcome_reason(&report.outcome),
            });
        }

        summary.nodes_before_dedup = collected.len();
        let mut collected = if self.config.dedup {
            dedup_links(collected, |(node, _)| node.link.as_str())
        } else {
            collected
        };
        summary.nodes_after_dedup = collected.len();
        collected.truncate(self.config.max_nodes);
        summary.nodes_published = collected.len();

        if summary.nodes_before_dedup > 0 {
            summary.dedup_ratio = round4(
                (summary.nodes_before_dedup - summary.nodes_after_dedup) as f64
                    / summary.nodes_before_dedup as f64,
            );
        }
        if contacted > 0 {
            summary.parse_ok_rate = round4(yielded as f64 / contacted as f64);
        }
        summary.remaining_gb_total = crate::models::round2(summary.remaining_gb_total);

        let mut by_protocol: BTreeMap<Protocol, Vec<NodeRecord>> = BTreeMap::new();
        let mut by_region: BTreeMap<Region, Vec<NodeRecord>> = BTreeMap::new();
        for (node, _) in &collected {
            by_protocol.entry(node.protocol).or_default().push(node.clone());
            by_region.entry(node.region).or_default().push(node.clone());
        }
        summary.protocol_counts = by_protocol
            .iter()
            .map(|(p, nodes)| (p.as_str().to_string(), nodes.len()))
            .collect();
        summary.region_counts = by_region
            .iter()
            .map(|(r, nodes)| (r.as_str().to_string(), nodes.len()))
            .collect();

        let good: Vec<(NodeRecord, u32)> = collected
            .iter()
            .filter(|(node, _)| !is_low_quality(&node.name))
            .cloned()
            .collect();
        let top = self.rank_top(&good);

        let delta = compute_delta(previous_live, &alive_sources);
        summary.sources_new = delta.new.len();
        summary.sources_removed = delta.removed.len();
        summary.good_count = good.len();
        summary.top_count = top.len();

        info!(
            sources = summary.sources_total,
            alive = summary.sources_alive,
            nodes = summary.nodes_published,
            good = summary.good_count,
            top = summary.top_count,
            new = summary.sources_new,
            removed = summary.sources_removed,
            "Aggregation complete"
        );

        AggregationSnapshot {
            nodes: collected.into_iter().map(|(node, _)| node).collect(),
            by_protocol,
            by_region,
            good: good.into_iter().map(|(node, _)| node).collect(),
            top,
            alive_sources,
            delta,
            sources,
            summary,
        }
    }

    /// Stable sort of the curated subset by composite score, truncated to N
    fn rank_top(&self, good: &[(NodeRecord, u32)]) -> Vec<NodeRecord> {
        let scorer = NodeScorer {
            preferred_protocols: &self.config.preferred_protocols,
            preferred_regions: &self.config.preferred_regions,
        };

        let mut scored: Vec<(u32, &NodeRecord)> = good
            .iter()
            .map(|(node, quality)| (scorer.score(node, *quality), node))
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        debug!(candidates = scored.len(), "Ranked curated nodes");

        scored
            .into_iter()
            .take(self.config.top_n)
            .map(|(_, node)| node.clone())
            .collect()
    }
}

fn protocol_counts(decoded: &crate::models::DecodedSource) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for node in &decoded.nodes {
        *counts.entry(node.protocol.as_str().to_string()).or_default() += 1;
    }
    counts
}

fn outcome_reason(outcome: &SourceOutcome) -> Option<String> {
    match outcome {
        SourceOutcome::Alive(_) => None,
        SourceOutcome::Exhausted { reason, .. } => Some(reason.clone()),
        SourceOutcome::Skipped { until } => Some(format!("backoff until {}", until.to_rfc3339())),
        SourceOutcome::Failed { kind, reason, .. } => Some(format!("{}: {}", kind, reason)),
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
