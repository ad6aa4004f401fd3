//! Source quality and node ranking scores

use super::curate::keyword_bonus;
use crate::models::NodeRecord;

/// Latency assumed when a source reported none
pub const MISSING_LATENCY_MS: u64 = 2000;

const PREFERENCE_TOP_BONUS: u32 = 10;
const PREFERENCE_STEP: u32 = 2;

/// `round(0.6 * latency component + 0.4 * parse component)`
pub fn source_quality(latency_ms: Option<u64>, nodes: usize) -> u32 {
    let ms = latency_ms.unwrap_or(MISSING_LATENCY_MS) as f64;
    let latency_component = 100.0 - (ms / 20.0).min(100.0);
    let parse_component = if nodes > 0 { 100.0 } else { 0.0 };
    (0.6 * latency_component + 0.4 * parse_component).round() as u32
}

/// 10 for the first preference, 2 less for each following one
pub fn preference_bonus(preferences: &[String], value: &str) -> u32 {
    preferences
        .iter()
        .position(|p| p.eq_ignore_ascii_case(value))
        .map(|rank| PREFERENCE_TOP_BONUS.saturating_sub(PREFERENCE_STEP * rank as u32))
        .unwrap_or(0)
}

/// Composite rank for the top subset
#[derive(Debug, Clone)]
pub struct NodeScorer<'a> {
    pub preferred_protocols: &'a [String],
    pub preferred_regions: &'a [String],
}

impl NodeScorer<'_> {
    pub fn score(&self, node: &NodeRecord, source_quality: u32) -> u32 {
        source_quality
            + preference_bonus(self.preferred_protocols, node.protocol.as_str())
            + preference_bonus(self.preferred_regions, node.region.as_str())
            + keyword_bonus(&node.name)
    }
}
