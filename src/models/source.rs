use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::node::NodeRecord;
use super::traffic::TrafficInfo;
use crate::error::ErrorKind;
use crate::source::SubscriptionUrl;

/// Persisted rate-limit record for one source; never deleted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceState {
    #[serde(rename = "hits")]
    pub failure_count: u32,
    pub last_reason: String,
    #[serde(rename = "last_at", with = "chrono::serde::ts_seconds")]
    pub last_failure_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub next_allowed_at: DateTime<Utc>,
}

/// Whether a source may be contacted right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatus {
    Active,
    Limited { until: DateTime<Utc> },
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Active => "active",
            SourceStatus::Limited { .. } => "limited",
        }
    }

    pub fn is_limited(&self) -> bool {
        matches!(self, SourceStatus::Limited { .. })
    }
}

impl std::fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// HTTP response as fetched, before any decoding
#[derive(Debug, Clone)]
pub struct RawPayload {
    pub status: u16,
    pub body: Bytes,
    pub latency: Duration,
}

impl RawPayload {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

/// Which decode layer produced the final node list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodePath {
    /// Body already contained share links
    FastPath,
    /// Whole body was base64
    Base64,
    /// Body was a structured (clash) document
    Structured,
    /// Taken from the structured variant of the URL
    StructuredVariant,
    /// Produced by an external conversion service
    Converter,
    /// No layer recognised the payload
    Unrecognized,
}

impl DecodePath {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecodePath::FastPath => "fast_path",
            DecodePath::Base64 => "base64",
            DecodePath::Structured => "structured",
            DecodePath::StructuredVariant => "structured_variant",
            DecodePath::Converter => "converter",
            DecodePath::Unrecognized => "unrecognized",
        }
    }
}

impl std::fmt::Display for DecodePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A successfully fetched and decoded subscription
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodedSource {
    pub nodes: Vec<NodeRecord>,
    pub traffic: TrafficInfo,
    pub path: DecodePath,
    /// Entry counts by declared type, when the payload was structured
    pub type_counts: BTreeMap<String, usize>,
    pub status: u16,
    pub latency_ms: u64,
    /// Rate-limit phrase found in a 200 body
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit_hint: Option<String>,
}

/// What happened to one source during a run
#[derive(Debug, Clone)]
pub enum SourceOutcome {
    /// Decoded with usable nodes
    Alive(DecodedSource),
    /// Fetched, but out of quota or empty; contributes no nodes
    Exhausted {
        decoded: DecodedSource,
        reason: String,
    },
    /// In backoff; not contacted
    Skipped { until: DateTime<Utc> },
    /// Any other failure
    Failed {
        kind: ErrorKind,
        reason: String,
        latency_ms: Option<u64>,
    },
}

impl SourceOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceOutcome::Alive(_) => "alive",
            SourceOutcome::Exhausted { .. } => "exhausted",
            SourceOutcome::Skipped { .. } => "skipped",
            SourceOutcome::Failed { .. } => "failed",
        }
    }

    pub fn is_alive(&self) -> bool {
        matches!(self, SourceOutcome::Alive(_))
    }

    pub fn decoded(&self) -> Option<&DecodedSource> {
        match self {
            SourceOutcome::Alive(decoded) | SourceOutcome::Exhausted { decoded, .. } => {
                Some(decoded)
            }
            _ => None,
        }
    }

    pub fn latency_ms(&self) -> Option<u64> {
        match self {
            SourceOutcome::Alive(decoded) | SourceOutcome::Exhausted { decoded, .. } => {
                Some(decoded.latency_ms)
            }
            SourceOutcome::Failed { latency_ms, .. } => *latency_ms,
            SourceOutcome::Skipped { .. } => None,
        }
    }
}

/// Per-source result, tagged with its position in the candidate list
#[derive(Debug, Clone)]
pub struct SourceReport {
    pub index: usize,
    pub url: SubscriptionUrl,
    pub outcome: SourceOutcome,
}
