//! Fetch-and-decode engine
//!
//! Every source goes through the same steps: a backoff check, a cheap
//! streamed validation probe, a full fetch with layered decoding, an optional
//! consistency check against the structured variant, and traffic extraction.
//! Rate-limit signals seen at any step feed the shared state tracker.

pub mod client;
pub mod converter;
pub mod decode;
pub mod traffic;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::config::FetchConfig;
use crate::error::{ErrorKind, Result, SubError};
use crate::models::{DecodePath, DecodedSource, NodeRecord, SourceOutcome, SourceStatus};
use crate::source::normalize::STRUCTURED_FLAG;
use crate::source::state::{find_rate_limit_phrase, is_rate_limit_status, rate_limit_reason};
use crate::source::{SourceStateTracker, SubscriptionUrl};

pub use client::{ProbeResponse, SubscriptionClient};
pub use converter::Converter;
pub use decode::{decode_payload, diverges, split_links, DecodeOutcome};
pub use traffic::{TrafficExtractor, TrafficPattern};

/// Result of the validation probe
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub alive: bool,
    pub status: Option<u16>,
    /// Leading bytes of the body, lossily decoded
    pub body_sample: String,
    pub latency: Duration,
    pub error: Option<String>,
}

impl ValidationReport {
    fn unreachable(latency: Duration, error: String) -> Self {
        Self {
            alive: false,
            status: None,
            body_sample: String::new(),
            latency,
            error: Some(error),
        }
    }
}

/// Per-source fetch pipeline shared by all workers
pub struct FetchEngine {
    client: SubscriptionClient,
    converter: Converter,
    extractor: TrafficExtractor,
    tracker: Arc<SourceStateTracker>,
    config: FetchConfig,
}

impl FetchEngine {
    pub fn new(config: FetchConfig, tracker: Arc<SourceStateTracker>) -> Result<Self> {
        let client = SubscriptionClient::new(&config)?;
        let converter = Converter::new(config.converter_urls.clone(), config.fetch_timeout() * 2);

        Ok(Self {
            client,
            converter,
            extractor: TrafficExtractor::default(),
            tracker,
            config,
        })
    }

    /// Replace the traffic pattern table
    pub fn with_extractor(mut self, extractor: TrafficExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn tracker(&self) -> &Arc<SourceStateTracker> {
        &self.tracker
    }

    /// Cheap liveness probe: 200, a plausible length, and enough body bytes
    #[instrument(skip(self), fields(url = %url))]
    pub async fn validate(&self, url: &SubscriptionUrl) -> ValidationReport {
        let started = Instant::now();
        let probe = match self
            .client
            .probe(url.as_str(), self.config.validate_timeout())
            .await
        {
            Ok(probe) => probe,
            Err(e) => {
                debug!("Validation probe failed: {}", e);
                return ValidationReport::unreachable(started.elapsed(), e.to_string());
            }
        };

        let min = self.config.min_body_bytes;
        let error = if probe.status != 200 {
            Some(format!("http {}", probe.status))
        } else if let Some(len) = probe.content_length.filter(|len| (*len as usize) < min) {
            Some(format!("content-length {} below minimum {}", len, min))
        } else if probe.sample.len() < min {
            Some(format!("body of {} bytes below minimum {}", probe.sample.len(), min))
        } else {
            None
        };

        ValidationReport {
            alive: error.is_none(),
            status: Some(probe.status),
            body_sample: String::from_utf8_lossy(&probe.sample).into_owned(),
            latency: probe.latency,
            error,
        }
    }

    /// Full fetch, layered decode, consistency check and traffic extraction
    pub async fn fetch_and_decode(&self, url: &SubscriptionUrl) -> Result<DecodedSource> {
        let payload = self
            .client
            .get(url.as_str(), self.config.fetch_timeout())
            .await?;

        if !payload.is_success() {
            if is_rate_limit_status(payload.status) {
                return Err(SubError::RateLimited {
                    url: url.to_string(),
                    reason: format!("http {}", payload.status),
                });
            }
            return Err(SubError::HttpStatus {
                url: url.to_string(),
                status: payload.status,
            });
        }
        if payload.body.is_empty() {
            return Err(SubError::EmptyBody { bytes: 0 });
        }

        let body = payload.text();
        let primary = decode_payload(&body);
        debug!(path = %primary.path, nodes = primary.node_count(), "Primary decode");

        let chosen = if self.config.consistency_check
            && url.flag().as_deref() != Some(STRUCTURED_FLAG)
        {
            self.reconcile_variants(url, primary).await?
        } else {
            primary
        };

        let mut traffic = self.extractor.extract(&chosen.text);
        if traffic.is_empty() && chosen.text != body {
            traffic = self.extractor.extract(&body);
        }

        let rate_limit_hint = find_rate_limit_phrase(&decode::non_link_text(&body))
            .map(|phrase| format!("body: {}", phrase));

        let nodes: Vec<NodeRecord> = chosen
            .links
            .iter()
            .filter_map(|link| NodeRecord::parse(link))
            .collect();

        Ok(DecodedSource {
            nodes,
            traffic,
            path: chosen.path,
            type_counts: chosen.type_counts,
            status: payload.status,
            latency_ms: payload.latency.as_millis() as u64,
            rate_limit_hint,
        })
    }

    /// Compare the primary decode with the structured variant
    ///
    /// A side with no links abstains. When both sides have links and their
    /// counts diverge, the conversion services decide; if they all fail the
    /// source is ambiguous.
    async fn reconcile_variants(
        &self,
        url: &SubscriptionUrl,
        primary: DecodeOutcome,
    ) -> Result<DecodeOutcome> {
        let variant = url.structured_variant();
        let mut alternate = match self
            .client
            .get(variant.as_str(), self.config.fetch_timeout())
            .await
        {
            Ok(payload) if payload.is_success() => decode_payload(&payload.text()),
            Ok(payload) => {
                debug!(status = payload.status, "Structured variant unavailable");
                return Ok(primary);
            }
            Err(e) => {
                debug!("Structured variant fetch failed: {}", e);
                return Ok(primary);
            }
        };

        if alternate.links.is_empty() {
            return Ok(primary);
        }
        alternate.path = DecodePath::StructuredVariant;
        if primary.links.is_empty() {
            return Ok(alternate);
        }

        let (a, b) = (primary.node_count(), alternate.node_count());
        if !diverges(a, b, self.config.divergence_tolerance) {
            return Ok(primary);
        }

        info!(primary = a, structured = b, "Decode paths diverge, trying converters");
        self.converter
            .convert(&self.client, url.as_str())
            .await
            .map_err(|e| {
                warn!("Every converter failed for {}: {}", url, e);
                SubError::DecodeAmbiguous {
                    url: url.to_string(),
                }
            })
    }

    /// Run one source through the whole pipeline; never fails the run
    #[instrument(skip(self, now), fields(url = %url))]
    pub async fn process(&self, url: &SubscriptionUrl, now: DateTime<Utc>) -> SourceOutcome {
        if let SourceStatus::Limited { until } = self.tracker.status(url.as_str(), now) {
            debug!(%until, "Source in backoff, skipping");
            return SourceOutcome::Skipped { until };
        }

        let report = self.validate(url).await;
        if !report.alive {
            let latency_ms = Some(report.latency.as_millis() as u64);
            if let Some(reason) = rate_limit_reason(report.status, Some(&report.body_sample)) {
                self.tracker.mark_limited(url.as_str(), now, &reason);
                return SourceOutcome::Failed {
                    kind: ErrorKind::RateLimited,
                    reason,
                    latency_ms,
                };
            }
            return SourceOutcome::Failed {
                kind: ErrorKind::TransientNetwork,
                reason: report
                    .error
                    .unwrap_or_else(|| "validation failed".to_string()),
                latency_ms,
            };
        }

        let decoded = match self.fetch_and_decode(url).await {
            Ok(decoded) => decoded,
            Err(SubError::RateLimited { reason, .. }) => {
                self.tracker.mark_limited(url.as_str(), now, &reason);
                return SourceOutcome::Failed {
                    kind: ErrorKind::RateLimited,
                    reason,
                    latency_ms: Some(report.latency.as_millis() as u64),
                };
            }
            Err(e) => {
                debug!("Fetch failed: {}", e);
                return SourceOutcome::Failed {
                    kind: e.kind(),
                    reason: e.to_string(),
                    latency_ms: Some(report.latency.as_millis() as u64),
                };
            }
        };

        if let Some(hint) = decoded.rate_limit_hint.clone() {
            self.tracker.mark_limited(url.as_str(), now, &hint);
            return SourceOutcome::Exhausted {
                decoded,
                reason: hint,
            };
        }
        if decoded.nodes.is_empty() {
            return SourceOutcome::Exhausted {
                decoded,
                reason: "no nodes decoded".to_string(),
            };
        }
        if decoded.traffic.is_exhausted() {
            return SourceOutcome::Exhausted {
                decoded,
                reason: "no remaining traffic".to_string(),
            };
        }

        debug!(nodes = decoded.nodes.len(), path = %decoded.path, "Source alive");
        SourceOutcome::Alive(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encoding::encode_standard;
    use crate::models::Protocol;
    use crate::test_support::{panel_router, spawn, static_panel, sub_url};
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;

    fn engine(config: FetchConfig) -> FetchEngine {
        FetchEngine::new(config, Arc::new(SourceStateTracker::default())).unwrap()
    }

    fn ss_links(count: usize) -> String {
        (0..count)
            .map(|i| format!("ss://YWVzLTI1Ni1nY206cGFzcw@10.0.0.{}:8388#HK-{:02}", i + 1, i))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[tokio::test]
    async fn test_fast_path_source_alive() {
        let body = format!(
            "{}\nvmess://{}\n",
            ss_links(1),
            encode_standard(br#"{"v":"2","ps":"US-01","add":"u.example.net","port":"443","id":"x"}"#)
        );
        let addr = spawn(static_panel(StatusCode::OK, &body)).await;
        let url = sub_url(addr, "fast01");

        let outcome = engine(FetchConfig::default()).process(&url, Utc::now()).await;
        let SourceOutcome::Alive(decoded) = outcome else {
            panic!("expected alive, got {:?}", outcome);
        };
        assert_eq!(decoded.path, DecodePath::FastPath);
        assert_eq!(decoded.nodes.len(), 2);
        assert_eq!(decoded.nodes[0].protocol, Protocol::Ss);
        assert_eq!(decoded.nodes[1].protocol, Protocol::Vmess);
        assert_eq!(decoded.nodes[1].name, "US-01");
    }

    #[tokio::test]
    async fn test_base64_source_decoded() {
        let plain = "trojan://pw@h1.example.net:443#free-node\n\
                     trojan://pw@h2.example.net:443#JP-02\n";
        let addr = spawn(static_panel(StatusCode::OK, &encode_standard(plain.as_bytes()))).await;
        let url = sub_url(addr, "b64src");

        let decoded = engine(FetchConfig::default())
            .fetch_and_decode(&url)
            .await
            .unwrap();
        assert_eq!(decoded.path, DecodePath::Base64);
        assert_eq!(decoded.nodes.len(), 2);
        assert_eq!(decoded.nodes[0].name, "free-node");
    }

    #[tokio::test]
    async fn test_rate_limit_status_marks_source() {
        let addr = spawn(static_panel(StatusCode::TOO_MANY_REQUESTS, "slow down")).await;
        let url = sub_url(addr, "limited");
        let engine = engine(FetchConfig::default());
        let now = Utc::now();

        let outcome = engine.process(&url, now).await;
        assert!(matches!(
            outcome,
            SourceOutcome::Failed { kind: ErrorKind::RateLimited, .. }
        ));

        let state = engine.tracker().get(url.as_str()).unwrap();
        assert_eq!(state.failure_count, 1);
        assert_eq!(state.last_reason, "http 429");
        assert_eq!(state.next_allowed_at, now + chrono::Duration::minutes(15));

        let again = engine.process(&url, now + chrono::Duration::minutes(1)).await;
        assert!(matches!(again, SourceOutcome::Skipped { .. }));
    }

    #[tokio::test]
    async fn test_small_body_rejected() {
        let addr = spawn(static_panel(StatusCode::OK, "ss://tiny")).await;
        let url = sub_url(addr, "small1");
        let engine = engine(FetchConfig::default());

        let report = engine.validate(&url).await;
        assert!(!report.alive);
        assert_eq!(report.status, Some(200));

        let outcome = engine.process(&url, Utc::now()).await;
        let SourceOutcome::Failed { kind, reason, .. } = outcome else {
            panic!("expected failure");
        };
        assert_eq!(kind, ErrorKind::TransientNetwork);
        assert!(reason.contains("below minimum"));
        assert!(engine.tracker().is_empty());
    }

    #[tokio::test]
    async fn test_short_body_decoded_after_fetch() {
        let addr = spawn(static_panel(StatusCode::OK, "ss://AAA\nvmess://BBB\n")).await;
        let decoded = engine(FetchConfig::default())
            .fetch_and_decode(&sub_url(addr, "short1"))
            .await
            .unwrap();
        assert_eq!(decoded.nodes.len(), 2);
        assert_eq!(decoded.type_counts.get("ss"), Some(&1));
        assert_eq!(decoded.type_counts.get("vmess"), Some(&1));

        let addr = spawn(static_panel(StatusCode::OK, "")).await;
        let err = engine(FetchConfig::default())
            .fetch_and_decode(&sub_url(addr, "blank1"))
            .await
            .unwrap_err();
        assert!(matches!(err, SubError::EmptyBody { bytes: 0 }));
    }

    #[tokio::test]
    async fn test_custom_traffic_table() {
        let body = format!("{}\nss://YWVz@1.1.1.1:1#rest=3GB\n", ss_links(2));
        let addr = spawn(static_panel(StatusCode::OK, &body)).await;
        let extractor = TrafficExtractor::new(vec![]).with_pattern(
            regex::Regex::new(r"(?i)rest=(\d+(?:\.\d+)?)([kmgt]i?b|b)").unwrap(),
            crate::models::TrafficField::Remaining,
        );
        let engine = engine(FetchConfig::default()).with_extractor(extractor);

        let outcome = engine.process(&sub_url(addr, "custom1"), Utc::now()).await;
        let SourceOutcome::Alive(decoded) = outcome else {
            panic!("expected alive, got {:?}", outcome);
        };
        assert_eq!(decoded.traffic.remaining_gb, Some(3.0));
        assert_eq!(decoded.traffic.total_gb, None);
    }

    #[tokio::test]
    async fn test_exhausted_by_traffic_and_phrase() {
        let body = format!(
            "{}\nss://YWVz@1.1.1.1:1#%E5%89%A9%E4%BD%99%E6%B5%81%E9%87%8F%EF%BC%9A0GB",
            ss_links(2)
        );
        let addr = spawn(static_panel(StatusCode::OK, &body)).await;
        let outcome = engine(FetchConfig::default())
            .process(&sub_url(addr, "empty1"), Utc::now())
            .await;
        match outcome {
            SourceOutcome::Exhausted { reason, decoded } => {
                assert_eq!(reason, "no remaining traffic");
                assert_eq!(decoded.traffic.remaining_gb, Some(0.0));
            }
            other => panic!("expected exhausted, got {:?}", other),
        }

        let body = format!("{}\n请求过多，请稍后再试", ss_links(3));
        let addr = spawn(static_panel(StatusCode::OK, &body)).await;
        let url = sub_url(addr, "phrase1");
        let engine = engine(FetchConfig::default());
        let outcome = engine.process(&url, Utc::now()).await;
        assert!(matches!(outcome, SourceOutcome::Exhausted { .. }));
        assert!(engine.tracker().get(url.as_str()).is_some());
    }

    #[tokio::test]
    async fn test_divergence_resolved_by_converter() {
        let raw = ss_links(10);
        let structured = format!(
            "mode: rule\nproxies:\n{}\n",
            ss_links(3)
                .lines()
                .map(|l| format!("  - {}", l))
                .collect::<Vec<_>>()
                .join("\n")
        );
        let panel = panel_router((StatusCode::OK, raw), (StatusCode::OK, structured));
        let converted = ss_links(8);
        let router = panel
            .route("/broken", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
            .route(
                "/sub",
                get(move || {
                    let body = converted.clone();
                    async move { body }
                }),
            );
        let addr = spawn(router).await;

        let config = FetchConfig {
            converter_urls: vec![
                format!("http://{}/broken", addr),
                format!("http://{}/sub", addr),
            ],
            ..Default::default()
        };
        let decoded = engine(config)
            .fetch_and_decode(&sub_url(addr, "diverge"))
            .await
            .unwrap();
        assert_eq!(decoded.path, DecodePath::Converter);
        assert_eq!(decoded.nodes.len(), 8);
    }

    #[tokio::test]
    async fn test_divergence_without_converter_is_ambiguous() {
        let structured = format!("port: 7890\nproxies:\n  - {}\n", ss_links(1));
        let router = panel_router((StatusCode::OK, ss_links(6)), (StatusCode::OK, structured))
            .route("/down", get(|| async { StatusCode::BAD_GATEWAY }));
        let addr = spawn(router).await;

        let config = FetchConfig {
            converter_urls: vec![format!("http://{}/down", addr)],
            ..Default::default()
        };
        let engine = engine(config);
        let url = sub_url(addr, "ambig1");
        let err = engine.fetch_and_decode(&url).await.unwrap_err();
        assert!(matches!(err, SubError::DecodeAmbiguous { .. }));

        let outcome = engine.process(&url, Utc::now()).await;
        assert!(matches!(
            outcome,
            SourceOutcome::Failed { kind: ErrorKind::DecodeAmbiguity, .. }
        ));
    }

    #[tokio::test]
    async fn test_structured_variant_used_when_primary_unrecognized() {
        let raw = "<html><body>panel under maintenance, please come back in a few hours</body></html>".to_string();
        let structured = format!("mixed-port: 7890\nproxies:\n  - {}\n", ss_links(1));
        let addr = spawn(panel_router((StatusCode::OK, raw), (StatusCode::OK, structured))).await;

        let decoded = engine(FetchConfig::default())
            .fetch_and_decode(&sub_url(addr, "variant"))
            .await
            .unwrap();
        assert_eq!(decoded.path, DecodePath::StructuredVariant);
        assert_eq!(decoded.nodes.len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_source_is_transient() {
        let router = Router::new();
        let addr = spawn(router).await;
        let outcome = engine(FetchConfig::default())
            .process(&sub_url(addr, "gone404"), Utc::now())
            .await;
        match outcome {
            SourceOutcome::Failed { kind, reason, .. } => {
                assert_eq!(kind, ErrorKind::TransientNetwork);
                assert_eq!(reason, "http 404");
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }
}
