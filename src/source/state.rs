//! Per-source rate-limit tracking
//!
//! Each rate-limit event doubles the wait before the source may be contacted
//! again, up to a cap. The failure count is never reset; a source simply
//! becomes eligible again once its next-allowed time has passed.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, info};

use crate::models::{SourceState, SourceStatus};

/// Statuses that mean "slow down"
pub const RATE_LIMIT_STATUSES: &[u16] = &[403, 429, 503, 509];

/// Body phrases that mean "slow down" even on a 200
pub const RATE_LIMIT_PHRASES: &[&str] = &[
    "rate limit",
    "rate-limit",
    "too many requests",
    "quota exceeded",
    "bandwidth exceeded",
    "traffic exceeded",
    "exceeded",
    "流量已用尽",
    "流量耗尽",
    "超出配额",
    "请求过多",
    "频率限制",
];

pub fn is_rate_limit_status(status: u16) -> bool {
    RATE_LIMIT_STATUSES.contains(&status)
}

/// First rate-limit phrase found in the body, case-insensitively
pub fn find_rate_limit_phrase(body: &str) -> Option<&'static str> {
    let lower = body.to_lowercase();
    RATE_LIMIT_PHRASES
        .iter()
        .copied()
        .find(|phrase| lower.contains(phrase))
}

/// Reason string if the response carries a rate-limit signal
pub fn rate_limit_reason(status: Option<u16>, body: Option<&str>) -> Option<String> {
    if let Some(status) = status.filter(|s| is_rate_limit_status(*s)) {
        return Some(format!("http {}", status));
    }
    body.and_then(find_rate_limit_phrase)
        .map(|phrase| format!("body: {}", phrase))
}

/// Exponential backoff schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(15 * 60),
            cap: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl BackoffPolicy {
    /// `min(base * 2^(failures - 1), cap)`
    pub fn wait_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(32);
        let factor = 1u64 << exponent;
        let secs = self.base.as_secs().saturating_mul(factor);
        Duration::from_secs(secs).min(self.cap)
    }
}

/// Concurrent map of source URL to rate-limit state
///
/// Entries are locked per key, so concurrent fetch workers marking different
/// sources never contend and two events for one source are applied in turn.
#[derive(Debug, Default)]
pub struct SourceStateTracker {
    states: DashMap<String, SourceState>,
    policy: BackoffPolicy,
}

impl SourceStateTracker {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            states: DashMap::new(),
            policy,
        }
    }

    /// Seed the tracker from persisted state
    pub fn load(&self, states: BTreeMap<String, SourceState>) {
        for (url, state) in states {
            self.states.insert(url, state);
        }
        debug!("Loaded rate-limit state for {} sources", self.states.len());
    }

    pub fn status(&self, url: &str, now: DateTime<Utc>) -> SourceStatus {
        match self.states.get(url) {
            Some(state) if now < state.next_allowed_at => SourceStatus::Limited {
                until: state.next_allowed_at,
            },
            _ => SourceStatus::Active,
        }
    }

    /// True while the source is inside its backoff window
    pub fn should_skip(&self, url: &str, now: DateTime<Utc>) -> bool {
        self.status(url, now).is_limited()
    }

    /// Record a rate-limit event and return the updated state
    pub fn mark_limited(&self, url: &str, now: DateTime<Utc>, reason: &str) -> SourceState {
        let mut entry = self
            .states
            .entry(url.to_string())
            .or_insert_with(|| SourceState {
                failure_count: 0,
                last_reason: String::new(),
                last_failure_at: now,
                next_allowed_at: now,
            });

        entry.failure_count = entry.failure_count.saturating_add(1);
        let wait = self.policy.wait_for(entry.failure_count);
        let wait = chrono::Duration::from_std(wait).unwrap_or_else(|_| chrono::Duration::days(1));
        let candidate = now + wait;

        entry.last_reason = reason.to_string();
        entry.last_failure_at = now;
        if candidate > entry.next_allowed_at {
            entry.next_allowed_at = candidate;
        }

        info!(
            url = %url,
            hits = entry.failure_count,
            reason = %reason,
            next_allowed_at = %entry.next_allowed_at,
            "Source rate limited"
        );

        entry.clone()
    }

    pub fn get(&self, url: &str) -> Option<SourceState> {
        self.states.get(url).map(|s| s.clone())
    }

    /// Ordered copy for persistence
    pub fn snapshot(&self) -> BTreeMap<String, SourceState> {
        self.states
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;

    const URL: &str = "https://a.panel.net/api/v1/client/subscribe?token=abc";

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 15, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_backoff_policy_doubles_and_caps() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.wait_for(1), Duration::from_secs(15 * 60));
        assert_eq!(policy.wait_for(2), Duration::from_secs(30 * 60));
        assert_eq!(policy.wait_for(3), Duration::from_secs(60 * 60));
        assert_eq!(policy.wait_for(7), Duration::from_secs(16 * 60 * 60));
        assert_eq!(policy.wait_for(8), Duration::from_secs(24 * 60 * 60));
        assert_eq!(policy.wait_for(500), Duration::from_secs(24 * 60 * 60));
    }

    #[test]
    fn test_mark_limited_twice() {
        let tracker = SourceStateTracker::default();
        let now = t0();

        let first = tracker.mark_limited(URL, now, "http 429");
        assert_eq!(first.failure_count, 1);
        assert_eq!(first.next_allowed_at, now + chrono::Duration::minutes(15));
        assert!(tracker.should_skip(URL, now + chrono::Duration::minutes(14)));
        assert!(!tracker.should_skip(URL, now + chrono::Duration::minutes(15)));

        let later = now + chrono::Duration::minutes(20);
        let second = tracker.mark_limited(URL, later, "http 429");
        assert_eq!(second.failure_count, 2);
        assert_eq!(second.next_allowed_at, later + chrono::Duration::minutes(30));
        assert_eq!(second.last_reason, "http 429");
    }

    #[test]
    fn test_failure_count_survives_recovery() {
        let tracker = SourceStateTracker::default();
        let now = t0();

        tracker.mark_limited(URL, now, "http 503");
        let recovered = now + chrono::Duration::hours(2);
        assert_eq!(tracker.status(URL, recovered), SourceStatus::Active);

        let state = tracker.mark_limited(URL, recovered, "http 503");
        assert_eq!(state.failure_count, 2);
        assert_eq!(state.next_allowed_at, recovered + chrono::Duration::minutes(30));
    }

    #[test]
    fn test_next_allowed_never_moves_backwards() {
        let tracker = SourceStateTracker::default();
        let now = t0();

        for _ in 0..6 {
            tracker.mark_limited(URL, now, "http 429");
        }
        let long_wait = tracker.get(URL).unwrap().next_allowed_at;

        // An event stamped earlier than the previous one cannot shorten the wait
        let state = tracker.mark_limited(URL, now - chrono::Duration::hours(30), "http 429");
        assert_eq!(state.next_allowed_at, long_wait);
    }

    #[test]
    fn test_unknown_source_is_active() {
        let tracker = SourceStateTracker::default();
        assert!(!tracker.should_skip(URL, t0()));
        assert!(tracker.get(URL).is_none());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_load_and_snapshot() {
        let tracker = SourceStateTracker::default();
        let until = t0() + chrono::Duration::hours(1);
        let mut persisted = BTreeMap::new();
        persisted.insert(
            URL.to_string(),
            SourceState {
                failure_count: 3,
                last_reason: "body: too many requests".to_string(),
                last_failure_at: t0(),
                next_allowed_at: until,
            },
        );

        tracker.load(persisted.clone());
        assert_eq!(tracker.status(URL, t0()), SourceStatus::Limited { until });
        assert_eq!(tracker.snapshot(), persisted);
    }

    #[test]
    fn test_rate_limit_signals() {
        assert!(is_rate_limit_status(429));
        assert!(is_rate_limit_status(509));
        assert!(!is_rate_limit_status(404));

        assert_eq!(
            find_rate_limit_phrase("Error: Too Many Requests"),
            Some("too many requests")
        );
        assert_eq!(find_rate_limit_phrase("您的流量已用尽"), Some("流量已用尽"));
        assert_eq!(find_rate_limit_phrase("vmess://abc"), None);

        assert_eq!(rate_limit_reason(Some(429), None), Some("http 429".to_string()));
        assert_eq!(
            rate_limit_reason(Some(200), Some("请求过多")),
            Some("body: 请求过多".to_string())
        );
        assert_eq!(rate_limit_reason(Some(200), Some("ok")), None);
    }

    #[tokio::test]
    async fn test_concurrent_marks_are_all_counted() {
        let tracker = Arc::new(SourceStateTracker::default());
        let now = t0();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let tracker = tracker.clone();
                tokio::spawn(async move {
                    tracker.mark_limited(URL, now, "http 429");
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(tracker.get(URL).unwrap().failure_count, 16);
    }
}
