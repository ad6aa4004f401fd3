use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Probed quota for one search-API key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyQuota {
    /// SHA-256 of the key, hex encoded
    pub key_hash: String,
    /// Key with everything past the first characters hidden
    pub masked: String,
    pub monthly_cap: i64,
    pub remaining: i64,
    pub next_reset: NaiveDate,
    /// False when the last probe failed or the key was marked failing
    pub alive: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_status: Option<String>,
}

impl ApiKeyQuota {
    pub fn has_quota(&self) -> bool {
        self.alive && self.remaining > 0
    }

    pub fn days_until_reset(&self, today: NaiveDate) -> i64 {
        (self.next_reset - today).num_days()
    }
}

/// Pool-wide quota figures published with the run summary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    pub keys_total: usize,
    pub keys_ok: usize,
    pub total_remaining: i64,
    pub total_capacity: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_reset: Option<NaiveDate>,
}

impl QuotaSnapshot {
    pub fn from_quotas(quotas: &[ApiKeyQuota]) -> Self {
        let alive: Vec<&ApiKeyQuota> = quotas.iter().filter(|q| q.alive).collect();
        Self {
            keys_total: quotas.len(),
            keys_ok: alive.len(),
            total_remaining: alive.iter().map(|q| q.remaining.max(0)).sum(),
            total_capacity: alive.iter().map(|q| q.monthly_cap.max(0)).sum(),
            next_reset: alive.iter().map(|q| q.next_reset).min(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quota(remaining: i64, alive: bool, reset: NaiveDate) -> ApiKeyQuota {
        ApiKeyQuota {
            key_hash: "h".to_string(),
            masked: "abc***".to_string(),
            monthly_cap: 100,
            remaining,
            next_reset: reset,
            alive,
            account_status: None,
        }
    }

    #[test]
    fn test_snapshot_ignores_dead_keys() {
        let d1 = NaiveDate::from_ymd_opt(2026, 11, 3).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2026, 10, 20).unwrap();
        let quotas = vec![quota(40, true, d1), quota(90, false, d2), quota(0, true, d2)];

        let snapshot = QuotaSnapshot::from_quotas(&quotas);
        assert_eq!(snapshot.keys_total, 3);
        assert_eq!(snapshot.keys_ok, 2);
        assert_eq!(snapshot.total_remaining, 40);
        assert_eq!(snapshot.total_capacity, 200);
        assert_eq!(snapshot.next_reset, Some(d2));
    }

    #[test]
    fn test_days_until_reset() {
        let today = NaiveDate::from_ymd_opt(2026, 10, 15).unwrap();
        let q = quota(1, true, NaiveDate::from_ymd_opt(2026, 10, 18).unwrap());
        assert_eq!(q.days_until_reset(today), 3);
        assert!(q.has_quota());
    }
}
