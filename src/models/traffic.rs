use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Relative tolerance for `total == used + remaining`
const CONSISTENCY_TOLERANCE: f64 = 0.01;

/// Which quantity a traffic pattern captures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrafficField {
    Total,
    Used,
    Remaining,
}

impl TrafficField {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrafficField::Total => "total",
            TrafficField::Used => "used",
            TrafficField::Remaining => "remaining",
        }
    }
}

/// Data unit found next to a traffic figure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataUnit {
    Bytes,
    Kilobytes,
    Megabytes,
    Gigabytes,
    Terabytes,
}

impl DataUnit {
    /// Parse a unit token; a missing unit means gigabytes
    pub fn from_str(s: &str) -> Option<Self> {
        let s = s.trim().to_lowercase();
        match s.trim_end_matches("ib").trim_end_matches('b') {
            "" if s.is_empty() => Some(DataUnit::Gigabytes),
            "" => Some(DataUnit::Bytes),
            "k" => Some(DataUnit::Kilobytes),
            "m" => Some(DataUnit::Megabytes),
            "g" => Some(DataUnit::Gigabytes),
            "t" => Some(DataUnit::Terabytes),
            _ => None,
        }
    }

    /// Convert a value in this unit to gigabytes
    pub fn to_gb(&self, value: f64) -> f64 {
        match self {
            DataUnit::Bytes => value / (1024.0 * 1024.0 * 1024.0),
            DataUnit::Kilobytes => value / (1024.0 * 1024.0),
            DataUnit::Megabytes => value / 1024.0,
            DataUnit::Gigabytes => value,
            DataUnit::Terabytes => value * 1024.0,
        }
    }
}

/// Traffic figures in GB extracted from a subscription body
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrafficInfo {
    pub total_gb: Option<f64>,
    pub used_gb: Option<f64>,
    pub remaining_gb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expire_date: Option<NaiveDate>,
}

impl TrafficInfo {
    pub fn get(&self, field: TrafficField) -> Option<f64> {
        match field {
            TrafficField::Total => self.total_gb,
            TrafficField::Used => self.used_gb,
            TrafficField::Remaining => self.remaining_gb,
        }
    }

    /// Set a field only if it is still unknown; returns whether it was set
    pub fn fill(&mut self, field: TrafficField, value_gb: f64) -> bool {
        let slot = match field {
            TrafficField::Total => &mut self.total_gb,
            TrafficField::Used => &mut self.used_gb,
            TrafficField::Remaining => &mut self.remaining_gb,
        };
        if slot.is_some() {
            return false;
        }
        *slot = Some(round2(value_gb));
        true
    }

    /// Derive the one missing quantity from `total = used + remaining`
    pub fn reconcile(&mut self) {
        match (self.total_gb, self.used_gb, self.remaining_gb) {
            (Some(total), Some(used), None) => {
                self.remaining_gb = Some(round2(total - used));
            }
            (Some(total), None, Some(remaining)) => {
                self.used_gb = Some(round2(total - remaining));
            }
            (None, Some(used), Some(remaining)) => {
                self.total_gb = Some(round2(used + remaining));
            }
            _ => {}
        }
    }

    /// True unless all three figures are known and disagree beyond 1%
    pub fn is_consistent(&self) -> bool {
        match (self.total_gb, self.used_gb, self.remaining_gb) {
            (Some(total), Some(used), Some(remaining)) => {
                let allowed = (total.abs() * CONSISTENCY_TOLERANCE).max(0.01);
                (used + remaining - total).abs() <= allowed
            }
            _ => true,
        }
    }

    /// Remaining quota is known and used up
    pub fn is_exhausted(&self) -> bool {
        self.remaining_gb.is_some_and(|r| r <= 0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.total_gb.is_none()
            && self.used_gb.is_none()
            && self.remaining_gb.is_none()
            && self.expire_date.is_none()
    }
}

/// Round to two decimal places
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_unit_parse() {
        assert_eq!(DataUnit::from_str(""), Some(DataUnit::Gigabytes));
        assert_eq!(DataUnit::from_str("B"), Some(DataUnit::Bytes));
        assert_eq!(DataUnit::from_str("kb"), Some(DataUnit::Kilobytes));
        assert_eq!(DataUnit::from_str("MiB"), Some(DataUnit::Megabytes));
        assert_eq!(DataUnit::from_str("G"), Some(DataUnit::Gigabytes));
        assert_eq!(DataUnit::from_str("TB"), Some(DataUnit::Terabytes));
        assert_eq!(DataUnit::from_str("PB"), None);
    }

    #[test]
    fn test_data_unit_to_gb() {
        assert_eq!(DataUnit::Terabytes.to_gb(1.0), 1024.0);
        assert_eq!(DataUnit::Megabytes.to_gb(512.0), 0.5);
        assert_eq!(DataUnit::Kilobytes.to_gb(1024.0 * 1024.0), 1.0);
        assert_eq!(DataUnit::Bytes.to_gb(1024.0 * 1024.0 * 1024.0), 1.0);
    }

    #[test]
    fn test_reconcile_fills_each_missing_field() {
        let mut info = TrafficInfo {
            total_gb: Some(100.0),
            used_gb: Some(40.0),
            ..Default::default()
        };
        info.reconcile();
        assert_eq!(info.remaining_gb, Some(60.0));

        let mut info = TrafficInfo {
            total_gb: Some(100.0),
            remaining_gb: Some(25.5),
            ..Default::default()
        };
        info.reconcile();
        assert_eq!(info.used_gb, Some(74.5));

        let mut info = TrafficInfo {
            used_gb: Some(10.25),
            remaining_gb: Some(5.0),
            ..Default::default()
        };
        info.reconcile();
        assert_eq!(info.total_gb, Some(15.25));
        assert!(info.is_consistent());
    }

    #[test]
    fn test_reconcile_keeps_known_values() {
        let mut info = TrafficInfo {
            total_gb: Some(100.0),
            used_gb: Some(40.0),
            remaining_gb: Some(60.5),
            ..Default::default()
        };
        info.reconcile();
        assert_eq!(info.remaining_gb, Some(60.5));
        assert!(info.is_consistent());

        info.remaining_gb = Some(10.0);
        assert!(!info.is_consistent());
    }

    #[test]
    fn test_reconcile_holds_identity_when_figures_disagree() {
        let mut overdrawn = TrafficInfo {
            total_gb: Some(10.0),
            used_gb: Some(15.0),
            ..Default::default()
        };
        overdrawn.reconcile();
        assert_eq!(overdrawn.remaining_gb, Some(-5.0));
        assert!(overdrawn.is_consistent());
        assert!(overdrawn.is_exhausted());

        let mut topped_up = TrafficInfo {
            total_gb: Some(10.0),
            remaining_gb: Some(12.5),
            ..Default::default()
        };
        topped_up.reconcile();
        assert_eq!(topped_up.used_gb, Some(-2.5));
        assert!(topped_up.is_consistent());
        assert!(!topped_up.is_exhausted());
    }

    #[test]
    fn test_fill_does_not_overwrite() {
        let mut info = TrafficInfo::default();
        assert!(info.fill(TrafficField::Total, 1.234));
        assert!(!info.fill(TrafficField::Total, 9.0));
        assert_eq!(info.total_gb, Some(1.23));
    }

    #[test]
    fn test_is_exhausted() {
        let mut info = TrafficInfo::default();
        assert!(!info.is_exhausted());
        info.remaining_gb = Some(0.0);
        assert!(info.is_exhausted());
        info.remaining_gb = Some(0.5);
        assert!(!info.is_exhausted());
    }
}
