//! Traffic figures scraped from subscription text
//!
//! Panels put quota details into node names ("剩余流量：97.5 GB") or comment
//! lines. Extraction runs an ordered `(pattern, field)` table over the
//! percent-decoded text; the first match per field wins.

use chrono::NaiveDate;
use regex::Regex;
use tracing::debug;

use crate::codec::encoding::percent_decode;
use crate::models::{DataUnit, TrafficField, TrafficInfo};

/// Number followed by a data unit
const QUANTITY: &str = r"(\d+(?:\.\d+)?)\s*([kmgt]i?b|b)";

/// ISO-like date with `-` or `/` separators
const DATE: &str = r"(\d{4}[-/]\d{1,2}[-/]\d{1,2})";

/// One row of the extraction table
#[derive(Debug, Clone)]
pub struct TrafficPattern {
    pub regex: Regex,
    pub field: TrafficField,
}

/// Ordered pattern table plus expiry-date patterns
#[derive(Debug, Clone)]
pub struct TrafficExtractor {
    patterns: Vec<TrafficPattern>,
    expiry: Vec<Regex>,
}

impl Default for TrafficExtractor {
    fn default() -> Self {
        let labelled = |label: &str| format!(r"(?i){}\s*[:：=]?\s*{}", label, QUANTITY);
        let suffixed = |label: &str| format!(r"(?i){}\s*{}", QUANTITY, label);

        let table: Vec<(String, TrafficField)> = vec![
            (labelled("总流量"), TrafficField::Total),
            (labelled("套餐流量"), TrafficField::Total),
            (labelled(r"\btotal"), TrafficField::Total),
            (labelled(r"\bbandwidth"), TrafficField::Total),
            (labelled(r"\bquota"), TrafficField::Total),
            (suffixed("总流量"), TrafficField::Total),
            (suffixed(r"\s*total\b"), TrafficField::Total),
            (labelled("已用流量"), TrafficField::Used),
            (labelled("已用"), TrafficField::Used),
            (labelled("消耗"), TrafficField::Used),
            (labelled(r"\bused"), TrafficField::Used),
            (labelled(r"\bconsumed"), TrafficField::Used),
            (suffixed("已用"), TrafficField::Used),
            (suffixed(r"\s*used\b"), TrafficField::Used),
            (labelled("剩余流量"), TrafficField::Remaining),
            (labelled("剩余"), TrafficField::Remaining),
            (labelled("可用"), TrafficField::Remaining),
            (labelled(r"\bremaining"), TrafficField::Remaining),
            (labelled(r"\bavailable"), TrafficField::Remaining),
            (labelled(r"\bleft"), TrafficField::Remaining),
            (labelled(r"\bbalance"), TrafficField::Remaining),
            (suffixed("剩余"), TrafficField::Remaining),
            (suffixed(r"\s*remaining\b"), TrafficField::Remaining),
            (suffixed(r"\s*left\b"), TrafficField::Remaining),
        ];

        let expiry = [
            format!(r"(?i)过期时间\s*[:：]?\s*{}", DATE),
            format!(r"(?i)到期时间\s*[:：]?\s*{}", DATE),
            format!(r"(?i)expires?\s*[:：]?\s*{}", DATE),
            format!(r"(?i)expiry\s*[:：]?\s*{}", DATE),
            format!(r"{}\s*(?:过期|到期)", DATE),
        ];

        Self {
            patterns: table
                .into_iter()
                .filter_map(|(pattern, field)| {
                    Regex::new(&pattern).ok().map(|regex| TrafficPattern { regex, field })
                })
                .collect(),
            expiry: expiry.iter().filter_map(|p| Regex::new(p).ok()).collect(),
        }
    }
}

impl TrafficExtractor {
    /// Extractor with a caller-supplied table; capture 1 is the number, capture 2 the unit
    pub fn new(patterns: Vec<TrafficPattern>) -> Self {
        Self {
            patterns,
            expiry: Self::default().expiry,
        }
    }

    /// Append a row to the table
    pub fn with_pattern(mut self, regex: Regex, field: TrafficField) -> Self {
        self.patterns.push(TrafficPattern { regex, field });
        self
    }

    pub fn extract(&self, text: &str) -> TrafficInfo {
        let decoded = percent_decode(text);
        let mut info = TrafficInfo::default();

        for pattern in &self.patterns {
            if info.get(pattern.field).is_some() {
                continue;
            }
            let Some(caps) = pattern.regex.captures(&decoded) else {
                continue;
            };
            let value = caps.get(1).and_then(|m| m.as_str().parse::<f64>().ok());
            let unit = DataUnit::from_str(caps.get(2).map(|m| m.as_str()).unwrap_or(""));
            if let (Some(value), Some(unit)) = (value, unit) {
                info.fill(pattern.field, unit.to_gb(value));
                debug!(field = pattern.field.as_str(), value, "Traffic figure found");
            }
        }

        info.expire_date = self.extract_expiry(&decoded);
        info.reconcile();
        info
    }

    fn extract_expiry(&self, decoded: &str) -> Option<NaiveDate> {
        self.expiry.iter().find_map(|regex| {
            let raw = regex.captures(decoded)?.get(1)?.as_str().replace('/', "-");
            NaiveDate::parse_from_str(&raw, "%Y-%m-%d").ok()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_from_node_names() {
        let text = "trojan://pw@h:443#%E5%89%A9%E4%BD%99%E6%B5%81%E9%87%8F%EF%BC%9A97.5%20GB\n\
                    trojan://pw@h:443#%E6%80%BB%E6%B5%81%E9%87%8F%EF%BC%9A100GB\n";
        let info = TrafficExtractor::default().extract(text);

        assert_eq!(info.remaining_gb, Some(97.5));
        assert_eq!(info.total_gb, Some(100.0));
        assert_eq!(info.used_gb, Some(2.5));
        assert!(info.is_consistent());
    }

    #[test]
    fn test_extract_english_labels_and_units() {
        let info = TrafficExtractor::default().extract("Total: 1 TB | Used: 512 MB");
        assert_eq!(info.total_gb, Some(1024.0));
        assert_eq!(info.used_gb, Some(0.5));
        assert_eq!(info.remaining_gb, Some(1023.5));
    }

    #[test]
    fn test_extract_keeps_consistent_triplet() {
        let info = TrafficExtractor::default()
            .extract("total: 200GB used: 50GB remaining: 150GB");
        assert_eq!(info.total_gb, Some(200.0));
        assert_eq!(info.used_gb, Some(50.0));
        assert_eq!(info.remaining_gb, Some(150.0));
    }

    #[test]
    fn test_extract_identity_holds_after_fill() {
        let info = TrafficExtractor::default().extract("已用流量：12.25GB 剩余流量：87.75GB");
        let total = info.total_gb.unwrap();
        let sum = info.used_gb.unwrap() + info.remaining_gb.unwrap();
        assert!((total - sum).abs() <= total * 0.01);
    }

    #[test]
    fn test_extract_overdrawn_quota_keeps_identity() {
        let info = TrafficExtractor::default().extract("total: 10GB used: 15GB");
        assert_eq!(info.remaining_gb, Some(-5.0));
        assert!(info.is_consistent());
        assert!(info.is_exhausted());
    }

    #[test]
    fn test_extract_expiry_date() {
        let info = TrafficExtractor::default().extract("ss://x#过期时间：2026/11/3");
        assert_eq!(info.expire_date, NaiveDate::from_ymd_opt(2026, 11, 3));

        let info = TrafficExtractor::default().extract("Expire: 2027-01-15");
        assert_eq!(info.expire_date, NaiveDate::from_ymd_opt(2027, 1, 15));
    }

    #[test]
    fn test_extract_nothing() {
        let info = TrafficExtractor::default().extract("vmess://abc\nvless://def");
        assert!(info.is_empty());
        assert!(!info.is_exhausted());
    }

    #[test]
    fn test_custom_pattern_row() {
        let extractor = TrafficExtractor::new(vec![]).with_pattern(
            Regex::new(r"(?i)rest=(\d+(?:\.\d+)?)([kmgt]i?b|b)").unwrap(),
            TrafficField::Remaining,
        );
        let info = extractor.extract("rest=0GB");
        assert_eq!(info.remaining_gb, Some(0.0));
        assert!(info.is_exhausted());
    }
}
