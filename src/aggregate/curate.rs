//! Name-based curation of the published node list

/// Display-name markers of throwaway, trial or depleted nodes
pub const LOW_QUALITY_MARKERS: &[&str] = &[
    "公益",
    "免费",
    "测试",
    "test",
    "free",
    "public",
    "demo",
    "试用",
    "trial",
    "临时",
    "temp",
    "剩余",
    "到期",
    "expire",
    "expired",
    "expiring",
    "expiry",
    "limited",
    "limit",
    "quota",
    "over quota",
    "low quality",
    "poor",
    "bad",
    "slow",
    "unstable",
];

/// Display-name markers of dedicated lines
pub const BONUS_KEYWORDS: &[&str] = &[
    "iplc",
    "iepl",
    "premium",
    "专线",
    "高速",
    "优质",
    "vip",
];

const BONUS_PER_KEYWORD: u32 = 5;
const BONUS_CAP: u32 = 15;

/// First low-quality marker found in a display name
pub fn low_quality_marker(name: &str) -> Option<&'static str> {
    let lower = name.to_lowercase();
    LOW_QUALITY_MARKERS
        .iter()
        .copied()
        .find(|marker| lower.contains(marker))
}

pub fn is_low_quality(name: &str) -> bool {
    low_quality_marker(name).is_some()
}

/// 5 points per bonus keyword, at most 15
pub fn keyword_bonus(name: &str) -> u32 {
    let lower = name.to_lowercase();
    let hits = BONUS_KEYWORDS.iter().filter(|k| lower.contains(*k)).count() as u32;
    (hits * BONUS_PER_KEYWORD).min(BONUS_CAP)
}
