//! Canonical form for subscription URLs
//!
//! Candidates arrive from free text (search snippets, HTML, JSON dumps), so
//! normalization locates the URL inside the text, cuts it at the first
//! character that cannot belong to a URL, and keeps only the parameters that
//! identify a subscription.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// Path segment every subscription endpoint carries
pub const SUBSCRIBE_PATH_MARKER: &str = "api/v1/client/subscribe";

/// Flag value asking the panel for a clash document
pub const STRUCTURED_FLAG: &str = "clash";

const PLACEHOLDER_HOSTS: &[&str] = &[
    "xxxx",
    "your-provider",
    "your-domain",
    "yourdomain",
    "example.com",
    "example.org",
];

const PLACEHOLDER_TOKENS: &[&str] = &["token", "yourtoken", "your_token", "abcdef", "123456"];

static CANDIDATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)https?://[^\s"'<>\\]+?api/v1/client/subscribe\?[^\s"'<>\\]*"#)
        .expect("candidate pattern is valid")
});

static SCHEME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)https?://").expect("scheme pattern is valid"));

/// Normalized subscription URL: scheme, host, port, path and the
/// allow-listed `token` / `flag` parameters
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionUrl(String);

impl SubscriptionUrl {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn host(&self) -> String {
        Url::parse(&self.0)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default()
    }

    pub fn flag(&self) -> Option<String> {
        Url::parse(&self.0).ok().and_then(|u| {
            u.query_pairs()
                .find(|(k, _)| k == "flag")
                .map(|(_, v)| v.into_owned())
        })
    }

    /// Same source without a format flag
    pub fn raw_variant(&self) -> SubscriptionUrl {
        self.with_flag(None)
    }

    /// Same source asking for the structured (clash) format
    pub fn structured_variant(&self) -> SubscriptionUrl {
        self.with_flag(Some(STRUCTURED_FLAG))
    }

    /// Stable short identifier: first 12 hex chars of the URL's SHA-256
    pub fn id(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        hex::encode(digest)[..12].to_string()
    }

    fn with_flag(&self, flag: Option<&str>) -> SubscriptionUrl {
        let Ok(mut url) = Url::parse(&self.0) else {
            return self.clone();
        };
        let token = url
            .query_pairs()
            .find(|(k, _)| k == "token")
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default();

        url.set_query(None);
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("token", &token);
            if let Some(flag) = flag {
                pairs.append_pair("flag", flag);
            }
        }
        SubscriptionUrl(url.to_string())
    }
}

impl std::fmt::Display for SubscriptionUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for SubscriptionUrl {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Normalize a raw candidate; `None` when it is not a usable subscription URL
pub fn normalize(raw: &str) -> Option<SubscriptionUrl> {
    let text = unescape(raw.trim());
    let start = find_scheme(&text)?;
    let mut candidate: String = text[start..].chars().take_while(|c| is_url_char(*c)).collect();
    // Scraped text glues URLs together; a second scheme starts the next one
    if let Some(next) = find_scheme(&candidate[1..]) {
        candidate.truncate(next + 1);
    }

    let url = Url::parse(&candidate).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }

    let host = url.host_str()?.to_lowercase();
    if PLACEHOLDER_HOSTS.iter().any(|p| host.contains(p)) {
        return None;
    }

    let marker_at = url.path().find(SUBSCRIBE_PATH_MARKER)?;
    let path = url.path()[..marker_at + SUBSCRIBE_PATH_MARKER.len()].to_string();

    let mut token = None;
    let mut flag = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "token" if token.is_none() => token = Some(alnum_prefix(&value)),
            "flag" if flag.is_none() => flag = Some(alnum_prefix(&value)),
            _ => {}
        }
    }

    let token = token.filter(|t| !t.is_empty() && !is_placeholder_token(t))?;
    let flag = flag.filter(|f| !f.is_empty());

    let mut clean = url;
    clean.set_fragment(None);
    clean.set_query(None);
    clean.set_path(&path);
    {
        let mut pairs = clean.query_pairs_mut();
        pairs.append_pair("token", &token);
        if let Some(flag) = &flag {
            pairs.append_pair("flag", flag);
        }
    }

    Some(SubscriptionUrl(clean.to_string()))
}

/// Pull every subscription URL out of free text, first occurrence first
pub fn extract_candidates(text: &str) -> Vec<SubscriptionUrl> {
    let text = SCHEME_RE.replace_all(&unescape(text), " $0").into_owned();
    let mut seen = HashSet::new();
    CANDIDATE_RE
        .find_iter(&text)
        .filter_map(|m| normalize(m.as_str()))
        .filter(|url| seen.insert(url.clone()))
        .collect()
}

fn unescape(text: &str) -> String {
    let mut out = text
        .replace("\\u0026", "&")
        .replace("\\/", "/")
        .replace("&#38;", "&")
        .replace("&#x26;", "&")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">");
    // Double-escaped ampersands ("&amp;amp;") show up in scraped HTML
    while out.contains("&amp;") {
        out = out.replace("&amp;", "&");
    }
    out
}

fn find_scheme(text: &str) -> Option<usize> {
    let lower = text.to_ascii_lowercase();
    match (lower.find("http://"), lower.find("https://")) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn is_url_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "-._~:/?#[]@!$&'()*+,;=%".contains(c)
}

fn alnum_prefix(value: &str) -> String {
    value.chars().take_while(|c| c.is_ascii_alphanumeric()).collect()
}

fn is_placeholder_token(token: &str) -> bool {
    let lower = token.to_lowercase();
    lower.chars().all(|c| c == 'x') || PLACEHOLDER_TOKENS.contains(&lower.as_str())
}
