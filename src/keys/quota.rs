//! Search-API credentials and live quota probing

use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Result, SubError};

/// SHA-256 of a key, hex encoded; the only form in which keys are persisted
pub fn hash_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.trim().as_bytes()))
}

/// Keep the first and last four characters
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}****{}", head, tail)
}

/// One search-API key
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    key: String,
    key_hash: String,
    registration_date: Option<NaiveDate>,
}

impl Credential {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into().trim().to_string();
        let key_hash = hash_key(&key);
        Self {
            key,
            key_hash,
            registration_date: None,
        }
    }

    pub fn with_registration(mut self, date: Option<NaiveDate>) -> Self {
        self.registration_date = date;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn key_hash(&self) -> &str {
        &self.key_hash
    }

    pub fn registration_date(&self) -> Option<NaiveDate> {
        self.registration_date
    }

    pub fn masked(&self) -> String {
        mask_key(&self.key)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("key", &self.masked())
            .field("registration_date", &self.registration_date)
            .finish()
    }
}

/// Read keys from a newline-separated file; `#` starts a comment line
pub async fn load_keys_file(path: &Path) -> Result<Vec<String>> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No keys file at {}", path.display());
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    let mut keys: Vec<String> = Vec::new();
    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') || keys.iter().any(|k| k == line) {
            continue;
        }
        keys.push(line.to_string());
    }
    Ok(keys)
}

/// Quota figures reported by the account endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountQuota {
    pub monthly_cap: i64,
    pub remaining: i64,
    pub account_status: Option<String>,
}

impl AccountQuota {
    /// Accounts without a status are assumed usable
    pub fn is_active(&self) -> bool {
        self.account_status
            .as_deref()
            .map_or(true, |s| s.eq_ignore_ascii_case("active"))
    }
}

/// Source of live quota figures for a credential
#[async_trait]
pub trait QuotaProbe: Send + Sync {
    async fn probe(&self, credential: &Credential) -> Result<AccountQuota>;
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    #[serde(default)]
    searches_per_month: i64,
    #[serde(default)]
    total_searches_left: i64,
    #[serde(default)]
    account_status: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Probe backed by the SerpAPI account endpoint
#[derive(Debug, Clone)]
pub struct SerpApiProbe {
    http: Client,
    account_url: String,
    timeout: Duration,
}

impl SerpApiProbe {
    pub fn new(http: Client, account_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http,
            account_url: account_url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl QuotaProbe for SerpApiProbe {
    async fn probe(&self, credential: &Credential) -> Result<AccountQuota> {
        let response = self
            .http
            .get(&self.account_url)
            .query(&[("api_key", credential.key())])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(SubError::from_request)?;

        let status = response.status();
        if !status.is_success() {
            return Err(SubError::QuotaProbe(format!(
                "{} answered http {}",
                credential.masked(),
                status.as_u16()
            )));
        }

        let body: AccountResponse = response
            .json()
            .await
            .map_err(|e| SubError::QuotaProbe(e.to_string()))?;
        if let Some(error) = body.error {
            return Err(SubError::QuotaProbe(error));
        }

        Ok(AccountQuota {
            monthly_cap: body.searches_per_month,
            remaining: body.total_searches_left,
            account_status: body.account_status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::spawn;
    use axum::extract::Query;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};
    use std::collections::HashMap;

    #[test]
    fn test_credential_debug_is_masked() {
        let credential = Credential::new("  0123456789abcdef  ");
        assert_eq!(credential.key(), "0123456789abcdef");
        assert_eq!(credential.masked(), "0123****cdef");
        assert_eq!(credential.key_hash(), hash_key("0123456789abcdef"));
        assert_eq!(credential.key_hash().len(), 64);

        let debug = format!("{:?}", credential);
        assert!(!debug.contains("456789ab"));
        assert_eq!(mask_key("short"), "*****");
    }

    #[tokio::test]
    async fn test_load_keys_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.txt");
        tokio::fs::write(&path, "# pool\nkey-one\n\n key-two \nkey-one\n")
            .await
            .unwrap();

        let keys = load_keys_file(&path).await.unwrap();
        assert_eq!(keys, vec!["key-one", "key-two"]);

        let missing = load_keys_file(&dir.path().join("absent.txt")).await.unwrap();
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn test_serpapi_probe() {
        let router = Router::new().route(
            "/account",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                match q.get("api_key").map(String::as_str) {
                    Some("good-key-123456") => Json(serde_json::json!({
                        "account_status": "Active",
                        "searches_per_month": 100,
                        "total_searches_left": 42,
                    }))
                    .into_response(),
                    Some("revoked-key-1234") => {
                        Json(serde_json::json!({"error": "Invalid API key."})).into_response()
                    }
                    _ => StatusCode::UNAUTHORIZED.into_response(),
                }
            }),
        );
        let addr = spawn(router).await;
        let probe = SerpApiProbe::new(
            Client::new(),
            format!("http://{}/account", addr),
            Duration::from_secs(5),
        );

        let quota = probe.probe(&Credential::new("good-key-123456")).await.unwrap();
        assert_eq!(quota.monthly_cap, 100);
        assert_eq!(quota.remaining, 42);
        assert!(quota.is_active());

        let err = probe.probe(&Credential::new("revoked-key-1234")).await.unwrap_err();
        assert!(matches!(err, SubError::QuotaProbe(ref m) if m == "Invalid API key."));

        let err = probe.probe(&Credential::new("unknown-key-9999")).await.unwrap_err();
        assert!(matches!(err, SubError::QuotaProbe(_)));
    }
}
