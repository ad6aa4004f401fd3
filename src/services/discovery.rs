//! Candidate discovery
//!
//! Candidates come from a hand-maintained seed list, from a results file
//! left by an external scraper, and optionally from the search API.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::{DiscoveryConfig, KeysConfig, PathsConfig};
use crate::error::{Result, SubError};
use crate::keys::KeyScheduler;
use crate::source::{extract_candidates, normalize, SubscriptionUrl};

#[async_trait]
pub trait Discovery: Send + Sync {
    fn name(&self) -> &'static str;

    async fn discover(&self) -> Result<Vec<SubscriptionUrl>>;
}

/// Entry of the results file: a bare URL or a record carrying one
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DiscoveredEntry {
    Url(String),
    Record {
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        api_url: Option<String>,
    },
}

impl DiscoveredEntry {
    fn into_url(self) -> Option<String> {
        match self {
            DiscoveredEntry::Url(url) => Some(url),
            DiscoveredEntry::Record { url, api_url } => url.or(api_url),
        }
    }
}

/// The results file is a list of entries or a document with a `urls` list
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DiscoveredFile {
    List(Vec<DiscoveredEntry>),
    Document {
        #[serde(default)]
        urls: Vec<DiscoveredEntry>,
    },
}

/// Parse the results file leniently; unusable entries are dropped
pub fn parse_discovered(text: &str) -> Result<Vec<SubscriptionUrl>> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let entries = match serde_json::from_str::<DiscoveredFile>(text)? {
        DiscoveredFile::List(entries) => entries,
        DiscoveredFile::Document { urls } => urls,
    };
    Ok(entries
        .into_iter()
        .filter_map(DiscoveredEntry::into_url)
        .filter_map(|raw| normalize(&raw))
        .collect())
}

/// Seed list plus the external results file
#[derive(Debug, Clone)]
pub struct SeedDiscovery {
    seeds_file: PathBuf,
    discovered_file: PathBuf,
}

impl SeedDiscovery {
    pub fn new(paths: &PathsConfig) -> Self {
        Self {
            seeds_file: paths.seeds_file.clone(),
            discovered_file: paths.discovered_file.clone(),
        }
    }

    async fn read_optional(path: &PathBuf) -> Result<String> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("{} not found", path.display());
                Ok(String::new())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Discovery for SeedDiscovery {
    fn name(&self) -> &'static str {
        "seeds"
    }

    async fn discover(&self) -> Result<Vec<SubscriptionUrl>> {
        let seeds = Self::read_optional(&self.seeds_file).await?;
        let mut urls: Vec<SubscriptionUrl> = seeds
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(normalize)
            .collect();
        let seed_count = urls.len();

        let results = Self::read_optional(&self.discovered_file).await?;
        match parse_discovered(&results) {
            Ok(found) => urls.extend(found),
            Err(e) => warn!(
                "Ignoring unreadable results file {}: {}",
                self.discovered_file.display(),
                e
            ),
        }

        info!(
            seeds = seed_count,
            discovered = urls.len() - seed_count,
            "Loaded candidate files"
        );
        Ok(urls)
    }
}

/// Search-API discovery; spends keys through the scheduler
pub struct SearchDiscovery {
    http: Client,
    scheduler: Arc<KeyScheduler>,
    search_url: String,
    queries: Vec<String>,
    results_per_query: u32,
    min_searches_left: i64,
    timeout: Duration,
}

impl SearchDiscovery {
    pub fn new(
        http: Client,
        scheduler: Arc<KeyScheduler>,
        keys: &KeysConfig,
        discovery: &DiscoveryConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            scheduler,
            search_url: keys.search_url.clone(),
            queries: discovery.queries.clone(),
            results_per_query: discovery.results_per_query,
            min_searches_left: keys.min_searches_left,
            timeout,
        }
    }

    async fn search(&self, api_key: &str, query: &str) -> Result<String> {
        let num = self.results_per_query.to_string();
        let response = self
            .http
            .get(&self.search_url)
            .query(&[
                ("engine", "google"),
                ("q", query),
                ("num", num.as_str()),
                ("api_key", api_key),
            ])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(SubError::from_request)?;

        if !response.status().is_success() {
            return Err(SubError::HttpStatus {
                url: self.search_url.clone(),
                status: response.status().as_u16(),
            });
        }
        Ok(response.text().await.map_err(SubError::from_request)?)
    }
}

#[async_trait]
impl Discovery for SearchDiscovery {
    fn name(&self) -> &'static str {
        "search"
    }

    async fn discover(&self) -> Result<Vec<SubscriptionUrl>> {
        if self.scheduler.is_empty() {
            return Err(SubError::NoCredentials);
        }

        self.scheduler.refresh(false).await?;
        let remaining = self.scheduler.snapshot().total_remaining;
        if remaining < self.min_searches_left {
            info!(
                remaining,
                minimum = self.min_searches_left,
                "Search quota too low, skipping search discovery"
            );
            return Ok(Vec::new());
        }

        let mut found = Vec::new();
        for query in &self.queries {
            let result = self
                .scheduler
                .try_with_fallback(|credential| async move {
                    self.search(credential.key(), query).await
                })
                .await;

            match result {
                Ok(body) => {
                    let urls = extract_candidates(&body);
                    debug!(query = %query, found = urls.len(), "Search results");
                    found.extend(urls);
                }
                Err(e @ SubError::AllCredentialsExhausted { .. }) => {
                    warn!("Stopping search discovery: {}", e);
                    break;
                }
                Err(e) => warn!("Search for {} failed: {}", query, e),
            }
        }

        info!(found = found.len(), "Search discovery complete");
        Ok(found)
    }
}
