use crate::error::{Result, SubError};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Conversion services tried, in order, when decode paths disagree
pub const DEFAULT_CONVERTER_URLS: &[&str] = &[
    "https://sub.xeton.dev/sub",
    "https://api.dler.io/sub",
    "https://subweb.s3.fr-par.scw.cloud/sub",
];

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// File locations for state, inputs and published artifacts
    pub paths: PathsConfig,
    /// Fetch-and-decode settings
    pub fetch: FetchConfig,
    /// Aggregation and curation settings
    pub aggregate: AggregateConfig,
    /// Search-API key scheduling
    pub keys: KeysConfig,
    /// Candidate discovery
    pub discovery: DiscoveryConfig,
    /// New-source notifications
    pub notify: NotifyConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct PathsConfig {
    /// Directory holding durable JSON state (default: data)
    pub data_dir: PathBuf,
    /// Directory receiving published artifacts (default: dist)
    pub output_dir: PathBuf,
    /// Newline-separated seed URLs
    pub seeds_file: PathBuf,
    /// JSON results written by an external discovery step
    pub discovered_file: PathBuf,
    /// Newline-separated search-API keys
    pub keys_file: PathBuf,
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Concurrent per-source workers
    pub workers: usize,
    /// Timeout for the validation probe in seconds
    pub validate_timeout: u64,
    /// Timeout for full body fetches in seconds
    pub fetch_timeout: u64,
    /// Bodies shorter than this are treated as empty endpoints
    pub min_body_bytes: usize,
    /// User-Agent sent to subscription hosts
    pub user_agent: String,
    /// Accept self-signed or expired certificates
    pub accept_invalid_certs: bool,
    /// Fetch the structured variant and compare node counts
    pub consistency_check: bool,
    /// Relative node-count difference treated as divergence
    pub divergence_tolerance: f64,
    /// Conversion services, tried in order
    pub converter_urls: Vec<String>,
    /// Stop scheduling new sources after this many seconds (0 = no deadline)
    pub run_deadline: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            validate_timeout: 8,
            fetch_timeout: 12,
            min_body_bytes: 64,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/124.0 Safari/537.36"
                .to_string(),
            accept_invalid_certs: true,
            consistency_check: true,
            divergence_tolerance: 0.2,
            converter_urls: DEFAULT_CONVERTER_URLS.iter().map(|s| s.to_string()).collect(),
            run_deadline: 0,
        }
    }
}

impl FetchConfig {
    pub fn validate_timeout(&self) -> Duration {
        Duration::from_secs(self.validate_timeout.max(1))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout.max(1))
    }

    pub fn run_deadline(&self) -> Option<Duration> {
        (self.run_deadline > 0).then(|| Duration::from_secs(self.run_deadline))
    }
}

#[derive(Debug, Clone)]
pub struct AggregateConfig {
    /// Cap on the published node list (earliest entries kept)
    pub max_nodes: usize,
    /// Drop repeated share links
    pub dedup: bool,
    /// Size of the top-ranked subset
    pub top_n: usize,
    /// Protocols ranked first in the top subset, most preferred first
    pub preferred_protocols: Vec<String>,
    /// Regions ranked first in the top subset, most preferred first
    pub preferred_regions: Vec<String>,
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            max_nodes: 1200,
            dedup: true,
            top_n: 50,
            preferred_protocols: ["vless", "trojan", "hysteria2", "vmess", "ss"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            preferred_regions: ["hk", "sg", "jp", "tw", "us"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct KeysConfig {
    /// How long probed quotas stay fresh, in seconds
    pub quota_cache_secs: u64,
    /// Discovery is skipped when fewer searches remain across all keys
    pub min_searches_left: i64,
    /// Account endpoint used to read a key's quota
    pub account_url: String,
    /// Search endpoint used by discovery
    pub search_url: String,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            quota_cache_secs: 300,
            min_searches_left: 5,
            account_url: "https://serpapi.com/account".to_string(),
            search_url: "https://serpapi.com/search".to_string(),
        }
    }
}

impl KeysConfig {
    pub fn quota_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.quota_cache_secs)
    }
}

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Query the search API for new candidates
    pub search_enabled: bool,
    /// Search queries issued per run
    pub queries: Vec<String>,
    /// Results requested per query
    pub results_per_query: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            search_enabled: false,
            queries: vec!["\"api/v1/client/subscribe?token=\"".to_string()],
            results_per_query: 100,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NotifyConfig {
    /// Optional webhook receiving a JSON event per newly alive source
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let fetch_defaults = FetchConfig::default();
        let aggregate_defaults = AggregateConfig::default();
        let keys_defaults = KeysConfig::default();
        let discovery_defaults = DiscoveryConfig::default();

        let data_dir = PathBuf::from(get_env_or("SUB_DATA_DIR", "data"));

        Ok(Config {
            paths: PathsConfig {
                output_dir: PathBuf::from(get_env_or("SUB_OUTPUT_DIR", "dist")),
                seeds_file: env::var("SUB_SEEDS_FILE")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| data_dir.join("api_urls.txt")),
                discovered_file: env::var("SUB_DISCOVERED_FILE")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| data_dir.join("api_urls_results.json")),
                keys_file: env::var("SERPAPI_KEYS_FILE")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| data_dir.join("serpapi_keys.txt")),
                data_dir,
            },
            fetch: FetchConfig {
                workers: get_env_or("FETCH_WORKERS", "8").parse().map_err(|_| {
                    SubError::InvalidConfig("FETCH_WORKERS must be a valid number".into())
                })?,
                validate_timeout: get_env_or("VALIDATE_TIMEOUT", "8").parse().map_err(|_| {
                    SubError::InvalidConfig("VALIDATE_TIMEOUT must be seconds".into())
                })?,
                fetch_timeout: get_env_or("FETCH_TIMEOUT", "12").parse().map_err(|_| {
                    SubError::InvalidConfig("FETCH_TIMEOUT must be seconds".into())
                })?,
                min_body_bytes: get_env_or("MIN_BODY_BYTES", "64").parse().unwrap_or(64),
                user_agent: get_env_or("FETCH_USER_AGENT", &fetch_defaults.user_agent),
                accept_invalid_certs: get_env_or("FETCH_ACCEPT_INVALID_CERTS", "true")
                    .parse()
                    .unwrap_or(true),
                consistency_check: get_env_or("CONSISTENCY_CHECK", "true")
                    .parse()
                    .unwrap_or(true),
                divergence_tolerance: get_env_or("DIVERGENCE_TOLERANCE", "0.2")
                    .parse()
                    .unwrap_or(fetch_defaults.divergence_tolerance),
                converter_urls: parse_url_list(
                    "CONVERTER_URLS",
                    fetch_defaults.converter_urls.clone(),
                )?,
                run_deadline: get_env_or("RUN_DEADLINE", "0").parse().map_err(|_| {
                    SubError::InvalidConfig("RUN_DEADLINE must be seconds".into())
                })?,
            },
            aggregate: AggregateConfig {
                max_nodes: get_env_or("MAX_NODES", "1200").parse().map_err(|_| {
                    SubError::InvalidConfig("MAX_NODES must be a valid number".into())
                })?,
                dedup: get_env_or("DEDUP", "true").parse().unwrap_or(true),
                top_n: get_env_or("TOP_N", "50").parse().unwrap_or(50),
                preferred_protocols: get_env_list(
                    "PREFERRED_PROTOCOLS",
                    aggregate_defaults.preferred_protocols,
                ),
                preferred_regions: get_env_list(
                    "PREFERRED_REGIONS",
                    aggregate_defaults.preferred_regions,
                ),
            },
            keys: KeysConfig {
                quota_cache_secs: get_env_or("QUOTA_CACHE_SECS", "300").parse().unwrap_or(300),
                min_searches_left: get_env_or("MIN_SEARCHES_LEFT", "5").parse().unwrap_or(5),
                account_url: get_env_or("SERPAPI_ACCOUNT_URL", &keys_defaults.account_url),
                search_url: get_env_or("SERPAPI_SEARCH_URL", &keys_defaults.search_url),
            },
            discovery: DiscoveryConfig {
                search_enabled: get_env_or("DISCOVERY_SEARCH_ENABLED", "false")
                    .parse()
                    .unwrap_or(false),
                queries: get_env_list("DISCOVERY_QUERIES", discovery_defaults.queries),
                results_per_query: get_env_or("DISCOVERY_RESULTS_PER_QUERY", "100")
                    .parse()
                    .unwrap_or(100),
            },
            notify: NotifyConfig {
                webhook_url: parse_optional_url("NOTIFY_WEBHOOK_URL")?,
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
            },
        })
    }
}

fn parse_url_list(key: &str, default: Vec<String>) -> Result<Vec<String>> {
    let urls = get_env_list(key, default);
    for raw in &urls {
        Url::parse(raw).map_err(|e| {
            SubError::InvalidConfig(format!("{} entry {} is not a valid URL: {}", key, raw, e))
        })?;
    }
    Ok(urls)
}

fn parse_optional_url(key: &str) -> Result<Option<String>> {
    let raw = env::var(key).unwrap_or_default();
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }

    let url = Url::parse(raw)
        .map_err(|e| SubError::InvalidConfig(format!("{} must be a valid URL: {}", key, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(SubError::InvalidConfig(format!(
            "{} has unsupported scheme: {}",
            key,
            url.scheme()
        )));
    }
    Ok(Some(raw.to_string()))
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Comma-separated list, falling back to `default` when unset or empty
fn get_env_list(key: &str, default: Vec<String>) -> Vec<String> {
    let values: Vec<String> = env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if values.is_empty() {
        default
    } else {
        values
    }
}
