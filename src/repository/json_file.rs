use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{PersistedState, StateStore};
use crate::error::Result;
use crate::models::SourceState;

const HISTORY_FILE: &str = "history_urls.json";
const LIVE_FILE: &str = "live_urls.json";
const RATE_LIMIT_FILE: &str = "rate_limit.json";
const FIRST_SEEN_FILE: &str = "url_first_seen.json";
const REGISTRATION_FILE: &str = "api_key_registration_dates.json";
const NOTIFIED_FILE: &str = "notified_urls.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistrationDates {
    #[serde(default)]
    key_registration_dates: BTreeMap<String, NaiveDate>,
}

/// One JSON file per state component inside a data directory
///
/// Files are replaced atomically (write to a temp file, then rename), so a
/// crash mid-flush leaves the previous version intact.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn read<T: DeserializeOwned + Default>(&self, name: &str) -> Result<T> {
        let path = self.dir.join(name);
        match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(T::default()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("{} not found, starting empty", path.display());
                Ok(T::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.dir.join(name);
        let tmp = self.dir.join(format!("{}.tmp", name));
        let bytes = serde_json::to_vec_pretty(value)?;
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn load(&self) -> Result<PersistedState> {
        let registration: RegistrationDates = self.read(REGISTRATION_FILE).await?;
        let state = PersistedState {
            history: self.read::<BTreeSet<String>>(HISTORY_FILE).await?,
            live: self.read::<Vec<String>>(LIVE_FILE).await?,
            rate_limits: self.read::<BTreeMap<String, SourceState>>(RATE_LIMIT_FILE).await?,
            first_seen: self.read::<BTreeMap<String, NaiveDate>>(FIRST_SEEN_FILE).await?,
            registration_dates: registration.key_registration_dates,
            notified: self.read::<BTreeSet<String>>(NOTIFIED_FILE).await?,
        };

        info!(
            history = state.history.len(),
            live = state.live.len(),
            rate_limited = state.rate_limits.len(),
            "Loaded state from {}",
            self.dir.display()
        );
        Ok(state)
    }

    async fn flush(&self, state: &PersistedState) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        self.write(HISTORY_FILE, &state.history).await?;
        self.write(LIVE_FILE, &state.live).await?;
        self.write(RATE_LIMIT_FILE, &state.rate_limits).await?;
        self.write(FIRST_SEEN_FILE, &state.first_seen).await?;
        self.write(
            REGISTRATION_FILE,
            &RegistrationDates {
                key_registration_dates: state.registration_dates.clone(),
            },
        )
        .await?;
        self.write(NOTIFIED_FILE, &state.notified).await?;

        debug!("Flushed state to {}", self.dir.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn sample_state() -> PersistedState {
        let url = "https://a.test/api/v1/client/subscribe?token=abc".to_string();
        let mut state = PersistedState::default();
        state.history.insert(url.clone());
        state.live.push(url.clone());
        state.rate_limits.insert(
            url.clone(),
            SourceState {
                failure_count: 2,
                last_reason: "http 429".to_string(),
                last_failure_at: Utc.timestamp_opt(1_790_000_000, 0).unwrap(),
                next_allowed_at: Utc.timestamp_opt(1_790_001_800, 0).unwrap(),
            },
        );
        state
            .first_seen
            .insert(url.clone(), NaiveDate::from_ymd_opt(2026, 10, 1).unwrap());
        state.registration_dates.insert(
            "ab12".to_string(),
            NaiveDate::from_ymd_opt(2026, 1, 31).unwrap(),
        );
        state.notified.insert(url);
        state
    }

    #[tokio::test]
    async fn test_flush_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("data"));
        let state = sample_state();

        store.flush(&state).await.unwrap();
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, state);
        assert!(!dir.path().join("data").join("live_urls.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        store.flush(&sample_state()).await.unwrap();

        let raw = std::fs::read_to_string(dir.path().join(REGISTRATION_FILE)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["key_registration_dates"]["ab12"], "2026-01-31");

        let raw = std::fs::read_to_string(dir.path().join(RATE_LIMIT_FILE)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let entry = &value["https://a.test/api/v1/client/subscribe?token=abc"];
        assert_eq!(entry["hits"], 2);
        assert_eq!(entry["next_allowed_at"], 1_790_001_800);
    }

    #[tokio::test]
    async fn test_load_missing_and_blank_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(HISTORY_FILE), "  \n").unwrap();

        let loaded = JsonFileStore::new(dir.path()).load().await.unwrap();
        assert_eq!(loaded, PersistedState::default());
    }

    #[tokio::test]
    async fn test_load_corrupt_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(LIVE_FILE), "[\"unterminated").unwrap();

        let err = JsonFileStore::new(dir.path()).load().await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Storage);
    }
}
