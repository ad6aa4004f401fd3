//! Search-API key scheduling
//!
//! Keys are ranked so that quota which is about to reset anyway is spent
//! first: alive keys with searches left by soonest reset, then alive keys
//! that are drained (they come back soonest), then keys whose probe failed.

pub mod quota;
pub mod reset;

use std::collections::HashSet;
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, Utc};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, SubError};
use crate::models::{ApiKeyQuota, QuotaSnapshot};

pub use quota::{hash_key, load_keys_file, AccountQuota, Credential, QuotaProbe, SerpApiProbe};
pub use reset::next_reset_date;

#[derive(Debug, Clone)]
struct QuotaCache {
    fetched_at: Instant,
    quotas: Vec<ApiKeyQuota>,
}

/// Ranks credentials by quota and hands them out with fallback
pub struct KeyScheduler {
    credentials: Vec<Credential>,
    probe: Arc<dyn QuotaProbe>,
    cache: RwLock<Option<QuotaCache>>,
    failed: Mutex<HashSet<String>>,
    pacer: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    ttl: Duration,
    today: Option<NaiveDate>,
}

impl KeyScheduler {
    /// Scheduler probing at most once per second
    pub fn new(credentials: Vec<Credential>, probe: Arc<dyn QuotaProbe>, ttl: Duration) -> Self {
        Self {
            credentials,
            probe,
            cache: RwLock::new(None),
            failed: Mutex::new(HashSet::new()),
            pacer: RateLimiter::direct(Quota::per_second(NonZeroU32::MIN)),
            ttl,
            today: None,
        }
    }

    /// Override the probe rate
    pub fn with_probe_rate(mut self, per_second: NonZeroU32) -> Self {
        self.pacer = RateLimiter::direct(Quota::per_second(per_second));
        self
    }

    /// Pin the calendar date used for reset computations
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Utc::now().date_naive())
    }

    /// Probe every key, or return the cached figures while they are fresh
    #[instrument(skip(self), fields(keys = self.credentials.len()))]
    pub async fn refresh(&self, force: bool) -> Result<Vec<ApiKeyQuota>> {
        if !force {
            if let Some(cache) = self.cache.read().as_ref() {
                if cache.fetched_at.elapsed() < self.ttl {
                    return Ok(cache.quotas.clone());
                }
            }
        }

        let today = self.today();
        let mut quotas = Vec::with_capacity(self.credentials.len());
        for credential in &self.credentials {
            self.pacer.until_ready().await;
            let next_reset = next_reset_date(credential.registration_date(), today);

            let quota = match self.probe.probe(credential).await {
                Ok(account) => ApiKeyQuota {
                    key_hash: credential.key_hash().to_string(),
                    masked: credential.masked(),
                    monthly_cap: account.monthly_cap,
                    remaining: account.remaining.max(0),
                    next_reset,
                    alive: account.is_active(),
                    account_status: account.account_status,
                },
                Err(e) => {
                    warn!("Quota probe failed for {}: {}", credential.masked(), e);
                    ApiKeyQuota {
                        key_hash: credential.key_hash().to_string(),
                        masked: credential.masked(),
                        monthly_cap: 0,
                        remaining: 0,
                        next_reset,
                        alive: false,
                        account_status: None,
                    }
                }
            };
            debug!(
                key = %quota.masked,
                remaining = quota.remaining,
                next_reset = %quota.next_reset,
                alive = quota.alive,
                "Key quota"
            );
            quotas.push(quota);
        }

        *self.cache.write() = Some(QuotaCache {
            fetched_at: Instant::now(),
            quotas: quotas.clone(),
        });

        let snapshot = QuotaSnapshot::from_quotas(&quotas);
        info!(
            "Quota refreshed: {}/{} keys usable, {} searches left",
            snapshot.keys_ok, snapshot.keys_total, snapshot.total_remaining
        );

        Ok(quotas)
    }

    /// Cached quotas with this run's failure marks applied
    fn current(&self) -> Vec<ApiKeyQuota> {
        let failed = self.failed.lock();
        self.cache
            .read()
            .as_ref()
            .map(|cache| {
                cache
                    .quotas
                    .iter()
                    .cloned()
                    .map(|mut q| {
                        if failed.contains(&q.key_hash) {
                            q.alive = false;
                        }
                        q
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Keys in the order they should be spent
    pub async fn priority_list(&self) -> Result<Vec<ApiKeyQuota>> {
        self.refresh(false).await?;
        let mut quotas = self.current();
        quotas.sort_by_key(|q| (priority_tier(q), q.next_reset));
        Ok(quotas)
    }

    /// First alive key in priority order
    ///
    /// When no key answered its quota check, the first key not yet marked
    /// failed is returned instead.
    pub async fn select_key(&self) -> Result<Credential> {
        if self.credentials.is_empty() {
            return Err(SubError::NoCredentials);
        }

        let list = self.priority_list().await?;
        let failed = self.failed.lock().clone();
        list.iter()
            .find(|q| q.alive)
            .or_else(|| list.iter().find(|q| !failed.contains(&q.key_hash)))
            .and_then(|q| self.credential(&q.key_hash))
            .ok_or(SubError::AllCredentialsExhausted { attempts: 0 })
    }

    /// Run `op` with each key in priority order until one succeeds
    ///
    /// Dead keys sort last but are still tried: a failed quota check says
    /// little about whether the key can search. Each key is tried at most
    /// once per call; a key `op` fails with is marked and stays out of
    /// rotation for the rest of the run.
    pub async fn try_with_fallback<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut(Credential) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if self.credentials.is_empty() {
            return Err(SubError::NoCredentials);
        }

        let list = self.priority_list().await?;
        let failed = self.failed.lock().clone();
        let mut attempts = 0u32;
        for quota in list.iter().filter(|q| !failed.contains(&q.key_hash)) {
            let Some(credential) = self.credential(&quota.key_hash) else {
                continue;
            };
            attempts += 1;
            match op(credential.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!("Key {} failed: {}", credential.masked(), e);
                    self.mark_failed(&credential);
                }
            }
        }

        Err(SubError::AllCredentialsExhausted { attempts })
    }

    pub fn mark_failed(&self, credential: &Credential) {
        self.failed.lock().insert(credential.key_hash().to_string());
    }

    pub fn reset_failures(&self) {
        self.failed.lock().clear();
    }

    /// Pool figures from the last refresh
    pub fn snapshot(&self) -> QuotaSnapshot {
        QuotaSnapshot::from_quotas(&self.current())
    }

    fn credential(&self, key_hash: &str) -> Option<Credential> {
        self.credentials
            .iter()
            .find(|c| c.key_hash() == key_hash)
            .cloned()
    }
}

fn priority_tier(quota: &ApiKeyQuota) -> u8 {
    match (quota.alive, quota.remaining > 0) {
        (true, true) => 0,
        (true, false) => 1,
        (false, _) => 2,
    }
}
