//! HTTP access to subscription hosts and conversion services

use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use reqwest::Client;
use tracing::debug;

use crate::config::FetchConfig;
use crate::error::{Result, SubError};
use crate::models::RawPayload;

/// Bytes kept from a validation probe for rate-limit phrase checks
const PROBE_SAMPLE_LIMIT: usize = 4096;

/// Head of a streamed response
#[derive(Debug, Clone)]
pub struct ProbeResponse {
    pub status: u16,
    pub content_length: Option<u64>,
    pub sample: Bytes,
    pub latency: Duration,
}

/// Thin wrapper over a shared reqwest client
#[derive(Debug, Clone)]
pub struct SubscriptionClient {
    http: Client,
    min_body_bytes: usize,
}

impl SubscriptionClient {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.validate_timeout())
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .gzip(true)
            .build()?;

        Ok(Self {
            http,
            min_body_bytes: config.min_body_bytes,
        })
    }

    /// Fetch a full body
    pub async fn get(&self, url: &str, timeout: Duration) -> Result<RawPayload> {
        let started = Instant::now();
        let response = self
            .http
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(SubError::from_request)?;

        let status = response.status().as_u16();
        let latency = started.elapsed();
        let body = response.bytes().await.map_err(SubError::from_request)?;

        debug!(
            url = %url,
            status,
            bytes = body.len(),
            latency_ms = latency.as_millis() as u64,
            "Fetched body"
        );

        Ok(RawPayload {
            status,
            body,
            latency,
        })
    }

    /// Stream just enough of the body to tell an empty endpoint from a live one
    pub async fn probe(&self, url: &str, timeout: Duration) -> Result<ProbeResponse> {
        let started = Instant::now();
        let mut response = self
            .http
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(SubError::from_request)?;

        let status = response.status().as_u16();
        let content_length = response.content_length();
        let latency = started.elapsed();

        let wanted = self.min_body_bytes.max(PROBE_SAMPLE_LIMIT);
        let mut sample = BytesMut::new();
        while sample.len() < wanted {
            match response.chunk().await.map_err(SubError::from_request)? {
                Some(chunk) => sample.extend_from_slice(&chunk),
                None => break,
            }
        }
        sample.truncate(wanted);

        Ok(ProbeResponse {
            status,
            content_length,
            sample: sample.freeze(),
            latency,
        })
    }
}
