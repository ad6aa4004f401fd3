//! External conversion services
//!
//! When the raw and structured variants of a source disagree, the source URL
//! is handed to a conversion service that returns a normalised document.

use std::time::Duration;

use tracing::{debug, warn};
use url::Url;

use super::client::SubscriptionClient;
use super::decode::{decode_payload, DecodeOutcome};
use crate::error::{Result, SubError};
use crate::models::DecodePath;

/// Ordered list of conversion services
#[derive(Debug, Clone)]
pub struct Converter {
    services: Vec<String>,
    timeout: Duration,
}

impl Converter {
    pub fn new(services: Vec<String>, timeout: Duration) -> Self {
        Self { services, timeout }
    }

    /// Request URL for one service
    pub fn request_url(service: &str, source: &str) -> Result<Url> {
        Ok(Url::parse_with_params(
            service,
            &[("target", "clash"), ("url", source), ("insert", "false")],
        )?)
    }

    /// Try each service in order; the first reply with nodes wins
    pub async fn convert(&self, client: &SubscriptionClient, source: &str) -> Result<DecodeOutcome> {
        let mut last_error = String::from("no conversion services configured");

        for service in &self.services {
            match self.try_service(client, service, source).await {
                Ok(outcome) => {
                    debug!(service = %service, nodes = outcome.node_count(), "Converter resolved source");
                    return Ok(outcome);
                }
                Err(e) => {
                    warn!("Converter {} failed for {}: {}", service, source, e);
                    last_error = format!("{}: {}", service, e);
                }
            }
        }

        Err(SubError::ConverterFailed(last_error))
    }

    async fn try_service(
        &self,
        client: &SubscriptionClient,
        service: &str,
        source: &str,
    ) -> Result<DecodeOutcome> {
        let url = Self::request_url(service, source)?;
        let payload = client.get(url.as_str(), self.timeout).await?;

        if !payload.is_success() {
            return Err(SubError::HttpStatus {
                url: service.to_string(),
                status: payload.status,
            });
        }

        let mut outcome = decode_payload(&payload.text());
        if outcome.links.is_empty() {
            return Err(SubError::NoNodes {
                url: service.to_string(),
            });
        }
        outcome.path = DecodePath::Converter;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_url_encodes_source() {
        let url = Converter::request_url(
            "https://conv.example.net/sub",
            "https://panel.example.com/api/v1/client/subscribe?token=abc",
        )
        .unwrap();

        assert_eq!(url.host_str(), Some("conv.example.net"));
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs[0], ("target".to_string(), "clash".to_string()));
        assert_eq!(
            pairs[1].1,
            "https://panel.example.com/api/v1/client/subscribe?token=abc"
        );
        assert_eq!(pairs[2], ("insert".to_string(), "false".to_string()));
        assert!(url.as_str().contains("token%3Dabc"));
    }

    #[test]
    fn test_request_url_rejects_bad_service() {
        assert!(matches!(
            Converter::request_url("not a url", "https://x"),
            Err(SubError::InvalidUrl(_))
        ));
    }
}
