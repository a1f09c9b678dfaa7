//! HTTP probes backed by reqwest

use crate::error::ProbeError;
use crate::probe::{ArtifactProbe, HealthProbe, ProbeStatus, ServedArtifact};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Health and artifact probe over HTTP(S)
pub struct HttpProbe {
    client: Client,
}

impl HttpProbe {
    /// Create a probe whose requests time out after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, ProbeError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProbeError::Client(e.to_string()))?;
        Ok(Self { client })
    }

    fn check_url(url: &str) -> Result<(), ProbeError> {
        if url.starts_with("http://") || url.starts_with("https://") {
            Ok(())
        } else {
            Err(ProbeError::InvalidUrl(url.to_string()))
        }
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self, url: &str) -> ProbeStatus {
        if let Err(e) = Self::check_url(url) {
            return ProbeStatus::Unreachable {
                reason: e.to_string(),
            };
        }

        match self.client.get(url).send().await {
            Ok(response) if response.status().is_success() => ProbeStatus::Healthy,
            Ok(response) => ProbeStatus::Unhealthy {
                reason: format!("HTTP {}", response.status()),
            },
            Err(e) => {
                debug!(url, error = %e, "Health probe request failed");
                ProbeStatus::Unreachable {
                    reason: e.to_string(),
                }
            }
        }
    }
}

#[async_trait]
impl ArtifactProbe for HttpProbe {
    async fn fetch(&self, url: &str) -> Result<ServedArtifact, ProbeError> {
        Self::check_url(url)?;

        let response = self
            .client
            .get(url)
            .header("Cache-Control", "no-cache")
            .send()
            .await
            .map_err(|e| ProbeError::Unreachable {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status_code = response.status().as_u16();
        let body = response.text().await.map_err(|e| ProbeError::Unreachable {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        Ok(ServedArtifact {
            url: url.to_string(),
            status_code,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_non_http_urls_are_unreachable() {
        let probe = HttpProbe::new(Duration::from_secs(1)).unwrap();
        let status = probe.probe("ftp://example.invalid/health").await;
        assert!(matches!(status, ProbeStatus::Unreachable { .. }));

        let err = probe.fetch("sim://web/app.js").await.unwrap_err();
        assert!(matches!(err, ProbeError::InvalidUrl(_)));
    }
}
