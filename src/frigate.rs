use log::{debug, warn};
use std::time::Duration;

use crate::config::FrigateConfig;
use crate::error::Error;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const RETRY_NOT_FOUND: Duration = Duration::from_secs(1);
const RETRY_TRANSIENT_MAX: Duration = Duration::from_secs(5);

/// Confirms snapshot/clip availability against the Frigate HTTP API.
///
/// Only used when `frigate.verify_artifacts` is set; otherwise the engine
/// trusts the `has_snapshot`/`has_clip` flags on the event stream.
pub struct FrigateClient {
    http: reqwest::Client,
    api_base: String,
}

impl FrigateClient {
    pub fn new(config: &FrigateConfig) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Artifact(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            api_base: config.api_base_url(),
        })
    }

    pub fn snapshot_url(&self, event_id: &str) -> String {
        format!("{}/events/{}/snapshot.jpg", self.api_base, event_id)
    }

    pub fn clip_url(&self, event_id: &str) -> String {
        format!("{}/events/{}/clip.mp4", self.api_base, event_id)
    }

    /// Poll `url` with HEAD until it exists or the deadline passes.
    /// 200 means available, 404 means not written yet, anything else is a
    /// transient error retried with backoff.
    pub async fn await_artifact(&self, url: &str, deadline: Duration) -> bool {
        let started = tokio::time::Instant::now();
        let mut backoff = RETRY_NOT_FOUND;

        loop {
            match self.http.head(url).send().await {
                Ok(response) if response.status() == reqwest::StatusCode::OK => return true,
                Ok(response) if response.status() == reqwest::StatusCode::NOT_FOUND => {
                    debug!("Artifact not ready yet: {}", url);
                    backoff = RETRY_NOT_FOUND;
                }
                Ok(response) => {
                    warn!("Unexpected status {} for {}", response.status(), url);
                    backoff = (backoff * 2).min(RETRY_TRANSIENT_MAX);
                }
                Err(e) => {
                    warn!("Artifact check failed for {}: {}", url, e);
                    backoff = (backoff * 2).min(RETRY_TRANSIENT_MAX);
                }
            }

            if started.elapsed() + backoff >= deadline {
                warn!("Gave up waiting for artifact: {}", url);
                return false;
            }
            tokio::time::sleep(backoff).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_event_urls() {
        let config = FrigateConfig {
            host: "frigate.local".to_string(),
            port: 5000,
            ssl: false,
            verify_artifacts: true,
        };
        let client = FrigateClient::new(&config).unwrap();
        assert_eq!(
            client.snapshot_url("ev-1"),
            "http://frigate.local:5000/api/events/ev-1/snapshot.jpg"
        );
        assert_eq!(
            client.clip_url("ev-1"),
            "http://frigate.local:5000/api/events/ev-1/clip.mp4"
        );
    }
}
