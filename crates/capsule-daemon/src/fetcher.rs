//! HTTP transfer of content units.

use std::time::Duration;

use async_trait::async_trait;
use capsule_sched::{FetchFailure, Fetcher};
use capsule_types::content::ContentUnit;
use capsule_types::network::NetworkError;
use tracing::{debug, warn};

/// Upper bound on the buffer reserved before the first chunk arrives.
const MAX_PREALLOC_BYTES: u64 = 1 << 20;

/// Fetches unit bytes over HTTP(S).
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpFetcher {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Where `unit` is fetched from.
    pub fn url_for(&self, unit: &ContentUnit) -> String {
        match unit.source_url {
            Some(ref url) => url.clone(),
            None => format!("{}/{}", self.base_url, unit.id),
        }
    }
}

fn network_error(e: &reqwest::Error) -> NetworkError {
    if e.is_timeout() {
        NetworkError::Timeout
    } else {
        NetworkError::Unavailable
    }
}

fn initial_capacity(size_bytes: u64, content_length: Option<u64>) -> usize {
    let hint = content_length.map_or(size_bytes, |len| len.min(size_bytes));
    usize::try_from(hint.min(MAX_PREALLOC_BYTES)).unwrap_or(0)
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, unit: &ContentUnit) -> Result<Vec<u8>, FetchFailure> {
        let url = self.url_for(unit);
        debug!(unit = %unit.id, url, "fetching content unit");

        let mut response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| FetchFailure::new(network_error(&e)))?;

        let limit = unit.size_bytes;
        if response.content_length().is_some_and(|len| len > limit) {
            warn!(unit = %unit.id, limit, "response larger than catalog size");
            return Err(FetchFailure::new(NetworkError::Unavailable));
        }

        let mut body = Vec::with_capacity(initial_capacity(limit, response.content_length()));
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    let received = (body.len() + chunk.len()) as u64;
                    if received > limit {
                        warn!(unit = %unit.id, limit, received, "body exceeds catalog size");
                        return Err(FetchFailure::with_transferred(
                            NetworkError::Unavailable,
                            received,
                        ));
                    }
                    body.extend_from_slice(&chunk);
                }
                Ok(None) => break,
                Err(e) => {
                    return Err(FetchFailure::with_transferred(
                        network_error(&e),
                        body.len() as u64,
                    ))
                }
            }
        }
        Ok(body)
    }
}
