//! HTTP collector: GET a URL, report status code, body size and latency.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::{json, Value};

use super::Collector;

/// HTTP collector checking reachability of a source page or feed.
pub struct HttpCollector {
    client: Client,
    url: String,
}

impl HttpCollector {
    pub fn new(target: &str, timeout: Duration) -> Result<Self> {
        let url = if target.starts_with("http") {
            target.to_string()
        } else {
            format!("http://{}", target)
        };

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { client, url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl Collector for HttpCollector {
    async fn collect(&self) -> Result<Value> {
        let start = Instant::now();
        // `{:#}` keeps the io error text (e.g. "Connection refused") visible to
        // failure classification.
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("GET {} failed: {:#}", self.url, anyhow::Error::new(e)))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("GET {} returned {}", self.url, status);
        }

        let body = response.bytes().await.context("Failed to read response body")?;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        Ok(json!({
            "url": self.url,
            "status": status.as_u16(),
            "bytes": body.len(),
            "latency_ms": latency_ms,
        }))
    }

    fn kind(&self) -> &'static str {
        "http"
    }
}
