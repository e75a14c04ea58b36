//! Collectors -- the work a pipeline job performs when it fires.
//!
//! The orchestrator treats every collector as an opaque zero-argument async
//! operation returning a JSON value. Concrete collectors are built from
//! configuration at process start and injected into the job table.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod command;
pub mod echo;
pub mod http;

/// Trait for all job work functions.
#[async_trait::async_trait]
pub trait Collector: Send + Sync {
    /// Perform one unit of work. The error message is what failure
    /// classification and logs see.
    async fn collect(&self) -> Result<Value>;

    /// Short label used in listings.
    fn kind(&self) -> &'static str {
        "custom"
    }
}

/// Collector configuration as written in the `[jobs.collector]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CollectorConfig {
    /// Return a fixed value. Handy for heartbeats and dry runs.
    Echo {
        #[serde(default = "default_echo_value")]
        value: Value,
    },
    /// GET a URL and report status, size, and latency.
    Http {
        url: String,
        #[serde(default = "default_http_timeout_secs")]
        timeout_secs: u64,
    },
    /// Run an external program; JSON on stdout becomes the result.
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

impl CollectorConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Echo { .. } => "echo",
            Self::Http { .. } => "http",
            Self::Command { .. } => "command",
        }
    }
}

fn default_echo_value() -> Value {
    serde_json::json!({ "ok": true })
}

fn default_http_timeout_secs() -> u64 {
    30
}

/// Build the collector described by `config`.
pub fn build(config: &CollectorConfig) -> Result<Arc<dyn Collector>> {
    let collector: Arc<dyn Collector> = match config {
        CollectorConfig::Echo { value } => Arc::new(echo::EchoCollector::new(value.clone())),
        CollectorConfig::Http { url, timeout_secs } => Arc::new(http::HttpCollector::new(
            url,
            Duration::from_secs(*timeout_secs),
        )?),
        CollectorConfig::Command { program, args } => {
            Arc::new(command::CommandCollector::new(program, args.clone()))
        }
    };
    Ok(collector)
}

/// Collector backed by a closure, for embedding the orchestrator in another
/// program or in tests.
pub struct FnCollector<F> {
    f: F,
}

/// Wrap an async closure as a [`Collector`].
pub fn from_fn<F, Fut>(f: F) -> Arc<dyn Collector>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(FnCollector { f })
}

#[async_trait::async_trait]
impl<F, Fut> Collector for FnCollector<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    async fn collect(&self) -> Result<Value> {
        (self.f)().await
    }
}
