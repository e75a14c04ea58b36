//! Fixed-value collector.

use anyhow::Result;
use serde_json::Value;

use super::Collector;

/// Returns the configured value every time.
pub struct EchoCollector {
    value: Value,
}

impl EchoCollector {
    pub fn new(value: Value) -> Self {
        Self { value }
    }
}

#[async_trait::async_trait]
impl Collector for EchoCollector {
    async fn collect(&self) -> Result<Value> {
        Ok(self.value.clone())
    }

    fn kind(&self) -> &'static str {
        "echo"
    }
}
