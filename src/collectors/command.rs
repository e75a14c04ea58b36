//! External program collector.
//!
//! Runs a program with fixed arguments. Stdout that parses as JSON becomes the
//! result as-is; anything else is wrapped as a string. A non-zero exit is a
//! failure carrying the tail of stderr.

use std::process::Stdio;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tokio::process::Command;

use super::Collector;

const STDERR_TAIL: usize = 512;

pub struct CommandCollector {
    program: String,
    args: Vec<String>,
}

impl CommandCollector {
    pub fn new(program: &str, args: Vec<String>) -> Self {
        Self {
            program: program.to_string(),
            args,
        }
    }
}

#[async_trait::async_trait]
impl Collector for CommandCollector {
    async fn collect(&self) -> Result<Value> {
        tracing::debug!(program = %self.program, args = ?self.args, "spawning collector process");

        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("failed to spawn '{}'", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            anyhow::bail!("'{}' exited with {}: {}", self.program, output.status, tail(stderr));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stdout = stdout.trim();
        Ok(serde_json::from_str(stdout).unwrap_or_else(|_| json!({ "stdout": stdout })))
    }

    fn kind(&self) -> &'static str {
        "command"
    }
}

/// The last `STDERR_TAIL` characters of `text`.
fn tail(text: &str) -> &str {
    match text.char_indices().rev().nth(STDERR_TAIL - 1) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}
