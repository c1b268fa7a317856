//! Runtime configuration: dispatch endpoint and task-manager tuning.
//!
//! Everything has a sensible default so the crate works with no config file
//! at all. A TOML file can override any field; `PAGEPILOT_SERVER_URL` in the
//! environment overrides the server base URL last.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Automation-server endpoint and retry tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Base URL of the automation server.
    pub base_url: String,
    /// Path of the DSL execution endpoint.
    pub execute_path: String,
    /// Path of the health probe endpoint.
    pub health_path: String,
    /// Per-request timeout for execution POSTs.
    pub timeout_ms: u64,
    /// Short timeout for the informational health probe.
    pub health_timeout_ms: u64,
    /// Attempt budget, including the first attempt.
    pub max_attempts: u32,
    /// Backoff unit; timeouts wait `attempt * unit`, connection failures
    /// `attempt * 2 * unit`.
    pub backoff_unit_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:7081".into(),
            execute_path: "/execute-dsl".into(),
            health_path: "/healthz".into(),
            timeout_ms: 120_000,
            health_timeout_ms: 2_000,
            max_attempts: 2,
            backoff_unit_ms: 1_000,
        }
    }
}

impl DispatchConfig {
    pub fn execute_url(&self) -> String {
        join_url(&self.base_url, &self.execute_path)
    }

    pub fn health_url(&self) -> String {
        join_url(&self.base_url, &self.health_path)
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Async task manager tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Concurrent task bodies.
    pub workers: usize,
    /// How long terminal tasks stay pollable before cleanup removes them.
    pub retention_secs: u64,
    /// Pre-generated task-ID pool size.
    pub id_pool_size: usize,
    /// Pool level that triggers background replenishment.
    pub id_pool_low_water: usize,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            retention_secs: 3_600,
            id_pool_size: 32,
            id_pool_low_water: 8,
        }
    }
}

/// Aggregate configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub dispatch: DispatchConfig,
    pub tasks: TaskConfig,
}

impl Config {
    /// Load from a TOML file. A missing file yields defaults; a malformed
    /// file is an error. `PAGEPILOT_SERVER_URL` overrides the base URL.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config at {}", path.display()))?;
            toml::from_str(&raw)
                .with_context(|| format!("failed to parse config at {}", path.display()))?
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Self::default()
        };
        if let Ok(url) = std::env::var("PAGEPILOT_SERVER_URL") {
            if !url.trim().is_empty() {
                config.dispatch.base_url = url.trim().to_string();
            }
        }
        Ok(config)
    }
}
