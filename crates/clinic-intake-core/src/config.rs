//! Engine configuration.

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

/// Runtime settings, usually loaded from a JSON file at process start.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// SQLite file path
    pub database_path: String,
    /// How long a writer waits for the database lock before failing
    pub busy_timeout_ms: u64,
    /// Lifetime of a link token; expiry is absolute
    pub link_token_ttl_hours: i64,
    pub default_page_size: u32,
    pub max_page_size: u32,
    /// Absolute http(s) URL of the patient-facing frontend
    pub frontend_base_url: String,
    /// Forced inbox for every outbound message (non-production only)
    pub test_recipient: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: "data/clinic-intake.db".into(),
            busy_timeout_ms: 5_000,
            link_token_ttl_hours: 24,
            default_page_size: 25,
            max_page_size: 100,
            frontend_base_url: "http://localhost:4321".into(),
            test_recipient: None,
        }
    }
}

impl EngineConfig {
    /// Parse from JSON; missing keys keep their defaults.
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(json).context("invalid engine configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_json_str(&raw)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.link_token_ttl_hours > 0, "link_token_ttl_hours must be positive");
        anyhow::ensure!(self.default_page_size > 0, "default_page_size must be positive");
        anyhow::ensure!(
            self.default_page_size <= self.max_page_size,
            "default_page_size must not exceed max_page_size"
        );
        Ok(())
    }

    pub fn link_token_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.link_token_ttl_hours)
    }

    pub fn busy_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.busy_timeout_ms)
    }
}
