//! Config file plus command-line overrides.

use anyhow::{Context, Result};
use homestock_sync::EngineConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Contents of the optional TOML config file.
///
/// ```toml
/// token = "..."
/// home = "home-1"
///
/// [client]
/// base_url = "https://api.homestock.app"
/// timeout = 30000
///
/// [triggers]
/// periodic_interval = 300000
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub token: Option<String>,
    pub home: Option<String>,
    #[serde(flatten)]
    pub engine: EngineConfig,
}

impl CliConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Applies command-line values over the file's.
    pub fn merge(mut self, server: Option<String>, token: Option<String>, home: Option<String>) -> Self {
        if let Some(server) = server {
            self.engine.client.base_url = server.trim_end_matches('/').to_string();
        }
        if token.is_some() {
            self.token = token;
        }
        if home.is_some() {
            self.home = home;
        }
        self
    }
}
