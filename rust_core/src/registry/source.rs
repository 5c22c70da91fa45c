//! Registry source data: rosters, alias tables and map lists.
//!
//! JSON format:
//! ```json
//! {
//!   "divisions":     { "Gold": ["WICKEDS", "AVENGERS"] },
//!   "team_aliases":  { "WICKED": ["WICKEDS"] },
//!   "map_overrides": { "lennon": "dod_lennon2" },
//!   "fallback_maps": ["dod_anzio", "dod_avalanche"]
//! }
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrySource {
    /// Division -> canonical team names
    #[serde(default)]
    pub divisions: BTreeMap<String, Vec<String>>,
    /// Alias -> canonical team names (more than one = ambiguous)
    #[serde(default)]
    pub team_aliases: BTreeMap<String, Vec<String>>,
    /// Admin map alias -> canonical map token
    #[serde(default)]
    pub map_overrides: BTreeMap<String, String>,
    /// Global list of accepted map tokens
    #[serde(default)]
    pub fallback_maps: Vec<String>,
}

impl RegistrySource {
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("parse registry source JSON")
    }
}

/// Where registry source data comes from.
#[async_trait]
pub trait RegistrySourceProvider: Send + Sync {
    async fn load_source(&self) -> Result<RegistrySource>;
}

/// Registry source read from a JSON file on every (re)load.
#[derive(Debug, Clone)]
pub struct FileRegistrySource {
    path: PathBuf,
}

impl FileRegistrySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RegistrySourceProvider for FileRegistrySource {
    async fn load_source(&self) -> Result<RegistrySource> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("read registry source {}", self.path.display()))?;
        RegistrySource::from_json(&content)
    }
}

/// Fixed registry source held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistrySource {
    source: RegistrySource,
}

impl StaticRegistrySource {
    pub fn new(source: RegistrySource) -> Self {
        Self { source }
    }
}

#[async_trait]
impl RegistrySourceProvider for StaticRegistrySource {
    async fn load_source(&self) -> Result<RegistrySource> {
        Ok(self.source.clone())
    }
}
