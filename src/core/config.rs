//! Store-level configuration loaded from `switchyard.toml`.
//!
//! A missing file is not an error: every key has a default, so a fresh
//! store works without any configuration at all.

use crate::core::error::SwitchyardError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SwitchyardConfig {
    pub governance: GovernanceConfig,
    pub memory: MemoryConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GovernanceConfig {
    /// Consecutive failures before an alert is raised.
    pub alert_threshold: u32,
    /// Number of events kept in the in-memory ring.
    pub ring_capacity: usize,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            alert_threshold: 3,
            ring_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Document folders scanned by the keyword tier of `read`.
    pub search_dirs: Vec<String>,
    pub embedding_dim: usize,
    pub max_results: usize,
    /// Extension (without dot) of files the document store lists.
    pub document_extension: String,
    /// Record write intents so interrupted writes can be repaired.
    pub intent_journal: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            search_dirs: Vec::new(),
            embedding_dim: 16,
            max_results: 3,
            document_extension: "md".to_string(),
            intent_journal: true,
        }
    }
}

impl SwitchyardConfig {
    /// Load and validate `path`; falls back to defaults when absent.
    pub fn load(path: &Path) -> Result<Self, SwitchyardError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, SwitchyardError> {
        let config: SwitchyardConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SwitchyardError> {
        if self.governance.alert_threshold == 0 {
            return Err(SwitchyardError::ValidationError(
                "governance.alert_threshold must be at least 1".to_string(),
            ));
        }
        if self.governance.ring_capacity == 0 {
            return Err(SwitchyardError::ValidationError(
                "governance.ring_capacity must be at least 1".to_string(),
            ));
        }
        if self.memory.embedding_dim == 0 {
            return Err(SwitchyardError::ValidationError(
                "memory.embedding_dim must be at least 1".to_string(),
            ));
        }
        if self.memory.document_extension.trim().is_empty() {
            return Err(SwitchyardError::ValidationError(
                "memory.document_extension must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
