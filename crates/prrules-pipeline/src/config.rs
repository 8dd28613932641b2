//! Run configuration, loaded from an optional JSON file.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use prrules_types::{PrRulesError, Result};

use crate::consultants::{default_consultants, Consultant};
use crate::retry::BackoffPolicy;
use crate::topology::TopologyKind;

/// Pipeline settings. Every field has a default, so `{}` is a valid file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub topology: TopologyKind,
    /// Retries per stage call after the first attempt.
    pub max_retries: usize,
    pub backoff: BackoffPolicy,
    /// Declaration order is the merge order of opinions.
    pub consultants: Vec<Consultant>,
    /// Wall-clock budget for the whole checklist, in seconds.
    pub deadline_secs: Option<u64>,
    /// Model id; the provider's default when unset.
    pub model: Option<String>,
    /// Output token cap per backend call; the provider's default when unset.
    pub max_tokens: Option<u32>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            topology: TopologyKind::Auto,
            max_retries: 1,
            backoff: BackoffPolicy::default(),
            consultants: default_consultants(),
            deadline_secs: None,
            model: None,
            max_tokens: None,
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PrRulesError::Other(format!("cannot read config {}: {e}", path.display()))
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}
