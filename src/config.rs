//! Coordinator configuration
//!
//! Loaded from camelCase JSON; every field has a default so an empty
//! object is a valid configuration.

use crate::error::{QuarantineError, Result};
use crate::naming::{DEFAULT_PREFIX, SEPARATOR};
use crate::tracker::DEFAULT_UNTRACKED_KINDS;
use crate::types::OperationKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for a [`Coordinator`](crate::Coordinator)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuarantineConfig {
    /// Reserved prefix of quarantine context names
    pub name_prefix: String,

    /// Single-shot, response-only kinds the request tracker ignores
    pub untracked_kinds: Vec<OperationKind>,

    /// Upper bound on termination sweep rounds
    pub max_sweep_rounds: usize,

    /// Where the guard ownership flag is persisted
    ///
    /// When unset the flag lives in memory and is lost with the process, so
    /// a restart after an unclean shutdown cannot tell that this system
    /// suppressed the setting. Set a path wherever that recovery matters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flag_path: Option<PathBuf>,

    /// Whether the global guard participates at all
    pub guard_enabled: bool,

    /// Static override for the long-lived channel capability
    ///
    /// Unset means the host's capability check decides.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels_terminable: Option<bool>,
}

impl Default for QuarantineConfig {
    fn default() -> Self {
        Self {
            name_prefix: DEFAULT_PREFIX.to_string(),
            untracked_kinds: DEFAULT_UNTRACKED_KINDS.to_vec(),
            max_sweep_rounds: 8,
            flag_path: None,
            guard_enabled: true,
            channels_terminable: None,
        }
    }
}

impl QuarantineConfig {
    /// Load and validate a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            QuarantineError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let config: Self = serde_json::from_str(&json).map_err(|e| {
            QuarantineError::Config(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;

        tracing::debug!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name_prefix.is_empty() {
            return Err(QuarantineError::Config(
                "namePrefix cannot be empty".to_string(),
            ));
        }
        if self.name_prefix.contains(SEPARATOR) {
            return Err(QuarantineError::Config(format!(
                "namePrefix cannot contain '{}'",
                SEPARATOR
            )));
        }
        if self.max_sweep_rounds == 0 {
            return Err(QuarantineError::Config(
                "maxSweepRounds must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}
