//! Global guard: process-wide privacy toggle with restore-on-shutdown
//!
//! While any context is quarantined the guarded setting (e.g., WebRTC peer
//! connections) is forced to its suppressed value. Ownership is persisted
//! before the value is flipped, so a restart after an unclean shutdown
//! knows whether restoring the setting is this system's job.
//!
//! State machine: `Uncontrolled → Suppressed → Restored`.

use crate::config::QuarantineConfig;
use crate::decision::{PlatformCapabilities, StaticCapabilities};
use crate::error::{QuarantineError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Who currently controls the guarded setting, as reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingControl {
    /// Locked by policy; nobody may change it
    NotControllable,
    /// Owned by another actor
    ControlledByOther,
    /// Free to be taken over
    Controllable,
    /// Currently owned by this system
    ControlledByThis,
}

impl SettingControl {
    pub fn is_available(self) -> bool {
        matches!(
            self,
            SettingControl::Controllable | SettingControl::ControlledByThis
        )
    }
}

/// Current value and ownership of the guarded setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingState {
    pub value: bool,
    pub control: SettingControl,
}

/// Host-side access to the guarded setting
#[async_trait]
pub trait GuardedSetting: Send + Sync {
    /// Read value and level of control
    async fn get(&self) -> Result<SettingState>;

    /// Take ownership and set the value
    async fn set(&self, value: bool) -> Result<()>;

    /// Release ownership; the host falls back to the user's own value
    async fn clear(&self) -> Result<()>;

    /// Setting name for logs (e.g., "peerConnectionEnabled")
    fn name(&self) -> &str;
}

/// Persisted ownership flag
///
/// Absent (or `false`) means this system has not changed the setting.
pub trait OwnershipFlagStore: Send + Sync {
    fn save(&self, owned: bool) -> Result<()>;

    fn load(&self) -> Result<bool>;
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlagRecord {
    owned: bool,
    changed_at: u64,
}

/// JSON file-backed ownership flag
///
/// The file exists only while the flag is set. Writes go through a temp
/// file + rename.
pub struct FileFlagStore {
    path: PathBuf,
}

impl FileFlagStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OwnershipFlagStore for FileFlagStore {
    fn save(&self, owned: bool) -> Result<()> {
        if !owned {
            if self.path.exists() {
                std::fs::remove_file(&self.path).map_err(|e| {
                    QuarantineError::Persistence(format!(
                        "Failed to remove flag file {}: {}",
                        self.path.display(),
                        e
                    ))
                })?;
            }
            tracing::debug!(path = %self.path.display(), "Guard ownership flag cleared");
            return Ok(());
        }

        let record = FlagRecord {
            owned,
            changed_at: now_millis(),
        };
        let json = serde_json::to_string_pretty(&record)?;
        let tmp_path = self.path.with_extension("tmp");

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                QuarantineError::Persistence(format!(
                    "Failed to create flag directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        std::fs::write(&tmp_path, json).map_err(|e| {
            QuarantineError::Persistence(format!(
                "Failed to write flag file {}: {}",
                tmp_path.display(),
                e
            ))
        })?;

        std::fs::rename(&tmp_path, &self.path).map_err(|e| {
            QuarantineError::Persistence(format!(
                "Failed to rename flag file {} → {}: {}",
                tmp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::debug!(path = %self.path.display(), "Guard ownership flag saved");
        Ok(())
    }

    fn load(&self) -> Result<bool> {
        if !self.path.exists() {
            return Ok(false);
        }

        let json = std::fs::read_to_string(&self.path).map_err(|e| {
            QuarantineError::Persistence(format!(
                "Failed to read flag file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        let record: FlagRecord = serde_json::from_str(&json).map_err(|e| {
            QuarantineError::Persistence(format!(
                "Failed to parse flag file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        Ok(record.owned)
    }
}

/// In-memory ownership flag: lost on drop
#[derive(Default)]
pub struct MemoryFlagStore {
    owned: std::sync::RwLock<bool>,
}

impl OwnershipFlagStore for MemoryFlagStore {
    fn save(&self, owned: bool) -> Result<()> {
        let mut flag = self.owned.write().map_err(|e| {
            QuarantineError::Persistence(format!("Failed to acquire flag lock: {}", e))
        })?;
        *flag = owned;
        Ok(())
    }

    fn load(&self) -> Result<bool> {
        let flag = self.owned.read().map_err(|e| {
            QuarantineError::Persistence(format!("Failed to acquire flag lock: {}", e))
        })?;
        Ok(*flag)
    }
}

/// Guard lifecycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GuardState {
    /// Not touched by this system
    #[default]
    Uncontrolled,
    /// Setting forced to its suppressed value by this system
    Suppressed,
    /// Setting handed back after the last quarantine ended
    Restored,
}

/// Process-wide guard over one host setting
pub struct GlobalGuard {
    setting: Arc<dyn GuardedSetting>,
    flags: Arc<dyn OwnershipFlagStore>,
    capabilities: Arc<dyn PlatformCapabilities>,
    suppressed_value: bool,
    enabled: bool,
    state: Mutex<GuardState>,
}

impl GlobalGuard {
    /// Create a guard that forces `setting` to `false` while engaged
    pub fn new(
        setting: Arc<dyn GuardedSetting>,
        flags: Arc<dyn OwnershipFlagStore>,
        capabilities: Arc<dyn PlatformCapabilities>,
    ) -> Self {
        Self {
            setting,
            flags,
            capabilities,
            suppressed_value: false,
            enabled: true,
            state: Mutex::new(GuardState::Uncontrolled),
        }
    }

    /// Value the setting is forced to while engaged
    pub fn with_suppressed_value(mut self, value: bool) -> Self {
        self.suppressed_value = value;
        self
    }

    /// Disable the guard: engage/restore become no-ops
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Build a guard as described by a [`QuarantineConfig`]
    ///
    /// The ownership flag is file-backed when `flag_path` is set; a static
    /// `channels_terminable` overrides the host's capability check.
    pub fn from_config(
        config: &QuarantineConfig,
        setting: Arc<dyn GuardedSetting>,
        host_capabilities: Arc<dyn PlatformCapabilities>,
    ) -> Self {
        let flags: Arc<dyn OwnershipFlagStore> = match &config.flag_path {
            Some(path) => Arc::new(FileFlagStore::new(path.clone())),
            None => Arc::new(MemoryFlagStore::default()),
        };
        let capabilities: Arc<dyn PlatformCapabilities> = match config.channels_terminable {
            Some(terminable) => Arc::new(StaticCapabilities::new(terminable)),
            None => host_capabilities,
        };
        Self::new(setting, flags, capabilities).with_enabled(config.guard_enabled)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn state(&self) -> GuardState {
        *self.state.lock().await
    }

    /// Whether the setting is currently suppressed by this system
    pub async fn is_suppressed(&self) -> bool {
        self.state().await == GuardState::Suppressed
    }

    /// Platform capability consulted by the decision engine
    pub fn channels_terminable(&self) -> bool {
        self.capabilities.can_terminate_open_channels()
    }

    /// Force the setting to its suppressed value
    ///
    /// Returns `true` when this call took ownership. A setting already at
    /// the suppressed value is left alone with no ownership claim. A setting
    /// that must change but is owned elsewhere is a hard failure.
    pub async fn engage(&self) -> Result<bool> {
        if !self.enabled {
            return Ok(false);
        }

        let mut state = self.state.lock().await;
        if *state == GuardState::Suppressed {
            return Ok(false);
        }

        let current = self.setting.get().await?;
        if current.value == self.suppressed_value {
            tracing::debug!(
                setting = self.setting.name(),
                "Guarded setting already suppressed, not claiming ownership"
            );
            return Ok(false);
        }

        if !current.control.is_available() {
            return Err(QuarantineError::GuardUnavailable(format!(
                "setting '{}' is {:?}",
                self.setting.name(),
                current.control
            )));
        }

        // Ownership must be durable before the value flips.
        self.flags.save(true)?;
        self.setting.set(self.suppressed_value).await?;
        *state = GuardState::Suppressed;

        tracing::info!(setting = self.setting.name(), "Global guard engaged");
        Ok(true)
    }

    /// Hand the setting back
    ///
    /// Skipped when neither the persisted flag nor the host says this
    /// system owns the setting. Returns `true` when the setting was released.
    pub async fn restore(&self) -> Result<bool> {
        self.restore_when(|| true).await
    }

    /// Hand the setting back if `idle` still holds once the guard is locked
    ///
    /// `engage` takes the same lock, so a caller that registers new work
    /// before engaging is either seen by `idle` or re-engages afterwards.
    pub async fn restore_when<F>(&self, idle: F) -> Result<bool>
    where
        F: FnOnce() -> bool + Send,
    {
        if !self.enabled {
            return Ok(false);
        }

        let mut state = self.state.lock().await;
        if !idle() {
            tracing::debug!(
                setting = self.setting.name(),
                "Guard still needed, skipping restore"
            );
            return Ok(false);
        }

        let owned = self.flags.load()? || *state == GuardState::Suppressed;
        if !owned {
            let current = self.setting.get().await?;
            if current.control != SettingControl::ControlledByThis {
                tracing::debug!(
                    setting = self.setting.name(),
                    "Guarded setting not owned, skipping restore"
                );
                return Ok(false);
            }
        }

        self.setting.clear().await?;
        self.flags.save(false)?;
        *state = GuardState::Restored;

        tracing::info!(setting = self.setting.name(), "Global guard restored");
        Ok(true)
    }

    /// Adopt a persisted ownership claim after a restart
    ///
    /// Used when recovered contexts still need the guard engaged.
    pub async fn adopt_persisted(&self) -> Result<bool> {
        if !self.enabled || !self.flags.load()? {
            return Ok(false);
        }
        *self.state.lock().await = GuardState::Suppressed;
        Ok(true)
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
