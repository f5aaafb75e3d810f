//! In-memory host implementations
//!
//! Useful for tests and single-process embedding. State lives in plain
//! maps behind mutexes and is lost on drop.

use crate::error::{QuarantineError, Result};
use crate::guard::{GuardedSetting, SettingControl, SettingState};
use crate::host::{ContextHost, SurfaceHost};
use crate::types::{ContextFilter, ContextId, ContextInfo, Marker, SurfaceId, SurfaceInfo};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|e| QuarantineError::Host(format!("Memory host lock poisoned: {}", e)))
}

/// In-memory isolation-context host
///
/// Can simulate a slow `create` and a failing `update`.
#[derive(Default)]
pub struct MemoryContextHost {
    contexts: Mutex<BTreeMap<ContextId, ContextInfo>>,
    deleted: Mutex<Vec<ContextId>>,
    create_delay: Mutex<Option<Duration>>,
    fail_updates: AtomicBool,
}

impl MemoryContextHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a context directly, as if it survived a restart
    pub fn insert(&self, info: ContextInfo) -> Result<()> {
        lock(&self.contexts)?.insert(info.id.clone(), info);
        Ok(())
    }

    pub fn get(&self, context_id: &str) -> Option<ContextInfo> {
        lock(&self.contexts).ok()?.get(context_id).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.contexts).map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make every following `create` wait before answering
    pub fn delay_creates(&self, delay: Duration) -> Result<()> {
        *lock(&self.create_delay)? = Some(delay);
        Ok(())
    }

    /// Make `update` fail (or succeed again)
    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    /// Ids deleted so far, in order
    pub fn deleted(&self) -> Vec<ContextId> {
        lock(&self.deleted).map(|d| d.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ContextHost for MemoryContextHost {
    async fn create(&self, name: &str, marker: &Marker) -> Result<ContextId> {
        let delay = *lock(&self.create_delay)?;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let id = format!("ctx-{}", uuid::Uuid::new_v4());
        let info = ContextInfo {
            id: id.clone(),
            name: name.to_string(),
            marker: marker.clone(),
        };
        lock(&self.contexts)?.insert(id.clone(), info);
        Ok(id)
    }

    async fn update(&self, context_id: &str, name: &str, marker: &Marker) -> Result<()> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(QuarantineError::Host(format!(
                "Failed to update context {}",
                context_id
            )));
        }
        let mut contexts = lock(&self.contexts)?;
        let info = contexts
            .get_mut(context_id)
            .ok_or_else(|| QuarantineError::Host(format!("No such context: {}", context_id)))?;
        info.name = name.to_string();
        info.marker = marker.clone();
        Ok(())
    }

    async fn delete(&self, context_id: &str) -> Result<()> {
        lock(&self.contexts)?
            .remove(context_id)
            .ok_or_else(|| QuarantineError::Host(format!("No such context: {}", context_id)))?;
        lock(&self.deleted)?.push(context_id.to_string());
        Ok(())
    }

    async fn query(&self, filter: &ContextFilter) -> Result<Vec<ContextInfo>> {
        Ok(lock(&self.contexts)?
            .values()
            .filter(|info| filter.matches(info))
            .cloned()
            .collect())
    }
}

/// In-memory surface host
///
/// Can simulate surfaces appearing while a termination sweep runs, and
/// surfaces whose termination routine fails.
pub struct MemorySurfaceHost {
    surfaces: Mutex<BTreeMap<SurfaceId, SurfaceInfo>>,
    next_id: AtomicU64,
    terminated: Mutex<Vec<SurfaceId>>,
    spawn_during_sweep: Mutex<HashMap<ContextId, usize>>,
    failing: Mutex<HashSet<SurfaceId>>,
}

impl Default for MemorySurfaceHost {
    fn default() -> Self {
        Self {
            surfaces: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            terminated: Mutex::new(Vec::new()),
            spawn_during_sweep: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
        }
    }
}

impl MemorySurfaceHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a surface without going through the coordinator
    pub fn open(&self, context_id: &str) -> Result<SurfaceId> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        lock(&self.surfaces)?.insert(
            id,
            SurfaceInfo {
                id,
                context_id: context_id.to_string(),
                active: false,
            },
        );
        Ok(id)
    }

    /// Close a surface without going through the coordinator
    pub fn close(&self, surface_id: SurfaceId) -> Result<bool> {
        Ok(lock(&self.surfaces)?.remove(&surface_id).is_some())
    }

    /// Surfaces the termination routine ran in, in order
    pub fn terminated(&self) -> Vec<SurfaceId> {
        lock(&self.terminated).map(|t| t.clone()).unwrap_or_default()
    }

    /// Open `count` new surfaces in `context_id`, one per termination call,
    /// as if the page kept spawning tabs during the sweep
    pub fn spawn_during_sweep(&self, context_id: &str, count: usize) -> Result<()> {
        lock(&self.spawn_during_sweep)?.insert(context_id.to_string(), count);
        Ok(())
    }

    /// Make the termination routine fail for a surface
    pub fn fail_termination(&self, surface_id: SurfaceId) -> Result<()> {
        lock(&self.failing)?.insert(surface_id);
        Ok(())
    }

    pub fn count_for(&self, context_id: &str) -> usize {
        lock(&self.surfaces)
            .map(|s| s.values().filter(|i| i.context_id == context_id).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl SurfaceHost for MemorySurfaceHost {
    async fn create(&self, context_id: &str, _url: Option<&str>) -> Result<SurfaceId> {
        self.open(context_id)
    }

    async fn remove(&self, surface_ids: &[SurfaceId]) -> Result<()> {
        let mut surfaces = lock(&self.surfaces)?;
        for id in surface_ids {
            surfaces.remove(id);
        }
        Ok(())
    }

    async fn query(&self, context_id: &str) -> Result<Vec<SurfaceInfo>> {
        Ok(lock(&self.surfaces)?
            .values()
            .filter(|info| info.context_id == context_id)
            .cloned()
            .collect())
    }

    async fn terminate_connections(&self, surface_id: SurfaceId) -> Result<()> {
        let context_id = lock(&self.surfaces)?
            .get(&surface_id)
            .map(|info| info.context_id.clone())
            .ok_or_else(|| QuarantineError::Host(format!("No such surface: {}", surface_id)))?;

        let spawn = {
            let mut pending = lock(&self.spawn_during_sweep)?;
            match pending.get_mut(&context_id) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    true
                }
                _ => false,
            }
        };
        if spawn {
            self.open(&context_id)?;
        }

        if lock(&self.failing)?.contains(&surface_id) {
            return Err(QuarantineError::Host(format!(
                "Script injection failed in surface {}",
                surface_id
            )));
        }

        lock(&self.terminated)?.push(surface_id);
        Ok(())
    }
}

/// In-memory guarded setting
///
/// `clear` falls back to the value the setting had when created.
pub struct MemorySetting {
    state: Mutex<SettingState>,
    user_value: bool,
    clear_calls: AtomicUsize,
}

impl MemorySetting {
    pub fn new(value: bool, control: SettingControl) -> Self {
        Self {
            state: Mutex::new(SettingState { value, control }),
            user_value: value,
            clear_calls: AtomicUsize::new(0),
        }
    }

    pub fn value(&self) -> bool {
        lock(&self.state).map(|s| s.value).unwrap_or(self.user_value)
    }

    pub fn control(&self) -> Option<SettingControl> {
        lock(&self.state).map(|s| s.control).ok()
    }

    pub fn clear_calls(&self) -> usize {
        self.clear_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GuardedSetting for MemorySetting {
    async fn get(&self) -> Result<SettingState> {
        Ok(*lock(&self.state)?)
    }

    async fn set(&self, value: bool) -> Result<()> {
        let mut state = lock(&self.state)?;
        if !state.control.is_available() {
            return Err(QuarantineError::Host(format!(
                "Setting is {:?}",
                state.control
            )));
        }
        state.value = value;
        state.control = SettingControl::ControlledByThis;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut state = lock(&self.state)?;
        if state.control == SettingControl::ControlledByThis {
            state.control = SettingControl::Controllable;
        }
        state.value = self.user_value;
        self.clear_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "peerConnectionEnabled"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_context_host_crud() {
        let host = MemoryContextHost::new();
        let id = host
            .create("quarantine:open", &Marker::new("green", "fence"))
            .await
            .unwrap();
        assert!(id.starts_with("ctx-"));
        assert_eq!(host.len(), 1);

        host.update(&id, "quarantine:closed", &Marker::new("red", "fence"))
            .await
            .unwrap();
        assert_eq!(host.get(&id).unwrap().name, "quarantine:closed");

        let found = host
            .query(&ContextFilter::with_prefix("quarantine:"))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);

        host.delete(&id).await.unwrap();
        assert!(host.is_empty());
        assert_eq!(host.deleted(), vec![id.clone()]);
        assert!(host.delete(&id).await.is_err());
    }

    #[tokio::test]
    async fn test_context_host_failure_injection() {
        let host = MemoryContextHost::new();
        host.delay_creates(Duration::from_millis(1)).unwrap();
        let id = host
            .create("quarantine:open", &Marker::new("green", "fence"))
            .await
            .unwrap();

        host.fail_updates(true);
        let marker = Marker::new("red", "fence");
        assert!(host.update(&id, "quarantine:closed", &marker).await.is_err());
        assert_eq!(host.get(&id).unwrap().name, "quarantine:open");

        host.fail_updates(false);
        host.update(&id, "quarantine:closed", &marker).await.unwrap();
        assert_eq!(host.get(&id).unwrap().name, "quarantine:closed");
    }

    #[tokio::test]
    async fn test_surface_host_query_by_context() {
        let host = MemorySurfaceHost::new();
        let a = host.create("ctx-a", None).await.unwrap();
        host.create("ctx-b", Some("https://example.com")).await.unwrap();

        let found = host.query("ctx-a").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, a);

        host.remove(&[a]).await.unwrap();
        assert_eq!(host.count_for("ctx-a"), 0);
    }

    #[tokio::test]
    async fn test_surface_host_spawns_during_sweep() {
        let host = MemorySurfaceHost::new();
        let first = host.open("ctx-a").unwrap();
        host.spawn_during_sweep("ctx-a", 1).unwrap();

        host.terminate_connections(first).await.unwrap();
        assert_eq!(host.count_for("ctx-a"), 2);
        assert_eq!(host.terminated(), vec![first]);
    }

    #[tokio::test]
    async fn test_setting_set_and_clear() {
        let setting = MemorySetting::new(true, SettingControl::Controllable);
        setting.set(false).await.unwrap();
        assert!(!setting.value());
        assert_eq!(setting.control(), Some(SettingControl::ControlledByThis));

        setting.clear().await.unwrap();
        assert!(setting.value());
        assert_eq!(setting.control(), Some(SettingControl::Controllable));
        assert_eq!(setting.clear_calls(), 1);
    }

    #[tokio::test]
    async fn test_locked_setting_rejects_set() {
        let setting = MemorySetting::new(true, SettingControl::NotControllable);
        assert!(setting.set(false).await.is_err());
        assert!(setting.value());
    }
}
