//! Lifecycle manager: surface to isolation context mapping
//!
//! Only surfaces whose context is already managed are tracked. The manager
//! reports when a context loses its last mapped surface; the coordinator
//! double-checks that against the host before tearing anything down.

use crate::status::ContextStateStore;
use crate::types::{ContextId, SurfaceId};
use std::collections::HashMap;

/// Result of removing a surface from the map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceRemoval {
    /// Context the surface belonged to
    pub context_id: ContextId,

    /// Surfaces still mapped to that context
    pub remaining: usize,
}

impl SurfaceRemoval {
    pub fn was_last(&self) -> bool {
        self.remaining == 0
    }
}

/// Maps surfaces to the managed contexts they belong to
#[derive(Debug, Clone, Default)]
pub struct LifecycleManager {
    surfaces: HashMap<SurfaceId, ContextId>,
    active: Option<SurfaceId>,
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new surface; returns whether it was tracked
    pub fn on_surface_created(
        &mut self,
        surface_id: SurfaceId,
        context_id: &str,
        store: &ContextStateStore,
    ) -> bool {
        if !store.is_managed(context_id) {
            return false;
        }
        self.surfaces.insert(surface_id, context_id.to_string());
        true
    }

    /// Re-evaluate a surface whose context may have changed
    ///
    /// Returns the removal record when the surface moved away from a managed
    /// context, so the caller can check whether that context is orphaned.
    pub fn on_surface_updated(
        &mut self,
        surface_id: SurfaceId,
        context_id: &str,
        store: &ContextStateStore,
    ) -> Option<SurfaceRemoval> {
        match self.surfaces.get(&surface_id) {
            Some(current) if current == context_id => None,
            Some(_) => {
                let removal = self.on_surface_removed(surface_id);
                self.on_surface_created(surface_id, context_id, store);
                removal
            }
            None => {
                self.on_surface_created(surface_id, context_id, store);
                None
            }
        }
    }

    /// Record focus moving to a surface; returns its context when managed
    pub fn on_surface_activated(&mut self, surface_id: SurfaceId) -> Option<ContextId> {
        self.active = Some(surface_id);
        self.surfaces.get(&surface_id).cloned()
    }

    /// Forget a surface; returns its context and how many surfaces remain
    pub fn on_surface_removed(&mut self, surface_id: SurfaceId) -> Option<SurfaceRemoval> {
        if self.active == Some(surface_id) {
            self.active = None;
        }
        let context_id = self.surfaces.remove(&surface_id)?;
        let remaining = self.count_for(&context_id);
        Some(SurfaceRemoval {
            context_id,
            remaining,
        })
    }

    pub fn context_of(&self, surface_id: SurfaceId) -> Option<&ContextId> {
        self.surfaces.get(&surface_id)
    }

    /// Context of the focused surface, when it is managed
    pub fn active_context(&self) -> Option<&ContextId> {
        self.active.and_then(|id| self.surfaces.get(&id))
    }

    /// Surfaces mapped to a context, sorted
    pub fn surfaces_of(&self, context_id: &str) -> Vec<SurfaceId> {
        let mut ids: Vec<SurfaceId> = self
            .surfaces
            .iter()
            .filter(|(_, ctx)| ctx.as_str() == context_id)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn count_for(&self, context_id: &str) -> usize {
        self.surfaces
            .values()
            .filter(|ctx| ctx.as_str() == context_id)
            .count()
    }

    /// Drop every surface mapped to a context
    pub fn forget_context(&mut self, context_id: &str) -> usize {
        let before = self.surfaces.len();
        self.surfaces.retain(|_, ctx| ctx.as_str() != context_id);
        before - self.surfaces.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LockStatus;

    fn store_with(ids: &[&str]) -> ContextStateStore {
        let mut store = ContextStateStore::new();
        for id in ids {
            store.set_status(id, LockStatus::Open);
        }
        store
    }

    #[test]
    fn test_unmanaged_surfaces_ignored() {
        let store = store_with(&[]);
        let mut lifecycle = LifecycleManager::new();
        assert!(!lifecycle.on_surface_created(1, "firefox-default", &store));
        assert!(lifecycle.on_surface_removed(1).is_none());
    }

    #[test]
    fn test_last_surface_removal() {
        let store = store_with(&["c"]);
        let mut lifecycle = LifecycleManager::new();
        lifecycle.on_surface_created(1, "c", &store);
        lifecycle.on_surface_created(2, "c", &store);
        assert_eq!(lifecycle.surfaces_of("c"), vec![1, 2]);

        let first = lifecycle.on_surface_removed(1).unwrap();
        assert_eq!(first.context_id, "c");
        assert!(!first.was_last());

        let second = lifecycle.on_surface_removed(2).unwrap();
        assert!(second.was_last());
    }

    #[test]
    fn test_update_moves_surface_between_contexts() {
        let store = store_with(&["a", "b"]);
        let mut lifecycle = LifecycleManager::new();
        lifecycle.on_surface_created(1, "a", &store);

        let removal = lifecycle.on_surface_updated(1, "b", &store).unwrap();
        assert_eq!(removal.context_id, "a");
        assert!(removal.was_last());
        assert_eq!(lifecycle.context_of(1).map(String::as_str), Some("b"));

        assert!(lifecycle.on_surface_updated(1, "b", &store).is_none());
    }

    #[test]
    fn test_update_registers_late_surface() {
        let store = store_with(&["a"]);
        let mut lifecycle = LifecycleManager::new();
        assert!(lifecycle.on_surface_updated(5, "a", &store).is_none());
        assert_eq!(lifecycle.count_for("a"), 1);
    }

    #[test]
    fn test_activation_tracks_managed_context() {
        let store = store_with(&["a"]);
        let mut lifecycle = LifecycleManager::new();
        lifecycle.on_surface_created(1, "a", &store);

        assert_eq!(lifecycle.on_surface_activated(1).as_deref(), Some("a"));
        assert_eq!(lifecycle.active_context().map(String::as_str), Some("a"));

        assert!(lifecycle.on_surface_activated(9).is_none());
        assert!(lifecycle.active_context().is_none());
    }

    #[test]
    fn test_forget_context() {
        let store = store_with(&["a", "b"]);
        let mut lifecycle = LifecycleManager::new();
        lifecycle.on_surface_created(1, "a", &store);
        lifecycle.on_surface_created(2, "a", &store);
        lifecycle.on_surface_created(3, "b", &store);

        assert_eq!(lifecycle.forget_context("a"), 2);
        assert_eq!(lifecycle.count_for("a"), 0);
        assert_eq!(lifecycle.count_for("b"), 1);
    }
}
