//! Quarantine coordinator
//!
//! `Coordinator` owns the controller-side state (lock statuses, in-flight
//! operations, surface map) and orchestrates the host primitives, the
//! global guard, and notifications to the user-facing surface.
//!
//! It is an explicitly constructed service: build one per controller
//! process and hand clones to every call site. Clones share state.
//!
//! Listener entry points (`decide`, `track_state_changed`, surface
//! created/updated/removed) never return errors; failures are logged at the
//! boundary. `decide` blocks every operation of a closing or closed context
//! whatever fails internally.

use crate::config::QuarantineConfig;
use crate::decision;
use crate::error::{QuarantineError, Result};
use crate::guard::{GlobalGuard, GuardState};
use crate::host::{ContextHost, SurfaceHost};
use crate::lifecycle::LifecycleManager;
use crate::naming::ContextNaming;
use crate::protocol::{
    ControllerLink, ControllerMessage, SurfacePeer, SurfaceRequest, SurfaceResponse, Synchronizer,
};
use crate::status::ContextStateStore;
use crate::tracker::RequestTracker;
use crate::types::{
    ContextFilter, ContextId, Decision, LockStatus, OperationEvent, OperationKind, SurfaceId,
};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Marker writes re-checked against a concurrently changing status
const MAX_MARKER_ATTEMPTS: usize = 3;

/// A freshly provisioned quarantine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quarantined {
    pub context_id: ContextId,
    pub surface_id: SurfaceId,
}

/// Outcome of startup recovery
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Contexts re-registered, with their recovered status
    pub recovered: Vec<(ContextId, LockStatus)>,

    /// Closing contexts promoted to closed (in-flight state is lost)
    pub promoted: usize,

    /// Reserved contexts without any live surface, deleted
    pub orphans_deleted: Vec<ContextId>,

    /// Whether the guard was handed back because nothing was recovered
    pub guard_restored: bool,
}

#[derive(Debug)]
struct CoordinatorState {
    statuses: ContextStateStore,
    tracker: RequestTracker,
    lifecycle: LifecycleManager,
}

struct Inner {
    config: QuarantineConfig,
    naming: ContextNaming,
    contexts: Arc<dyn ContextHost>,
    surfaces: Arc<dyn SurfaceHost>,
    guard: GlobalGuard,
    sync: Synchronizer,
    state: RwLock<CoordinatorState>,
    /// Quarantines engaged on the guard but not yet in the status store
    provisioning: AtomicUsize,
}

/// Holds one `provisioning` slot until dropped
struct ProvisioningSlot<'a>(&'a AtomicUsize);

impl<'a> ProvisioningSlot<'a> {
    fn claim(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ProvisioningSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Network-quarantine state coordinator
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    /// Create a coordinator over the given host primitives
    pub fn new(
        config: QuarantineConfig,
        contexts: Arc<dyn ContextHost>,
        surfaces: Arc<dyn SurfaceHost>,
        guard: GlobalGuard,
    ) -> Result<Self> {
        config.validate()?;
        let state = CoordinatorState {
            statuses: ContextStateStore::new(),
            tracker: RequestTracker::new(config.untracked_kinds.iter().copied()),
            lifecycle: LifecycleManager::new(),
        };
        Ok(Self {
            inner: Arc::new(Inner {
                naming: ContextNaming::new(config.name_prefix.clone()),
                config,
                contexts,
                surfaces,
                guard,
                sync: Synchronizer::new(),
                state: RwLock::new(state),
                provisioning: AtomicUsize::new(0),
            }),
        })
    }

    pub fn config(&self) -> &QuarantineConfig {
        &self.inner.config
    }

    pub fn naming(&self) -> &ContextNaming {
        &self.inner.naming
    }

    /// Attach the user-facing surface's message peer
    pub fn attach_surface(&self, peer: Arc<dyn SurfacePeer>) {
        self.inner.sync.attach(peer);
    }

    pub fn detach_surface(&self) {
        self.inner.sync.detach();
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, CoordinatorState>> {
        self.inner
            .state
            .read()
            .map_err(|_| QuarantineError::StatePoisoned)
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, CoordinatorState>> {
        self.inner
            .state
            .write()
            .map_err(|_| QuarantineError::StatePoisoned)
    }

    // ─── Startup & shutdown ──────────────────────────────────────

    /// Recover managed contexts after a (re)start
    ///
    /// Reserved context names carry their lock status. Closing contexts
    /// come back closed, since their in-flight operations are unknown.
    /// Contexts without live surfaces are deleted. With nothing left to
    /// guard, a persisted guard ownership claim is released.
    pub async fn start(&self) -> Result<RecoveryReport> {
        let naming = &self.inner.naming;
        let found = self
            .inner
            .contexts
            .query(&ContextFilter::with_prefix(naming.query_prefix()))
            .await?;

        let mut report = RecoveryReport::default();
        for info in found {
            let Some(parsed) = naming.parse(&info.name) else {
                continue;
            };
            let status = if parsed == LockStatus::Closing {
                report.promoted += 1;
                LockStatus::Closed
            } else {
                parsed
            };

            let live = self.inner.surfaces.query(&info.id).await?;
            if live.is_empty() {
                match self.inner.contexts.delete(&info.id).await {
                    Ok(()) => report.orphans_deleted.push(info.id.clone()),
                    Err(e) => tracing::warn!(
                        context = %info.id,
                        error = %e,
                        "Failed to delete orphaned context"
                    ),
                }
                continue;
            }

            {
                let mut state = self.write_state()?;
                // Restoring persisted state, not a lifecycle transition.
                state.statuses.set_status(&info.id, status);
                let CoordinatorState {
                    statuses, lifecycle, ..
                } = &mut *state;
                for surface in &live {
                    lifecycle.on_surface_created(surface.id, &info.id, statuses);
                }
            }
            self.inner.sync.notify(ControllerMessage::StatusChanged {
                context_id: info.id.clone(),
                status,
            });

            if info.name != naming.name_for(status) {
                self.refresh_marker(&info.id).await?;
            }
            report.recovered.push((info.id.clone(), status));
        }

        if report.recovered.is_empty() {
            report.guard_restored = self.inner.guard.restore().await?;
            if report.guard_restored {
                self.inner
                    .sync
                    .notify(ControllerMessage::GuardChanged { suppressed: false });
            }
        } else if self.inner.guard.adopt_persisted().await? {
            self.inner
                .sync
                .notify(ControllerMessage::GuardChanged { suppressed: true });
        }

        tracing::info!(
            recovered = report.recovered.len(),
            promoted = report.promoted,
            orphans = report.orphans_deleted.len(),
            guard_restored = report.guard_restored,
            "Quarantine state recovered"
        );
        Ok(report)
    }

    /// Clean shutdown: hand the guarded setting back
    pub async fn shutdown(&self) -> Result<bool> {
        let restored = self.inner.guard.restore().await?;
        if restored {
            self.inner
                .sync
                .notify(ControllerMessage::GuardChanged { suppressed: false });
        }
        Ok(restored)
    }

    // ─── User actions ────────────────────────────────────────────

    /// Provision a new quarantine context and open a surface in it
    ///
    /// The global guard is engaged first; if the guarded setting is owned
    /// elsewhere nothing is created and the error is returned.
    pub async fn quarantine(&self, url: Option<&str>) -> Result<Quarantined> {
        // Keeps a concurrent teardown from releasing the guard before the
        // new context is registered.
        let slot = ProvisioningSlot::claim(&self.inner.provisioning);
        self.engage_guard().await?;

        let naming = &self.inner.naming;
        let context_id = match self
            .inner
            .contexts
            .create(
                &naming.name_for(LockStatus::Open),
                &naming.marker_for(LockStatus::Open),
            )
            .await
        {
            Ok(id) => id,
            Err(e) => {
                drop(slot);
                self.release_guard_if_idle().await?;
                return Err(e);
            }
        };

        {
            let mut state = self.write_state()?;
            self.transition(&mut state, &context_id, LockStatus::Open)?;
        }
        drop(slot);

        let surface_id = match self.inner.surfaces.create(&context_id, url).await {
            Ok(id) => id,
            Err(e) => {
                if let Err(teardown_err) = self.teardown(&context_id).await {
                    tracing::warn!(
                        context = %context_id,
                        error = %teardown_err,
                        "Failed to roll back quarantine"
                    );
                }
                return Err(e);
            }
        };

        {
            let mut state = self.write_state()?;
            let CoordinatorState {
                statuses, lifecycle, ..
            } = &mut *state;
            lifecycle.on_surface_created(surface_id, &context_id, statuses);
        }

        tracing::info!(context = %context_id, surface = surface_id, "Context quarantined");
        Ok(Quarantined {
            context_id,
            surface_id,
        })
    }

    /// Cut a context off the network
    ///
    /// Moves an open context to closing when operations are in flight,
    /// otherwise straight to closed, then terminates connections already
    /// open inside its pages. Locking a locked context returns its status.
    pub async fn lock(&self, context_id: &str) -> Result<LockStatus> {
        let status = {
            let mut state = self.write_state()?;
            match state.statuses.get_status(context_id) {
                LockStatus::None => {
                    return Err(QuarantineError::NotManaged(context_id.to_string()));
                }
                current @ (LockStatus::Closing | LockStatus::Closed) => return Ok(current),
                LockStatus::Open => {}
            }
            let next = if state.tracker.has_open(context_id) {
                LockStatus::Closing
            } else {
                LockStatus::Closed
            };
            self.transition(&mut state, context_id, next)?;
            next
        };

        tracing::info!(context = %context_id, status = %status, "Context locked");

        // The sweep runs even when the host rename fails.
        let marked = self.refresh_marker(context_id).await;
        if let Err(e) = &marked {
            tracing::warn!(context = %context_id, error = %e, "Failed to mark locked context");
        }

        let swept = self.terminate_open_connections(context_id).await?;
        tracing::debug!(context = %context_id, surfaces = swept, "Open connections terminated");
        marked?;
        Ok(status)
    }

    /// Close every surface of a context and tear it down
    pub async fn release(&self, context_id: &str) -> Result<()> {
        if !self.status(context_id).is_managed() {
            return Err(QuarantineError::NotManaged(context_id.to_string()));
        }
        let live: Vec<SurfaceId> = self
            .inner
            .surfaces
            .query(context_id)
            .await?
            .into_iter()
            .map(|s| s.id)
            .collect();
        if !live.is_empty() {
            self.inner.surfaces.remove(&live).await?;
        }
        self.teardown(context_id).await
    }

    /// Run the in-page termination routine in every surface of a context
    ///
    /// Surfaces can appear while the sweep runs, so it repeats against newly
    /// discovered surfaces until a round finds none, bounded by
    /// `max_sweep_rounds`. Returns how many surfaces were swept.
    pub async fn terminate_open_connections(&self, context_id: &str) -> Result<usize> {
        let mut swept: HashSet<SurfaceId> = HashSet::new();

        for round in 0..self.inner.config.max_sweep_rounds {
            let fresh: Vec<SurfaceId> = self
                .inner
                .surfaces
                .query(context_id)
                .await?
                .into_iter()
                .map(|s| s.id)
                .filter(|id| !swept.contains(id))
                .collect();

            if fresh.is_empty() {
                tracing::debug!(context = %context_id, rounds = round, "Termination sweep settled");
                return Ok(swept.len());
            }

            let results = futures::future::join_all(
                fresh
                    .iter()
                    .map(|id| self.inner.surfaces.terminate_connections(*id)),
            )
            .await;

            for (id, result) in fresh.iter().zip(results) {
                if let Err(e) = result {
                    tracing::warn!(
                        context = %context_id,
                        surface = id,
                        error = %e,
                        "Failed to terminate connections in surface"
                    );
                }
                swept.insert(*id);
            }
        }

        tracing::warn!(
            context = %context_id,
            rounds = self.inner.config.max_sweep_rounds,
            "Termination sweep hit its round limit"
        );
        Ok(swept.len())
    }

    // ─── Network interception ────────────────────────────────────

    /// Decide whether an outbound operation may proceed
    ///
    /// Only reads in-memory state and never fails. A closing/closed context
    /// always blocks; bookkeeping failures on that path are logged and do
    /// not change the verdict.
    pub fn decide(&self, context_id: &str, operation_id: &str, kind: OperationKind) -> Decision {
        // A panicked writer cannot leave a status half-written.
        let status = self
            .inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .statuses
            .get_status(context_id);

        if status.is_locked() {
            if let Err(e) = self.record_blocked(context_id, operation_id, kind) {
                tracing::warn!(
                    context = %context_id,
                    operation = %operation_id,
                    error = %e,
                    "Failed to record blocked operation"
                );
            }
            tracing::debug!(context = %context_id, kind = %kind, "Operation blocked");
            return Decision::Block;
        }

        decision::decide(status, kind, self.inner.guard.channels_terminable())
    }

    fn record_blocked(
        &self,
        context_id: &str,
        operation_id: &str,
        kind: OperationKind,
    ) -> Result<()> {
        let closed_now = {
            let mut state = self.write_state()?;
            match state
                .tracker
                .track(context_id, operation_id, kind, OperationEvent::Blocked)
            {
                Some(count) => self.apply_count(&mut state, context_id, count)?,
                None => false,
            }
        };
        if closed_now {
            self.spawn_marker_refresh(context_id);
        }
        Ok(())
    }

    /// Apply one operation lifecycle notification from the host
    pub async fn track_state_changed(
        &self,
        context_id: &str,
        operation_id: &str,
        kind: OperationKind,
        event: OperationEvent,
    ) {
        if let Err(e) = self
            .try_track_state_changed(context_id, operation_id, kind, event)
            .await
        {
            tracing::warn!(
                context = %context_id,
                operation = %operation_id,
                event = ?event,
                error = %e,
                "Failed to track operation"
            );
        }
    }

    async fn try_track_state_changed(
        &self,
        context_id: &str,
        operation_id: &str,
        kind: OperationKind,
        event: OperationEvent,
    ) -> Result<()> {
        let closed_now = {
            let mut state = self.write_state()?;
            if !state.statuses.is_managed(context_id) {
                return Ok(());
            }
            match state.tracker.track(context_id, operation_id, kind, event) {
                Some(count) => self.apply_count(&mut state, context_id, count)?,
                None => false,
            }
        };
        if closed_now {
            self.refresh_marker(context_id).await?;
        }
        Ok(())
    }

    /// Publish a new open count; completes closing → closed at zero
    fn apply_count(
        &self,
        state: &mut CoordinatorState,
        context_id: &str,
        count: usize,
    ) -> Result<bool> {
        self.inner.sync.notify(ControllerMessage::CountChanged {
            context_id: context_id.to_string(),
            count,
        });

        if count == 0 && state.statuses.get_status(context_id) == LockStatus::Closing {
            self.transition(state, context_id, LockStatus::Closed)?;
            tracing::info!(context = %context_id, "Context closed, no operations in flight");
            return Ok(true);
        }
        Ok(false)
    }

    // ─── Surface lifecycle ───────────────────────────────────────

    pub async fn on_surface_created(&self, surface_id: SurfaceId, context_id: &str) {
        match self.update_surfaces(|lifecycle, statuses| {
            lifecycle.on_surface_created(surface_id, context_id, statuses)
        }) {
            Ok(true) => tracing::debug!(surface = surface_id, context = %context_id, "Surface tracked"),
            Ok(false) => {}
            Err(e) => tracing::warn!(surface = surface_id, error = %e, "Failed to track surface"),
        }
    }

    pub async fn on_surface_updated(&self, surface_id: SurfaceId, context_id: &str) {
        let result = async {
            let removal = self.update_surfaces(|lifecycle, statuses| {
                lifecycle.on_surface_updated(surface_id, context_id, statuses)
            })?;
            match removal {
                Some(removal) if removal.was_last() => {
                    self.teardown_if_orphaned(&removal.context_id, surface_id)
                        .await
                }
                _ => Ok(()),
            }
        }
        .await;
        log_lifecycle_error(surface_id, result);
    }

    /// Focus moved to a surface
    ///
    /// Activating a managed context engages the global guard; a guard that
    /// cannot be engaged is returned as an error.
    pub async fn on_surface_activated(&self, surface_id: SurfaceId) -> Result<()> {
        let context_id = match self.write_state() {
            Ok(mut state) => state.lifecycle.on_surface_activated(surface_id),
            Err(e) => {
                tracing::warn!(surface = surface_id, error = %e, "Failed to record activation");
                return Ok(());
            }
        };

        self.inner.sync.notify(ControllerMessage::ActivationChanged {
            context_id: context_id.clone(),
        });

        if context_id.is_some() {
            self.engage_guard().await?;
        }
        Ok(())
    }

    pub async fn on_surface_removed(&self, surface_id: SurfaceId) {
        let result = async {
            let removal =
                self.update_surfaces(|lifecycle, _| lifecycle.on_surface_removed(surface_id))?;
            match removal {
                Some(removal) if removal.was_last() => {
                    self.teardown_if_orphaned(&removal.context_id, surface_id)
                        .await
                }
                _ => Ok(()),
            }
        }
        .await;
        log_lifecycle_error(surface_id, result);
    }

    /// Mutate the surface map, broadcasting a change of active context
    fn update_surfaces<T>(
        &self,
        f: impl FnOnce(&mut LifecycleManager, &ContextStateStore) -> T,
    ) -> Result<T> {
        let mut state = self.write_state()?;
        let CoordinatorState {
            statuses, lifecycle, ..
        } = &mut *state;

        let before = lifecycle.active_context().cloned();
        let out = f(&mut *lifecycle, &*statuses);
        let after = lifecycle.active_context().cloned();
        if before != after {
            self.inner
                .sync
                .notify(ControllerMessage::ActivationChanged { context_id: after });
        }
        Ok(out)
    }

    /// Tear a context down once the host confirms it has no surfaces left
    ///
    /// The internal map said the last surface is gone; a live host query
    /// that still finds surfaces is reported, never silently corrected.
    async fn teardown_if_orphaned(&self, context_id: &str, removed: SurfaceId) -> Result<()> {
        let live: Vec<SurfaceId> = self
            .inner
            .surfaces
            .query(context_id)
            .await?
            .into_iter()
            .map(|s| s.id)
            .filter(|id| *id != removed)
            .collect();

        if !live.is_empty() {
            return Err(QuarantineError::Inconsistency(format!(
                "context '{}' has no mapped surfaces but host reports {:?}",
                context_id, live
            )));
        }

        self.teardown(context_id).await
    }

    /// Drop all state for a context, delete it on the host, and release the
    /// guard when it was the last managed context
    async fn teardown(&self, context_id: &str) -> Result<()> {
        let dropped = {
            let mut state = self.write_state()?;
            let dropped = state.tracker.drop_context(context_id);
            state.lifecycle.forget_context(context_id);
            self.transition(&mut state, context_id, LockStatus::None)?;
            dropped
        };
        tracing::info!(context = %context_id, dropped_operations = dropped, "Context torn down");

        let deleted = self.inner.contexts.delete(context_id).await;
        self.release_guard_if_idle().await?;
        deleted
    }

    // ─── Guard ───────────────────────────────────────────────────

    async fn engage_guard(&self) -> Result<()> {
        if self.inner.guard.engage().await? {
            self.inner
                .sync
                .notify(ControllerMessage::GuardChanged { suppressed: true });
        }
        Ok(())
    }

    async fn release_guard_if_idle(&self) -> Result<()> {
        let idle = || {
            self.inner.provisioning.load(Ordering::SeqCst) == 0
                && self
                    .read_state()
                    .map(|state| state.statuses.is_empty())
                    .unwrap_or(false)
        };
        if self.inner.guard.restore_when(idle).await? {
            self.inner
                .sync
                .notify(ControllerMessage::GuardChanged { suppressed: false });
        }
        Ok(())
    }

    // ─── Internals ───────────────────────────────────────────────

    /// Validated status change, broadcast when the status actually moved
    fn transition(
        &self,
        state: &mut CoordinatorState,
        context_id: &str,
        next: LockStatus,
    ) -> Result<LockStatus> {
        let current = state.statuses.get_status(context_id);
        if !current.can_transition_to(next) {
            return Err(QuarantineError::InvalidTransition {
                context_id: context_id.to_string(),
                from: current,
                to: next,
            });
        }
        if current != next {
            state.statuses.set_status(context_id, next);
            self.inner.sync.notify(ControllerMessage::StatusChanged {
                context_id: context_id.to_string(),
                status: next,
            });
        }
        Ok(current)
    }

    /// Write the current status into the host name and marker
    ///
    /// Re-reads the status after each write so a concurrent transition is
    /// not overwritten by a stale one.
    async fn refresh_marker(&self, context_id: &str) -> Result<()> {
        let naming = &self.inner.naming;
        let mut written = None;
        for _ in 0..MAX_MARKER_ATTEMPTS {
            let status = self.status(context_id);
            if !status.is_managed() || written == Some(status) {
                return Ok(());
            }
            self.inner
                .contexts
                .update(
                    context_id,
                    &naming.name_for(status),
                    &naming.marker_for(status),
                )
                .await?;
            written = Some(status);
        }
        Ok(())
    }

    /// Marker refresh from a synchronous caller
    fn spawn_marker_refresh(&self, context_id: &str) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(context = %context_id, "No runtime, marker refresh skipped");
            return;
        };
        let this = self.clone();
        let context_id = context_id.to_string();
        handle.spawn(async move {
            if let Err(e) = this.refresh_marker(&context_id).await {
                tracing::warn!(context = %context_id, error = %e, "Failed to refresh marker");
            }
        });
    }

    // ─── Introspection ───────────────────────────────────────────

    /// Lock status of a context (`None` when unmanaged or unreadable)
    pub fn status(&self, context_id: &str) -> LockStatus {
        self.read_state()
            .map(|state| state.statuses.get_status(context_id))
            .unwrap_or_default()
    }

    pub fn open_count(&self, context_id: &str) -> usize {
        self.read_state()
            .map(|state| state.tracker.open_count(context_id))
            .unwrap_or(0)
    }

    pub fn managed_contexts(&self) -> Vec<ContextId> {
        self.read_state()
            .map(|state| state.statuses.contexts())
            .unwrap_or_default()
    }

    pub fn surfaces_of(&self, context_id: &str) -> Vec<SurfaceId> {
        self.read_state()
            .map(|state| state.lifecycle.surfaces_of(context_id))
            .unwrap_or_default()
    }

    pub async fn guard_state(&self) -> GuardState {
        self.inner.guard.state().await
    }

    /// Answer a request from the user-facing surface
    pub async fn handle_request(&self, request: SurfaceRequest) -> Result<SurfaceResponse> {
        match request {
            SurfaceRequest::AboutToStart => {
                let guard_active = self.inner.guard.is_suppressed().await;
                let state = self.read_state()?;
                Ok(SurfaceResponse::Started {
                    guard_active,
                    contexts: state.statuses.snapshot(),
                    counts: state.tracker.counts(),
                    active_context: state.lifecycle.active_context().cloned(),
                })
            }
        }
    }
}

#[async_trait]
impl ControllerLink for Coordinator {
    async fn request(&self, request: SurfaceRequest) -> Result<SurfaceResponse> {
        self.handle_request(request).await
    }
}

fn log_lifecycle_error(surface_id: SurfaceId, result: Result<()>) {
    match result {
        Ok(()) => {}
        Err(e @ QuarantineError::Inconsistency(_)) => {
            tracing::error!(surface = surface_id, error = %e, "Surface bookkeeping inconsistent");
        }
        Err(e) => {
            tracing::warn!(surface = surface_id, error = %e, "Surface lifecycle handling failed");
        }
    }
}
