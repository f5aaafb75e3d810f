//! # a3s-quarantine
//!
//! Network-quarantine state coordination for isolated browsing contexts.
//!
//! ## Overview
//!
//! `a3s-quarantine` lets a user open pages inside an isolation context and
//! later cut that context off the network while keeping the loaded pages
//! visible. It tracks in-flight operations per context, decides synchronously
//! whether each outbound operation may proceed, keeps a user-facing surface
//! in sync, and holds one process-wide privacy setting suppressed while any
//! quarantine exists.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use a3s_quarantine::{
//!     Coordinator, Decision, GlobalGuard, LockStatus, OperationKind, QuarantineConfig,
//!     SettingControl, StaticCapabilities,
//! };
//! use a3s_quarantine::host::memory::{MemoryContextHost, MemorySetting, MemorySurfaceHost};
//!
//! # async fn example() -> a3s_quarantine::Result<()> {
//! let config = QuarantineConfig::default();
//! let guard = GlobalGuard::from_config(
//!     &config,
//!     Arc::new(MemorySetting::new(true, SettingControl::Controllable)),
//!     Arc::new(StaticCapabilities::default()),
//! );
//! let coordinator = Coordinator::new(
//!     config,
//!     Arc::new(MemoryContextHost::new()),
//!     Arc::new(MemorySurfaceHost::new()),
//!     guard,
//! )?;
//! coordinator.start().await?;
//!
//! let q = coordinator.quarantine(Some("https://example.com")).await?;
//! assert_eq!(coordinator.lock(&q.context_id).await?, LockStatus::Closed);
//! assert_eq!(
//!     coordinator.decide(&q.context_id, "req-1", OperationKind::Script),
//!     Decision::Block
//! );
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **Coordinator**: controller-side service wiring everything together
//! - **ContextStateStore**: lock status per isolation context
//! - **RequestTracker**: open/closed set reconciliation of in-flight operations
//! - **decide**: pure allow/block rule
//! - **LifecycleManager**: surface to context map, orphan detection
//! - **Synchronizer** / **SurfaceReplica**: tagged-message state replication
//! - **GlobalGuard**: process-wide setting with a durable ownership flag
//! - **host**: platform traits plus in-memory implementations

pub mod config;
pub mod coordinator;
pub mod decision;
pub mod error;
pub mod guard;
pub mod host;
pub mod lifecycle;
pub mod naming;
pub mod protocol;
pub mod replica;
pub mod status;
pub mod tracker;
pub mod types;

// Re-export core types
pub use config::QuarantineConfig;
pub use coordinator::{Coordinator, Quarantined, RecoveryReport};
pub use decision::{decide, PlatformCapabilities, StaticCapabilities};
pub use error::{QuarantineError, Result};
pub use guard::{
    FileFlagStore, GlobalGuard, GuardState, GuardedSetting, MemoryFlagStore, OwnershipFlagStore,
    SettingControl, SettingState,
};
pub use host::{ContextHost, SurfaceHost};
pub use lifecycle::{LifecycleManager, SurfaceRemoval};
pub use naming::ContextNaming;
pub use protocol::{
    ChannelPeer, ControllerLink, ControllerMessage, SurfacePeer, SurfaceRequest,
    SurfaceResponse, Synchronizer,
};
pub use replica::SurfaceReplica;
pub use status::ContextStateStore;
pub use tracker::RequestTracker;
pub use types::{
    ContextFilter, ContextId, ContextInfo, Decision, LockStatus, Marker, OperationEvent,
    OperationId, OperationKind, SurfaceId, SurfaceInfo,
};
