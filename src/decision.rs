//! Decision engine: allow or block one outbound operation
//!
//! `decide` is a pure function of (status, kind, platform capability). It
//! sits on the hot path of every network operation, so it only reads the
//! values it is given.

use crate::types::{Decision, LockStatus, OperationKind};

/// Host capabilities that change what must be blocked pre-emptively
///
/// Capability varies by host and was found empirically, so it is a
/// pluggable flag rather than detection logic.
pub trait PlatformCapabilities: Send + Sync {
    /// Whether an already-established long-lived channel (e.g., a
    /// WebSocket) can be terminated from outside the page
    fn can_terminate_open_channels(&self) -> bool;
}

/// Fixed capability answer, for configuration overrides and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticCapabilities {
    pub channels_terminable: bool,
}

impl StaticCapabilities {
    pub fn new(channels_terminable: bool) -> Self {
        Self {
            channels_terminable,
        }
    }
}

impl Default for StaticCapabilities {
    fn default() -> Self {
        Self::new(true)
    }
}

impl PlatformCapabilities for StaticCapabilities {
    fn can_terminate_open_channels(&self) -> bool {
        self.channels_terminable
    }
}

/// Decide whether an operation of `kind` in a context with `status` may run
///
/// - `None`: not ours, allow.
/// - `Closing` / `Closed`: block.
/// - `Open`: allow, except long-lived channels on hosts that cannot cut
///   them once established; those are only stoppable before they open.
pub fn decide(status: LockStatus, kind: OperationKind, channels_terminable: bool) -> Decision {
    match status {
        LockStatus::None => Decision::Allow,
        LockStatus::Closing | LockStatus::Closed => Decision::Block,
        LockStatus::Open if kind.is_long_lived_channel() && !channels_terminable => {
            Decision::Block
        }
        LockStatus::Open => Decision::Allow,
    }
}
