//! Surface-side replica of the controller's state
//!
//! The user-facing surface keeps its own copy of lock statuses and open
//! counts, fed only by [`ControllerMessage`]s. The two copies are
//! eventually consistent: after the controller goes quiet and every sent
//! message has been applied, they agree.

use crate::error::Result;
use crate::protocol::{ControllerLink, ControllerMessage, SurfaceRequest, SurfaceResponse};
use crate::status::ContextStateStore;
use crate::types::{ContextId, LockStatus};
use std::collections::HashMap;
use tokio::sync::mpsc;

/// State view held by the user-facing surface
#[derive(Debug, Default)]
pub struct SurfaceReplica {
    statuses: ContextStateStore,
    counts: HashMap<ContextId, usize>,
    active_context: Option<ContextId>,
    guard_active: bool,
    ready: bool,
}

impl SurfaceReplica {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the startup handshake
    ///
    /// Waits for the controller's acknowledgement and adopts its snapshot.
    /// Until this returns `Ok`, the replica reports the guard as inactive.
    pub async fn start(&mut self, link: &dyn ControllerLink) -> Result<()> {
        let response = link.request(SurfaceRequest::AboutToStart).await?;
        let SurfaceResponse::Started {
            guard_active,
            contexts,
            counts,
            active_context,
        } = response;

        self.statuses.replace(contexts);
        self.counts = counts;
        self.counts.retain(|_, count| *count > 0);
        self.active_context = active_context;
        self.guard_active = guard_active;
        self.ready = true;

        tracing::debug!(
            contexts = self.statuses.len(),
            guard_active,
            "Surface replica started"
        );
        Ok(())
    }

    /// Apply one controller notification
    pub fn apply(&mut self, message: &ControllerMessage) {
        match message {
            ControllerMessage::StatusChanged { context_id, status } => {
                self.statuses.set_status(context_id, *status);
                if *status == LockStatus::None {
                    self.counts.remove(context_id);
                    if self.active_context.as_ref() == Some(context_id) {
                        self.active_context = None;
                    }
                }
            }
            ControllerMessage::CountChanged { context_id, count } => {
                if *count == 0 {
                    self.counts.remove(context_id);
                } else {
                    self.counts.insert(context_id.clone(), *count);
                }
            }
            ControllerMessage::ActivationChanged { context_id } => {
                self.active_context = context_id.clone();
            }
            ControllerMessage::GuardChanged { suppressed } => {
                self.guard_active = *suppressed;
            }
        }
    }

    /// Apply every message already queued on the receiver
    ///
    /// Returns how many messages were applied.
    pub fn drain(&mut self, rx: &mut mpsc::UnboundedReceiver<ControllerMessage>) -> usize {
        let mut applied = 0;
        while let Ok(message) = rx.try_recv() {
            self.apply(&message);
            applied += 1;
        }
        applied
    }

    /// Apply messages until the controller side hangs up
    pub async fn run(&mut self, mut rx: mpsc::UnboundedReceiver<ControllerMessage>) {
        while let Some(message) = rx.recv().await {
            self.apply(&message);
        }
        tracing::debug!("Controller channel closed, replica stopped");
    }

    pub fn status(&self, context_id: &str) -> LockStatus {
        self.statuses.get_status(context_id)
    }

    pub fn open_count(&self, context_id: &str) -> usize {
        self.counts.get(context_id).copied().unwrap_or(0)
    }

    pub fn statuses(&self) -> HashMap<ContextId, LockStatus> {
        self.statuses.snapshot()
    }

    pub fn counts(&self) -> &HashMap<ContextId, usize> {
        &self.counts
    }

    pub fn active_context(&self) -> Option<&ContextId> {
        self.active_context.as_ref()
    }

    /// Guard state as confirmed by the controller; false before the handshake
    pub fn guard_active(&self) -> bool {
        self.ready && self.guard_active
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QuarantineError;
    use crate::protocol::{channel, SurfacePeer};
    use async_trait::async_trait;

    struct FixedLink(SurfaceResponse);

    #[async_trait]
    impl ControllerLink for FixedLink {
        async fn request(&self, _request: SurfaceRequest) -> Result<SurfaceResponse> {
            Ok(self.0.clone())
        }
    }

    struct DownLink;

    #[async_trait]
    impl ControllerLink for DownLink {
        async fn request(&self, _request: SurfaceRequest) -> Result<SurfaceResponse> {
            Err(QuarantineError::PeerUnavailable)
        }
    }

    #[tokio::test]
    async fn test_start_adopts_snapshot() {
        let mut contexts = HashMap::new();
        contexts.insert("ctx-1".to_string(), LockStatus::Closing);
        let mut counts = HashMap::new();
        counts.insert("ctx-1".to_string(), 2);

        let link = FixedLink(SurfaceResponse::Started {
            guard_active: true,
            contexts,
            counts,
            active_context: Some("ctx-1".to_string()),
        });

        let mut replica = SurfaceReplica::new();
        assert!(!replica.guard_active());
        replica.start(&link).await.unwrap();

        assert!(replica.is_ready());
        assert!(replica.guard_active());
        assert_eq!(replica.status("ctx-1"), LockStatus::Closing);
        assert_eq!(replica.open_count("ctx-1"), 2);
        assert_eq!(replica.active_context().map(String::as_str), Some("ctx-1"));
    }

    #[tokio::test]
    async fn test_guard_not_assumed_without_ack() {
        let mut replica = SurfaceReplica::new();
        replica.apply(&ControllerMessage::GuardChanged { suppressed: true });
        assert!(replica.start(&DownLink).await.is_err());
        assert!(!replica.is_ready());
        assert!(!replica.guard_active());
    }

    #[test]
    fn test_apply_status_and_counts() {
        let mut replica = SurfaceReplica::new();
        replica.apply(&ControllerMessage::StatusChanged {
            context_id: "c".to_string(),
            status: LockStatus::Open,
        });
        replica.apply(&ControllerMessage::CountChanged {
            context_id: "c".to_string(),
            count: 1,
        });
        assert_eq!(replica.status("c"), LockStatus::Open);
        assert_eq!(replica.open_count("c"), 1);

        replica.apply(&ControllerMessage::CountChanged {
            context_id: "c".to_string(),
            count: 0,
        });
        assert!(replica.counts().is_empty());
    }

    #[test]
    fn test_teardown_clears_context() {
        let mut replica = SurfaceReplica::new();
        replica.apply(&ControllerMessage::StatusChanged {
            context_id: "c".to_string(),
            status: LockStatus::Closed,
        });
        replica.apply(&ControllerMessage::ActivationChanged {
            context_id: Some("c".to_string()),
        });
        replica.apply(&ControllerMessage::StatusChanged {
            context_id: "c".to_string(),
            status: LockStatus::None,
        });
        assert!(replica.statuses().is_empty());
        assert!(replica.active_context().is_none());
    }

    #[tokio::test]
    async fn test_drain_and_run() {
        let (peer, mut rx) = channel();
        peer.deliver(ControllerMessage::StatusChanged {
            context_id: "c".to_string(),
            status: LockStatus::Open,
        })
        .unwrap();

        let mut replica = SurfaceReplica::new();
        assert_eq!(replica.drain(&mut rx), 1);
        assert_eq!(replica.drain(&mut rx), 0);

        peer.deliver(ControllerMessage::StatusChanged {
            context_id: "c".to_string(),
            status: LockStatus::Closed,
        })
        .unwrap();
        drop(peer);
        replica.run(rx).await;
        assert_eq!(replica.status("c"), LockStatus::Closed);
    }
}
