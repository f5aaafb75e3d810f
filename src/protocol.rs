//! Cross-process message protocol between controller and surface
//!
//! The controller pushes [`ControllerMessage`]s to the user-facing surface
//! at-most-once and best-effort: the surface may not exist, and failed sends
//! are swallowed. The surface talks back with [`SurfaceRequest`]s, which the
//! controller always answers before the surface proceeds.
//!
//! Every message is an internally tagged JSON object (`"type"` field), so
//! kinds are versioned by tag, never by position.

use crate::error::{QuarantineError, Result};
use crate::types::{ContextId, LockStatus};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;

/// Notification from the controller to the surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ControllerMessage {
    /// A context's lock status changed (`none` means it was torn down)
    #[serde(rename_all = "camelCase")]
    StatusChanged {
        context_id: ContextId,
        status: LockStatus,
    },

    /// A context's open-operation count changed
    #[serde(rename_all = "camelCase")]
    CountChanged { context_id: ContextId, count: usize },

    /// Focus moved; `context_id` is the focused managed context, if any
    #[serde(rename_all = "camelCase")]
    ActivationChanged { context_id: Option<ContextId> },

    /// The global guard was engaged (`suppressed`) or restored
    #[serde(rename_all = "camelCase")]
    GuardChanged { suppressed: bool },
}

impl ControllerMessage {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Request from the surface to the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SurfaceRequest {
    /// The surface is starting and must not assume guards are active
    /// until the controller acknowledges
    AboutToStart,
}

/// Controller's acknowledgement of a [`SurfaceRequest`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SurfaceResponse {
    /// Full snapshot so a fresh surface starts converged
    #[serde(rename_all = "camelCase")]
    Started {
        guard_active: bool,
        #[serde(default)]
        contexts: HashMap<ContextId, LockStatus>,
        #[serde(default)]
        counts: HashMap<ContextId, usize>,
        #[serde(default)]
        active_context: Option<ContextId>,
    },
}

impl SurfaceRequest {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl SurfaceResponse {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Controller → surface delivery
///
/// `deliver` must not block; a missing or stopped surface is reported as
/// an error that the caller discards.
pub trait SurfacePeer: Send + Sync {
    fn deliver(&self, message: ControllerMessage) -> Result<()>;
}

/// Surface → controller request path, acknowledged before returning
#[async_trait]
pub trait ControllerLink: Send + Sync {
    async fn request(&self, request: SurfaceRequest) -> Result<SurfaceResponse>;
}

/// In-process peer backed by an unbounded tokio channel
#[derive(Debug, Clone)]
pub struct ChannelPeer {
    tx: mpsc::UnboundedSender<ControllerMessage>,
}

impl SurfacePeer for ChannelPeer {
    fn deliver(&self, message: ControllerMessage) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| QuarantineError::PeerUnavailable)
    }
}

/// Create a connected peer and the surface-side receiver
pub fn channel() -> (ChannelPeer, mpsc::UnboundedReceiver<ControllerMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelPeer { tx }, rx)
}

/// Best-effort fan-out of controller notifications to the attached surface
#[derive(Default)]
pub struct Synchronizer {
    peer: RwLock<Option<Arc<dyn SurfacePeer>>>,
}

impl Synchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach (or replace) the surface peer
    pub fn attach(&self, peer: Arc<dyn SurfacePeer>) {
        *self.peer.write().unwrap_or_else(PoisonError::into_inner) = Some(peer);
    }

    pub fn detach(&self) {
        *self.peer.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn is_attached(&self) -> bool {
        self.peer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Send a notification; returns whether it was handed to a peer
    ///
    /// Failures never reach the caller.
    pub fn notify(&self, message: ControllerMessage) -> bool {
        let peer = self
            .peer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let Some(peer) = peer else {
            tracing::debug!(message = ?message, "No surface attached, notification dropped");
            return false;
        };

        match peer.deliver(message) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "Surface notification dropped");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_message_tagged_json() {
        let msg = ControllerMessage::StatusChanged {
            context_id: "ctx-1".to_string(),
            status: LockStatus::Closing,
        };
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"statusChanged\""));
        assert!(json.contains("\"contextId\":\"ctx-1\""));
        assert!(json.contains("\"status\":\"closing\""));

        assert_eq!(ControllerMessage::from_json(&json).unwrap(), msg);
    }

    #[test]
    fn test_message_fields_order_independent() {
        let json = r#"{"count":3,"contextId":"ctx-9","type":"countChanged"}"#;
        let msg = ControllerMessage::from_json(json).unwrap();
        assert_eq!(
            msg,
            ControllerMessage::CountChanged {
                context_id: "ctx-9".to_string(),
                count: 3
            }
        );
    }

    #[test]
    fn test_unknown_message_kind_rejected() {
        let err = ControllerMessage::from_json(r#"{"type":"reboot"}"#).unwrap_err();
        assert!(matches!(err, QuarantineError::Serialization(_)));
    }

    #[test]
    fn test_surface_handshake_json() {
        let json = SurfaceRequest::AboutToStart.to_json().unwrap();
        assert_eq!(json, r#"{"type":"aboutToStart"}"#);

        let response =
            SurfaceResponse::from_json(r#"{"type":"started","guardActive":true}"#).unwrap();
        let SurfaceResponse::Started {
            guard_active,
            contexts,
            counts,
            active_context,
        } = response;
        assert!(guard_active);
        assert!(contexts.is_empty());
        assert!(counts.is_empty());
        assert!(active_context.is_none());
    }

    #[test]
    fn test_channel_peer_delivers() {
        let (peer, mut rx) = channel();
        peer.deliver(ControllerMessage::GuardChanged { suppressed: true })
            .unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            ControllerMessage::GuardChanged { suppressed: true }
        );
    }

    #[test]
    fn test_channel_peer_fails_when_surface_gone() {
        let (peer, rx) = channel();
        drop(rx);
        let err = peer
            .deliver(ControllerMessage::GuardChanged { suppressed: false })
            .unwrap_err();
        assert!(matches!(err, QuarantineError::PeerUnavailable));
    }

    #[test]
    fn test_synchronizer_swallows_failures() {
        let sync = Synchronizer::new();
        assert!(!sync.notify(ControllerMessage::GuardChanged { suppressed: true }));

        let (peer, rx) = channel();
        sync.attach(Arc::new(peer));
        assert!(sync.is_attached());
        drop(rx);
        assert!(!sync.notify(ControllerMessage::GuardChanged { suppressed: true }));

        sync.detach();
        assert!(!sync.is_attached());
    }

    #[test]
    fn test_synchronizer_delivers_to_attached_peer() {
        let sync = Synchronizer::new();
        let (peer, mut rx) = channel();
        sync.attach(Arc::new(peer));

        assert!(sync.notify(ControllerMessage::ActivationChanged { context_id: None }));
        assert_eq!(
            rx.try_recv().unwrap(),
            ControllerMessage::ActivationChanged { context_id: None }
        );
    }
}
