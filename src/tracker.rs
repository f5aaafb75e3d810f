//! Request tracker: per-context bookkeeping of in-flight operations
//!
//! Host lifecycle notifications are not causally ordered across listener
//! queues, so a "finished" event may arrive before its "open" event. Each
//! context keeps two sets:
//!
//! - **open**: operations believed in flight
//! - **closed**: operations seen finishing before they were seen opening
//!
//! An id in the closed set is consumed by its late "open" event, which nets
//! to a no-op. An id is never in both sets at once.
//!
//! The closed set is bounded per context: once it holds more than the
//! configured capacity, the oldest early close is forgotten. Operations
//! blocked in a locked context land there and never open, so a page that
//! keeps polling would otherwise grow it until teardown.

use crate::types::{ContextId, OperationEvent, OperationId, OperationKind};
use std::collections::{HashMap, HashSet, VecDeque};

/// Operation kinds that are single-shot and response-only by default
pub const DEFAULT_UNTRACKED_KINDS: [OperationKind; 4] = [
    OperationKind::Image,
    OperationKind::Imageset,
    OperationKind::Font,
    OperationKind::Stylesheet,
];

/// Early closes remembered per context by default
pub const DEFAULT_CLOSED_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct ContextOperations {
    open: HashSet<OperationId>,
    closed: HashSet<OperationId>,
    closed_order: VecDeque<OperationId>,
}

impl ContextOperations {
    fn is_empty(&self) -> bool {
        self.open.is_empty() && self.closed.is_empty()
    }

    fn close_early(&mut self, operation_id: &str, capacity: usize) {
        if !self.closed.insert(operation_id.to_string()) {
            return;
        }
        self.closed_order.push_back(operation_id.to_string());
        while self.closed.len() > capacity {
            let Some(oldest) = self.closed_order.pop_front() else {
                break;
            };
            self.closed.remove(&oldest);
        }
    }

    fn consume_early_close(&mut self, operation_id: &str) -> bool {
        if !self.closed.remove(operation_id) {
            return false;
        }
        self.closed_order.retain(|id| id != operation_id);
        true
    }
}

/// Tracks open and early-closed operations per isolation context
#[derive(Debug)]
pub struct RequestTracker {
    contexts: HashMap<ContextId, ContextOperations>,
    untracked: HashSet<OperationKind>,
    closed_capacity: usize,
}

impl Default for RequestTracker {
    fn default() -> Self {
        Self::new(DEFAULT_UNTRACKED_KINDS)
    }
}

impl RequestTracker {
    /// Create a tracker that ignores the given operation kinds
    pub fn new(untracked: impl IntoIterator<Item = OperationKind>) -> Self {
        Self {
            contexts: HashMap::new(),
            untracked: untracked.into_iter().collect(),
            closed_capacity: DEFAULT_CLOSED_CAPACITY,
        }
    }

    /// Bound the early-close set of each context (at least one entry)
    pub fn with_closed_capacity(mut self, capacity: usize) -> Self {
        self.closed_capacity = capacity.max(1);
        self
    }

    /// Whether operations of this kind are tracked at all
    pub fn is_tracked_kind(&self, kind: OperationKind) -> bool {
        !self.untracked.contains(&kind)
    }

    /// Apply one lifecycle notification
    ///
    /// Returns `Some(count)` with the resulting open count when the open set
    /// changed, `None` when the notification had no effect on the count.
    /// The caller is responsible for ignoring unmanaged contexts.
    pub fn track(
        &mut self,
        context_id: &str,
        operation_id: &str,
        kind: OperationKind,
        event: OperationEvent,
    ) -> Option<usize> {
        if !self.is_tracked_kind(kind) {
            return None;
        }

        let ops = self.contexts.entry(context_id.to_string()).or_default();

        let changed = if event.is_open() {
            if ops.consume_early_close(operation_id) {
                // Its close already arrived; the pair cancels out.
                false
            } else {
                ops.open.insert(operation_id.to_string())
            }
        } else if ops.open.remove(operation_id) {
            true
        } else {
            ops.close_early(operation_id, self.closed_capacity);
            false
        };

        let count = ops.open.len();
        if ops.is_empty() {
            self.contexts.remove(context_id);
        }

        changed.then_some(count)
    }

    /// Number of operations believed in flight for a context
    pub fn open_count(&self, context_id: &str) -> usize {
        self.contexts.get(context_id).map_or(0, |ops| ops.open.len())
    }

    pub fn has_open(&self, context_id: &str) -> bool {
        self.open_count(context_id) > 0
    }

    pub fn is_open(&self, context_id: &str, operation_id: &str) -> bool {
        self.contexts
            .get(context_id)
            .is_some_and(|ops| ops.open.contains(operation_id))
    }

    /// Whether a close was recorded for an operation not yet seen opening
    pub fn is_closed_early(&self, context_id: &str, operation_id: &str) -> bool {
        self.contexts
            .get(context_id)
            .is_some_and(|ops| ops.closed.contains(operation_id))
    }

    /// Open counts of every context with operations in flight
    pub fn counts(&self) -> HashMap<ContextId, usize> {
        self.contexts
            .iter()
            .filter(|(_, ops)| !ops.open.is_empty())
            .map(|(id, ops)| (id.clone(), ops.open.len()))
            .collect()
    }

    /// Stop tracking a context, returning how many open entries were dropped
    pub fn drop_context(&mut self, context_id: &str) -> usize {
        self.contexts
            .remove(context_id)
            .map_or(0, |ops| ops.open.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const XHR: OperationKind = OperationKind::XmlHttpRequest;

    #[test]
    fn test_open_then_complete() {
        let mut tracker = RequestTracker::default();
        assert_eq!(tracker.track("c", "r1", XHR, OperationEvent::Open), Some(1));
        assert!(tracker.is_open("c", "r1"));
        assert_eq!(
            tracker.track("c", "r1", XHR, OperationEvent::Completed),
            Some(0)
        );
        assert_eq!(tracker.open_count("c"), 0);
        assert!(!tracker.has_open("c"));
    }

    #[test]
    fn test_close_before_open_cancels() {
        let mut tracker = RequestTracker::default();
        assert_eq!(tracker.track("c", "r2", XHR, OperationEvent::Completed), None);
        assert!(tracker.is_closed_early("c", "r2"));

        assert_eq!(tracker.track("c", "r2", XHR, OperationEvent::Open), None);
        assert!(!tracker.is_closed_early("c", "r2"));
        assert!(!tracker.is_open("c", "r2"));
        assert_eq!(tracker.open_count("c"), 0);
    }

    #[test]
    fn test_duplicate_open_counts_once() {
        let mut tracker = RequestTracker::default();
        tracker.track("c", "r1", XHR, OperationEvent::Open);
        assert_eq!(tracker.track("c", "r1", XHR, OperationEvent::Open), None);
        assert_eq!(tracker.open_count("c"), 1);
    }

    #[test]
    fn test_every_close_event_removes() {
        for event in [
            OperationEvent::Completed,
            OperationEvent::Error,
            OperationEvent::Redirect,
            OperationEvent::Blocked,
        ] {
            let mut tracker = RequestTracker::default();
            tracker.track("c", "r1", XHR, OperationEvent::Open);
            assert_eq!(tracker.track("c", "r1", XHR, event), Some(0));
        }
    }

    #[test]
    fn test_untracked_kinds_ignored() {
        let mut tracker = RequestTracker::default();
        assert_eq!(
            tracker.track("c", "img", OperationKind::Image, OperationEvent::Open),
            None
        );
        assert_eq!(tracker.open_count("c"), 0);
        assert!(!tracker.is_tracked_kind(OperationKind::Font));
        assert!(tracker.is_tracked_kind(OperationKind::WebSocket));
    }

    #[test]
    fn test_custom_untracked_kinds() {
        let mut tracker = RequestTracker::new([OperationKind::Media]);
        assert!(tracker.is_tracked_kind(OperationKind::Image));
        assert_eq!(
            tracker.track("c", "m", OperationKind::Media, OperationEvent::Open),
            None
        );
    }

    #[test]
    fn test_sets_stay_disjoint() {
        let mut tracker = RequestTracker::default();
        tracker.track("c", "r1", XHR, OperationEvent::Error);
        tracker.track("c", "r1", XHR, OperationEvent::Open);
        tracker.track("c", "r1", XHR, OperationEvent::Open);
        assert!(tracker.is_open("c", "r1"));
        assert!(!tracker.is_closed_early("c", "r1"));
    }

    #[test]
    fn test_reordering_invariance() {
        // Every interleaving of one open and one close for the same id
        // nets to the same open count as causal order.
        let orders = [
            [OperationEvent::Open, OperationEvent::Completed],
            [OperationEvent::Completed, OperationEvent::Open],
        ];
        for order in orders {
            let mut tracker = RequestTracker::default();
            tracker.track("c", "keep", XHR, OperationEvent::Open);
            for event in order {
                tracker.track("c", "r", XHR, event);
            }
            assert_eq!(tracker.open_count("c"), 1);
            assert!(!tracker.is_open("c", "r"));
            assert!(!tracker.is_closed_early("c", "r"));
        }
    }

    #[test]
    fn test_contexts_are_independent() {
        let mut tracker = RequestTracker::default();
        tracker.track("a", "r1", XHR, OperationEvent::Open);
        tracker.track("b", "r1", XHR, OperationEvent::Completed);
        assert_eq!(tracker.open_count("a"), 1);
        assert!(tracker.is_closed_early("b", "r1"));
        assert_eq!(tracker.counts().len(), 1);
    }

    #[test]
    fn test_closed_set_is_bounded() {
        let mut tracker = RequestTracker::default().with_closed_capacity(2);
        for id in ["a", "b", "c"] {
            tracker.track("c", id, XHR, OperationEvent::Blocked);
        }
        assert!(!tracker.is_closed_early("c", "a"));
        assert!(tracker.is_closed_early("c", "b"));
        assert!(tracker.is_closed_early("c", "c"));

        // The forgotten close no longer cancels its late open
        assert_eq!(tracker.track("c", "a", XHR, OperationEvent::Open), Some(1));
        assert_eq!(tracker.track("c", "b", XHR, OperationEvent::Open), None);
        assert_eq!(tracker.open_count("c"), 1);
    }

    #[test]
    fn test_eviction_follows_latest_close() {
        let mut tracker = RequestTracker::default().with_closed_capacity(2);
        tracker.track("c", "a", XHR, OperationEvent::Error);
        tracker.track("c", "b", XHR, OperationEvent::Error);
        tracker.track("c", "a", XHR, OperationEvent::Open);
        tracker.track("c", "a", XHR, OperationEvent::Error);
        tracker.track("c", "d", XHR, OperationEvent::Error);

        // "a" was re-closed after "b", so "b" is the oldest entry
        assert!(!tracker.is_closed_early("c", "b"));
        assert!(tracker.is_closed_early("c", "a"));
        assert!(tracker.is_closed_early("c", "d"));
    }

    #[test]
    fn test_drop_context() {
        let mut tracker = RequestTracker::default();
        tracker.track("c", "r1", XHR, OperationEvent::Open);
        tracker.track("c", "r2", XHR, OperationEvent::Open);
        assert_eq!(tracker.drop_context("c"), 2);
        assert_eq!(tracker.open_count("c"), 0);
        assert_eq!(tracker.drop_context("c"), 0);
    }
}
