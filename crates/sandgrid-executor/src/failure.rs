//! Per-node failure accounting for circuit breaking.
//!
//! Tracks consecutive dispatch failures per runtime node. Crossing the
//! threshold reports a trip exactly once per failure streak; the caller
//! reacts by marking the node unhealthy in the scheduler.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tracing::warn;

use sandgrid_core::NodeId;

/// Consecutive-failure tracker across nodes.
pub struct NodeFailureTracker {
    threshold: u32,
    counts: Mutex<HashMap<NodeId, u32>>,
}

impl NodeFailureTracker {
    /// `threshold` consecutive failures trip the breaker for a node.
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// Record one failed dispatch against a node. Returns `true` when
    /// this failure crosses the threshold (exactly once per streak).
    pub async fn record_failure(&self, node_id: &str) -> bool {
        let mut counts = self.counts.lock().await;
        let count = counts.entry(node_id.to_string()).or_insert(0);
        *count += 1;
        if *count == self.threshold {
            warn!(
                %node_id,
                failures = *count,
                "node crossed failure threshold"
            );
            true
        } else {
            false
        }
    }

    /// Record a successful dispatch, ending any failure streak.
    pub async fn record_success(&self, node_id: &str) {
        let mut counts = self.counts.lock().await;
        counts.remove(node_id);
    }

    /// Current streak length for a node.
    pub async fn failures(&self, node_id: &str) -> u32 {
        let counts = self.counts.lock().await;
        counts.get(node_id).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trips_exactly_once_at_threshold() {
        let tracker = NodeFailureTracker::new(3);

        assert!(!tracker.record_failure("n1").await);
        assert!(!tracker.record_failure("n1").await);
        assert!(tracker.record_failure("n1").await);
        // Further failures on the same streak don't re-trip.
        assert!(!tracker.record_failure("n1").await);
        assert_eq!(tracker.failures("n1").await, 4);
    }

    #[tokio::test]
    async fn success_resets_streak() {
        let tracker = NodeFailureTracker::new(2);

        assert!(!tracker.record_failure("n1").await);
        tracker.record_success("n1").await;
        assert_eq!(tracker.failures("n1").await, 0);

        // A fresh streak trips again.
        assert!(!tracker.record_failure("n1").await);
        assert!(tracker.record_failure("n1").await);
    }

    #[tokio::test]
    async fn nodes_are_tracked_independently() {
        let tracker = NodeFailureTracker::new(2);

        assert!(!tracker.record_failure("n1").await);
        assert!(!tracker.record_failure("n2").await);
        assert!(tracker.record_failure("n1").await);
        assert_eq!(tracker.failures("n2").await, 1);
    }

    #[tokio::test]
    async fn zero_threshold_is_clamped() {
        let tracker = NodeFailureTracker::new(0);
        assert!(tracker.record_failure("n1").await);
    }
}
