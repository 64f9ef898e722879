//! Failure detection seam.
//!
//! Coordinator election consults a [`FailureDetector`] to decide whether the
//! current coordinator is dead (run if next in line) or long dead (anyone
//! may run, protecting liveness when the next-in-line member is itself dead
//! or partitioned). The engine feeds the detector by reporting every peer it
//! hears protocol traffic from; a deployment would usually also wire in its
//! own heartbeats.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::types::NodeId;

/// Liveness oracle consulted during coordinator election.
pub trait FailureDetector {
    /// Report traffic from a peer.
    fn heard_from(&mut self, node: NodeId);

    /// Whether the peer is currently believed alive.
    fn is_node_up(&self, node: NodeId) -> bool;

    /// Whether the peer has been dead long enough that out-of-turn
    /// coordinator runs are justified.
    fn last_coordinator_long_dead(&self, node: NodeId) -> bool;
}

/// Timeout-based [`FailureDetector`]: a peer is up while it has been heard
/// from within `timeout`, and long dead after `long_dead_multiple` timeouts
/// of silence.
///
/// Peers never heard from are measured against the detector's creation
/// time, so a freshly started node does not instantly declare the whole
/// cluster long dead.
#[derive(Debug)]
pub struct TimeoutFailureDetector {
    timeout: Duration,
    long_dead_multiple: u32,
    last_heard: HashMap<NodeId, Instant>,
    created: Instant,
}

impl TimeoutFailureDetector {
    /// Create a detector with the given liveness timeout; the long-dead
    /// horizon is twice the timeout.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            long_dead_multiple: 2,
            last_heard: HashMap::new(),
            created: Instant::now(),
        }
    }

    fn silence(&self, node: NodeId) -> Duration {
        self.last_heard
            .get(&node)
            .copied()
            .unwrap_or(self.created)
            .elapsed()
    }

    /// Shift a peer's last-heard time into the past, to exercise election
    /// paths in tests without sleeping.
    #[cfg(test)]
    pub fn backdate(&mut self, node: NodeId, by: Duration) {
        let when = Instant::now() - by;
        self.last_heard.insert(node, when);
    }
}

impl FailureDetector for TimeoutFailureDetector {
    fn heard_from(&mut self, node: NodeId) {
        self.last_heard.insert(node, Instant::now());
    }

    fn is_node_up(&self, node: NodeId) -> bool {
        let up = self.silence(node) < self.timeout;
        if !up {
            debug!(node = %node, "peer considered down");
        }
        up
    }

    fn last_coordinator_long_dead(&self, node: NodeId) -> bool {
        self.silence(node) > self.timeout * self.long_dead_multiple
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_peers_are_up() {
        let detector = TimeoutFailureDetector::new(Duration::from_secs(5));
        assert!(detector.is_node_up(NodeId::new(3)));
        assert!(!detector.last_coordinator_long_dead(NodeId::new(3)));
    }

    #[test]
    fn test_silent_peer_goes_down_then_long_dead() {
        let mut detector = TimeoutFailureDetector::new(Duration::from_secs(5));
        let node = NodeId::new(1);

        detector.heard_from(node);
        assert!(detector.is_node_up(node));

        detector.backdate(node, Duration::from_secs(6));
        assert!(!detector.is_node_up(node));
        assert!(!detector.last_coordinator_long_dead(node), "dead but not long dead");

        detector.backdate(node, Duration::from_secs(11));
        assert!(detector.last_coordinator_long_dead(node));
    }

    #[test]
    fn test_hearing_from_peer_revives_it() {
        let mut detector = TimeoutFailureDetector::new(Duration::from_secs(5));
        let node = NodeId::new(1);

        detector.backdate(node, Duration::from_secs(60));
        assert!(!detector.is_node_up(node));

        detector.heard_from(node);
        assert!(detector.is_node_up(node));
    }
}
