//! Core types for the multi-group Paxos engine.
//!
//! This module defines the building blocks used throughout the crate:
//!
//! - [`NodeId`]: Identifier of a cluster member
//! - [`Ballot`]: A (number, coordinator) pair with a total order
//! - [`Slot`]: Wraparound-aware position in a group's command log
//! - [`Request`]: A client command, possibly a no-op or an epoch-final stop
//! - [`PValue`]: A request bound to a slot at a ballot
//! - [`PaxosError`]: Error type for all engine operations
//!
//! ## Wraparound arithmetic
//!
//! Slot and ballot numbers are 32-bit and wrap. Every ordering decision on
//! them goes through a signed-difference test (`a.since(b) < 0`), never a
//! plain `<`, so that a log running long enough to wrap keeps comparing
//! correctly across the boundary.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Identifier of a cluster member.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Create a new node id.
    pub const fn new(n: u32) -> Self {
        Self(n)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node({})", self.0)
    }
}

/// A ballot: a wraparound-aware number paired with the coordinator that owns
/// it.
///
/// Ballots are totally ordered by number first (signed-difference compare),
/// then by coordinator id. A higher ballot always takes precedence. Each
/// ballot number maps to exactly one coordinator, so two coordinators can
/// never both be active at the same ballot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ballot {
    /// The ballot number. `-1` is the pre-recovery sentinel.
    pub number: i32,
    /// The node that owns this ballot.
    pub coordinator: NodeId,
}

impl Ballot {
    /// The pre-recovery sentinel ballot, lower than every real ballot.
    pub const SENTINEL: Self = Self {
        number: -1,
        coordinator: NodeId(0),
    };

    /// Create a new ballot.
    pub const fn new(number: i32, coordinator: NodeId) -> Self {
        Self {
            number,
            coordinator,
        }
    }
}

impl PartialOrd for Ballot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ballot {
    fn cmp(&self, other: &Self) -> Ordering {
        let diff = self.number.wrapping_sub(other.number);
        match diff.cmp(&0) {
            Ordering::Equal => self.coordinator.cmp(&other.coordinator),
            unequal => unequal,
        }
    }
}

impl std::fmt::Display for Ballot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ballot({}:{})", self.number, self.coordinator.0)
    }
}

/// A position in a group's command log.
///
/// Slots wrap, so ordering goes through [`Slot::since`]: `a.since(b) < 0`
/// means `a` precedes `b`. `-1` doubles as the garbage-collection sentinel
/// ("nothing collected yet").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Slot(pub i32);

impl Slot {
    /// The first slot of a fresh group.
    pub const FIRST: Self = Self(0);

    /// The garbage-collection sentinel, one before the first slot.
    pub const GC_NONE: Self = Self(-1);

    /// Create a new slot.
    pub const fn new(n: i32) -> Self {
        Self(n)
    }

    /// The slot after this one.
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// The slot before this one.
    pub const fn prev(self) -> Self {
        Self(self.0.wrapping_sub(1))
    }

    /// This slot offset by `n` positions.
    pub const fn offset(self, n: i32) -> Self {
        Self(self.0.wrapping_add(n))
    }

    /// Signed distance from `other` to this slot.
    ///
    /// Negative means this slot precedes `other`. This is the only valid way
    /// to order slots.
    pub const fn since(self, other: Self) -> i32 {
        self.0.wrapping_sub(other.0)
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "slot({})", self.0)
    }
}

/// Marker payload for filler commands proposed during a view change.
pub const NO_OP: &str = "+NO_OP+";

/// A client command.
///
/// `value` is `None` for a meta entry: a decision whose payload this node
/// does not (yet) hold, e.g. one relayed after the payload was
/// garbage-collected. A meta decision must be reconstructed from a
/// matching-ballot accept before it can execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Unique request id; ids disambiguate conflicting proposals.
    pub id: u64,

    /// The command payload, or `None` for a meta entry.
    pub value: Option<String>,

    /// Whether this command ends the group's current epoch.
    pub stop: bool,

    /// The member where the client submitted this request.
    ///
    /// Only the entry member replies to the client after execution.
    pub entry_node: NodeId,
}

impl Request {
    /// Create a regular client command.
    pub fn new(id: u64, value: impl Into<String>, entry_node: NodeId) -> Self {
        Self {
            id,
            value: Some(value.into()),
            stop: false,
            entry_node,
        }
    }

    /// Create an epoch-final stop command.
    pub fn stop(id: u64, value: impl Into<String>, entry_node: NodeId) -> Self {
        Self {
            id,
            value: Some(value.into()),
            stop: true,
            entry_node,
        }
    }

    /// Create a filler no-op command.
    pub fn no_op(id: u64, entry_node: NodeId) -> Self {
        Self {
            id,
            value: Some(NO_OP.to_string()),
            stop: false,
            entry_node,
        }
    }

    /// Whether this request carries its payload.
    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }

    /// Whether this request is a filler no-op.
    pub fn is_no_op(&self) -> bool {
        self.value.as_deref() == Some(NO_OP)
    }

    /// Strip the payload, leaving a meta entry with the same identity.
    pub fn to_meta(&self) -> Self {
        Self {
            id: self.id,
            value: None,
            stop: self.stop,
            entry_node: self.entry_node,
        }
    }
}

/// A request bound to a slot at a ballot — the unit of phase-2 agreement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PValue {
    /// The ballot under which this value was proposed.
    pub ballot: Ballot,

    /// The slot this value occupies.
    pub slot: Slot,

    /// The proposed request.
    pub request: Request,
}

impl PValue {
    /// Create a pvalue.
    pub fn new(ballot: Ballot, slot: Slot, request: Request) -> Self {
        Self {
            ballot,
            slot,
            request,
        }
    }

    /// Rebind this value to a different ballot and slot, as a coordinator
    /// does when carrying a proposal into its own view.
    pub fn rebind(&self, ballot: Ballot, slot: Slot) -> Self {
        Self {
            ballot,
            slot,
            request: self.request.clone(),
        }
    }
}

/// Deterministic polynomial hash of a group name.
///
/// Feeds round-robin coordinator selection, so it must produce the same
/// value on every member.
pub fn group_hash(group: &str) -> i32 {
    let mut h: i32 = 0;
    for b in group.bytes() {
        h = h.wrapping_mul(31).wrapping_add(b as i32);
    }
    h
}

/// Errors that can occur during engine operations.
#[derive(Debug, thiserror::Error)]
pub enum PaxosError {
    /// Instance creation failed, typically a checkpoint whose version or
    /// membership disagrees with the creation arguments.
    #[error("cannot create instance {group}: {reason}")]
    InstanceCreation {
        /// The group being created.
        group: String,
        /// Why creation failed.
        reason: String,
    },

    /// No instance exists for the named group.
    #[error("no such instance: {group}")]
    NoSuchInstance {
        /// The group that was addressed.
        group: String,
    },

    /// The instance has executed its epoch-final stop.
    #[error("instance {group} is stopped")]
    InstanceStopped {
        /// The stopped group.
        group: String,
    },

    /// Persistent log error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization or deserialization error.
    #[error("codec error: {0}")]
    Codec(String),

    /// Transport-level send error.
    #[error("network error: {0}")]
    Network(String),
}

impl From<serde_json::Error> for PaxosError {
    fn from(err: serde_json::Error) -> Self {
        PaxosError::Codec(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ballot_ordering() {
        let b10 = Ballot::new(1, NodeId::new(0));
        let b11 = Ballot::new(1, NodeId::new(1));
        let b20 = Ballot::new(2, NodeId::new(0));

        assert!(b10 < b11, "same number orders by coordinator");
        assert!(b11 < b20, "number dominates coordinator");
        assert!(Ballot::SENTINEL < b10);
        assert_eq!(b10.cmp(&b10), Ordering::Equal);
    }

    #[test]
    fn test_ballot_ordering_across_wraparound() {
        let near_max = Ballot::new(i32::MAX, NodeId::new(0));
        let wrapped = Ballot::new(i32::MAX.wrapping_add(1), NodeId::new(0));

        assert!(near_max < wrapped, "wrapped number still compares higher");
    }

    #[test]
    fn test_ballot_display() {
        assert_eq!(Ballot::new(3, NodeId::new(2)).to_string(), "ballot(3:2)");
    }

    #[test]
    fn test_slot_since() {
        let s5 = Slot::new(5);
        let s7 = Slot::new(7);

        assert!(s5.since(s7) < 0);
        assert!(s7.since(s5) > 0);
        assert_eq!(s5.since(s5), 0);
        assert_eq!(s5.next(), Slot::new(6));
        assert_eq!(s5.prev(), Slot::new(4));
        assert_eq!(s5.offset(10), Slot::new(15));
    }

    #[test]
    fn test_slot_since_across_wraparound() {
        let high = Slot::new(i32::MAX);
        let wrapped = high.next();

        assert!(high.since(wrapped) < 0, "pre-wrap slot precedes post-wrap");
        assert_eq!(wrapped.since(high), 1);
    }

    #[test]
    fn test_request_kinds() {
        let r = Request::new(7, "set x=1", NodeId::new(2));
        assert!(r.has_value());
        assert!(!r.stop);
        assert!(!r.is_no_op());

        let stop = Request::stop(8, "final", NodeId::new(2));
        assert!(stop.stop);

        let noop = Request::no_op(9, NodeId::new(0));
        assert!(noop.is_no_op());

        let meta = r.to_meta();
        assert!(!meta.has_value());
        assert_eq!(meta.id, r.id);
    }

    #[test]
    fn test_pvalue_rebind() {
        let pv = PValue::new(
            Ballot::new(1, NodeId::new(0)),
            Slot::new(4),
            Request::new(1, "v", NodeId::new(0)),
        );
        let rebound = pv.rebind(Ballot::new(2, NodeId::new(1)), Slot::new(9));

        assert_eq!(rebound.ballot, Ballot::new(2, NodeId::new(1)));
        assert_eq!(rebound.slot, Slot::new(9));
        assert_eq!(rebound.request, pv.request);
    }

    #[test]
    fn test_group_hash_deterministic() {
        assert_eq!(group_hash("group1"), group_hash("group1"));
        assert_ne!(group_hash("group1"), group_hash("group2"));
        assert_eq!(group_hash(""), 0);
    }

    #[test]
    fn test_pvalue_serde_roundtrip() {
        let pv = PValue::new(
            Ballot::new(2, NodeId::new(1)),
            Slot::new(10),
            Request::new(42, "payload", NodeId::new(3)),
        );
        let json = serde_json::to_string(&pv).expect("serialize");
        let decoded: PValue = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(pv, decoded);
    }

    #[test]
    fn test_error_display() {
        let err = PaxosError::InstanceCreation {
            group: "g1".to_string(),
            reason: "version mismatch".to_string(),
        };
        assert!(err.to_string().contains("g1"));
        assert!(err.to_string().contains("version mismatch"));
    }
}
