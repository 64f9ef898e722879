//! Durable log abstraction and in-memory implementation.
//!
//! The [`PaxosLogger`] trait covers everything an instance persists:
//! checkpoints, logged protocol messages (accepts, decisions, ballot
//! adoptions) for crash recovery, epoch-final checkpoint copies, and
//! pause blobs for hot-restore. In a real deployment this would sit on a
//! write-ahead log; [`MemoryPaxosLogger`] is the in-memory implementation
//! used for tests and for deployments that accept loss of local durability
//! (a rebooted member then recovers via checkpoint transfer instead of
//! replay).
//!
//! Implementations must make writes durable before returning; the commit
//! path logs a decision before the decision is multicast, and a prepare
//! reply is sent only after the ballot adoption is logged.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::messages::{PacketBody, PaxosPacket};
use crate::types::{Ballot, NodeId, PValue, PaxosError, Slot};

/// A stored checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Epoch version at the checkpoint.
    pub version: i32,

    /// Group membership at the checkpoint.
    pub members: Vec<NodeId>,

    /// The checkpointed slot; recovery resumes at the slot after it.
    pub slot: Slot,

    /// The acceptor's ballot at the checkpoint.
    pub ballot: Ballot,

    /// The acceptor's garbage-collection slot at the checkpoint.
    pub gc_slot: Slot,

    /// Serialized application state.
    pub state: String,
}

/// Durable state for paxos instances.
pub trait PaxosLogger {
    /// Store the latest checkpoint for a group, replacing any previous one.
    ///
    /// Logged messages at or below the checkpointed slot are no longer
    /// needed for recovery and may be pruned.
    fn put_checkpoint(&mut self, group: &str, record: CheckpointRecord) -> Result<(), PaxosError>;

    /// Load a group's latest checkpoint.
    fn get_checkpoint(&self, group: &str) -> Result<Option<CheckpointRecord>, PaxosError>;

    /// Archive the current checkpoint as the final state of its epoch.
    ///
    /// Called when the epoch-final stop executes; the archived copy outlives
    /// the instance so a successor epoch can fetch the closing state.
    fn copy_epoch_final(&mut self, group: &str) -> Result<(), PaxosError>;

    /// Fetch the archived final checkpoint of a finished epoch.
    fn get_epoch_final_checkpoint(
        &self,
        group: &str,
        version: i32,
    ) -> Result<Option<CheckpointRecord>, PaxosError>;

    /// Append a protocol message to the group's recovery log.
    fn log_packet(&mut self, packet: &PaxosPacket) -> Result<(), PaxosError>;

    /// Append several protocol messages in one durable batch. The default
    /// delegates to [`log_packet`](Self::log_packet); implementations backed
    /// by a write-ahead log should override this with a single fsync.
    fn log_batch(&mut self, packets: &[PaxosPacket]) -> Result<(), PaxosError> {
        for packet in packets {
            self.log_packet(packet)?;
        }
        Ok(())
    }

    /// All logged messages for a group, in logged order, for recovery replay.
    fn get_logged_packets(&self, group: &str) -> Result<Vec<PaxosPacket>, PaxosError>;

    /// The highest-ballot logged accept per slot, for slots at or after
    /// `from`.
    fn get_logged_accepts(
        &self,
        group: &str,
        from: Slot,
    ) -> Result<HashMap<Slot, PValue>, PaxosError> {
        let mut accepts: HashMap<Slot, PValue> = HashMap::new();
        for packet in self.get_logged_packets(group)? {
            let PacketBody::Accept(accept) = packet.body else {
                continue;
            };
            let pvalue = accept.pvalue;
            if pvalue.slot.since(from) < 0 {
                continue;
            }
            match accepts.get(&pvalue.slot) {
                Some(existing) if existing.ballot >= pvalue.ballot => {}
                _ => {
                    accepts.insert(pvalue.slot, pvalue);
                }
            }
        }
        Ok(accepts)
    }

    /// Logged decisions with slots in `[from, to)`, for serving sync
    /// requests whose slots have left the acceptor's in-memory maps.
    fn get_logged_decisions(
        &self,
        group: &str,
        from: Slot,
        to: Slot,
    ) -> Result<Vec<PValue>, PaxosError>;

    /// Store a hot-restore blob for a paused group.
    fn pause(&mut self, group: &str, blob: String) -> Result<(), PaxosError>;

    /// Take the hot-restore blob of a paused group, if any.
    fn unpause(&mut self, group: &str) -> Result<Option<String>, PaxosError>;

    /// Drop all state for a group (after its epoch-final stop executed; the
    /// archived epoch-final checkpoint survives).
    fn remove(&mut self, group: &str) -> Result<(), PaxosError>;
}

/// Per-group storage inside [`MemoryPaxosLogger`].
#[derive(Debug, Default)]
struct GroupLog {
    checkpoint: Option<CheckpointRecord>,
    epoch_finals: HashMap<i32, CheckpointRecord>,
    messages: Vec<PaxosPacket>,
    pause_blob: Option<String>,
}

/// In-memory implementation of [`PaxosLogger`].
#[derive(Debug, Default)]
pub struct MemoryPaxosLogger {
    groups: HashMap<String, GroupLog>,
}

impl MemoryPaxosLogger {
    /// Create an empty logger.
    pub fn new() -> Self {
        Self::default()
    }

    fn group_mut(&mut self, group: &str) -> &mut GroupLog {
        self.groups.entry(group.to_string()).or_default()
    }
}

/// Whether a logged packet is subsumed by a checkpoint and can be pruned.
///
/// Accepts and decisions at or below the checkpointed slot are covered by
/// the checkpoint state; a logged ballot adoption is covered once the
/// checkpoint records an equal or higher acceptor ballot.
fn subsumed_by_checkpoint(packet: &PaxosPacket, record: &CheckpointRecord) -> bool {
    match &packet.body {
        PacketBody::Accept(accept) => accept.pvalue.slot.since(record.slot) <= 0,
        PacketBody::Decision(pvalue) => pvalue.slot.since(record.slot) <= 0,
        PacketBody::Prepare(prepare) => prepare.ballot <= record.ballot,
        _ => false,
    }
}

impl PaxosLogger for MemoryPaxosLogger {
    fn put_checkpoint(&mut self, group: &str, record: CheckpointRecord) -> Result<(), PaxosError> {
        let log = self.group_mut(group);
        log.messages.retain(|p| !subsumed_by_checkpoint(p, &record));
        log.checkpoint = Some(record);
        Ok(())
    }

    fn get_checkpoint(&self, group: &str) -> Result<Option<CheckpointRecord>, PaxosError> {
        Ok(self.groups.get(group).and_then(|g| g.checkpoint.clone()))
    }

    fn copy_epoch_final(&mut self, group: &str) -> Result<(), PaxosError> {
        let log = self.group_mut(group);
        if let Some(cp) = log.checkpoint.clone() {
            log.epoch_finals.insert(cp.version, cp);
        }
        Ok(())
    }

    fn get_epoch_final_checkpoint(
        &self,
        group: &str,
        version: i32,
    ) -> Result<Option<CheckpointRecord>, PaxosError> {
        Ok(self
            .groups
            .get(group)
            .and_then(|g| g.epoch_finals.get(&version).cloned()))
    }

    fn log_packet(&mut self, packet: &PaxosPacket) -> Result<(), PaxosError> {
        self.group_mut(&packet.group).messages.push(packet.clone());
        Ok(())
    }

    fn get_logged_packets(&self, group: &str) -> Result<Vec<PaxosPacket>, PaxosError> {
        Ok(self
            .groups
            .get(group)
            .map(|g| g.messages.clone())
            .unwrap_or_default())
    }

    fn get_logged_decisions(
        &self,
        group: &str,
        from: Slot,
        to: Slot,
    ) -> Result<Vec<PValue>, PaxosError> {
        let Some(log) = self.groups.get(group) else {
            return Ok(Vec::new());
        };
        let mut decisions: Vec<PValue> = log
            .messages
            .iter()
            .filter_map(|p| match &p.body {
                PacketBody::Decision(pv)
                    if pv.slot.since(from) >= 0 && pv.slot.since(to) < 0 =>
                {
                    Some(pv.clone())
                }
                _ => None,
            })
            .collect();
        decisions.sort_by_key(|pv| pv.slot.since(from));
        decisions.dedup_by_key(|pv| pv.slot);
        Ok(decisions)
    }

    fn pause(&mut self, group: &str, blob: String) -> Result<(), PaxosError> {
        self.group_mut(group).pause_blob = Some(blob);
        Ok(())
    }

    fn unpause(&mut self, group: &str) -> Result<Option<String>, PaxosError> {
        Ok(self
            .groups
            .get_mut(group)
            .and_then(|g| g.pause_blob.take()))
    }

    fn remove(&mut self, group: &str) -> Result<(), PaxosError> {
        if let Some(log) = self.groups.get_mut(group) {
            log.checkpoint = None;
            log.messages.clear();
            log.pause_blob = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{AcceptPacket, PreparePacket};
    use crate::types::Request;

    fn make_checkpoint(slot: i32) -> CheckpointRecord {
        CheckpointRecord {
            version: 0,
            members: vec![NodeId::new(0), NodeId::new(1), NodeId::new(2)],
            slot: Slot::new(slot),
            ballot: Ballot::new(1, NodeId::new(0)),
            gc_slot: Slot::new(slot - 1),
            state: format!("state@{}", slot),
        }
    }

    fn make_decision_packet(slot: i32) -> PaxosPacket {
        PaxosPacket::new(
            "g1",
            0,
            PacketBody::Decision(PValue::new(
                Ballot::new(1, NodeId::new(0)),
                Slot::new(slot),
                Request::new(slot as u64, format!("cmd-{}", slot), NodeId::new(0)),
            )),
        )
    }

    #[test]
    fn test_checkpoint_put_get() {
        let mut logger = MemoryPaxosLogger::new();
        assert!(logger.get_checkpoint("g1").expect("get").is_none());

        logger.put_checkpoint("g1", make_checkpoint(100)).expect("put");
        let cp = logger.get_checkpoint("g1").expect("get").expect("exists");
        assert_eq!(cp.slot, Slot::new(100));
        assert_eq!(cp.state, "state@100");
    }

    #[test]
    fn test_checkpoint_prunes_covered_messages() {
        let mut logger = MemoryPaxosLogger::new();
        for slot in 1..=10 {
            logger.log_packet(&make_decision_packet(slot)).expect("log");
        }

        logger.put_checkpoint("g1", make_checkpoint(7)).expect("put");

        let remaining = logger.get_logged_packets("g1").expect("get");
        assert_eq!(remaining.len(), 3, "slots 8..=10 survive");
    }

    fn make_accept_packet(ballot: Ballot, slot: i32) -> PaxosPacket {
        PaxosPacket::new(
            "g1",
            0,
            PacketBody::Accept(AcceptPacket {
                pvalue: PValue::new(
                    ballot,
                    Slot::new(slot),
                    Request::new(slot as u64, format!("cmd-{}", slot), NodeId::new(0)),
                ),
                median_checkpointed_slot: Slot::GC_NONE,
            }),
        )
    }

    fn make_prepare_packet(ballot: Ballot) -> PaxosPacket {
        PaxosPacket::new(
            "g1",
            0,
            PacketBody::Prepare(PreparePacket {
                ballot,
                first_undecided_slot: Slot::FIRST,
            }),
        )
    }

    #[test]
    fn test_checkpoint_prunes_subsumed_prepares() {
        let mut logger = MemoryPaxosLogger::new();
        logger
            .log_packet(&make_prepare_packet(Ballot::new(1, NodeId::new(1))))
            .expect("log");

        // The checkpoint records ballot (1, 0); the adoption at (1, 1) is
        // not covered by it and must survive.
        logger.put_checkpoint("g1", make_checkpoint(5)).expect("put");
        assert_eq!(logger.get_logged_packets("g1").expect("get").len(), 1);

        // A checkpoint at a higher acceptor ballot subsumes the adoption.
        let mut cp = make_checkpoint(5);
        cp.ballot = Ballot::new(2, NodeId::new(2));
        logger.put_checkpoint("g1", cp).expect("put");
        assert!(logger.get_logged_packets("g1").expect("get").is_empty());
    }

    #[test]
    fn test_log_batch_appends_in_order() {
        let mut logger = MemoryPaxosLogger::new();
        logger
            .log_batch(&[make_decision_packet(0), make_decision_packet(1)])
            .expect("batch");

        let logged = logger.get_logged_packets("g1").expect("get");
        assert_eq!(logged.len(), 2);
        assert!(matches!(logged[0].body, PacketBody::Decision(ref pv) if pv.slot == Slot::new(0)));
    }

    #[test]
    fn test_logged_accepts_keep_highest_ballot_per_slot() {
        let mut logger = MemoryPaxosLogger::new();
        let low = Ballot::new(1, NodeId::new(0));
        let high = Ballot::new(2, NodeId::new(1));
        logger.log_packet(&make_accept_packet(low, 3)).expect("log");
        logger.log_packet(&make_accept_packet(high, 3)).expect("log");
        logger.log_packet(&make_accept_packet(low, 1)).expect("log");

        let accepts = logger.get_logged_accepts("g1", Slot::new(2)).expect("get");
        assert_eq!(accepts.len(), 1, "slot 1 is below the floor");
        assert_eq!(accepts[&Slot::new(3)].ballot, high);
    }

    #[test]
    fn test_logged_decisions_range() {
        let mut logger = MemoryPaxosLogger::new();
        for slot in [3, 5, 4, 5] {
            logger.log_packet(&make_decision_packet(slot)).expect("log");
        }

        let decisions = logger
            .get_logged_decisions("g1", Slot::new(4), Slot::new(6))
            .expect("get");
        let slots: Vec<i32> = decisions.iter().map(|d| d.slot.0).collect();
        assert_eq!(slots, vec![4, 5], "in range, sorted, deduplicated");
    }

    #[test]
    fn test_epoch_final_survives_remove() {
        let mut logger = MemoryPaxosLogger::new();
        logger.put_checkpoint("g1", make_checkpoint(42)).expect("put");
        logger.copy_epoch_final("g1").expect("copy");
        logger.remove("g1").expect("remove");

        assert!(logger.get_checkpoint("g1").expect("get").is_none());
        let archived = logger
            .get_epoch_final_checkpoint("g1", 0)
            .expect("get")
            .expect("archived");
        assert_eq!(archived.slot, Slot::new(42));
    }

    #[test]
    fn test_pause_unpause_roundtrip() {
        let mut logger = MemoryPaxosLogger::new();
        logger.pause("g1", "blob".to_string()).expect("pause");

        assert_eq!(
            logger.unpause("g1").expect("unpause"),
            Some("blob".to_string())
        );
        assert!(logger.unpause("g1").expect("unpause").is_none(), "taken once");
    }

    #[test]
    fn test_unknown_group_is_empty() {
        let logger = MemoryPaxosLogger::new();
        assert!(logger.get_logged_packets("nope").expect("get").is_empty());
        assert!(logger
            .get_logged_decisions("nope", Slot::new(0), Slot::new(10))
            .expect("get")
            .is_empty());
    }
}
