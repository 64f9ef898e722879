//! Passive acceptor state for one replica group.
//!
//! The acceptor is the safety-critical half of a group member. It promises
//! ballots, votes on accepts, holds decided-but-unexecuted commands, and
//! tracks how far the log has been garbage-collected. It never talks to the
//! transport or the log: every handler is a pure state transition returning
//! a value the instance layer turns into messaging and logging work.
//!
//! ## State
//!
//! ```text
//! PaxosAcceptor {
//!     ballot:    Ballot,              // highest ballot promised or voted
//!     next_slot: Slot,                // next slot to execute
//!     gc_slot:   Slot,                // accepts at or below are collected
//!     accepted:  Map<Slot, PValue>,   // phase-2 votes not yet collected
//!     decided:   Map<Slot, PValue>,   // committed, awaiting execution
//! }
//! ```
//!
//! ## Key invariants
//!
//! - The ballot never decreases. Prepares adopt on strictly-greater,
//!   accepts on greater-or-equal.
//! - `next_slot` advances by exactly one per executed decision.
//! - `gc_slot` never regresses and never reaches `next_slot`.
//! - Slot and ballot-number comparisons always go through signed-difference
//!   tests; slots wrap.

use std::collections::HashMap;

use tracing::{debug, error, warn};

use crate::messages::{AcceptPacket, PreparePacket, PrepareReplyPacket};
use crate::types::{Ballot, NodeId, PValue, Slot};

/// Lifecycle of an acceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptorLifecycle {
    /// Replaying logged messages after a restart; outbound traffic is
    /// suppressed by the instance layer.
    Recovery,
    /// Normal operation.
    Active,
    /// The epoch-final stop has executed; only decisions and checkpoint
    /// state may still be served.
    Stopped,
}

/// Passive per-group acceptor state.
#[derive(Debug)]
pub struct PaxosAcceptor {
    ballot: Ballot,
    next_slot: Slot,
    gc_slot: Slot,
    lifecycle: AcceptorLifecycle,
    accepted: HashMap<Slot, PValue>,
    decided: HashMap<Slot, PValue>,
}

impl PaxosAcceptor {
    /// Create an acceptor in recovery, seeded from a checkpoint (or the
    /// initial ballot and `Slot::FIRST` for a fresh group).
    pub fn new(ballot: Ballot, next_slot: Slot, gc_slot: Slot) -> Self {
        Self {
            ballot,
            next_slot,
            gc_slot,
            lifecycle: AcceptorLifecycle::Recovery,
            accepted: HashMap::new(),
            decided: HashMap::new(),
        }
    }

    /// Reconstruct an acceptor from a hot-restore snapshot; no log replay
    /// is needed, so it starts active.
    pub fn restore(ballot: Ballot, next_slot: Slot, gc_slot: Slot) -> Self {
        let mut acceptor = Self::new(ballot, next_slot, gc_slot);
        acceptor.lifecycle = AcceptorLifecycle::Active;
        acceptor
    }

    /// The highest ballot promised or voted.
    pub fn ballot(&self) -> Ballot {
        self.ballot
    }

    /// The next slot to execute, also the first undecided slot from this
    /// acceptor's point of view.
    pub fn next_slot(&self) -> Slot {
        self.next_slot
    }

    /// The garbage-collection watermark.
    pub fn gc_slot(&self) -> Slot {
        self.gc_slot
    }

    /// Whether the epoch-final stop has executed.
    pub fn is_stopped(&self) -> bool {
        self.lifecycle == AcceptorLifecycle::Stopped
    }

    /// Whether recovery replay has finished.
    pub fn is_active(&self) -> bool {
        self.lifecycle == AcceptorLifecycle::Active
    }

    /// Mark recovery replay finished.
    pub fn set_active(&mut self) {
        if self.lifecycle == AcceptorLifecycle::Recovery {
            self.lifecycle = AcceptorLifecycle::Active;
        }
    }

    /// Mark the epoch ended without executing the stop locally, when an
    /// installed epoch-final checkpoint already covers it.
    pub fn mark_stopped(&mut self) {
        self.lifecycle = AcceptorLifecycle::Stopped;
        self.decided.clear();
        self.accepted.clear();
    }

    /// Handle a phase-1a prepare.
    ///
    /// Adopts a strictly greater ballot. The reply always carries the
    /// current (possibly just-adopted) ballot; when the prepare lost, the
    /// reply is a nack with no accepted values, which tells the stale
    /// coordinator who preempted it. Returns the reply and whether the
    /// ballot was adopted (an adoption must be logged before the reply is
    /// sent).
    pub fn handle_prepare(
        &mut self,
        prepare: &PreparePacket,
        me: NodeId,
    ) -> Option<(PrepareReplyPacket, bool)> {
        if self.is_stopped() {
            return None;
        }

        let adopted = prepare.ballot > self.ballot;
        if adopted {
            debug!(
                ballot = %prepare.ballot,
                previous = %self.ballot,
                "adopting ballot from prepare"
            );
            self.ballot = prepare.ballot;
        }

        let accepted = if self.ballot == prepare.ballot {
            self.accepted
                .values()
                .filter(|pv| pv.slot.since(prepare.first_undecided_slot) >= 0)
                .cloned()
                .collect()
        } else {
            warn!(
                ballot = %prepare.ballot,
                current = %self.ballot,
                "nacking prepare with stale ballot"
            );
            Vec::new()
        };

        Some((
            PrepareReplyPacket {
                acceptor: me,
                ballot: self.ballot,
                accepted,
                gc_slot: self.gc_slot,
            },
            adopted,
        ))
    }

    /// Handle a phase-2a accept: vote if the ballot is current, then apply
    /// the piggybacked garbage-collection watermark.
    ///
    /// Returns the current ballot for the accept reply; the reply at a
    /// higher ballot is how a preempted coordinator finds out. `None` when
    /// stopped.
    pub fn accept_and_update_ballot(&mut self, accept: &AcceptPacket) -> Option<Ballot> {
        if self.is_stopped() {
            return None;
        }

        let pvalue = &accept.pvalue;
        self.check_non_conflicting(self.accepted.get(&pvalue.slot), pvalue, "accept");

        if pvalue.ballot >= self.ballot {
            self.ballot = pvalue.ballot;
            // Slots at or below the GC watermark are already majority
            // checkpointed; a vote there can never matter again.
            if pvalue.slot.since(self.gc_slot) > 0 {
                self.accepted.insert(pvalue.slot, pvalue.clone());
            }
        } else {
            debug!(
                ballot = %pvalue.ballot,
                current = %self.ballot,
                slot = %pvalue.slot,
                "not voting on accept below current ballot"
            );
        }

        self.garbage_collect_accepted(accept.median_checkpointed_slot);
        Some(self.ballot)
    }

    /// Record a decision (if any) and return the decision at `next_slot`
    /// when it is present and executable.
    ///
    /// A meta decision (payload unknown) is reconstructed from a
    /// matching-ballot accept; if no such accept exists the decision stays
    /// pending until sync fills the gap. The caller must follow each
    /// returned decision with exactly one [`executed`](Self::executed).
    pub fn put_and_remove_next_executable(&mut self, decision: Option<PValue>) -> Option<PValue> {
        if self.is_stopped() {
            return None;
        }

        if let Some(decision) = decision {
            self.record_decision(decision);
        }

        let pending = self.decided.get(&self.next_slot)?;
        if pending.request.has_value() {
            Some(pending.clone())
        } else {
            self.reconstruct_decision(self.next_slot)
        }
    }

    /// Advance past an executed slot. Executing a stop moves the acceptor
    /// to `Stopped` and drops all pending decisions.
    pub fn executed(&mut self, slot: Slot, is_stop: bool) {
        debug_assert_eq!(slot, self.next_slot, "execution must be in slot order");
        self.decided.remove(&slot);
        self.next_slot = self.next_slot.next();
        if is_stop {
            debug!(slot = %slot, "executed epoch-final stop");
            self.lifecycle = AcceptorLifecycle::Stopped;
            self.decided.clear();
        }
    }

    /// Committed slots this acceptor is missing, bounded by `limit`, for a
    /// sync request.
    ///
    /// A slot counts as missing unless it holds an executable decision: a
    /// valued one, or a meta one whose payload a matching-ballot accept can
    /// reconstruct. An accept alone does not help; its ballot may have lost.
    pub fn get_missing_committed_slots(&self, limit: i32) -> Vec<Slot> {
        let Some(max_decided) = self.max_decided_slot() else {
            return Vec::new();
        };

        let capped = self.next_slot.offset(limit);
        let end = if max_decided.since(capped) > 0 {
            capped
        } else {
            max_decided
        };

        let mut missing = Vec::new();
        let mut cur = self.next_slot;
        while cur.since(end) < 0 {
            let executable = match self.decided.get(&cur) {
                Some(pv) if pv.request.has_value() => true,
                Some(pv) => self
                    .accepted
                    .get(&cur)
                    .map_or(false, |a| a.ballot == pv.ballot && a.request.has_value()),
                None => false,
            };
            if !executable {
                missing.push(cur);
            }
            cur = cur.next();
        }
        missing
    }

    /// The highest decided slot, if any decision is pending.
    pub fn max_decided_slot(&self) -> Option<Slot> {
        self.decided
            .keys()
            .copied()
            .max_by_key(|s| s.since(self.next_slot))
    }

    /// The highest accepted slot, if any vote is retained.
    pub fn max_accepted_slot(&self) -> Option<Slot> {
        self.accepted
            .keys()
            .copied()
            .max_by_key(|s| s.since(self.next_slot))
    }

    /// A pending decision at `slot`, valued or meta.
    pub fn get_decision(&self, slot: Slot) -> Option<&PValue> {
        self.decided.get(&slot)
    }

    /// Advance the garbage-collection watermark, dropping covered votes.
    ///
    /// The watermark is clamped below `next_slot` (an unexecuted slot may
    /// still need its accept for reconstruction) and never regresses.
    pub fn garbage_collect_accepted(&mut self, slot: Slot) {
        let mut gc = slot;
        let ceiling = self.next_slot.prev();
        if gc.since(ceiling) > 0 {
            gc = ceiling;
        }
        if gc.since(self.gc_slot) > 0 {
            self.gc_slot = gc;
            self.accepted.retain(|s, _| s.since(gc) > 0);
        }
    }

    /// Jump forward to `target` after installing a checkpoint, discarding
    /// everything the checkpoint covers.
    pub fn jump_slot(&mut self, target: Slot) {
        while self.next_slot.since(target) < 0 {
            self.decided.remove(&self.next_slot);
            self.accepted.remove(&self.next_slot);
            self.next_slot = self.next_slot.next();
        }
        self.garbage_collect_accepted(target.prev());
    }

    /// Whether every known decision has executed.
    pub fn caught_up(&self) -> bool {
        self.is_stopped() || self.decided.is_empty()
    }

    fn record_decision(&mut self, decision: PValue) {
        if decision.slot.since(self.next_slot) < 0 {
            return; // already executed
        }
        if let Some(existing) = self.decided.get(&decision.slot) {
            self.check_non_conflicting(Some(existing), &decision, "decision");
            // Never downgrade a valued decision to a meta one.
            if existing.request.has_value() && !decision.request.has_value() {
                return;
            }
        }
        self.decided.insert(decision.slot, decision);
    }

    /// Rebuild a meta decision's payload from a matching-ballot accept.
    fn reconstruct_decision(&self, slot: Slot) -> Option<PValue> {
        let meta = self.decided.get(&slot)?;
        let accept = self.accepted.get(&slot)?;
        if accept.ballot == meta.ballot && accept.request.has_value() {
            Some(accept.clone())
        } else {
            None
        }
    }

    /// Two pvalues at the same ballot and slot must carry the same request.
    /// Anything else means a coordinator equivocated; debug builds fail
    /// fast, release builds log and keep the first value.
    fn check_non_conflicting(&self, existing: Option<&PValue>, incoming: &PValue, what: &str) {
        if let Some(existing) = existing {
            if existing.ballot == incoming.ballot && existing.request.id != incoming.request.id {
                error!(
                    ballot = %incoming.ballot,
                    slot = %incoming.slot,
                    existing_id = existing.request.id,
                    incoming_id = incoming.request.id,
                    "conflicting {} at same ballot and slot",
                    what
                );
                debug_assert!(false, "conflicting {what} at same ballot and slot");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{AcceptPacket, PreparePacket};
    use crate::types::Request;

    fn make_acceptor() -> PaxosAcceptor {
        let mut acceptor = PaxosAcceptor::new(
            Ballot::new(0, NodeId::new(0)),
            Slot::FIRST,
            Slot::GC_NONE,
        );
        acceptor.set_active();
        acceptor
    }

    fn make_accept(ballot: Ballot, slot: i32, id: u64) -> AcceptPacket {
        AcceptPacket {
            pvalue: PValue::new(
                ballot,
                Slot::new(slot),
                Request::new(id, format!("cmd-{}", id), NodeId::new(0)),
            ),
            median_checkpointed_slot: Slot::GC_NONE,
        }
    }

    fn make_decision(ballot: Ballot, slot: i32, id: u64) -> PValue {
        PValue::new(
            ballot,
            Slot::new(slot),
            Request::new(id, format!("cmd-{}", id), NodeId::new(0)),
        )
    }

    // =========================================================================
    // Prepare tests
    // =========================================================================

    #[test]
    fn test_prepare_adopts_higher_ballot() {
        let mut acceptor = make_acceptor();

        let (reply, adopted) = acceptor
            .handle_prepare(
                &PreparePacket {
                    ballot: Ballot::new(1, NodeId::new(1)),
                    first_undecided_slot: Slot::FIRST,
                },
                NodeId::new(2),
            )
            .expect("should reply");

        assert!(adopted);
        assert_eq!(reply.ballot, Ballot::new(1, NodeId::new(1)));
        assert_eq!(acceptor.ballot(), Ballot::new(1, NodeId::new(1)));
        assert_eq!(reply.acceptor, NodeId::new(2));
    }

    #[test]
    fn test_prepare_nack_keeps_accepted_private() {
        let mut acceptor = make_acceptor();
        let b5 = Ballot::new(5, NodeId::new(1));

        acceptor
            .accept_and_update_ballot(&make_accept(b5, 0, 1))
            .expect("vote");

        // A stale prepare gets a nack with our ballot and no values.
        let (reply, adopted) = acceptor
            .handle_prepare(
                &PreparePacket {
                    ballot: Ballot::new(3, NodeId::new(2)),
                    first_undecided_slot: Slot::FIRST,
                },
                NodeId::new(0),
            )
            .expect("should reply");

        assert!(!adopted);
        assert_eq!(reply.ballot, b5, "nack names the winning ballot");
        assert!(reply.accepted.is_empty());
    }

    #[test]
    fn test_prepare_reply_prunes_below_first_undecided() {
        let mut acceptor = make_acceptor();
        let b1 = Ballot::new(1, NodeId::new(0));

        for slot in 0..5 {
            acceptor
                .accept_and_update_ballot(&make_accept(b1, slot, slot as u64))
                .expect("vote");
        }

        let (reply, _) = acceptor
            .handle_prepare(
                &PreparePacket {
                    ballot: Ballot::new(2, NodeId::new(1)),
                    first_undecided_slot: Slot::new(3),
                },
                NodeId::new(0),
            )
            .expect("should reply");

        let mut slots: Vec<i32> = reply.accepted.iter().map(|pv| pv.slot.0).collect();
        slots.sort();
        assert_eq!(slots, vec![3, 4]);
    }

    #[test]
    fn test_stopped_acceptor_ignores_prepare() {
        let mut acceptor = make_acceptor();
        let b1 = Ballot::new(1, NodeId::new(0));

        acceptor.put_and_remove_next_executable(Some(PValue::new(
            b1,
            Slot::FIRST,
            Request::stop(1, "bye", NodeId::new(0)),
        )));
        acceptor.executed(Slot::FIRST, true);
        assert!(acceptor.is_stopped());

        let reply = acceptor.handle_prepare(
            &PreparePacket {
                ballot: Ballot::new(9, NodeId::new(1)),
                first_undecided_slot: Slot::FIRST,
            },
            NodeId::new(0),
        );
        assert!(reply.is_none());
    }

    // =========================================================================
    // Accept tests
    // =========================================================================

    #[test]
    fn test_accept_adopts_equal_or_higher_ballot() {
        let mut acceptor = make_acceptor();
        let b1 = Ballot::new(1, NodeId::new(1));

        let ballot = acceptor
            .accept_and_update_ballot(&make_accept(b1, 0, 1))
            .expect("reply");
        assert_eq!(ballot, b1);
        assert_eq!(acceptor.max_accepted_slot(), Some(Slot::FIRST));
    }

    #[test]
    fn test_accept_below_ballot_not_recorded() {
        let mut acceptor = make_acceptor();
        let b5 = Ballot::new(5, NodeId::new(1));
        let b3 = Ballot::new(3, NodeId::new(2));

        acceptor
            .accept_and_update_ballot(&make_accept(b5, 0, 1))
            .expect("vote");

        // Reply still comes back, carrying the higher ballot.
        let ballot = acceptor
            .accept_and_update_ballot(&make_accept(b3, 1, 2))
            .expect("reply");
        assert_eq!(ballot, b5);
        assert!(acceptor.max_accepted_slot() == Some(Slot::FIRST), "no vote at slot 1");
    }

    #[test]
    fn test_accept_piggyback_garbage_collects() {
        let mut acceptor = make_acceptor();
        let b1 = Ballot::new(1, NodeId::new(0));

        for slot in 0..4 {
            let decision = make_decision(b1, slot, slot as u64);
            acceptor
                .accept_and_update_ballot(&make_accept(b1, slot, slot as u64))
                .expect("vote");
            acceptor.put_and_remove_next_executable(Some(decision));
            acceptor.executed(Slot::new(slot), false);
        }
        assert_eq!(acceptor.next_slot(), Slot::new(4));

        let mut accept = make_accept(b1, 4, 4);
        accept.median_checkpointed_slot = Slot::new(2);
        acceptor.accept_and_update_ballot(&accept).expect("vote");

        assert_eq!(acceptor.gc_slot(), Slot::new(2));
        let mut slots: Vec<i32> = (0..5)
            .filter(|s| acceptor.accepted.contains_key(&Slot::new(*s)))
            .collect();
        slots.sort();
        assert_eq!(slots, vec![3, 4], "votes at or below gc slot dropped");
    }

    #[test]
    fn test_gc_never_reaches_next_slot() {
        let mut acceptor = make_acceptor();
        let b1 = Ballot::new(1, NodeId::new(0));

        acceptor
            .accept_and_update_ballot(&make_accept(b1, 0, 1))
            .expect("vote");
        // Watermark far ahead of execution gets clamped to next_slot - 1.
        acceptor.garbage_collect_accepted(Slot::new(50));
        assert_eq!(acceptor.gc_slot(), acceptor.next_slot().prev());
    }

    #[test]
    fn test_gc_never_regresses() {
        let mut acceptor = make_acceptor();
        acceptor.jump_slot(Slot::new(10));
        assert_eq!(acceptor.gc_slot(), Slot::new(9));

        acceptor.garbage_collect_accepted(Slot::new(5));
        assert_eq!(acceptor.gc_slot(), Slot::new(9));
    }

    // =========================================================================
    // Decision / execution tests
    // =========================================================================

    #[test]
    fn test_out_of_order_decisions_execute_in_order() {
        let mut acceptor = make_acceptor();
        acceptor.jump_slot(Slot::new(8));
        let b1 = Ballot::new(1, NodeId::new(0));

        // Decisions arrive 10, 8, 9; execution must go 8, 9, 10.
        assert!(acceptor
            .put_and_remove_next_executable(Some(make_decision(b1, 10, 10)))
            .is_none());

        let d8 = acceptor
            .put_and_remove_next_executable(Some(make_decision(b1, 8, 8)))
            .expect("slot 8 executable");
        assert_eq!(d8.slot, Slot::new(8));
        acceptor.executed(Slot::new(8), false);

        let d9 = acceptor
            .put_and_remove_next_executable(Some(make_decision(b1, 9, 9)))
            .expect("slot 9 executable");
        assert_eq!(d9.slot, Slot::new(9));
        acceptor.executed(Slot::new(9), false);

        let d10 = acceptor
            .put_and_remove_next_executable(None)
            .expect("slot 10 now executable");
        assert_eq!(d10.slot, Slot::new(10));
        acceptor.executed(Slot::new(10), false);

        assert_eq!(acceptor.next_slot(), Slot::new(11));
        assert!(acceptor.caught_up());
    }

    #[test]
    fn test_meta_decision_reconstructed_from_accept() {
        let mut acceptor = make_acceptor();
        let b1 = Ballot::new(1, NodeId::new(0));

        acceptor
            .accept_and_update_ballot(&make_accept(b1, 0, 7))
            .expect("vote");

        let meta = PValue::new(b1, Slot::FIRST, Request::new(7, "x", NodeId::new(0)).to_meta());
        let full = acceptor
            .put_and_remove_next_executable(Some(meta))
            .expect("reconstructed");
        assert_eq!(full.request.value.as_deref(), Some("cmd-7"));
    }

    #[test]
    fn test_meta_decision_without_accept_stays_pending() {
        let mut acceptor = make_acceptor();
        let b1 = Ballot::new(1, NodeId::new(0));

        let meta = PValue::new(b1, Slot::FIRST, Request::new(7, "x", NodeId::new(0)).to_meta());
        assert!(acceptor.put_and_remove_next_executable(Some(meta)).is_none());
        assert_eq!(acceptor.max_decided_slot(), Some(Slot::FIRST));
    }

    #[test]
    fn test_meta_decision_never_downgrades_valued_one() {
        let mut acceptor = make_acceptor();
        let b1 = Ballot::new(1, NodeId::new(0));

        acceptor.record_decision(make_decision(b1, 2, 5));
        let meta = PValue::new(
            b1,
            Slot::new(2),
            Request::new(5, "x", NodeId::new(0)).to_meta(),
        );
        acceptor.record_decision(meta);

        let stored = acceptor.get_decision(Slot::new(2)).expect("stored");
        assert!(stored.request.has_value());
    }

    #[test]
    fn test_decision_below_next_slot_ignored() {
        let mut acceptor = make_acceptor();
        acceptor.jump_slot(Slot::new(5));
        let b1 = Ballot::new(1, NodeId::new(0));

        acceptor.record_decision(make_decision(b1, 3, 3));
        assert!(acceptor.get_decision(Slot::new(3)).is_none());
    }

    #[test]
    fn test_missing_committed_slots() {
        let mut acceptor = make_acceptor();
        let b1 = Ballot::new(1, NodeId::new(0));

        acceptor.record_decision(make_decision(b1, 5, 5));
        acceptor
            .accept_and_update_ballot(&make_accept(b1, 2, 2))
            .expect("vote");
        let meta = PValue::new(
            b1,
            Slot::new(2),
            Request::new(2, "x", NodeId::new(0)).to_meta(),
        );
        acceptor.record_decision(meta);

        // Slot 2 is reconstructible (meta decision plus matching accept);
        // slot 5 is the valued max decided; the rest are missing.
        let missing: Vec<i32> = acceptor
            .get_missing_committed_slots(100)
            .iter()
            .map(|s| s.0)
            .collect();
        assert_eq!(missing, vec![0, 1, 3, 4]);

        // The limit caps the scan.
        let missing: Vec<i32> = acceptor
            .get_missing_committed_slots(2)
            .iter()
            .map(|s| s.0)
            .collect();
        assert_eq!(missing, vec![0, 1]);
    }

    #[test]
    fn test_lone_accept_still_counts_as_missing() {
        let mut acceptor = make_acceptor();
        let b1 = Ballot::new(1, NodeId::new(0));

        acceptor.record_decision(make_decision(b1, 2, 2));
        // A vote at slot 1 without any decision there: the vote's ballot may
        // have lost, so the decision must still be fetched.
        acceptor
            .accept_and_update_ballot(&make_accept(b1, 1, 1))
            .expect("vote");

        let missing: Vec<i32> = acceptor
            .get_missing_committed_slots(100)
            .iter()
            .map(|s| s.0)
            .collect();
        assert_eq!(missing, vec![0, 1]);
    }

    #[test]
    fn test_stop_clears_pending_decisions() {
        let mut acceptor = make_acceptor();
        let b1 = Ballot::new(1, NodeId::new(0));

        acceptor.record_decision(make_decision(b1, 3, 3));
        let stop = PValue::new(b1, Slot::FIRST, Request::stop(9, "end", NodeId::new(0)));
        acceptor.put_and_remove_next_executable(Some(stop)).expect("stop");
        acceptor.executed(Slot::FIRST, true);

        assert!(acceptor.is_stopped());
        assert!(acceptor.max_decided_slot().is_none());
        assert!(acceptor.put_and_remove_next_executable(None).is_none());
    }

    #[test]
    fn test_jump_slot_discards_overtaken_state() {
        let mut acceptor = make_acceptor();
        let b1 = Ballot::new(1, NodeId::new(0));

        acceptor
            .accept_and_update_ballot(&make_accept(b1, 3, 3))
            .expect("vote");
        acceptor.record_decision(make_decision(b1, 3, 3));

        acceptor.jump_slot(Slot::new(101));
        assert_eq!(acceptor.next_slot(), Slot::new(101));
        assert!(acceptor.max_accepted_slot().is_none());
        assert!(acceptor.max_decided_slot().is_none());
        assert_eq!(acceptor.gc_slot(), Slot::new(100));
    }
}
