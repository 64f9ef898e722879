//! Coordinator state for one replica group.
//!
//! A coordinator owns exactly one ballot for its entire lifetime. It starts
//! inactive, runs phase 1 (one prepare covering every undecided slot), and on
//! a prepare majority performs the view change: merge the highest-ballot
//! accepted value per slot (pmax), fill holes with no-ops, normalize stops,
//! and re-propose everything at its own ballot. Activation happens exactly
//! once; an active coordinator never goes back to preparing. Preemption by a
//! higher ballot makes the instance layer drop the coordinator entirely and
//! forward its unfinished proposals to the winner.
//!
//! Like the acceptor, the coordinator is side-effect free: handlers return
//! outcome enums and packets for the instance layer to log and send.
//!
//! ## Node slot tracking
//!
//! `node_slots` keeps one wraparound-aware slot number per member. Before
//! activation it holds each member's first retained slot (from prepare
//! replies); after activation, each member's last checkpointed slot (from
//! accept replies). The median-minus of the array — the value at sorted
//! index `len/2 - 1` for even lengths, `len/2` for odd — is a slot some
//! majority has passed, which is piggybacked on accepts so acceptors can
//! garbage-collect.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::config::PaxosConfig;
use crate::messages::{AcceptPacket, AcceptReplyPacket, PreparePacket, PrepareReplyPacket};
use crate::types::{Ballot, NodeId, PValue, Request, Slot, NO_OP};

/// Majority tracker for one prepare or one accept.
#[derive(Debug)]
pub struct WaitFor {
    members: Vec<NodeId>,
    heard: HashSet<NodeId>,
    init_time: Instant,
    retransmissions: u32,
}

impl WaitFor {
    /// Start waiting on the given members.
    pub fn new(members: &[NodeId]) -> Self {
        Self {
            members: members.to_vec(),
            heard: HashSet::new(),
            init_time: Instant::now(),
            retransmissions: 0,
        }
    }

    /// Count a response. Returns false for non-members and duplicates.
    pub fn heard_from(&mut self, node: NodeId) -> bool {
        if !self.members.contains(&node) {
            return false;
        }
        self.heard.insert(node)
    }

    /// Whether the node already responded.
    pub fn already_heard_from(&self, node: NodeId) -> bool {
        self.heard.contains(&node)
    }

    /// Whether a strict majority has responded.
    pub fn has_majority(&self) -> bool {
        self.heard.len() * 2 > self.members.len()
    }

    /// Time since this waitfor was created.
    pub fn total_wait(&self) -> Duration {
        self.init_time.elapsed()
    }

    /// Whether the current (exponentially backed off) retransmission
    /// timeout has elapsed; bumps the retransmission count when it has.
    pub fn waited_too_long(&mut self, base: Duration, backoff: f64) -> bool {
        let threshold = base.as_secs_f64() * backoff.powi(self.retransmissions as i32);
        if self.total_wait().as_secs_f64() > threshold {
            self.retransmissions += 1;
            true
        } else {
            false
        }
    }

    /// Shift the creation time into the past, to exercise timeout paths in
    /// tests without sleeping.
    #[cfg(test)]
    pub fn backdate(&mut self, by: Duration) {
        self.init_time -= by;
    }
}

/// A proposal in flight at the coordinator: the pvalue plus its accept
/// majority tracker.
#[derive(Debug)]
struct ProposalState {
    pvalue: PValue,
    waitfor: WaitFor,
}

impl ProposalState {
    fn new(members: &[NodeId], pvalue: PValue) -> Self {
        Self {
            pvalue,
            waitfor: WaitFor::new(members),
        }
    }
}

/// Result of proposing a request.
#[derive(Debug)]
pub enum ProposeOutcome {
    /// Active coordinator: send this accept.
    Accept(AcceptPacket),
    /// Inactive coordinator: queued as a pre-active proposal at this slot.
    Queued(Slot),
    /// The previous proposal was a stop; nothing may follow it.
    RefusedAfterStop,
}

/// Result of processing a prepare reply.
#[derive(Debug)]
pub enum PrepareOutcome {
    /// Stale, duplicate, or irrelevant reply.
    Ignored,
    /// Counted; the majority is not in yet.
    Waiting,
    /// Prepare majority reached; the view change ran and these accepts
    /// carry every re-proposed slot. The coordinator is now active.
    Activated(Vec<AcceptPacket>),
    /// A higher ballot preempted the prepare. The coordinator should be
    /// dropped and these unfinished proposals forwarded to the winner.
    Preempted(Vec<PValue>),
}

/// Result of processing an accept reply.
#[derive(Debug)]
pub enum AcceptOutcome {
    /// Stale, duplicate, or irrelevant reply.
    Ignored,
    /// Counted; the majority is not in yet.
    Waiting,
    /// Accept majority reached: this decision can be committed.
    Committed {
        /// The decided pvalue.
        decision: PValue,
    },
    /// A higher ballot took over this slot.
    Preempted {
        /// The displaced proposal, if one was still in flight at the slot.
        pvalue: Option<PValue>,
        /// True when no proposals remain and the coordinator should resign.
        fully: bool,
    },
}

/// Coordinator for one ballot of one replica group.
#[derive(Debug)]
pub struct PaxosCoordinator {
    ballot: Ballot,
    members: Vec<NodeId>,
    active: bool,
    waitfor_prepare: Option<WaitFor>,
    carryover: HashMap<Slot, PValue>,
    my_proposals: HashMap<Slot, ProposalState>,
    next_proposal_slot: Slot,
    node_slots: Vec<i32>,
}

impl PaxosCoordinator {
    /// Create an inactive coordinator at `ballot`.
    ///
    /// `first_undecided` seeds the proposal slot counter; `pre_actives` are
    /// unfinished proposals inherited from a previous local coordinator
    /// incarnation, re-queued here so they are not lost across the ballot
    /// change.
    pub fn new(
        ballot: Ballot,
        members: Vec<NodeId>,
        first_undecided: Slot,
        pre_actives: Vec<PValue>,
    ) -> Self {
        let node_slots = vec![Slot::GC_NONE.0; members.len()];
        let mut coordinator = Self {
            ballot,
            members,
            active: false,
            waitfor_prepare: None,
            carryover: HashMap::new(),
            my_proposals: HashMap::new(),
            next_proposal_slot: first_undecided,
            node_slots,
        };
        for pvalue in pre_actives {
            coordinator.propose(pvalue.request);
        }
        coordinator
    }

    /// Reconstruct an active coordinator from a hot-restore snapshot.
    pub fn restore(
        ballot: Ballot,
        members: Vec<NodeId>,
        next_proposal_slot: Slot,
        node_slots: Vec<i32>,
    ) -> Self {
        Self {
            ballot,
            members,
            active: true,
            waitfor_prepare: None,
            carryover: HashMap::new(),
            my_proposals: HashMap::new(),
            next_proposal_slot,
            node_slots,
        }
    }

    /// This coordinator's ballot.
    pub fn ballot(&self) -> Ballot {
        self.ballot
    }

    /// Whether the view change has completed.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether this coordinator covers `ballot` (its own ballot is at least
    /// as high).
    pub fn exists_at(&self, ballot: Ballot) -> bool {
        self.ballot >= ballot
    }

    /// Whether no proposals are outstanding.
    pub fn caught_up(&self) -> bool {
        self.my_proposals.is_empty()
    }

    /// The slot the next proposal would take.
    pub fn next_proposal_slot(&self) -> Slot {
        self.next_proposal_slot
    }

    /// Skip phase 1 and become active immediately.
    ///
    /// Valid only for ballot zero (nothing can have been accepted below it)
    /// and for recovery of a coordinator that was already active.
    pub fn make_active(&mut self) {
        self.active = true;
        self.waitfor_prepare = None;
        self.carryover.clear();
    }

    /// Unfinished proposals, for forwarding to a preempting coordinator.
    pub fn pre_actives(&self) -> Vec<PValue> {
        let mut pvalues: Vec<PValue> = self
            .my_proposals
            .values()
            .map(|p| p.pvalue.clone())
            .collect();
        pvalues.sort_by_key(|pv| pv.slot.since(self.next_proposal_slot));
        pvalues
    }

    /// Start (or restart) phase 1. Returns `None` when already active.
    pub fn prepare(&mut self, first_undecided: Slot) -> Option<PreparePacket> {
        if self.active {
            return None;
        }
        if self.waitfor_prepare.is_none() {
            self.waitfor_prepare = Some(WaitFor::new(&self.members));
        }
        Some(PreparePacket {
            ballot: self.ballot,
            first_undecided_slot: first_undecided,
        })
    }

    /// Whether a prepare attempt is young enough that another coordinator
    /// run for this group would only add churn.
    pub fn ran_recently(&self, threshold: Duration) -> bool {
        self.waitfor_prepare
            .as_ref()
            .map_or(false, |w| w.total_wait() < threshold)
    }

    /// Re-emit the prepare if its backed-off timeout has elapsed.
    pub fn prepare_if_waiting_too_long(
        &mut self,
        first_undecided: Slot,
        config: &PaxosConfig,
    ) -> Option<PreparePacket> {
        if self.active {
            return None;
        }
        let waitfor = self.waitfor_prepare.as_mut()?;
        if waitfor.waited_too_long(config.prepare_timeout, config.retransmission_backoff) {
            debug!(ballot = %self.ballot, "retransmitting prepare");
            Some(PreparePacket {
                ballot: self.ballot,
                first_undecided_slot: first_undecided,
            })
        } else {
            None
        }
    }

    /// Re-emit the accept for `slot` if its backed-off timeout has elapsed.
    pub fn reissue_accept_if_waiting_too_long(
        &mut self,
        slot: Slot,
        config: &PaxosConfig,
    ) -> Option<AcceptPacket> {
        if !self.active {
            return None;
        }
        let median = self.majority_committed_slot();
        let pstate = self.my_proposals.get_mut(&slot)?;
        if pstate
            .waitfor
            .waited_too_long(config.accept_timeout, config.retransmission_backoff)
        {
            debug!(ballot = %self.ballot, slot = %slot, "reissuing accept");
            Some(AcceptPacket {
                pvalue: pstate.pvalue.clone(),
                median_checkpointed_slot: median,
            })
        } else {
            None
        }
    }

    /// Propose a request at the next free slot.
    pub fn propose(&mut self, request: Request) -> ProposeOutcome {
        let last = self.next_proposal_slot.prev();
        if self
            .my_proposals
            .get(&last)
            .map_or(false, |p| p.pvalue.request.stop)
        {
            // Nothing may follow a stop in this epoch.
            return ProposeOutcome::RefusedAfterStop;
        }

        let slot = self.next_proposal_slot;
        self.next_proposal_slot = self.next_proposal_slot.next();
        let pvalue = PValue::new(self.ballot, slot, request);
        debug_assert!(!self.my_proposals.contains_key(&slot));
        debug!(ballot = %self.ballot, slot = %slot, active = self.active, "inserted proposal");
        self.my_proposals
            .insert(slot, ProposalState::new(&self.members, pvalue.clone()));

        if self.active {
            ProposeOutcome::Accept(self.init_commander(pvalue))
        } else {
            ProposeOutcome::Queued(slot)
        }
    }

    /// Process a phase-1b reply.
    pub fn handle_prepare_reply(&mut self, reply: &PrepareReplyPacket) -> PrepareOutcome {
        if reply.ballot > self.ballot {
            if self.active {
                // Someone preempted a slot, not the prepare; accept replies
                // handle that case.
                return PrepareOutcome::Ignored;
            }
            warn!(
                ballot = %self.ballot,
                winner = %reply.ballot,
                "prepare preempted by higher ballot"
            );
            return PrepareOutcome::Preempted(self.pre_actives());
        }

        let can_ignore = match self.waitfor_prepare.as_ref() {
            None => true,
            Some(waitfor) => {
                reply.ballot < self.ballot
                    || !self.members.contains(&reply.acceptor)
                    || waitfor.already_heard_from(reply.acceptor)
            }
        };
        if can_ignore {
            debug!(acceptor = %reply.acceptor, "ignoring prepare reply");
            return PrepareOutcome::Ignored;
        }

        // The reporter's first retained slot bounds the view-change range.
        Self::record_node_slot(
            &self.members,
            &mut self.node_slots,
            reply.acceptor,
            reply.gc_slot.next().0,
        );

        // pmax: keep the highest-ballot accepted value per slot.
        for pvalue in &reply.accepted {
            match self.carryover.get(&pvalue.slot) {
                None => {
                    self.carryover.insert(pvalue.slot, pvalue.clone());
                }
                Some(existing) if pvalue.ballot > existing.ballot => {
                    debug!(slot = %pvalue.slot, "dropping overwritten carryover");
                    self.carryover.insert(pvalue.slot, pvalue.clone());
                }
                Some(existing) if pvalue.ballot == existing.ballot => {
                    if existing.request.id != pvalue.request.id {
                        error!(
                            ballot = %pvalue.ballot,
                            slot = %pvalue.slot,
                            "conflicting carryovers at same ballot and slot"
                        );
                        debug_assert!(false, "conflicting carryovers at same ballot and slot");
                    }
                }
                Some(_) => {}
            }
        }

        let majority = match self.waitfor_prepare.as_mut() {
            Some(waitfor) => {
                waitfor.heard_from(reply.acceptor);
                waitfor.has_majority()
            }
            None => false,
        };
        if !majority {
            return PrepareOutcome::Waiting;
        }

        self.combine_pvalues_onto_proposals();
        let accepts = self.spawn_commanders_for_proposals();
        info!(
            ballot = %self.ballot,
            proposals = accepts.len(),
            "coordinator activated after view change"
        );
        PrepareOutcome::Activated(accepts)
    }

    /// Process a phase-2b reply.
    pub fn handle_accept_reply(&mut self, reply: &AcceptReplyPacket) -> AcceptOutcome {
        if reply.ballot == self.ballot {
            Self::record_node_slot(
                &self.members,
                &mut self.node_slots,
                reply.acceptor,
                reply.max_checkpointed_slot.0,
            );
            let Some(pstate) = self.my_proposals.get_mut(&reply.slot) else {
                return AcceptOutcome::Ignored;
            };
            pstate.waitfor.heard_from(reply.acceptor);
            if !pstate.waitfor.has_majority() {
                return AcceptOutcome::Waiting;
            }
            let decision = pstate.pvalue.clone();
            self.my_proposals.remove(&reply.slot);
            debug!(ballot = %self.ballot, slot = %reply.slot, "proposal reached accept majority");
            AcceptOutcome::Committed { decision }
        } else if reply.ballot > self.ballot {
            let displaced = self.my_proposals.remove(&reply.slot).map(|p| p.pvalue);
            let fully = self.my_proposals.is_empty();
            warn!(
                ballot = %self.ballot,
                winner = %reply.ballot,
                slot = %reply.slot,
                fully,
                "accept preempted by higher ballot"
            );
            AcceptOutcome::Preempted {
                pvalue: displaced,
                fully,
            }
        } else {
            debug!(ballot = %reply.ballot, "ignoring accept reply below my ballot");
            AcceptOutcome::Ignored
        }
    }

    /// A slot some majority of members has checkpointed or retained:
    /// the median-minus of the per-member slot reports.
    pub fn majority_committed_slot(&self) -> Slot {
        Slot::new(Self::median_minus(&self.node_slots))
    }

    /// Scalars for a hot-restore snapshot; `None` until activated.
    pub fn pause_snapshot(&self) -> Option<(Ballot, Slot, Vec<i32>)> {
        if !self.active {
            return None;
        }
        Some((self.ballot, self.next_proposal_slot, self.node_slots.clone()))
    }

    // -------------------------------------------------------------------------
    // View change internals
    // -------------------------------------------------------------------------

    /// Merge carried-over pvalues with pre-active proposals: carryovers win,
    /// then pre-actives, then no-ops for holes. Displaced pre-actives are
    /// re-proposed above the carryover range, and stop ordering is
    /// normalized afterwards.
    fn combine_pvalues_onto_proposals(&mut self) {
        if self.carryover.is_empty() {
            // Nothing accepted anywhere; pre-actives keep their slots, and
            // the local propose path already guarantees nothing follows a
            // stop among them.
            return;
        }

        let max_carryover = self.max_carryover_slot();
        let start = Slot::new(Self::wrapping_max(&self.node_slots));
        let carryover = std::mem::take(&mut self.carryover);
        let mut pre_actives = std::mem::take(&mut self.my_proposals);

        let mut cur = start;
        while cur.since(max_carryover) <= 0 {
            if let Some(pvalue) = carryover.get(&cur) {
                // Kept at its original ballot until stop normalization has
                // run; accepts are re-balloted when commanders spawn.
                self.my_proposals
                    .insert(cur, ProposalState::new(&self.members, pvalue.clone()));
            } else if let Some(pre_active) = pre_actives.remove(&cur) {
                self.my_proposals.insert(cur, pre_active);
            } else {
                let noop = self.make_noop_pvalue(cur);
                self.my_proposals
                    .insert(cur, ProposalState::new(&self.members, noop));
            }
            cur = cur.next();
        }
        self.next_proposal_slot = max_carryover.next();

        // Pre-actives displaced by carryovers move above the carryover range.
        let mut displaced: Vec<PValue> = pre_actives.into_values().map(|p| p.pvalue).collect();
        displaced.sort_by_key(|pv| pv.slot.since(start));
        for pvalue in displaced {
            self.propose(pvalue.request);
        }

        self.process_stop();
    }

    /// Ensure no regular request follows a stop in the merged proposals.
    ///
    /// A regular request after a lower-ballot stop becomes a stop (the stop
    /// wins and the epoch still ends); a stop followed by a higher-ballot
    /// regular request becomes a no-op (the epoch demonstrably continued).
    /// Both at the same ballot means a coordinator equivocated.
    fn process_stop(&mut self) {
        let mut converted: Vec<PValue> = Vec::new();
        let mut stop_exists = false;

        for stop in self.my_proposals.values() {
            let stop = &stop.pvalue;
            if !stop.request.stop {
                continue;
            }
            stop_exists = true;
            for other in self.my_proposals.values() {
                let other = &other.pvalue;
                if other.request.stop
                    || other.request.is_no_op()
                    || stop.slot.since(other.slot) >= 0
                {
                    continue;
                }
                if stop.ballot > other.ballot {
                    debug!(slot = %other.slot, "converting request after stop into stop");
                    converted.push(PValue::new(
                        self.ballot,
                        other.slot,
                        stop.request.clone(),
                    ));
                } else if stop.ballot < other.ballot {
                    debug!(slot = %stop.slot, "converting overtaken stop into no-op");
                    converted.push(self.make_noop_pvalue(stop.slot));
                } else {
                    error!(
                        ballot = %stop.ballot,
                        stop_slot = %stop.slot,
                        request_slot = %other.slot,
                        "regular request follows a stop at the same ballot"
                    );
                    debug_assert!(false, "regular request follows a stop at the same ballot");
                }
            }
        }

        for pvalue in converted {
            self.my_proposals
                .insert(pvalue.slot, ProposalState::new(&self.members, pvalue));
        }

        // The epoch must still end on a stop.
        let last = self.next_proposal_slot.prev();
        let last_is_stop = self
            .my_proposals
            .get(&last)
            .map_or(false, |p| p.pvalue.request.stop);
        if stop_exists && !last_is_stop {
            let trailing = Request {
                id: Self::noop_id(self.ballot, self.next_proposal_slot),
                value: Some(NO_OP.to_string()),
                stop: true,
                entry_node: self.ballot.coordinator,
            };
            self.propose(trailing);
        }
    }

    /// Emit accepts for every merged proposal and flip to active, exactly
    /// once. Carryovers are re-proposed at this coordinator's ballot here:
    /// only their values survive the view change, not their ballots.
    fn spawn_commanders_for_proposals(&mut self) -> Vec<AcceptPacket> {
        if self.active {
            return Vec::new();
        }
        let ballot = self.ballot;
        let median = self.majority_committed_slot();
        let mut accepts: Vec<AcceptPacket> = self
            .my_proposals
            .values_mut()
            .map(|pstate| {
                pstate.pvalue = pstate.pvalue.rebind(ballot, pstate.pvalue.slot);
                AcceptPacket {
                    pvalue: pstate.pvalue.clone(),
                    median_checkpointed_slot: median,
                }
            })
            .collect();
        accepts.sort_by_key(|a| a.pvalue.slot.since(self.next_proposal_slot));
        self.make_active();
        accepts
    }

    fn init_commander(&self, pvalue: PValue) -> AcceptPacket {
        AcceptPacket {
            pvalue,
            median_checkpointed_slot: self.majority_committed_slot(),
        }
    }

    fn make_noop_pvalue(&self, slot: Slot) -> PValue {
        PValue::new(
            self.ballot,
            slot,
            Request::no_op(Self::noop_id(self.ballot, slot), self.ballot.coordinator),
        )
    }

    /// Deterministic id for generated no-ops, so every coordinator filling
    /// the same slot at the same ballot produces the same request.
    fn noop_id(ballot: Ballot, slot: Slot) -> u64 {
        ((ballot.number as u32 as u64) << 32) | (slot.0 as u32 as u64)
    }

    fn record_node_slot(members: &[NodeId], node_slots: &mut [i32], node: NodeId, value: i32) {
        for (i, member) in members.iter().enumerate() {
            if *member == node && node_slots[i].wrapping_sub(value) < 0 {
                node_slots[i] = value;
            }
        }
    }

    fn max_carryover_slot(&self) -> Slot {
        let mut max: Option<Slot> = None;
        for slot in self.carryover.keys() {
            match max {
                None => max = Some(*slot),
                Some(m) if slot.since(m) > 0 => max = Some(*slot),
                _ => {}
            }
        }
        max.unwrap_or(self.next_proposal_slot)
    }

    fn wrapping_max(values: &[i32]) -> i32 {
        let mut max = values[0];
        for v in &values[1..] {
            if v.wrapping_sub(max) > 0 {
                max = *v;
            }
        }
        max
    }

    fn median_minus(values: &[i32]) -> i32 {
        let mut copy = values.to_vec();
        copy.sort_unstable();
        let idx = if copy.len() % 2 == 0 {
            copy.len() / 2 - 1
        } else {
            copy.len() / 2
        };
        copy[idx]
    }
}
