//! One replica group on one member: the per-group state machine.
//!
//! A `PaxosInstance` owns the group's [`PaxosAcceptor`] and, when this member
//! is running for or holding the coordinator role, a [`PaxosCoordinator`].
//! It glues them to the rest of the system: packets come in through
//! [`handle_paxos_message`](PaxosInstance::handle_paxos_message), durable
//! writes and application execution go through the [`Env`] seams, and every
//! outbound message comes back to the caller as a [`MessagingTask`]. The
//! instance never touches the transport itself.
//!
//! ## Coordinator election
//!
//! There is no separate leader-election protocol. Every incoming live packet
//! first runs a cheap local check: if no coordinator covers the acceptor's
//! current ballot and nobody ran recently, this member runs for coordinator
//! when it owned the current ballot, or when the current coordinator looks
//! dead and this member is next in the round-robin order (or the coordinator
//! has been dead so long that anyone may run). Ties are broken by ballot
//! comparison at the acceptors, so spurious runs cost churn, never safety.
//!
//! ## Recovery
//!
//! A restarted member seeds the acceptor from its last checkpoint, replays
//! logged packets with the `recovery` flag set (producing no outbound
//! traffic), and only then goes active. A member too far behind for replay
//! catches up via sync: it asks a random peer for its missing committed
//! slots and receives either the decisions or, when those predate the
//! peer's checkpoint, the checkpoint state itself.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::acceptor::PaxosAcceptor;
use crate::app::Replicable;
use crate::config::PaxosConfig;
use crate::coordinator::{AcceptOutcome, PaxosCoordinator, PrepareOutcome, ProposeOutcome};
use crate::failure::FailureDetector;
use crate::messages::{
    AcceptPacket, AcceptReplyPacket, CheckpointPacket, MessagingTask, PacketBody, PaxosPacket,
    PreparePacket, PrepareReplyPacket, ProposalPacket, SyncDecisionsPacket,
};
use crate::storage::{CheckpointRecord, PaxosLogger};
use crate::types::{group_hash, Ballot, NodeId, PValue, PaxosError, Request, Slot};

/// Borrowed context an instance needs while handling a message: the durable
/// log, the application, the failure detector, and the config. The manager
/// owns the first three behind process-wide locks shared by every group;
/// handlers take each lock only for the single call that needs it, so a
/// group blocked in execution never holds a lock another group is waiting
/// on.
pub struct Env<'a> {
    /// Durable log for checkpoints and message logging.
    pub logger: &'a Mutex<Box<dyn PaxosLogger + Send>>,
    /// The replicated application.
    pub app: &'a Mutex<Box<dyn Replicable + Send>>,
    /// Liveness oracle for coordinator election.
    pub failure_detector: &'a Mutex<Box<dyn FailureDetector + Send>>,
    /// Protocol knobs.
    pub config: &'a PaxosConfig,
}

/// Take a lock, recovering the data if a previous holder panicked.
pub(crate) fn lock_or_recover<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Scalar state needed to resurrect a paused instance without log replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotRestoreInfo {
    /// The acceptor's ballot.
    pub ballot: Ballot,
    /// The acceptor's next slot to execute.
    pub next_slot: Slot,
    /// The acceptor's garbage-collection slot.
    pub gc_slot: Slot,
    /// The last locally checkpointed slot.
    pub last_checkpoint_slot: Slot,
    /// Coordinator scalars, when this member held an active coordinator.
    pub coordinator: Option<CoordinatorRestoreInfo>,
}

/// The active-coordinator part of a [`HotRestoreInfo`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorRestoreInfo {
    /// The coordinator's ballot.
    pub ballot: Ballot,
    /// The slot the next proposal would take.
    pub next_proposal_slot: Slot,
    /// Per-member slot reports for garbage-collection tracking.
    pub node_slots: Vec<i32>,
}

/// One replica group on this member.
pub struct PaxosInstance {
    group: String,
    version: i32,
    members: Vec<NodeId>,
    me: NodeId,
    acceptor: PaxosAcceptor,
    coordinator: Option<PaxosCoordinator>,
    last_checkpoint_slot: Slot,
    last_active: Instant,
    last_synced: Option<Instant>,
}

impl PaxosInstance {
    /// Create an instance, seeding from the group's checkpoint when one
    /// exists (otherwise from `initial_state`, when given).
    ///
    /// The instance starts in recovery: the caller must replay logged
    /// packets with the recovery flag set and then call
    /// [`finish_recovery`](Self::finish_recovery).
    pub fn new(
        group: impl Into<String>,
        version: i32,
        mut members: Vec<NodeId>,
        me: NodeId,
        initial_state: Option<&str>,
        env: &Env<'_>,
    ) -> Result<Self, PaxosError> {
        let group = group.into();
        members.sort_unstable();
        members.dedup();
        if members.is_empty() || !members.contains(&me) {
            return Err(PaxosError::InstanceCreation {
                group,
                reason: format!("{me} is not in the member list"),
            });
        }

        let checkpoint = lock_or_recover(env.logger).get_checkpoint(&group)?;
        let (acceptor, last_checkpoint_slot) = match &checkpoint {
            Some(cp) => {
                if cp.version != version {
                    return Err(PaxosError::InstanceCreation {
                        group,
                        reason: format!(
                            "checkpoint version {} does not match {}",
                            cp.version, version
                        ),
                    });
                }
                if cp.members != members {
                    return Err(PaxosError::InstanceCreation {
                        group,
                        reason: "checkpoint membership does not match".to_string(),
                    });
                }
                if !lock_or_recover(env.app).restore(&group, &cp.state) {
                    return Err(PaxosError::InstanceCreation {
                        group,
                        reason: "application refused checkpoint state".to_string(),
                    });
                }
                (
                    PaxosAcceptor::new(cp.ballot, cp.slot.next(), cp.gc_slot),
                    cp.slot,
                )
            }
            None => {
                if let Some(state) = initial_state {
                    if !lock_or_recover(env.app).restore(&group, state) {
                        return Err(PaxosError::InstanceCreation {
                            group,
                            reason: "application refused initial state".to_string(),
                        });
                    }
                }
                let ballot = Ballot::new(0, round_robin_coordinator(&group, &members, 0));
                (PaxosAcceptor::new(ballot, Slot::FIRST, Slot::GC_NONE), Slot::GC_NONE)
            }
        };

        Ok(Self {
            group,
            version,
            members,
            me,
            acceptor,
            coordinator: None,
            last_checkpoint_slot,
            last_active: Instant::now(),
            last_synced: None,
        })
    }

    /// Resurrect a paused instance from its hot-restore scalars. No log
    /// replay is needed; the instance starts active.
    pub fn hot_restore(
        group: impl Into<String>,
        version: i32,
        mut members: Vec<NodeId>,
        me: NodeId,
        info: HotRestoreInfo,
    ) -> Self {
        let group = group.into();
        members.sort_unstable();
        members.dedup();
        let coordinator = info.coordinator.map(|c| {
            PaxosCoordinator::restore(c.ballot, members.clone(), c.next_proposal_slot, c.node_slots)
        });
        Self {
            group,
            version,
            members,
            me,
            acceptor: PaxosAcceptor::restore(info.ballot, info.next_slot, info.gc_slot),
            coordinator,
            last_checkpoint_slot: info.last_checkpoint_slot,
            last_active: Instant::now(),
            last_synced: None,
        }
    }

    /// The group this instance replicates.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// The group's epoch version.
    pub fn version(&self) -> i32 {
        self.version
    }

    /// The group's membership.
    pub fn members(&self) -> &[NodeId] {
        &self.members
    }

    /// The acceptor's current ballot.
    pub fn current_ballot(&self) -> Ballot {
        self.acceptor.ballot()
    }

    /// The next slot to execute.
    pub fn next_slot(&self) -> Slot {
        self.acceptor.next_slot()
    }

    /// Whether the epoch-final stop has executed.
    pub fn is_stopped(&self) -> bool {
        self.acceptor.is_stopped()
    }

    /// Whether no live packet has arrived for at least `period`.
    pub fn is_long_idle(&self, period: Duration) -> bool {
        self.last_active.elapsed() > period
    }

    /// Mark recovery replay finished; the instance starts handling live
    /// packets.
    ///
    /// The ballot-zero coordinator of a genuinely fresh group (no replayed
    /// votes or decisions) activates here without phase 1: nothing can have
    /// been accepted below ballot zero. Any replayed state forces the normal
    /// election path instead, so a resurrected coordinator never reuses
    /// slots from its previous incarnation.
    pub fn finish_recovery(&mut self) {
        self.acceptor.set_active();
        let ballot = self.acceptor.ballot();
        if self.coordinator.is_none()
            && ballot == Ballot::new(0, self.me)
            && self.acceptor.next_slot() == Slot::FIRST
            && self.acceptor.max_accepted_slot().is_none()
            && self.acceptor.max_decided_slot().is_none()
        {
            let mut coordinator =
                PaxosCoordinator::new(ballot, self.members.clone(), Slot::FIRST, Vec::new());
            coordinator.make_active();
            info!(group = %self.group, me = %self.me, "seeded as initial coordinator");
            self.coordinator = Some(coordinator);
        }
    }

    /// Scalars for pausing this instance, or `None` while any work is
    /// outstanding (undecided proposals, unexecuted decisions, a view
    /// change in flight).
    pub fn pause_snapshot(&self) -> Option<HotRestoreInfo> {
        if !self.acceptor.is_active() || !self.acceptor.caught_up() {
            return None;
        }
        let coordinator = match &self.coordinator {
            None => None,
            Some(c) => {
                if !c.caught_up() {
                    return None;
                }
                let (ballot, next_proposal_slot, node_slots) = c.pause_snapshot()?;
                Some(CoordinatorRestoreInfo {
                    ballot,
                    next_proposal_slot,
                    node_slots,
                })
            }
        };
        Some(HotRestoreInfo {
            ballot: self.acceptor.ballot(),
            next_slot: self.acceptor.next_slot(),
            gc_slot: self.acceptor.gc_slot(),
            last_checkpoint_slot: self.last_checkpoint_slot,
            coordinator,
        })
    }

    /// Handle one packet and return the outbound work it generates.
    ///
    /// Recovery-flagged packets mutate state but return no tasks. A stopped
    /// instance drops everything; the manager removes it and answers
    /// stragglers' sync requests from the archived epoch-final checkpoint.
    pub fn handle_paxos_message(
        &mut self,
        packet: &PaxosPacket,
        env: &Env<'_>,
    ) -> Vec<MessagingTask> {
        if packet.version != self.version {
            debug!(
                group = %self.group,
                version = packet.version,
                expected = self.version,
                "dropping packet from other epoch"
            );
            return Vec::new();
        }
        let recovery = packet.recovery;

        if self.is_stopped() {
            debug!(group = %self.group, kind = packet.kind(), "stopped instance dropping packet");
            return Vec::new();
        }
        if !self.acceptor.is_active() && !recovery {
            debug!(group = %self.group, kind = packet.kind(), "still recovering, dropping live packet");
            return Vec::new();
        }

        let mut tasks = Vec::new();
        if !recovery {
            self.last_active = Instant::now();
            // Piggyback liveness work on every packet: run for coordinator
            // if the group has none, or nudge a stalled local one.
            tasks.extend(self.run_or_poke_coordinator(false, env));
        }

        let body_tasks = match &packet.body {
            PacketBody::Request(request) => self.handle_request(request.clone(), env),
            PacketBody::Proposal(proposal) => self.handle_proposal(proposal.clone(), env),
            PacketBody::Prepare(prepare) => self.handle_prepare(prepare, recovery, env),
            PacketBody::PrepareReply(reply) => self.handle_prepare_reply(reply, env),
            PacketBody::Accept(accept) => self.handle_accept(accept, recovery, env),
            PacketBody::AcceptReply(reply) => self.handle_accept_reply(reply, recovery, env),
            PacketBody::Decision(decision) => {
                self.handle_committed(decision.clone(), recovery, env)
            }
            PacketBody::SyncDecisions(sync) => self.handle_sync_decisions(sync, env),
            PacketBody::Checkpoint(checkpoint) => self.handle_checkpoint(checkpoint, env),
        };
        tasks.extend(body_tasks);

        if recovery {
            return Vec::new();
        }
        tasks.retain(|t| !t.is_empty());
        tasks
    }

    // -------------------------------------------------------------------------
    // Client path
    // -------------------------------------------------------------------------

    fn handle_request(&mut self, request: Request, env: &Env<'_>) -> Vec<MessagingTask> {
        self.handle_proposal(
            ProposalPacket {
                request,
                forwards: 0,
            },
            env,
        )
    }

    /// Route a proposal: propose locally when this member's coordinator
    /// covers the current ballot, otherwise forward toward the believed
    /// coordinator. A proposal that comes back to its sender or exceeds the
    /// forward limit is ping-ponging between members that each think the
    /// other coordinates; the receiver then runs for coordinator itself and
    /// queues the request locally.
    fn handle_proposal(
        &mut self,
        proposal: ProposalPacket,
        env: &Env<'_>,
    ) -> Vec<MessagingTask> {
        let current = self.acceptor.ballot();

        if self
            .coordinator
            .as_ref()
            .map_or(false, |c| c.exists_at(current))
        {
            return self.propose_locally(proposal.request);
        }

        let coordinator_up = lock_or_recover(env.failure_detector).is_node_up(current.coordinator);
        let destination = if coordinator_up {
            current.coordinator
        } else {
            round_robin_coordinator(&self.group, &self.members, current.number.wrapping_add(1))
        };

        if destination == self.me || proposal.forwards >= env.config.max_forwards {
            warn!(
                group = %self.group,
                forwards = proposal.forwards,
                "proposal has nowhere to go, running for coordinator"
            );
            let mut tasks = self.run_or_poke_coordinator(true, env);
            tasks.extend(self.propose_locally(proposal.request));
            return tasks;
        }

        debug!(group = %self.group, to = %destination, "forwarding proposal");
        vec![MessagingTask::unicast(
            destination,
            self.make_packet(PacketBody::Proposal(ProposalPacket {
                request: proposal.request,
                forwards: proposal.forwards + 1,
            })),
        )]
    }

    fn propose_locally(&mut self, request: Request) -> Vec<MessagingTask> {
        let Some(coordinator) = self.coordinator.as_mut() else {
            return Vec::new();
        };
        match coordinator.propose(request) {
            ProposeOutcome::Accept(accept) => {
                vec![MessagingTask::multicast(
                    self.members.clone(),
                    self.make_packet(PacketBody::Accept(accept)),
                )]
            }
            ProposeOutcome::Queued(slot) => {
                debug!(group = %self.group, slot = %slot, "queued proposal pending activation");
                Vec::new()
            }
            ProposeOutcome::RefusedAfterStop => {
                info!(group = %self.group, "dropping request proposed after a stop");
                Vec::new()
            }
        }
    }

    // -------------------------------------------------------------------------
    // Coordinator election
    // -------------------------------------------------------------------------

    /// Run for coordinator when warranted, or retransmit stalled phase-1 or
    /// phase-2 messages of the local coordinator.
    fn run_or_poke_coordinator(&mut self, force: bool, env: &Env<'_>) -> Vec<MessagingTask> {
        if let Some(coordinator) = self.coordinator.as_mut() {
            if coordinator.is_active() && !force {
                // Nudge the accept for the slot blocking execution, if it
                // has gone unanswered past its backed-off timeout.
                let next = self.acceptor.next_slot();
                if let Some(accept) =
                    coordinator.reissue_accept_if_waiting_too_long(next, env.config)
                {
                    return vec![MessagingTask::multicast(
                        self.members.clone(),
                        self.make_packet(PacketBody::Accept(accept)),
                    )];
                }
                return Vec::new();
            }
        }
        self.check_run_for_coordinator(force, env)
    }

    fn check_run_for_coordinator(&mut self, force: bool, env: &Env<'_>) -> Vec<MessagingTask> {
        let current = self.acceptor.ballot();
        let exists = self
            .coordinator
            .as_ref()
            .map_or(false, |c| c.exists_at(current));
        let ran_recently = self
            .coordinator
            .as_ref()
            .map_or(false, |c| c.ran_recently(env.config.rerun_delay_threshold));
        let next_number = current.number.wrapping_add(1);

        let should_run = force
            || (!exists && !ran_recently && {
                let detector = lock_or_recover(env.failure_detector);
                current.coordinator == self.me
                    || (!detector.is_node_up(current.coordinator)
                        && (self.me
                            == round_robin_coordinator(&self.group, &self.members, next_number)
                            || detector.last_coordinator_long_dead(current.coordinator)))
            });

        if should_run {
            let ballot = Ballot::new(next_number, self.me);
            info!(group = %self.group, ballot = %ballot, "running for coordinator");
            let pre_actives = self
                .coordinator
                .take()
                .map(|c| c.pre_actives())
                .unwrap_or_default();
            let mut coordinator = PaxosCoordinator::new(
                ballot,
                self.members.clone(),
                self.acceptor.next_slot(),
                pre_actives,
            );
            let prepare = coordinator.prepare(self.acceptor.next_slot());
            self.coordinator = Some(coordinator);
            if let Some(prepare) = prepare {
                return vec![MessagingTask::multicast(
                    self.members.clone(),
                    self.make_packet(PacketBody::Prepare(prepare)),
                )];
            }
            return Vec::new();
        }

        // Not running, but an inactive local coordinator may need its
        // prepare retransmitted.
        if let Some(coordinator) = self.coordinator.as_mut() {
            let next = self.acceptor.next_slot();
            if let Some(prepare) = coordinator.prepare_if_waiting_too_long(next, env.config) {
                return vec![MessagingTask::multicast(
                    self.members.clone(),
                    self.make_packet(PacketBody::Prepare(prepare)),
                )];
            }
        }
        Vec::new()
    }

    // -------------------------------------------------------------------------
    // Phase 1
    // -------------------------------------------------------------------------

    fn handle_prepare(
        &mut self,
        prepare: &PreparePacket,
        recovery: bool,
        env: &Env<'_>,
    ) -> Vec<MessagingTask> {
        lock_or_recover(env.failure_detector).heard_from(prepare.ballot.coordinator);
        let Some((reply, adopted)) = self.acceptor.handle_prepare(prepare, self.me) else {
            return Vec::new();
        };
        if adopted && !recovery {
            // The promise must be durable before the reply leaves, or a
            // crash could un-promise a ballot some coordinator counted.
            let logged = lock_or_recover(env.logger)
                .log_packet(&self.make_packet(PacketBody::Prepare(prepare.clone())));
            if let Err(err) = logged {
                error!(group = %self.group, error = %err, "failed to log ballot adoption");
                return Vec::new();
            }
        }
        vec![MessagingTask::unicast(
            prepare.ballot.coordinator,
            self.make_packet(PacketBody::PrepareReply(reply)),
        )]
    }

    fn handle_prepare_reply(
        &mut self,
        reply: &PrepareReplyPacket,
        env: &Env<'_>,
    ) -> Vec<MessagingTask> {
        lock_or_recover(env.failure_detector).heard_from(reply.acceptor);
        let Some(coordinator) = self.coordinator.as_mut() else {
            return Vec::new();
        };
        match coordinator.handle_prepare_reply(reply) {
            PrepareOutcome::Activated(accepts) => accepts
                .into_iter()
                .map(|accept| {
                    MessagingTask::multicast(
                        self.members.clone(),
                        self.make_packet(PacketBody::Accept(accept)),
                    )
                })
                .collect(),
            PrepareOutcome::Preempted(pre_actives) => {
                let winner = reply.ballot.coordinator;
                info!(group = %self.group, winner = %winner, "resigning preempted coordinator");
                self.coordinator = None;
                pre_actives
                    .into_iter()
                    .filter(|pv| !pv.request.is_no_op())
                    .map(|pv| {
                        MessagingTask::unicast(
                            winner,
                            self.make_packet(PacketBody::Proposal(ProposalPacket {
                                request: pv.request,
                                forwards: 0,
                            })),
                        )
                    })
                    .collect()
            }
            PrepareOutcome::Waiting | PrepareOutcome::Ignored => Vec::new(),
        }
    }

    // -------------------------------------------------------------------------
    // Phase 2
    // -------------------------------------------------------------------------

    fn handle_accept(
        &mut self,
        accept: &AcceptPacket,
        recovery: bool,
        env: &Env<'_>,
    ) -> Vec<MessagingTask> {
        lock_or_recover(env.failure_detector).heard_from(accept.pvalue.ballot.coordinator);
        let Some(ballot) = self.acceptor.accept_and_update_ballot(accept) else {
            return Vec::new();
        };
        if !recovery && ballot == accept.pvalue.ballot {
            // The vote must be durable before the reply leaves.
            let logged = lock_or_recover(env.logger)
                .log_packet(&self.make_packet(PacketBody::Accept(accept.clone())));
            if let Err(err) = logged {
                error!(group = %self.group, error = %err, "failed to log accept vote");
                return Vec::new();
            }
        }
        let reply = AcceptReplyPacket {
            acceptor: self.me,
            ballot,
            slot: accept.pvalue.slot,
            max_checkpointed_slot: self.last_checkpoint_slot,
        };
        vec![MessagingTask::unicast(
            accept.pvalue.ballot.coordinator,
            self.make_packet(PacketBody::AcceptReply(reply)),
        )]
    }

    fn handle_accept_reply(
        &mut self,
        reply: &AcceptReplyPacket,
        recovery: bool,
        env: &Env<'_>,
    ) -> Vec<MessagingTask> {
        lock_or_recover(env.failure_detector).heard_from(reply.acceptor);
        let Some(coordinator) = self.coordinator.as_mut() else {
            return Vec::new();
        };
        match coordinator.handle_accept_reply(reply) {
            AcceptOutcome::Committed { decision } => {
                let packet = self.make_packet(PacketBody::Decision(decision));
                if !recovery {
                    // Log before multicast, so a crash between the two
                    // leaves a recoverable record of the commit.
                    if let Err(err) = lock_or_recover(env.logger).log_packet(&packet) {
                        error!(group = %self.group, error = %err, "failed to log decision");
                        return Vec::new();
                    }
                }
                vec![MessagingTask::multicast(self.members.clone(), packet)]
            }
            AcceptOutcome::Preempted { pvalue, fully } => {
                let mut tasks = Vec::new();
                if let Some(pv) = pvalue {
                    if !pv.request.is_no_op() {
                        tasks.push(MessagingTask::unicast(
                            reply.ballot.coordinator,
                            self.make_packet(PacketBody::Proposal(ProposalPacket {
                                request: pv.request,
                                forwards: 0,
                            })),
                        ));
                    }
                }
                if fully {
                    info!(group = %self.group, "resigning fully preempted coordinator");
                    self.coordinator = None;
                }
                tasks
            }
            AcceptOutcome::Waiting | AcceptOutcome::Ignored => Vec::new(),
        }
    }

    // -------------------------------------------------------------------------
    // Commit, execution, checkpointing
    // -------------------------------------------------------------------------

    fn handle_committed(
        &mut self,
        decision: PValue,
        recovery: bool,
        env: &Env<'_>,
    ) -> Vec<MessagingTask> {
        lock_or_recover(env.failure_detector).heard_from(decision.ballot.coordinator);
        if !recovery {
            // Relayed decisions are logged so this member can serve them to
            // sync requests after they leave the acceptor's maps.
            let packet = self.make_packet(PacketBody::Decision(decision.clone()));
            if let Err(err) = lock_or_recover(env.logger).log_packet(&packet) {
                error!(group = %self.group, error = %err, "failed to log relayed decision");
            }
        }
        self.extract_execute_and_checkpoint(Some(decision), recovery, env);
        if recovery || self.is_stopped() {
            return Vec::new();
        }
        self.fix_long_decision_gaps(env).into_iter().collect()
    }

    /// Drain and execute every in-order decision, checkpointing at interval
    /// boundaries and at the epoch-final stop.
    fn extract_execute_and_checkpoint(
        &mut self,
        decision: Option<PValue>,
        recovery: bool,
        env: &Env<'_>,
    ) {
        let mut next = self.acceptor.put_and_remove_next_executable(decision);
        while let Some(decision) = next {
            let slot = decision.slot;
            let is_stop = decision.request.stop;
            if !decision.request.is_no_op() {
                // The slot cannot be skipped; retry until the application
                // takes it. The app lock is released across the sleep so a
                // refusing application stalls only this group.
                loop {
                    if lock_or_recover(env.app).execute(&self.group, &decision.request, recovery) {
                        break;
                    }
                    warn!(
                        group = %self.group,
                        slot = %slot,
                        request = decision.request.id,
                        "application execute failed, retrying"
                    );
                    std::thread::sleep(env.config.execute_retry_delay);
                }
            }
            self.acceptor.executed(slot, is_stop);

            let interval = env.config.checkpoint_interval as i32;
            let at_interval = slot.0 != 0 && slot.0.rem_euclid(interval) == 0;
            if is_stop || at_interval {
                self.checkpoint_now(is_stop, env);
            }
            if is_stop {
                info!(group = %self.group, slot = %slot, "epoch ended, instance stopped");
                return;
            }
            next = self.acceptor.put_and_remove_next_executable(None);
        }
    }

    fn checkpoint_now(&mut self, epoch_final: bool, env: &Env<'_>) {
        let state = lock_or_recover(env.app).checkpoint(&self.group);
        let slot = self.acceptor.next_slot().prev();
        let record = CheckpointRecord {
            version: self.version,
            members: self.members.clone(),
            slot,
            ballot: self.acceptor.ballot(),
            gc_slot: self.acceptor.gc_slot(),
            state,
        };
        let mut logger = lock_or_recover(env.logger);
        if let Err(err) = logger.put_checkpoint(&self.group, record) {
            error!(group = %self.group, slot = %slot, error = %err, "checkpoint failed");
            return;
        }
        self.last_checkpoint_slot = slot;
        debug!(group = %self.group, slot = %slot, "checkpointed");
        if epoch_final {
            if let Err(err) = logger.copy_epoch_final(&self.group) {
                error!(group = %self.group, error = %err, "failed to archive epoch-final checkpoint");
            }
        }
    }

    // -------------------------------------------------------------------------
    // Sync and checkpoint transfer
    // -------------------------------------------------------------------------

    /// Ask a random peer for missing committed slots when the gap between
    /// the highest known decision and the execution frontier has grown past
    /// the sync threshold (or at bootstrap, when any gap means this member
    /// missed the group's early decisions).
    fn fix_long_decision_gaps(&mut self, env: &Env<'_>) -> Option<MessagingTask> {
        let max_decided = self.acceptor.max_decided_slot()?;
        let gap = max_decided.since(self.acceptor.next_slot());
        let bootstrap = self.acceptor.next_slot().since(Slot::new(1)) <= 0;
        if gap < env.config.sync_threshold() && !(bootstrap && gap >= 1) {
            return None;
        }
        if let Some(last) = self.last_synced {
            if last.elapsed() < env.config.min_resync_delay {
                return None;
            }
        }
        let missing = self
            .acceptor
            .get_missing_committed_slots(env.config.max_sync_decisions_gap());
        if missing.is_empty() {
            return None;
        }

        let peers: Vec<NodeId> = self
            .members
            .iter()
            .copied()
            .filter(|m| *m != self.me)
            .collect();
        if peers.is_empty() {
            return None;
        }
        let target = peers[rand::thread_rng().gen_range(0..peers.len())];
        self.last_synced = Some(Instant::now());
        info!(
            group = %self.group,
            target = %target,
            gap,
            missing = missing.len(),
            "requesting missing decisions"
        );
        Some(MessagingTask::unicast(
            target,
            self.make_packet(PacketBody::SyncDecisions(SyncDecisionsPacket {
                requester: self.me,
                missing,
                max_decision_slot: max_decided,
            })),
        ))
    }

    /// Serve a peer's catch-up request with the decisions it is missing, or
    /// with checkpoint state when some of those slots predate this member's
    /// last checkpoint.
    fn handle_sync_decisions(
        &mut self,
        sync: &SyncDecisionsPacket,
        env: &Env<'_>,
    ) -> Vec<MessagingTask> {
        if sync.requester == self.me || sync.missing.is_empty() {
            return Vec::new();
        }
        let min_missing = sync.missing[0];
        let max_missing = sync.missing[sync.missing.len() - 1];

        let mut tasks = Vec::new();
        let mut floor = Slot::GC_NONE;
        match lock_or_recover(env.logger).get_checkpoint(&self.group) {
            Ok(Some(cp)) if min_missing.since(cp.slot) <= 0 => {
                floor = cp.slot;
                debug!(
                    group = %self.group,
                    to = %sync.requester,
                    slot = %cp.slot,
                    "requested slots predate checkpoint, transferring state"
                );
                tasks.push(MessagingTask::unicast(
                    sync.requester,
                    self.make_packet(PacketBody::Checkpoint(CheckpointPacket {
                        ballot: cp.ballot,
                        slot: cp.slot,
                        members: cp.members,
                        state: cp.state,
                        epoch_final: false,
                    })),
                ));
            }
            Ok(_) => {}
            Err(err) => {
                error!(group = %self.group, error = %err, "failed to read checkpoint for sync");
            }
        }

        let logged = lock_or_recover(env.logger)
            .get_logged_decisions(&self.group, min_missing, max_missing.next())
            .unwrap_or_else(|err| {
                error!(group = %self.group, error = %err, "failed to read logged decisions");
                Vec::new()
            });
        for &slot in &sync.missing {
            if slot.since(floor) <= 0 {
                continue;
            }
            let decision = self
                .acceptor
                .get_decision(slot)
                .filter(|pv| pv.request.has_value())
                .cloned()
                .or_else(|| {
                    logged
                        .iter()
                        .find(|pv| pv.slot == slot && pv.request.has_value())
                        .cloned()
                });
            if let Some(decision) = decision {
                tasks.push(MessagingTask::unicast(
                    sync.requester,
                    self.make_packet(PacketBody::Decision(decision)),
                ));
            }
        }
        tasks
    }

    /// Install a transferred checkpoint: restore the application, jump the
    /// acceptor past the covered slots, and persist the checkpoint locally.
    /// An epoch-final checkpoint additionally ends the epoch here.
    fn handle_checkpoint(
        &mut self,
        checkpoint: &CheckpointPacket,
        env: &Env<'_>,
    ) -> Vec<MessagingTask> {
        if checkpoint.slot.since(self.acceptor.next_slot()) < 0 {
            debug!(
                group = %self.group,
                slot = %checkpoint.slot,
                next = %self.acceptor.next_slot(),
                "ignoring checkpoint behind execution frontier"
            );
            return Vec::new();
        }
        if !lock_or_recover(env.app).restore(&self.group, &checkpoint.state) {
            error!(group = %self.group, "application refused transferred checkpoint");
            return Vec::new();
        }
        self.acceptor.jump_slot(checkpoint.slot.next());
        let record = CheckpointRecord {
            version: self.version,
            members: checkpoint.members.clone(),
            slot: checkpoint.slot,
            ballot: checkpoint.ballot,
            gc_slot: self.acceptor.gc_slot(),
            state: checkpoint.state.clone(),
        };
        {
            let mut logger = lock_or_recover(env.logger);
            if let Err(err) = logger.put_checkpoint(&self.group, record) {
                error!(group = %self.group, error = %err, "failed to persist transferred checkpoint");
            }
            self.last_checkpoint_slot = checkpoint.slot;
            info!(
                group = %self.group,
                slot = %checkpoint.slot,
                "installed transferred checkpoint"
            );
            if checkpoint.epoch_final {
                // The slots this member missed ended the epoch; the installed
                // state is the group's closing state.
                self.acceptor.mark_stopped();
                if let Err(err) = logger.copy_epoch_final(&self.group) {
                    error!(
                        group = %self.group,
                        error = %err,
                        "failed to archive epoch-final checkpoint"
                    );
                }
                info!(group = %self.group, slot = %checkpoint.slot, "epoch ended, instance stopped");
                return Vec::new();
            }
        }
        // Decisions that arrived ahead of the checkpoint may be executable
        // now.
        self.extract_execute_and_checkpoint(None, false, env);
        Vec::new()
    }

    fn make_packet(&self, body: PacketBody) -> PaxosPacket {
        PaxosPacket::new(self.group.clone(), self.version, body)
    }
}

/// The default coordinator for a ballot number: members are tried in
/// round-robin order, offset by the group-name hash so coordinator load
/// spreads across members when one node hosts many groups.
fn round_robin_coordinator(group: &str, members: &[NodeId], ballot_number: i32) -> NodeId {
    let index = ballot_number.wrapping_add(group_hash(group)).unsigned_abs() as usize;
    members[index % members.len()]
}
