//! Wire messages exchanged between group members.
//!
//! Every message travels inside a [`PaxosPacket`] envelope naming the group,
//! the group's epoch version, and whether the packet is a recovery replay
//! from the local log (replayed packets must produce no outbound traffic).
//!
//! Handlers never touch the transport. They return [`MessagingTask`]s — a
//! packet plus its recipients — and the manager performs the sends. That
//! keeps the acceptor and coordinator free of transport references and makes
//! every handler a pure state transition that is trivial to unit test.

use serde::{Deserialize, Serialize};

use crate::types::{Ballot, NodeId, PValue, Request, Slot};

/// Envelope around every protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaxosPacket {
    /// The replica group this packet belongs to.
    pub group: String,

    /// The group's epoch version; packets from other epochs are dropped.
    pub version: i32,

    /// Set when the packet is being replayed from the local log during
    /// recovery. Recovery handling must not emit outbound traffic.
    pub recovery: bool,

    /// The protocol message itself.
    pub body: PacketBody,
}

impl PaxosPacket {
    /// Create a live (non-recovery) packet.
    pub fn new(group: impl Into<String>, version: i32, body: PacketBody) -> Self {
        Self {
            group: group.into(),
            version,
            recovery: false,
            body,
        }
    }

    /// Short name of the packet kind, for logging.
    pub fn kind(&self) -> &'static str {
        match &self.body {
            PacketBody::Request(_) => "REQUEST",
            PacketBody::Proposal(_) => "PROPOSAL",
            PacketBody::Prepare(_) => "PREPARE",
            PacketBody::PrepareReply(_) => "PREPARE_REPLY",
            PacketBody::Accept(_) => "ACCEPT",
            PacketBody::AcceptReply(_) => "ACCEPT_REPLY",
            PacketBody::Decision(_) => "DECISION",
            PacketBody::SyncDecisions(_) => "SYNC_DECISIONS",
            PacketBody::Checkpoint(_) => "CHECKPOINT_STATE",
        }
    }
}

/// The nine protocol message kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PacketBody {
    /// A client command entering at any member.
    Request(Request),
    /// A request en route to the coordinator.
    Proposal(ProposalPacket),
    /// Phase 1a: a coordinator preparing all slots at once.
    Prepare(PreparePacket),
    /// Phase 1b: an acceptor's promise plus its accepted values.
    PrepareReply(PrepareReplyPacket),
    /// Phase 2a: a value proposed for a slot.
    Accept(AcceptPacket),
    /// Phase 2b: an acceptor's vote on an accept.
    AcceptReply(AcceptReplyPacket),
    /// A committed value, multicast to the group.
    Decision(PValue),
    /// A catch-up request for missing decisions.
    SyncDecisions(SyncDecisionsPacket),
    /// Checkpoint state transfer for a far-behind member.
    Checkpoint(CheckpointPacket),
}

/// A request being routed toward the group's coordinator.
///
/// `forwards` counts hops. A proposal bouncing between members that each
/// think the other is the coordinator (a ping-pong, possible while a view
/// change is in flight) forces the receiving member to run for coordinator
/// itself once the count passes the configured limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalPacket {
    /// The client request being proposed.
    pub request: Request,

    /// How many times this proposal has been forwarded.
    pub forwards: u32,
}

/// Phase 1a. One prepare covers every slot at or above
/// `first_undecided_slot`, unlike single-decree Paxos which prepares one
/// slot at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparePacket {
    /// The ballot the coordinator is trying to establish.
    pub ballot: Ballot,

    /// The lowest slot the coordinator needs carryover information for.
    pub first_undecided_slot: Slot,
}

/// Phase 1b.
///
/// The reply always carries the acceptor's current ballot. When that ballot
/// is higher than the prepare's, the reply is a nack and `accepted` is
/// empty; the preempted coordinator learns the winning ballot from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareReplyPacket {
    /// The replying acceptor.
    pub acceptor: NodeId,

    /// The acceptor's ballot after processing the prepare.
    pub ballot: Ballot,

    /// Accepted pvalues at slots at or above the prepare's first undecided
    /// slot. Empty on a nack.
    pub accepted: Vec<PValue>,

    /// The acceptor's garbage-collection slot: everything at or below it has
    /// been checkpointed by a majority as far as this acceptor knows.
    pub gc_slot: Slot,
}

/// Phase 2a.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptPacket {
    /// The value being proposed.
    pub pvalue: PValue,

    /// The coordinator's current majority-committed slot, piggybacked so
    /// acceptors can garbage-collect their accepted maps.
    pub median_checkpointed_slot: Slot,
}

/// Phase 2b.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptReplyPacket {
    /// The replying acceptor.
    pub acceptor: NodeId,

    /// The acceptor's ballot after processing the accept. Higher than the
    /// accept's ballot means the coordinator was preempted at this slot.
    pub ballot: Ballot,

    /// The slot being voted on.
    pub slot: Slot,

    /// The acceptor's last checkpointed slot, piggybacked so the coordinator
    /// can track majority checkpoint progress.
    pub max_checkpointed_slot: Slot,
}

/// A catch-up request listing committed slots the requester is missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncDecisionsPacket {
    /// The member asking for decisions.
    pub requester: NodeId,

    /// The committed slots the requester has neither decided nor accepted.
    pub missing: Vec<Slot>,

    /// The highest decision slot the requester knows of.
    pub max_decision_slot: Slot,
}

/// Checkpoint state transfer, sent when a member is so far behind that the
/// decisions it is missing predate the sender's last checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointPacket {
    /// The ballot at the checkpoint.
    pub ballot: Ballot,

    /// The checkpointed slot; the receiver resumes at the slot after it.
    pub slot: Slot,

    /// Group membership at the checkpoint.
    pub members: Vec<NodeId>,

    /// Serialized application state.
    pub state: String,

    /// Whether this is the epoch's final checkpoint. Installing a final
    /// checkpoint ends the epoch at the receiver; no further slots exist.
    pub epoch_final: bool,
}

/// A packet plus the members it should go to — the unit of outbound work
/// returned by instance handlers and performed by the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagingTask {
    /// Destination members.
    pub recipients: Vec<NodeId>,

    /// The packet to deliver to each recipient.
    pub packet: PaxosPacket,
}

impl MessagingTask {
    /// A task addressed to a single member.
    pub fn unicast(to: NodeId, packet: PaxosPacket) -> Self {
        Self {
            recipients: vec![to],
            packet,
        }
    }

    /// A task addressed to several members.
    pub fn multicast(to: Vec<NodeId>, packet: PaxosPacket) -> Self {
        Self {
            recipients: to,
            packet,
        }
    }

    /// Whether the task has no recipients.
    pub fn is_empty(&self) -> bool {
        self.recipients.is_empty()
    }
}
