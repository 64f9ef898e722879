//! Outbound send seam.
//!
//! The engine never opens sockets. The manager hands every outbound packet
//! to a [`Messenger`], which a deployment backs with its transport of
//! choice; tests back it with an in-memory queue. Self-addressed packets
//! never reach the messenger — the manager loops them back directly.

use crate::messages::PaxosPacket;
use crate::types::{NodeId, PaxosError};

/// Delivers packets to remote members.
///
/// Sends are best effort: the protocol tolerates loss via retransmission
/// and sync, so implementations should return an error only for
/// configuration-level problems (unknown peer, serialization failure), not
/// transient delivery failures.
pub trait Messenger {
    /// Send a packet to one member.
    fn send(&self, to: NodeId, packet: &PaxosPacket) -> Result<(), PaxosError>;
}
