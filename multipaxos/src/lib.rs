//! # Multipaxos: a multi-group replicated state machine engine
//!
//! This crate implements multi-decree Paxos over named replica groups. A
//! process hosts one [`PaxosManager`], which can run many groups at once;
//! each group totally orders client commands into slots and drives a
//! deterministic [`Replicable`] application, so every member executes the
//! same commands in the same order.
//!
//! ## Protocol shape
//!
//! Unlike single-decree Paxos run per value, one phase 1 (prepare) covers
//! every undecided slot at once: a coordinator that wins its ballot learns
//! all potentially chosen values in one round trip and then streams
//! phase 2 (accept) messages, one round trip per command in the common
//! case. Coordinators are elected implicitly — any member that notices the
//! coordinator missing or dead runs for the role by bumping the ballot
//! number, and ballot comparison at the acceptors arbitrates races.
//!
//! ```text
//! client ──▶ any member ──forward──▶ coordinator
//!                                        │ accept (phase 2a)
//!                             ┌──────────┼──────────┐
//!                             ▼          ▼          ▼
//!                         acceptor   acceptor   acceptor
//!                             └──────────┼──────────┘
//!                                        │ accept replies (majority)
//!                                        ▼
//!                                    decision ──multicast──▶ execute
//! ```
//!
//! ## Anatomy
//!
//! - [`types`]: ballots, slots, requests, pvalues (all wraparound-aware)
//! - [`messages`]: the wire packets and the [`MessagingTask`] unit of sends
//! - [`acceptor`] / [`coordinator`]: the two protocol roles, as pure state
//!   machines returning outcomes instead of performing I/O
//! - [`instance`]: one group on one member; election, forwarding,
//!   execution, checkpointing, sync, pause
//! - [`manager`]: the per-process front end owning the instance table
//! - [`storage`], [`transport`], [`app`], [`failure`]: the seams a
//!   deployment implements
//!
//! ## Example
//!
//! ```
//! use multipaxos::{
//!     MemoryPaxosLogger, Messenger, NodeId, PaxosConfig, PaxosError, PaxosManager, PaxosPacket,
//!     Replicable, Request, TimeoutFailureDetector,
//! };
//! use std::time::Duration;
//!
//! struct NullMessenger;
//! impl Messenger for NullMessenger {
//!     fn send(&self, _to: NodeId, _packet: &PaxosPacket) -> Result<(), PaxosError> {
//!         Ok(())
//!     }
//! }
//!
//! #[derive(Default)]
//! struct Counter(u64);
//! impl Replicable for Counter {
//!     fn execute(&mut self, _group: &str, _request: &Request, _recovery: bool) -> bool {
//!         self.0 += 1;
//!         true
//!     }
//!     fn checkpoint(&mut self, _group: &str) -> String {
//!         self.0.to_string()
//!     }
//!     fn restore(&mut self, _group: &str, state: &str) -> bool {
//!         self.0 = state.parse().unwrap_or(0);
//!         true
//!     }
//! }
//!
//! let manager = PaxosManager::new(
//!     NodeId::new(0),
//!     PaxosConfig::default(),
//!     Box::new(MemoryPaxosLogger::new()),
//!     Box::new(Counter::default()),
//!     Box::new(TimeoutFailureDetector::new(Duration::from_secs(5))),
//!     NullMessenger,
//! );
//! manager
//!     .create_paxos_instance("counter", 0, vec![NodeId::new(0)], None)
//!     .unwrap();
//! manager.propose("counter", "increment").unwrap();
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

pub mod acceptor;
pub mod app;
pub mod config;
pub mod coordinator;
pub mod failure;
pub mod instance;
pub mod manager;
pub mod messages;
pub mod storage;
pub mod transport;
pub mod types;

pub use app::Replicable;
pub use config::PaxosConfig;
pub use failure::{FailureDetector, TimeoutFailureDetector};
pub use manager::PaxosManager;
pub use messages::{MessagingTask, PacketBody, PaxosPacket};
pub use storage::{CheckpointRecord, MemoryPaxosLogger, PaxosLogger};
pub use transport::Messenger;
pub use types::{Ballot, NodeId, PValue, PaxosError, Request, Slot};
