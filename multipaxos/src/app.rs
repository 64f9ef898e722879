//! Application seam: the replicated state machine being driven.
//!
//! The engine orders commands; a [`Replicable`] implementation executes
//! them. Execution must be deterministic — every member executes the same
//! commands in the same slot order, so any nondeterminism diverges the
//! replicas.

use crate::types::Request;

/// A deterministic state machine replicated by the engine.
pub trait Replicable {
    /// Execute one committed request.
    ///
    /// Returning false means a transient failure; the engine retries the
    /// same request until it succeeds, and never rolls anything back.
    /// `recovery` is set when the request is being replayed from the local
    /// log after a restart (an application that talks to the outside world
    /// should suppress external effects then).
    fn execute(&mut self, group: &str, request: &Request, recovery: bool) -> bool;

    /// Produce a serialized snapshot of the group's current state.
    fn checkpoint(&mut self, group: &str) -> String;

    /// Replace the group's state with a snapshot produced by
    /// [`checkpoint`](Self::checkpoint). Returns false on failure.
    fn restore(&mut self, group: &str, state: &str) -> bool;
}
