//! Protocol timing and interval knobs.
//!
//! All knobs live in one [`PaxosConfig`] struct shared by every instance a
//! manager owns. The defaults are conservative production values; tests dial
//! them down to drive retransmission and sync paths quickly.

use std::time::Duration;

/// Tunable protocol parameters.
#[derive(Debug, Clone)]
pub struct PaxosConfig {
    /// Slots between application checkpoints. Also bounds how many missing
    /// decisions a single sync request may ask for.
    pub checkpoint_interval: u32,

    /// Minimum delay between successive sync requests from one instance.
    pub min_resync_delay: Duration,

    /// Base timeout before a coordinator retransmits its prepare.
    pub prepare_timeout: Duration,

    /// Base timeout before a coordinator reissues a stalled accept.
    pub accept_timeout: Duration,

    /// Multiplier applied to the base timeout per retransmission.
    pub retransmission_backoff: f64,

    /// A coordinator attempt younger than this suppresses further runs for
    /// the same group, preventing dueling-proposer churn.
    pub rerun_delay_threshold: Duration,

    /// Forward hops after which a proposal is treated as ping-ponging and
    /// the receiving member runs for coordinator itself.
    pub max_forwards: u32,

    /// Idle time after which a caught-up instance is eligible for pause.
    pub deactivation_period: Duration,

    /// Backoff between retries of a failed application execute.
    pub execute_retry_delay: Duration,
}

impl PaxosConfig {
    /// Decision gap beyond which an instance requests a sync.
    pub fn sync_threshold(&self) -> i32 {
        (self.checkpoint_interval * 4) as i32
    }

    /// Cap on missing slots requested per sync message.
    pub fn max_sync_decisions_gap(&self) -> i32 {
        self.checkpoint_interval as i32
    }
}

impl Default for PaxosConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: 100,
            min_resync_delay: Duration::from_secs(1),
            prepare_timeout: Duration::from_secs(60),
            accept_timeout: Duration::from_secs(60),
            retransmission_backoff: 1.5,
            rerun_delay_threshold: Duration::from_secs(10),
            max_forwards: 2,
            deactivation_period: Duration::from_secs(60),
            execute_retry_delay: Duration::from_millis(10),
        }
    }
}
