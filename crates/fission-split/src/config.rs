//! Split subsystem configuration

use crate::storage::WriteConcern;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Process-wide configuration for split operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitConfig {
    /// How long a split may run before aborting with `ExceededTimeLimit`.
    /// The deadline is anchored to the record's creation time, so a
    /// leadership flap does not restart the clock.
    pub split_timeout: Duration,

    /// Durability required for record transitions. `Quorum` is the contract
    /// for replicated deployments; `Local` is for single-node setups where
    /// the store has no peers to acknowledge.
    pub write_concern: WriteConcern,

    /// Buffer capacity of the topology change-event stream. Acceptance
    /// waiters tolerate lag, so this only bounds burst buffering.
    pub event_channel_capacity: usize,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            split_timeout: Duration::from_secs(3600),
            write_concern: WriteConcern::Quorum,
            event_channel_capacity: 128,
        }
    }
}

impl SplitConfig {
    /// Set the split timeout
    pub fn with_split_timeout(mut self, timeout: Duration) -> Self {
        self.split_timeout = timeout;
        self
    }

    /// Set the transition write concern
    pub fn with_write_concern(mut self, concern: WriteConcern) -> Self {
        self.write_concern = concern;
        self
    }

    /// Set the change-event channel capacity
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }
}
