//! Data synchronization engine interface
//!
//! Copying tenant data to the recipient nodes is a black box to the split
//! orchestration: the engine either completes or fails, and retries of
//! transient copy errors are its own business. The donor state machine only
//! races the returned future against its cancellation and deadline signals.

use crate::error::Result;
use crate::record::SplitRecord;
use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

/// Black-box data copy to the recipient nodes
#[async_trait]
pub trait SyncEngine: Send + Sync {
    /// Start synchronizing data for the given split and resolve when the
    /// recipient nodes hold a consistent copy (or the copy failed).
    async fn start(&self, id: Uuid, record: &SplitRecord) -> Result<()>;
}

/// Engine that reports success immediately.
///
/// Useful when recipient nodes are staged as replicating members of the
/// donor set and are therefore already in sync by the time the split starts.
#[derive(Debug, Default)]
pub struct ImmediateSync;

impl ImmediateSync {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SyncEngine for ImmediateSync {
    async fn start(&self, id: Uuid, _record: &SplitRecord) -> Result<()> {
        debug!(split_id = %id, "Recipient nodes already in sync");
        Ok(())
    }
}
