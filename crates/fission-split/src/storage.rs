//! Durable record storage
//!
//! Split records are persisted through a pluggable backend:
//! - In-memory (default): fast, for standalone and test use
//! - Replicated: quorum-acknowledged writes against the cluster's durable
//!   store (provided by the embedding process)
//!
//! The store is the only cross-process shared mutable state of the split
//! subsystem; the registry guarantees a single writer per record at a time.

use crate::error::{Result, SplitError};
use crate::record::SplitRecord;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Durability requirement for a record write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WriteConcern {
    /// Acknowledged by the local node only
    Local,
    /// Acknowledged by a majority of replica members
    #[default]
    Quorum,
}

/// Pluggable persistence backend for split records
#[async_trait]
pub trait SplitStore: Send + Sync {
    /// Persist a record, upserting by id. Returns once the write is
    /// acknowledged at the requested concern.
    async fn persist(&self, record: &SplitRecord, concern: WriteConcern) -> Result<()>;

    /// Load a record by id
    async fn load(&self, id: Uuid) -> Result<Option<SplitRecord>>;

    /// Load all records, optionally only those in a non-terminal state
    async fn load_all(&self, non_terminal_only: bool) -> Result<Vec<SplitRecord>>;
}

/// In-memory store for standalone and test use.
///
/// Every write is trivially "quorum acknowledged" since there is exactly one
/// member.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<Uuid, SplitRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl SplitStore for MemoryStore {
    async fn persist(&self, record: &SplitRecord, _concern: WriteConcern) -> Result<()> {
        if record.abort_reason.is_some() {
            let reason_is_valid = record
                .abort_reason
                .as_ref()
                .is_some_and(SplitError::is_abort_reason);
            if !reason_is_valid {
                return Err(SplitError::Storage(format!(
                    "record {} carries a non-persistable abort reason",
                    record.id
                )));
            }
        }
        self.records.write().insert(record.id, record.clone());
        Ok(())
    }

    async fn load(&self, id: Uuid) -> Result<Option<SplitRecord>> {
        Ok(self.records.read().get(&id).cloned())
    }

    async fn load_all(&self, non_terminal_only: bool) -> Result<Vec<SplitRecord>> {
        let records = self.records.read();
        let mut out: Vec<SplitRecord> = records
            .values()
            .filter(|r| !non_terminal_only || !r.state.is_terminal())
            .cloned()
            .collect();
        // Deterministic scan order for resumption
        out.sort_by_key(|r| r.id);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::SplitState;
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn record(state: SplitState) -> SplitRecord {
        let mut rec = SplitRecord::new(
            Uuid::new_v4(),
            BTreeSet::from(["t1".to_string()]),
            "recipientNode",
            "recipientSet",
            Duration::from_secs(60),
        );
        rec.state = state;
        if state == SplitState::Aborted {
            rec.abort_reason = Some(SplitError::Aborted);
        }
        rec
    }

    #[tokio::test]
    async fn test_persist_and_load() {
        let store = MemoryStore::new();
        let rec = record(SplitState::DataSync);
        store.persist(&rec, WriteConcern::Quorum).await.unwrap();

        let loaded = store.load(rec.id).await.unwrap().unwrap();
        assert_eq!(loaded, rec);
        assert!(store.load(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_all_filters_terminal() {
        let store = MemoryStore::new();
        store
            .persist(&record(SplitState::Blocking), WriteConcern::Quorum)
            .await
            .unwrap();
        store
            .persist(&record(SplitState::Committed), WriteConcern::Quorum)
            .await
            .unwrap();
        store
            .persist(&record(SplitState::Aborted), WriteConcern::Quorum)
            .await
            .unwrap();

        assert_eq!(store.load_all(false).await.unwrap().len(), 3);
        let live = store.load_all(true).await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].state, SplitState::Blocking);
    }

    #[tokio::test]
    async fn test_rejects_bogus_abort_reason() {
        let store = MemoryStore::new();
        let mut rec = record(SplitState::Aborted);
        rec.abort_reason = Some(SplitError::SteppedDown);
        let err = store.persist(&rec, WriteConcern::Quorum).await.unwrap_err();
        assert!(matches!(err, SplitError::Storage(_)));
    }
}
