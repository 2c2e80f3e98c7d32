//! Split operation registry
//!
//! Exactly-one-instance-per-id lifecycle management. The registry owns the
//! in-memory table of running donor state machines and is the only
//! constructor of machines, which gives each record a single writer at a
//! time. The embedding process drives the leadership lifecycle: on
//! leadership acquired it calls [`SplitRegistry::resume_all`], on leadership
//! lost [`SplitRegistry::cancel_all`].

use crate::donor::{DonorStateMachine, SplitContext};
use crate::error::{Result, SplitError};
use crate::observability::SplitMetrics;
use crate::record::{SplitOutcome, SplitRecord, TenantId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Registry of running split operations on the current leader
pub struct SplitRegistry {
    ctx: Arc<SplitContext>,
    machines: Arc<DashMap<Uuid, Arc<DonorStateMachine>>>,
}

impl SplitRegistry {
    /// Create a registry around the node's split collaborators
    pub fn new(ctx: SplitContext) -> Self {
        Self {
            ctx: Arc::new(ctx),
            machines: Arc::new(DashMap::new()),
        }
    }

    /// Get the running machine for `record.id`, or construct one.
    ///
    /// Idempotent per id: concurrent calls return the same handle and start
    /// exactly one run loop. Reusing an id with different immutable options
    /// is a programming error and fails fast with `ConflictingOptions`. A
    /// new machine is seeded from the on-disk record when one exists
    /// (resumption), otherwise from the caller's record, persisted before
    /// the machine becomes visible.
    pub async fn get_or_create(&self, record: SplitRecord) -> Result<Arc<DonorStateMachine>> {
        if let Some(existing) = self.machines.get(&record.id) {
            if !existing.same_options(&record) {
                return Err(SplitError::ConflictingOptions(record.id));
            }
            return Ok(existing.clone());
        }

        // Seed outside the table lock: resume the durable record when one
        // exists, otherwise persist the caller's fresh record first.
        let seeded = match self.ctx.store.load(record.id).await? {
            Some(on_disk) => {
                if !on_disk.same_options(&record) {
                    return Err(SplitError::ConflictingOptions(record.id));
                }
                debug!(split_id = %record.id, state = ?on_disk.state, "Resuming split from durable record");
                on_disk
            }
            None => {
                self.ctx
                    .store
                    .persist(&record, self.ctx.config.write_concern)
                    .await?;
                record
            }
        };

        // One machine per id even under a create race: the loser of the
        // entry race returns the winner's handle and spawns nothing.
        let machine = match self.machines.entry(seeded.id) {
            Entry::Occupied(entry) => {
                let existing = entry.get().clone();
                if !existing.same_options(&seeded) {
                    return Err(SplitError::ConflictingOptions(seeded.id));
                }
                return Ok(existing);
            }
            Entry::Vacant(entry) => {
                let machine = DonorStateMachine::new(seeded, self.ctx.clone());
                entry.insert(machine.clone());
                machine
            }
        };
        SplitMetrics::set_active(self.machines.len());

        tokio::spawn(machine.clone().run());

        // Self-cleaning: drop the table entry once this machine's completion
        // resolves, unless a later machine already took over the id (a
        // stepdown/resume cycle can re-register before the old cleanup runs).
        let machines = self.machines.clone();
        let watched = machine.clone();
        tokio::spawn(async move {
            let _ = watched.completion().await;
            machines.remove_if(&watched.id(), |_, current| Arc::ptr_eq(current, &watched));
            SplitMetrics::set_active(machines.len());
        });

        Ok(machine)
    }

    /// Look up the running machine for an id
    pub fn lookup(&self, id: Uuid) -> Option<Arc<DonorStateMachine>> {
        self.machines.get(&id).map(|entry| entry.clone())
    }

    /// Number of running machines
    pub fn len(&self) -> usize {
        self.machines.len()
    }

    /// Check if no machine is running
    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }

    /// Leadership lost: interrupt every run loop and clear the table.
    ///
    /// Durable records are left untouched; in-flight completion futures fail
    /// with `SteppedDown`. The next leader reconstructs the machines from
    /// storage via [`SplitRegistry::resume_all`].
    pub fn cancel_all(&self) {
        let count = self.machines.len();
        for entry in self.machines.iter() {
            entry.value().interrupt();
        }
        self.machines.clear();
        SplitMetrics::set_active(0);
        if count > 0 {
            info!(count, "Interrupted running splits on leadership loss");
        }
    }

    /// Leadership acquired: scan storage for non-terminal records and resume
    /// each as a fresh machine. Returns how many were resumed.
    pub async fn resume_all(&self) -> Result<usize> {
        let records = self.ctx.store.load_all(true).await?;
        let count = records.len();
        for record in records {
            self.get_or_create(record).await?;
        }
        SplitMetrics::increment_resumed(count as u64);
        if count > 0 {
            info!(count, "Resumed non-terminal splits on leadership acquisition");
        }
        Ok(count)
    }

    // ==================== Caller API ====================

    /// Start (or rejoin) a split moving `tenant_ids` to the recipient set.
    ///
    /// Returns the machine handle; keep it to await completion past the
    /// registry's terminal cleanup.
    pub async fn start_split(
        &self,
        id: Uuid,
        tenant_ids: BTreeSet<TenantId>,
        recipient_tag_name: impl Into<String>,
        recipient_set_name: impl Into<String>,
    ) -> Result<Arc<DonorStateMachine>> {
        let record = SplitRecord::new(
            id,
            tenant_ids,
            recipient_tag_name,
            recipient_set_name,
            self.ctx.config.split_timeout,
        );
        self.get_or_create(record).await
    }

    /// Request an abort of a running split
    pub fn abort_split(&self, id: Uuid) -> Result<()> {
        match self.lookup(id) {
            Some(machine) => {
                machine.try_abort();
                Ok(())
            }
            None => Err(SplitError::NotFound(id)),
        }
    }

    /// Await the outcome of a split.
    ///
    /// Falls back to the durable record for a split whose machine already
    /// finished and left the table, so the answer does not depend on racing
    /// the registry's terminal cleanup.
    pub async fn await_completion(&self, id: Uuid) -> Result<SplitOutcome> {
        if let Some(machine) = self.lookup(id) {
            return machine.completion().await;
        }
        match self.ctx.store.load(id).await? {
            Some(record) if record.state.is_terminal() => Ok(SplitOutcome {
                state: record.state,
                abort_reason: record.abort_reason,
            }),
            _ => Err(SplitError::NotFound(id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SplitConfig;
    use crate::gate::LocalWriteGate;
    use crate::storage::MemoryStore;
    use crate::sync::ImmediateSync;
    use crate::topology::{ReplicaSetConfig, TopologyPublisher};
    use std::time::Duration;

    fn registry() -> SplitRegistry {
        let config = SplitConfig::default().with_split_timeout(Duration::from_secs(60));
        let replica_config = ReplicaSetConfig::new("donorSet", vec!["d1:27017".to_string()])
            .with_tagged_members("recipientNode", vec!["r1:27017".to_string()]);
        let monitor = Arc::new(TopologyPublisher::new(config.event_channel_capacity));
        SplitRegistry::new(SplitContext {
            config,
            replica_config,
            store: Arc::new(MemoryStore::new()),
            gate: Arc::new(LocalWriteGate::new()),
            sync_engine: Arc::new(ImmediateSync::new()),
            monitor,
        })
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let registry = registry();
        let id = Uuid::new_v4();
        let tenants = BTreeSet::from(["t1".to_string()]);

        let first = registry
            .start_split(id, tenants.clone(), "recipientNode", "recipientSet")
            .await
            .unwrap();
        let second = registry
            .start_split(id, tenants, "recipientNode", "recipientSet")
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_conflicting_options_fail_fast() {
        let registry = registry();
        let id = Uuid::new_v4();

        registry
            .start_split(
                id,
                BTreeSet::from(["t1".to_string()]),
                "recipientNode",
                "recipientSet",
            )
            .await
            .unwrap();

        let err = registry
            .start_split(
                id,
                BTreeSet::from(["other".to_string()]),
                "recipientNode",
                "recipientSet",
            )
            .await
            .unwrap_err();
        assert_eq!(err, SplitError::ConflictingOptions(id));
    }

    #[tokio::test]
    async fn test_concurrent_create_returns_one_handle() {
        let registry = Arc::new(registry());
        let id = Uuid::new_v4();
        let tenants = BTreeSet::from(["t1".to_string()]);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            let tenants = tenants.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .start_split(id, tenants, "recipientNode", "recipientSet")
                    .await
                    .unwrap()
            }));
        }

        let mut machines = Vec::new();
        for handle in handles {
            machines.push(handle.await.unwrap());
        }
        for machine in &machines[1..] {
            assert!(Arc::ptr_eq(&machines[0], machine));
        }
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_abort_unknown_split() {
        let registry = registry();
        let id = Uuid::new_v4();
        assert_eq!(registry.abort_split(id), Err(SplitError::NotFound(id)));
    }
}
