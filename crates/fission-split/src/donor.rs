//! Donor state machine
//!
//! One machine owns one split operation end to end: it drives the record
//! through `Uninitialized → DataSync → Blocking → Committed` (or `Aborted`),
//! persists every transition with quorum acknowledgment before completion
//! waiters can observe it, and races each asynchronous wait against the
//! abort signal, the interrupt signal, and the operation deadline.
//!
//! Cancellation causes are kept apart because their outcomes differ: an
//! abort is terminal and persisted, while an interrupt (leadership loss,
//! process shutdown) leaves the record at its last persisted state for
//! resumption by the next leader.

use crate::acceptance::{wait_for_recipient_acceptance, RecipientCriteria};
use crate::config::SplitConfig;
use crate::error::{Result, SplitError};
use crate::gate::WriteGate;
use crate::observability::SplitMetrics;
use crate::record::{SplitOutcome, SplitRecord, SplitState};
use crate::storage::SplitStore;
use crate::sync::SyncEngine;
use crate::topology::{ReplicaSetConfig, TopologyMonitor};
use chrono::Utc;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Collaborators shared by every split machine on this node
pub struct SplitContext {
    /// Process-wide split settings
    pub config: SplitConfig,

    /// The donor's current replica set configuration (source of recipient
    /// tagging)
    pub replica_config: ReplicaSetConfig,

    /// Durable record store
    pub store: Arc<dyn SplitStore>,

    /// Tenant write-blocking gate
    pub gate: Arc<dyn WriteGate>,

    /// Black-box data copy engine
    pub sync_engine: Arc<dyn SyncEngine>,

    /// Topology change-event source
    pub monitor: Arc<dyn TopologyMonitor>,
}

/// The state machine driving one split operation.
///
/// Constructed and owned by the registry, which guarantees at most one
/// in-memory machine per operation id; all record mutation goes through the
/// run loop, so persisted transitions are linearized per id.
pub struct DonorStateMachine {
    id: Uuid,
    ctx: Arc<SplitContext>,
    record: RwLock<SplitRecord>,
    abort_token: CancellationToken,
    interrupt_token: CancellationToken,
    completion_tx: watch::Sender<Option<Result<SplitOutcome>>>,
    monitor_started_tx: watch::Sender<bool>,
}

impl std::fmt::Debug for DonorStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DonorStateMachine")
            .field("id", &self.id)
            .field("state", &self.record.read().state)
            .finish_non_exhaustive()
    }
}

impl DonorStateMachine {
    /// Create a machine seeded from a (fresh or resumed) record
    pub(crate) fn new(record: SplitRecord, ctx: Arc<SplitContext>) -> Arc<Self> {
        let (completion_tx, _) = watch::channel(None);
        let (monitor_started_tx, _) = watch::channel(false);
        Arc::new(Self {
            id: record.id,
            ctx,
            record: RwLock::new(record),
            abort_token: CancellationToken::new(),
            interrupt_token: CancellationToken::new(),
            completion_tx,
            monitor_started_tx,
        })
    }

    /// Operation id
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current phase
    pub fn state(&self) -> SplitState {
        self.record.read().state
    }

    /// Snapshot of the record as last persisted
    pub fn record(&self) -> SplitRecord {
        self.record.read().clone()
    }

    /// Check whether these options describe the same operation this machine
    /// is running
    pub(crate) fn same_options(&self, other: &SplitRecord) -> bool {
        self.record.read().same_options(other)
    }

    /// Request an abort.
    ///
    /// Idempotent and safe from any state, including before the run loop has
    /// started. A running machine transitions to `Aborted`; a machine seeded
    /// from an already-aborted record completes with its recorded reason.
    pub fn try_abort(&self) {
        info!(split_id = %self.id, "Split abort requested");
        self.abort_token.cancel();
    }

    /// Interrupt the run loop without persisting anything (leadership lost
    /// or the host is shutting down). The completion future fails with
    /// `SteppedDown`; the durable record stays at its last persisted state
    /// and is eligible for resumption.
    pub fn interrupt(&self) {
        self.interrupt_token.cancel();
    }

    /// Wait for the operation to finish.
    ///
    /// Resolves exactly once with the terminal `{state, abort_reason}` pair,
    /// or with a non-terminal error when the run was interrupted before
    /// reaching a terminal state. Any number of callers may await this.
    pub async fn completion(&self) -> Result<SplitOutcome> {
        let mut rx = self.completion_tx.subscribe();
        let result = match rx.wait_for(|outcome| outcome.is_some()).await {
            Ok(outcome) => outcome.clone().unwrap_or(Err(SplitError::ShutdownInProgress)),
            Err(_) => Err(SplitError::ShutdownInProgress),
        };
        result
    }

    /// Wait until the acceptance waiter holds a live subscription on the
    /// topology monitor. Test/observability synchronization only; never
    /// resolves for a machine seeded from an already-terminal record.
    pub async fn monitor_started(&self) {
        let mut rx = self.monitor_started_tx.subscribe();
        let _ = rx.wait_for(|started| *started).await;
    }

    /// Run loop entry point, spawned once by the registry
    pub(crate) async fn run(self: Arc<Self>) {
        SplitMetrics::increment_started();
        let outcome = self.run_inner().await;

        match &outcome {
            Ok(outcome) if outcome.state == SplitState::Committed => {
                SplitMetrics::increment_committed();
                info!(split_id = %self.id, "Split committed");
            }
            Ok(outcome) => {
                SplitMetrics::increment_aborted();
                info!(
                    split_id = %self.id,
                    reason = ?outcome.abort_reason,
                    "Split aborted"
                );
            }
            Err(err) => {
                SplitMetrics::increment_interrupted();
                warn!(split_id = %self.id, error = %err, "Split run interrupted");
            }
        }

        // send_replace: the resolution must stick even when nobody has
        // subscribed yet; late completion() callers read the stored value.
        self.completion_tx.send_replace(Some(outcome));
    }

    async fn run_inner(&self) -> Result<SplitOutcome> {
        let initial = self.record.read().clone();

        // Records that are already terminal resolve without running phases.
        // A record created directly in `Aborted` (abort requested before the
        // split ever started) may carry no reason yet; backfill it once to
        // keep the reason-iff-aborted invariant.
        match initial.state {
            SplitState::Committed => return Ok(SplitOutcome::committed()),
            SplitState::Aborted => {
                let reason = match initial.abort_reason.clone() {
                    Some(reason) => reason,
                    None => {
                        self.persist_transition(SplitState::Aborted, Some(SplitError::Aborted))
                            .await?;
                        SplitError::Aborted
                    }
                };
                return Ok(SplitOutcome::aborted(reason));
            }
            SplitState::Uninitialized | SplitState::DataSync | SplitState::Blocking => {}
        }

        // Signals that fired before the loop started win immediately. A
        // resumed `Blocking` record means the gate is engaged, so an abort
        // here must still release it.
        if self.interrupt_token.is_cancelled() {
            return Err(SplitError::SteppedDown);
        }
        if self.abort_token.is_cancelled() {
            return self
                .abort_with(SplitError::Aborted, initial.state == SplitState::Blocking)
                .await;
        }

        // The deadline is anchored to the persisted record, not to this run,
        // so resuming after a leadership flap does not reset the clock.
        let remaining = initial.time_remaining(Utc::now()).unwrap_or(Duration::ZERO);
        let deadline = tokio::time::Instant::now() + remaining;

        // Start observing the recipient set right away. Events that arrive
        // while data sync is still running are buffered by the subscription,
        // so an early acceptance is not lost.
        let criteria = RecipientCriteria::from_config(
            &self.ctx.replica_config,
            &initial.recipient_tag_name,
            &initial.recipient_set_name,
        );
        let waiter_token = CancellationToken::new();
        let _waiter_guard = waiter_token.clone().drop_guard();
        let mut acceptance = tokio::spawn(wait_for_recipient_acceptance(
            self.ctx.monitor.subscribe(),
            waiter_token,
            criteria,
            self.monitor_started_tx.clone(),
        ));

        // Phase: data sync. Skipped when resuming a record that already
        // reached `Blocking`.
        if !matches!(initial.state, SplitState::Blocking) {
            if initial.state == SplitState::Uninitialized {
                self.persist_transition(SplitState::DataSync, None).await?;
            }

            let record = self.record.read().clone();
            // Precedence when several signals are ready in the same poll is
            // fixed by arm order: interrupt, then abort, then deadline, then
            // phase completion.
            tokio::select! {
                biased;

                _ = self.interrupt_token.cancelled() => {
                    return Err(SplitError::SteppedDown);
                }
                _ = self.abort_token.cancelled() => {
                    return self.abort_with(SplitError::Aborted, false).await;
                }
                _ = tokio::time::sleep_until(deadline) => {
                    return self.abort_with(SplitError::ExceededTimeLimit, false).await;
                }
                result = self.ctx.sync_engine.start(record.id, &record) => {
                    if let Err(err) = result {
                        let reason = match err {
                            SplitError::SyncFailed(_) => err,
                            other => SplitError::SyncFailed(other.to_string()),
                        };
                        return self.abort_with(reason, false).await;
                    }
                    debug!(split_id = %self.id, "Data sync complete");
                }
            }
        }

        // Phase: blocking. The gate goes up before the transition is
        // persisted, so a record observed in `Blocking` always has the gate
        // engaged; resuming a `Blocking` record re-engages it (idempotent).
        let record = self.record.read().clone();
        self.ctx.gate.block(&record.tenant_ids).await?;
        if record.state != SplitState::Blocking {
            if let Err(err) = self.persist_transition(SplitState::Blocking, None).await {
                let _ = self.ctx.gate.unblock(&record.tenant_ids).await;
                return Err(err);
            }
        }

        // Phase: wait for the recipient set to accept the split.
        tokio::select! {
            biased;

            _ = self.interrupt_token.cancelled() => {
                Err(SplitError::SteppedDown)
            }
            _ = self.abort_token.cancelled() => {
                self.abort_with(SplitError::Aborted, true).await
            }
            _ = tokio::time::sleep_until(deadline) => {
                self.abort_with(SplitError::ExceededTimeLimit, true).await
            }
            result = &mut acceptance => match result {
                Ok(Ok(())) => {
                    // Commit. The gate stays engaged: the recipient set now
                    // serves these tenants, and releasing the donor-side
                    // gate belongs to the caller's cleanup path.
                    self.persist_transition(SplitState::Committed, None).await?;
                    Ok(SplitOutcome::committed())
                }
                Ok(Err(err)) => Err(err),
                Err(join_err) => {
                    warn!(split_id = %self.id, error = %join_err, "Acceptance waiter task failed");
                    Err(SplitError::ShutdownInProgress)
                }
            },
        }
    }

    /// Terminal abort: release the gate when this run engaged it, then
    /// persist `Aborted` with the triggering reason.
    async fn abort_with(&self, reason: SplitError, gate_engaged: bool) -> Result<SplitOutcome> {
        if gate_engaged {
            let record = self.record.read().clone();
            self.ctx.gate.unblock(&record.tenant_ids).await?;
        }
        self.persist_transition(SplitState::Aborted, Some(reason.clone()))
            .await?;
        Ok(SplitOutcome::aborted(reason))
    }

    /// Persist a state transition at the configured write concern, then make
    /// it visible in memory. The registry guarantees a single writer per id.
    async fn persist_transition(
        &self,
        state: SplitState,
        abort_reason: Option<SplitError>,
    ) -> Result<()> {
        let mut updated = self.record.read().clone();
        updated.state = state;
        updated.abort_reason = abort_reason;
        self.ctx
            .store
            .persist(&updated, self.ctx.config.write_concern)
            .await?;
        *self.record.write() = updated;
        debug!(split_id = %self.id, state = ?state, "Persisted split state transition");
        Ok(())
    }
}
