//! Durable split state document

use crate::error::SplitError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use uuid::Uuid;

/// Opaque tenant identifier (the unit of write blocking)
pub type TenantId = String;

/// Phase of a split operation.
///
/// Advances monotonically `Uninitialized → DataSync → Blocking → Committed`;
/// `Aborted` is reachable from every non-terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum SplitState {
    /// Created but not yet started
    #[default]
    Uninitialized,
    /// Copying data to the recipient nodes
    DataSync,
    /// Tenant writes are blocked while the recipient set forms
    Blocking,
    /// The recipient set accepted the split (terminal)
    Committed,
    /// The split was abandoned (terminal)
    Aborted,
}

impl SplitState {
    /// Check if this state ends the operation
    pub fn is_terminal(&self) -> bool {
        matches!(self, SplitState::Committed | SplitState::Aborted)
    }
}

/// The durable record of one split operation.
///
/// This is the only cross-process shared mutable state of the subsystem.
/// All mutation goes through the owning donor state machine and is persisted
/// with quorum acknowledgment before completion waiters can observe it. The
/// field set must stay additive-compatible across versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitRecord {
    /// Operation identifier, immutable
    pub id: Uuid,

    /// Tenants whose writes are blocked during the blocking phase, immutable
    pub tenant_ids: BTreeSet<TenantId>,

    /// Member tag selecting the nodes that form the recipient set, immutable
    pub recipient_tag_name: String,

    /// Replica set name the recipient nodes must report once independent,
    /// immutable
    pub recipient_set_name: String,

    /// Current phase
    pub state: SplitState,

    /// Why the split aborted; present iff `state == Aborted`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<SplitError>,

    /// When the operation was created
    pub started_at: DateTime<Utc>,

    /// Deadline after which the operation aborts with `ExceededTimeLimit`.
    /// Derived from `started_at` at creation so that resumption after a
    /// leadership flap does not reset the clock.
    pub expires_at: DateTime<Utc>,
}

impl SplitRecord {
    /// Create a fresh record in `Uninitialized` with a deadline derived from
    /// the given timeout.
    pub fn new(
        id: Uuid,
        tenant_ids: BTreeSet<TenantId>,
        recipient_tag_name: impl Into<String>,
        recipient_set_name: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let started_at = Utc::now();
        // Saturate on absurd timeouts rather than overflow the calendar.
        let expires_at = chrono::Duration::from_std(timeout)
            .ok()
            .and_then(|d| started_at.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            id,
            tenant_ids,
            recipient_tag_name: recipient_tag_name.into(),
            recipient_set_name: recipient_set_name.into(),
            state: SplitState::Uninitialized,
            abort_reason: None,
            started_at,
            expires_at,
        }
    }

    /// Check whether two records describe the same operation (everything
    /// except the mutable `state`/`abort_reason` pair matches).
    ///
    /// Used by the registry to reject a `get_or_create` that reuses an id
    /// with different options.
    pub fn same_options(&self, other: &SplitRecord) -> bool {
        self.id == other.id
            && self.tenant_ids == other.tenant_ids
            && self.recipient_tag_name == other.recipient_tag_name
            && self.recipient_set_name == other.recipient_set_name
    }

    /// Time remaining until the deadline, `None` once past it
    pub fn time_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        (self.expires_at - now).to_std().ok()
    }
}

/// The resolved outcome of a split, observed through the completion future.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitOutcome {
    /// Terminal state, `Committed` or `Aborted`
    pub state: SplitState,
    /// Present iff `state == Aborted`
    pub abort_reason: Option<SplitError>,
}

impl SplitOutcome {
    /// Outcome for a committed split
    pub fn committed() -> Self {
        Self {
            state: SplitState::Committed,
            abort_reason: None,
        }
    }

    /// Outcome for an aborted split
    pub fn aborted(reason: SplitError) -> Self {
        Self {
            state: SplitState::Aborted,
            abort_reason: Some(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(timeout: Duration) -> SplitRecord {
        SplitRecord::new(
            Uuid::new_v4(),
            BTreeSet::from(["tenant1".to_string(), "tenantAB".to_string()]),
            "recipientNode",
            "recipientSet",
            timeout,
        )
    }

    #[test]
    fn test_terminal_states() {
        assert!(SplitState::Committed.is_terminal());
        assert!(SplitState::Aborted.is_terminal());
        assert!(!SplitState::Uninitialized.is_terminal());
        assert!(!SplitState::DataSync.is_terminal());
        assert!(!SplitState::Blocking.is_terminal());
    }

    #[test]
    fn test_deadline_from_timeout() {
        let rec = record(Duration::from_secs(600));
        assert_eq!(rec.expires_at - rec.started_at, chrono::Duration::seconds(600));
        assert!(rec.time_remaining(rec.started_at).is_some());
        assert!(rec
            .time_remaining(rec.expires_at + chrono::Duration::seconds(1))
            .is_none());
    }

    #[test]
    fn test_same_options_ignores_state() {
        let a = record(Duration::from_secs(60));
        let mut b = a.clone();
        b.state = SplitState::Blocking;
        assert!(a.same_options(&b));

        let mut c = a.clone();
        c.recipient_set_name = "otherSet".to_string();
        assert!(!a.same_options(&c));
    }

    #[test]
    fn test_record_roundtrip_tolerates_added_fields() {
        let rec = record(Duration::from_secs(60));
        let mut value = serde_json::to_value(&rec).unwrap();
        // A future writer may add fields; an older field set must still load.
        value["futureField"] = serde_json::json!("ignored");
        let back: SplitRecord = serde_json::from_value(value).unwrap();
        assert!(rec.same_options(&back));
        assert_eq!(back.abort_reason, None);
    }
}
