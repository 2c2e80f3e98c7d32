//! Recipient acceptance detection
//!
//! A split commits only once the recipient nodes have left the donor set
//! and formed an independently addressable replica set under the recipient
//! name. Detection is a pure predicate over topology snapshots, driven by
//! the monitor's change-event stream: on every event the new snapshot is
//! re-evaluated from scratch (membership is eventually consistent, a verdict
//! must never be cached across events).

use crate::error::{Result, SplitError};
use crate::topology::{ReplicaSetConfig, TopologyChangeEvent, TopologySnapshot};
use std::collections::BTreeSet;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// What the recipient nodes must look like for the split to commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientCriteria {
    /// Replica set name the recipient members must report
    pub set_name: String,

    /// Hosts expected to form the recipient set
    pub member_hosts: BTreeSet<String>,
}

impl RecipientCriteria {
    /// Derive the criteria from the donor's configuration: the expected
    /// recipient members are exactly the donor members carrying the tag.
    pub fn from_config(config: &ReplicaSetConfig, tag_name: &str, set_name: &str) -> Self {
        Self {
            set_name: set_name.to_string(),
            member_hosts: config.tagged_hosts(tag_name).into_iter().collect(),
        }
    }
}

/// Decide whether the recipient set has coalesced.
///
/// True iff every expected member is present in the snapshot and reports
/// membership in the recipient set name. A member that is missing, not yet
/// reporting a set, or still reporting the donor's name keeps the predicate
/// false. Pure function of its inputs.
pub fn recipient_accepts(criteria: &RecipientCriteria, snapshot: &TopologySnapshot) -> bool {
    if criteria.member_hosts.is_empty() {
        return false;
    }
    criteria.member_hosts.iter().all(|host| {
        snapshot
            .member(host)
            .is_some_and(|m| m.set_name.as_deref() == Some(criteria.set_name.as_str()))
    })
}

/// Wait until a topology snapshot satisfies the recipient criteria.
///
/// Takes its own subscription on `events` and signals `started` once the
/// subscription is live (observability hook for callers that need to publish
/// only after the waiter is listening). Resolution paths:
/// - a satisfying snapshot arrives → `Ok(())`
/// - `token` fires first → `Err(Canceled)`
/// - the publisher goes away → `Err(ShutdownInProgress)`
///
/// The subscription is dropped on every path; lagged receivers skip stale
/// events and keep going, since only the newest snapshot matters.
pub async fn wait_for_recipient_acceptance(
    mut events: broadcast::Receiver<TopologyChangeEvent>,
    token: CancellationToken,
    criteria: RecipientCriteria,
    started: watch::Sender<bool>,
) -> Result<()> {
    // send_replace: must stick even before anyone subscribes.
    started.send_replace(true);
    debug!(
        set_name = %criteria.set_name,
        members = criteria.member_hosts.len(),
        "Waiting for recipient set to accept the split"
    );

    loop {
        tokio::select! {
            biased;

            _ = token.cancelled() => {
                debug!(set_name = %criteria.set_name, "Acceptance wait canceled");
                return Err(SplitError::Canceled);
            }

            event = events.recv() => match event {
                Ok(event) => {
                    if recipient_accepts(&criteria, &event.new) {
                        debug!(set_name = %criteria.set_name, "Recipient set accepted the split");
                        return Ok(());
                    }
                    trace!(set_name = %criteria.set_name, "Topology change did not satisfy acceptance");
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    trace!(skipped, "Acceptance waiter lagged behind topology events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(set_name = %criteria.set_name, "Topology monitor shut down during acceptance wait");
                    return Err(SplitError::ShutdownInProgress);
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{MemberDescription, TopologyPublisher, TopologyMonitor};

    const TAG: &str = "recipientNode";
    const RECIPIENT_SET: &str = "recipientSet";
    const DONOR_SET: &str = "donorSet";

    fn criteria() -> RecipientCriteria {
        let config = ReplicaSetConfig::new(
            DONOR_SET,
            vec!["d1:27017".to_string(), "d2:27017".to_string()],
        )
        .with_tagged_members(
            TAG,
            vec![
                "r1:27017".to_string(),
                "r2:27017".to_string(),
                "r3:27017".to_string(),
            ],
        );
        RecipientCriteria::from_config(&config, TAG, RECIPIENT_SET)
    }

    fn accepted_snapshot() -> TopologySnapshot {
        TopologySnapshot::from_members(vec![
            MemberDescription::new("r1:27017", RECIPIENT_SET),
            MemberDescription::new("r2:27017", RECIPIENT_SET),
            MemberDescription::new("r3:27017", RECIPIENT_SET),
        ])
    }

    #[test]
    fn test_accepts_when_all_members_report_recipient_set() {
        assert!(recipient_accepts(&criteria(), &accepted_snapshot()));
    }

    #[test]
    fn test_rejects_missing_member() {
        let mut snapshot = accepted_snapshot();
        snapshot.members.retain(|m| m.host != "r2:27017");
        assert!(!recipient_accepts(&criteria(), &snapshot));
    }

    #[test]
    fn test_rejects_wrong_set_name() {
        let snapshot = TopologySnapshot::from_members(vec![
            MemberDescription::new("r1:27017", RECIPIENT_SET),
            MemberDescription::new("r2:27017", DONOR_SET),
            MemberDescription::new("r3:27017", RECIPIENT_SET),
        ]);
        assert!(!recipient_accepts(&criteria(), &snapshot));
    }

    #[test]
    fn test_rejects_member_not_reporting_a_set() {
        let snapshot = TopologySnapshot::from_members(vec![
            MemberDescription::new("r1:27017", RECIPIENT_SET),
            MemberDescription::unreachable("r2:27017"),
            MemberDescription::new("r3:27017", RECIPIENT_SET),
        ]);
        assert!(!recipient_accepts(&criteria(), &snapshot));
    }

    #[test]
    fn test_rejects_empty_criteria() {
        let config = ReplicaSetConfig::new(DONOR_SET, vec!["d1:27017".to_string()]);
        let empty = RecipientCriteria::from_config(&config, TAG, RECIPIENT_SET);
        assert!(!recipient_accepts(&empty, &accepted_snapshot()));
    }

    #[tokio::test]
    async fn test_wait_resolves_on_satisfying_event() {
        let publisher = TopologyPublisher::new(16);
        let (started_tx, mut started_rx) = watch::channel(false);
        let token = CancellationToken::new();

        let wait = tokio::spawn(wait_for_recipient_acceptance(
            publisher.subscribe(),
            token,
            criteria(),
            started_tx,
        ));
        started_rx.wait_for(|started| *started).await.unwrap();

        // A non-satisfying event first, then the accepting one.
        publisher.publish(TopologySnapshot::empty(), TopologySnapshot::empty());
        publisher.publish(TopologySnapshot::empty(), accepted_snapshot());

        wait.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_wait_canceled() {
        let publisher = TopologyPublisher::new(16);
        let (started_tx, mut started_rx) = watch::channel(false);
        let token = CancellationToken::new();

        let wait = tokio::spawn(wait_for_recipient_acceptance(
            publisher.subscribe(),
            token.clone(),
            criteria(),
            started_tx,
        ));
        started_rx.wait_for(|started| *started).await.unwrap();
        token.cancel();

        assert_eq!(wait.await.unwrap(), Err(SplitError::Canceled));
    }

    #[tokio::test]
    async fn test_wait_surfaces_monitor_shutdown() {
        let publisher = TopologyPublisher::new(16);
        let (started_tx, mut started_rx) = watch::channel(false);

        let wait = tokio::spawn(wait_for_recipient_acceptance(
            publisher.subscribe(),
            CancellationToken::new(),
            criteria(),
            started_tx,
        ));
        started_rx.wait_for(|started| *started).await.unwrap();
        drop(publisher);

        assert_eq!(wait.await.unwrap(), Err(SplitError::ShutdownInProgress));
    }
}
