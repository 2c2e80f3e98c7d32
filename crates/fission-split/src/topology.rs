//! Replica set topology monitoring
//!
//! The split subsystem consumes membership changes as a publish-subscribe
//! stream: the monitor publishes a [`TopologyChangeEvent`] (previous and new
//! snapshot) whenever its view of the replica set changes, and acceptance
//! waiters evaluate each new snapshot. Membership is eventually consistent,
//! so consumers re-evaluate on every event rather than caching a verdict.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::broadcast;

/// Network address of a replica set member (host:port)
pub type MemberHost = String;

/// A member as seen by the topology monitor at one point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberDescription {
    /// Member address
    pub host: MemberHost,

    /// Replica set name the member itself reports, `None` while unreachable
    /// or not yet reporting
    pub set_name: Option<String>,

    /// Member tags (e.g. the tag marking recipient nodes)
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl MemberDescription {
    /// Create a member description reporting the given set name
    pub fn new(host: impl Into<MemberHost>, set_name: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            set_name: Some(set_name.into()),
            tags: BTreeMap::new(),
        }
    }

    /// Create a member description for a member that is not reporting a set
    pub fn unreachable(host: impl Into<MemberHost>) -> Self {
        Self {
            host: host.into(),
            set_name: None,
            tags: BTreeMap::new(),
        }
    }

    /// Attach a tag
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// Point-in-time view of which members belong to which named set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologySnapshot {
    /// Known members
    pub members: Vec<MemberDescription>,
}

impl TopologySnapshot {
    /// Empty snapshot (monitor has not observed anything yet)
    pub fn empty() -> Self {
        Self::default()
    }

    /// Snapshot from a list of members
    pub fn from_members(members: Vec<MemberDescription>) -> Self {
        Self { members }
    }

    /// Find a member by host
    pub fn member(&self, host: &str) -> Option<&MemberDescription> {
        self.members.iter().find(|m| m.host == host)
    }
}

/// A topology change observed by the monitor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyChangeEvent {
    /// The view before the change
    pub previous: TopologySnapshot,
    /// The view after the change
    pub new: TopologySnapshot,
}

/// Source of topology change events.
///
/// One method by design: the monitor publishes, consumers subscribe. Every
/// subscriber gets its own receiver; dropping the receiver unsubscribes.
pub trait TopologyMonitor: Send + Sync {
    /// Subscribe to topology change events
    fn subscribe(&self) -> broadcast::Receiver<TopologyChangeEvent>;
}

/// Broadcast-backed event publisher.
///
/// The embedding process (or a test) publishes topology transitions; the
/// split subsystem only ever consumes them. Dropping the publisher closes
/// the stream, which waiters surface as a shutdown.
#[derive(Debug)]
pub struct TopologyPublisher {
    tx: broadcast::Sender<TopologyChangeEvent>,
}

impl TopologyPublisher {
    /// Create a publisher with the given event buffer capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish a change event. Returns the number of live subscribers.
    pub fn publish(&self, previous: TopologySnapshot, new: TopologySnapshot) -> usize {
        // A send error just means nobody is listening right now.
        self.tx
            .send(TopologyChangeEvent { previous, new })
            .unwrap_or(0)
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl TopologyMonitor for TopologyPublisher {
    fn subscribe(&self) -> broadcast::Receiver<TopologyChangeEvent> {
        self.tx.subscribe()
    }
}

/// The donor's own replica set configuration.
///
/// This is where recipient tagging lives: the nodes that will form the
/// recipient set are regular members of the donor's configuration carrying
/// the recipient tag until the split commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaSetConfig {
    /// The donor replica set's name
    pub set_name: String,

    /// Configured members with their tags
    pub members: Vec<MemberConfig>,
}

/// One member entry of a [`ReplicaSetConfig`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberConfig {
    /// Member address
    pub host: MemberHost,

    /// Member tags
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl ReplicaSetConfig {
    /// Create a config with untagged members
    pub fn new(set_name: impl Into<String>, hosts: Vec<MemberHost>) -> Self {
        Self {
            set_name: set_name.into(),
            members: hosts
                .into_iter()
                .map(|host| MemberConfig {
                    host,
                    tags: BTreeMap::new(),
                })
                .collect(),
        }
    }

    /// Add members carrying the given tag (the reconfig that stages
    /// recipient nodes into the donor set)
    pub fn with_tagged_members(mut self, tag: &str, hosts: Vec<MemberHost>) -> Self {
        for host in hosts {
            self.members.push(MemberConfig {
                host,
                tags: BTreeMap::from([(tag.to_string(), "true".to_string())]),
            });
        }
        self
    }

    /// Hosts of members carrying the given tag
    pub fn tagged_hosts(&self, tag: &str) -> Vec<MemberHost> {
        self.members
            .iter()
            .filter(|m| m.tags.contains_key(tag))
            .map(|m| m.host.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_hosts() {
        let config = ReplicaSetConfig::new(
            "donorSet",
            vec!["a:27017".to_string(), "b:27017".to_string()],
        )
        .with_tagged_members("recipientNode", vec!["r1:27017".to_string(), "r2:27017".to_string()]);

        assert_eq!(config.members.len(), 4);
        assert_eq!(
            config.tagged_hosts("recipientNode"),
            vec!["r1:27017".to_string(), "r2:27017".to_string()]
        );
        assert!(config.tagged_hosts("otherTag").is_empty());
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let publisher = TopologyPublisher::new(16);
        let mut rx = publisher.subscribe();
        assert_eq!(publisher.subscriber_count(), 1);

        let new = TopologySnapshot::from_members(vec![MemberDescription::new(
            "r1:27017",
            "recipientSet",
        )]);
        publisher.publish(TopologySnapshot::empty(), new.clone());

        let event = rx.recv().await.unwrap();
        assert_eq!(event.previous, TopologySnapshot::empty());
        assert_eq!(event.new, new);
    }
}
