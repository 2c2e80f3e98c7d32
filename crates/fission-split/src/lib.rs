//! # Fission Split
//!
//! Donor-side shard split orchestration for Fission serverless clusters:
//! a durable, resumable state machine that carves a tagged subset of replica
//! nodes out of the donor set and hands them a slice of tenants, surviving
//! leadership changes without losing progress or running twice.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Split Subsystem                        │
//! ├────────────────┬──────────────────┬─────────────────────────┤
//! │  SplitRegistry │ DonorStateMachine│   Acceptance Waiter     │
//! │  (lifecycle)   │  (run loop)      │   (topology events)     │
//! ├────────────────┼──────────────────┼─────────────────────────┤
//! │ • one machine  │ • Uninitialized  │ • subscribe to monitor  │
//! │   per id       │   → DataSync     │ • pure predicate per    │
//! │ • resume_all / │   → Blocking     │   snapshot              │
//! │   cancel_all   │   → Committed    │ • cancel / shutdown     │
//! │ • caller API   │ • Aborted from   │   resolution paths      │
//! │                │   any live state │                         │
//! └────────────────┴──────────────────┴─────────────────────────┘
//! ```
//!
//! Collaborators are consumed as traits: a quorum-acknowledging record store
//! ([`SplitStore`]), a tenant write gate ([`WriteGate`]), a topology monitor
//! ([`TopologyMonitor`]) and a data-copy engine ([`SyncEngine`]). In-memory
//! implementations of each ship in-crate for standalone and test use.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use fission_split::{SplitConfig, SplitContext, SplitRegistry};
//!
//! let registry = SplitRegistry::new(SplitContext {
//!     config: SplitConfig::default(),
//!     replica_config,
//!     store,
//!     gate,
//!     sync_engine,
//!     monitor,
//! });
//!
//! // Leadership acquired: pick up where the previous leader stopped.
//! registry.resume_all().await?;
//!
//! // Start a split and wait for it to commit or abort.
//! let machine = registry
//!     .start_split(id, tenant_ids, "recipientNode", "recipientSet")
//!     .await?;
//! let outcome = machine.completion().await?;
//!
//! // Leadership lost: drop in-memory state, keep durable records.
//! registry.cancel_all();
//! ```

pub mod acceptance;
pub mod config;
pub mod donor;
pub mod error;
pub mod gate;
pub mod observability;
pub mod record;
pub mod registry;
pub mod storage;
pub mod sync;
pub mod topology;

// Re-export main types
pub use acceptance::{recipient_accepts, wait_for_recipient_acceptance, RecipientCriteria};
pub use config::SplitConfig;
pub use donor::{DonorStateMachine, SplitContext};
pub use error::{Result, SplitError};
pub use gate::{LocalWriteGate, WriteGate};
pub use observability::SplitMetrics;
pub use record::{SplitOutcome, SplitRecord, SplitState, TenantId};
pub use registry::SplitRegistry;
pub use storage::{MemoryStore, SplitStore, WriteConcern};
pub use sync::{ImmediateSync, SyncEngine};
pub use topology::{
    MemberConfig, MemberDescription, MemberHost, ReplicaSetConfig, TopologyChangeEvent,
    TopologyMonitor, TopologyPublisher, TopologySnapshot,
};
