//! Tenant write-blocking gate
//!
//! During the blocking phase the donor rejects writes for the tenants being
//! split off. The gate is engaged when the machine enters `Blocking` and
//! released exactly once on every abort path that engaged it. On commit the
//! gate is deliberately left engaged: the recipient set now serves those
//! tenants, and releasing the donor-side gate belongs to the caller's
//! cleanup path, not to the commit transition.

use crate::error::Result;
use crate::record::TenantId;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use tracing::debug;

/// Write-blocking interface keyed by tenant id set
#[async_trait]
pub trait WriteGate: Send + Sync {
    /// Start rejecting writes for the given tenants
    async fn block(&self, tenants: &BTreeSet<TenantId>) -> Result<()>;

    /// Resume accepting writes for the given tenants
    async fn unblock(&self, tenants: &BTreeSet<TenantId>) -> Result<()>;
}

/// Process-local gate implementation.
///
/// Tracks the blocked set so the embedding request path (and tests) can ask
/// whether a tenant is currently blocked.
#[derive(Debug, Default)]
pub struct LocalWriteGate {
    blocked: RwLock<BTreeSet<TenantId>>,
}

impl LocalWriteGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether writes for a tenant are currently blocked
    pub fn is_blocked(&self, tenant: &str) -> bool {
        self.blocked.read().contains(tenant)
    }

    /// Number of currently blocked tenants
    pub fn blocked_count(&self) -> usize {
        self.blocked.read().len()
    }
}

#[async_trait]
impl WriteGate for LocalWriteGate {
    async fn block(&self, tenants: &BTreeSet<TenantId>) -> Result<()> {
        let mut blocked = self.blocked.write();
        for tenant in tenants {
            blocked.insert(tenant.clone());
        }
        debug!(count = tenants.len(), "Blocked tenant writes");
        Ok(())
    }

    async fn unblock(&self, tenants: &BTreeSet<TenantId>) -> Result<()> {
        let mut blocked = self.blocked.write();
        for tenant in tenants {
            blocked.remove(tenant);
        }
        debug!(count = tenants.len(), "Unblocked tenant writes");
        Ok(())
    }
}
