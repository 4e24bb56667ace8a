//! Tenant and integration identifiers.
//!
//! Every core artifact carries a [`TenantId`]; no cross-tenant query is ever
//! issued. Tenant and integration ids are small integers assigned by the
//! surrounding account system, so unlike most newtype ids in this codebase
//! these wrap `i64` rather than a string or UUID.

use std::fmt;

/// Tenant identifier. Governs the namespace of queues, vector collections,
/// and row visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct TenantId(pub i64);

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for TenantId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Integration identifier, scoped within a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct IntegrationId(pub i64);

impl fmt::Display for IntegrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for IntegrationId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Context threaded through every worker call so that tenant scoping can
/// never be forgotten at a call site.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub tenant_id: TenantId,
    pub integration_id: IntegrationId,
}

impl TenantContext {
    pub fn new(tenant_id: TenantId, integration_id: IntegrationId) -> Self {
        Self { tenant_id, integration_id }
    }
}
