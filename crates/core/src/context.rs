//! Per-request tenant + actor context.

use crate::error::{DomainError, DomainResult};
use crate::id::{TenantId, UserId};

/// Resolved context for one inventory call.
///
/// Immutable, and only constructible through [`RequestContext::resolve`], so
/// holding one proves the tenant was checked. There is no default tenant.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RequestContext {
    tenant_id: TenantId,
    actor: UserId,
}

impl RequestContext {
    /// Build a context from what the surrounding service extracted.
    ///
    /// A missing or nil tenant is rejected and logged on the `security` target.
    pub fn resolve(tenant_id: Option<TenantId>, actor: Option<UserId>) -> DomainResult<Self> {
        let tenant_id = match tenant_id {
            Some(t) if !t.is_nil() => t,
            other => {
                tracing::warn!(
                    target: "security",
                    tenant_id = ?other,
                    actor = ?actor,
                    "rejected inventory call without a resolvable tenant"
                );
                return Err(DomainError::InvalidTenantContext);
            }
        };

        let actor = actor.ok_or_else(|| DomainError::validation("acting user is required"))?;

        Ok(Self { tenant_id, actor })
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn actor(&self) -> UserId {
        self.actor
    }
}
