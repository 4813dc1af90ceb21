//! Request-scoped execution context.

use crate::id::{CorrelationId, TenantId, UserId};

/// Identity and tenancy of the caller, threaded through every core call path.
///
/// The context is an explicit, non-optional value: the tenant can never be
/// omitted at a call boundary, which is what makes cross-tenant access a
/// compile-time impossibility rather than a runtime check.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    tenant_id: TenantId,
    user_id: UserId,
    correlation_id: CorrelationId,
}

impl ExecutionContext {
    pub fn new(tenant_id: TenantId, user_id: UserId) -> Self {
        Self {
            tenant_id,
            user_id,
            correlation_id: CorrelationId::new(),
        }
    }

    /// Continue an existing trace instead of opening a new correlation id.
    pub fn with_correlation(tenant_id: TenantId, user_id: UserId, correlation_id: CorrelationId) -> Self {
        Self {
            tenant_id,
            user_id,
            correlation_id,
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }
}
