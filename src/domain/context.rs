//! Request context facade
//!
//! Carries the caller's tenant identity, role, and idempotency key through
//! every component call. Constructed at the HTTP edge from the authorizer's
//! claims, never from request bodies.

use crate::domain::identifiers::{TenantId, UserId};
use crate::domain::types::IdempotencyKey;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Capabilities enumerated centrally; string-typed on the wire
pub mod capabilities {
    pub const SUITES_READ: &str = "suites:read";
    pub const SUITES_WRITE: &str = "suites:write";
    pub const EXECUTIONS_READ: &str = "executions:read";
    pub const EXECUTIONS_START: &str = "executions:start";
    pub const EXECUTIONS_CANCEL: &str = "executions:cancel";

    /// Every capability the service knows about
    pub const ALL: &[&str] = &[
        SUITES_READ,
        SUITES_WRITE,
        EXECUTIONS_READ,
        EXECUTIONS_START,
        EXECUTIONS_CANCEL,
    ];
}

/// Role resolved by the external authorizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Member,
    Viewer,
}

impl Role {
    /// Whether this role grants the given capability
    pub fn allows(self, capability: &str) -> bool {
        match self {
            Self::Admin => capabilities::ALL.contains(&capability),
            Self::Member => matches!(
                capability,
                capabilities::SUITES_READ
                    | capabilities::EXECUTIONS_READ
                    | capabilities::EXECUTIONS_START
                    | capabilities::EXECUTIONS_CANCEL
            ),
            Self::Viewer => matches!(
                capability,
                capabilities::SUITES_READ | capabilities::EXECUTIONS_READ
            ),
        }
    }
}

/// Claims produced by the external authorizer for a bearer credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub role: Role,
}

/// Uniform view of the caller threaded through every component call
#[derive(Debug, Clone)]
pub struct RequestContext {
    tenant_id: TenantId,
    user_id: UserId,
    role: Role,
    idempotency_key: Option<IdempotencyKey>,
}

impl RequestContext {
    /// Build a context from authorizer claims; the only constructor used by
    /// the HTTP edge
    pub fn from_claims(claims: Claims) -> Self {
        Self {
            tenant_id: claims.tenant_id,
            user_id: claims.user_id,
            role: claims.role,
            idempotency_key: None,
        }
    }

    /// System identity used by background workers acting on a tenant's
    /// behalf after the job was authorized at start time
    pub fn for_worker(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            user_id: UserId::generate(),
            role: Role::Admin,
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: Option<IdempotencyKey>) -> Self {
        self.idempotency_key = key;
        self
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn idempotency_key(&self) -> Option<&IdempotencyKey> {
        self.idempotency_key.as_ref()
    }

    /// Fail with `Forbidden` when the current role lacks the capability
    pub fn require(&self, capability: &str) -> Result<()> {
        if self.role.allows(capability) {
            Ok(())
        } else {
            Err(Error::Forbidden {
                capability: capability.to_string(),
            })
        }
    }
}
