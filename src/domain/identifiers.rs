//! Domain entity identifiers
//!
//! This module provides type-safe identifiers for the core entities. Each
//! identifier type is a newtype around UUID v7, providing time-ordered
//! generation suitable for relational primary keys and pagination tiebreaks.

use nutype::nutype;
use uuid::Uuid;

/// Unique identifier for a tenant
#[nutype(derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    AsRef
))]
pub struct TenantId(Uuid);

impl TenantId {
    pub fn generate() -> Self {
        Self::new(Uuid::now_v7())
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::generate()
    }
}

/// Unique identifier for a user within a tenant
#[nutype(derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    AsRef
))]
pub struct UserId(Uuid);

impl UserId {
    pub fn generate() -> Self {
        Self::new(Uuid::now_v7())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::generate()
    }
}

/// Unique identifier for an evaluation suite
#[nutype(derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    AsRef
))]
pub struct SuiteId(Uuid);

impl SuiteId {
    pub fn generate() -> Self {
        Self::new(Uuid::now_v7())
    }
}

impl Default for SuiteId {
    fn default() -> Self {
        Self::generate()
    }
}

/// Unique identifier for a test case
#[nutype(derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    AsRef
))]
pub struct CaseId(Uuid);

impl CaseId {
    pub fn generate() -> Self {
        Self::new(Uuid::now_v7())
    }
}

impl Default for CaseId {
    fn default() -> Self {
        Self::generate()
    }
}

/// Unique identifier for a suite execution
#[nutype(derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    AsRef
))]
pub struct ExecutionId(Uuid);

impl ExecutionId {
    pub fn generate() -> Self {
        Self::new(Uuid::now_v7())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::generate()
    }
}

/// Unique identifier for a per-(case, evaluator) result row
#[nutype(derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    AsRef
))]
pub struct CaseResultId(Uuid);

impl CaseResultId {
    pub fn generate() -> Self {
        Self::new(Uuid::now_v7())
    }
}

impl Default for CaseResultId {
    fn default() -> Self {
        Self::generate()
    }
}
