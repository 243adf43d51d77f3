//! Domain types and business logic for Crucible
//!
//! This module contains the core domain types that represent the business
//! concepts of Crucible, following type-driven development principles.

pub mod context;
pub mod events;
pub mod execution;
pub mod identifiers;
pub mod suite;
pub mod types;
pub mod verdict;

pub use context::*;
pub use events::*;
pub use execution::*;
pub use identifiers::*;
pub use suite::*;
pub use types::*;
pub use verdict::*;
