//! Crucible - evaluation orchestration for LLM conversation systems
//!
//! Multi-tenant service that stores versioned evaluation suites, executes
//! them asynchronously against a target conversation system, aggregates
//! per-case and per-evaluator results, and exposes polling and streaming
//! progress surfaces.

pub mod api;
pub mod application;
pub mod config;
pub mod connector;
pub mod domain;
pub mod error;
pub mod evaluators;
pub mod orchestrator;
pub mod runner;
pub mod store;

pub use application::Application;
pub use error::{Error, Result};
