//! Builders to construct engines from configuration.

pub mod engine_builder;

pub use engine_builder::{memory_audit_sink, EngineBuilder};
