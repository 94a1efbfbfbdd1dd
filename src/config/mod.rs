//! Configuration models for the engine, its queues and timeouts.

pub mod engine;

pub use engine::EngineConfig;
