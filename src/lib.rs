//! # Taskfleet
//!
//! A task decomposition and dispatch engine for account-bound automation.
//!
//! A **task** describes work to run under many accounts on a schedule. Each
//! time its schedule fires, the engine splits it into one **job** per free
//! account, places each job on the least-loaded compatible **area**, and
//! enqueues a dispatch message for the agents of that area. Agents report
//! results keyed by an opaque `track_id`; the engine folds them back into the
//! task's counters and status without double counting.
//!
//! ## Key Properties
//!
//! - **Bounded concurrency**: account `using` and area `running_tasks`
//!   counters only move through compare-and-increment and floor at zero
//! - **Idempotent results**: a second result for a finished job is ignored
//! - **Monotonic timeouts**: job deadlines use `Instant`, never wall time
//! - **Per-task serialization**: no global lock; tasks are processed in parallel
//! - **Outage tolerance**: a store outage halts new dispatch, buffers results
//!   and resumes through [`core::Engine::recover`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Instant;
//!
//! use taskfleet::builders::EngineBuilder;
//! use taskfleet::config::EngineConfig;
//! use taskfleet::core::{Account, Area, NewTask, ResultMessage, SchedulerRecord, TaskCategory};
//!
//! let engine = EngineBuilder::new(EngineConfig::default())
//!     .category(like_category)
//!     .account(account)
//!     .area(Area::new(1, "eu-west"))
//!     .build()?;
//!
//! let task = engine.submit(new_task, now_ms)?;
//! engine.process_task(task, now_ms, Instant::now())?;
//!
//! // An agent pops the dispatch message from area 1 and later reports:
//! engine.deliver_result(ResultMessage::succeed(track_id, "done"), now_ms)?;
//! ```
//!
//! With the `tokio-runtime` feature, [`runtime::Sweeper`] drives the engine on
//! a fixed period and [`runtime::LocalAgent`] runs a [`core::Processor`]
//! against an area queue in-process.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Builders to construct engines from configuration.
pub mod builders;
/// Configuration models for the engine, its queues and timeouts.
pub mod config;
/// Core engine: entities, counters, scheduling, dispatch and aggregation.
pub mod core;
/// Infrastructure adapters for area queues and storage backends.
pub mod infra;
/// Runtime loops driving the engine on tokio, and the agent-facing API.
#[cfg(feature = "tokio-runtime")]
pub mod runtime;
/// Shared utilities.
pub mod util;
