//! Runtime loops driving the engine on tokio, and the agent-facing API.

pub mod agent;
pub mod api;
pub mod sweeper;
pub mod tokio_spawner;

pub use agent::LocalAgent;
pub use api::{
    decode_dispatch, decode_result, encode_dispatch, encode_result, health, task_status, Health,
    TaskStatusResponse,
};
pub use sweeper::{Shutdown, Sweeper};
pub use tokio_spawner::TokioSpawner;
