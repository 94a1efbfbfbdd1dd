//! Infrastructure adapters for area queues and storage backends.

pub mod queue;
pub mod store;

pub use queue::InMemoryAreaQueue;
pub use store::InMemoryStore;
