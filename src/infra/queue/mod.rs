//! Area queue backends.

pub mod memory;

pub use memory::InMemoryAreaQueue;
