//! [`Sandbox`](cabin_core::Sandbox) implementations.

pub mod local;
pub mod memory;

pub use local::{is_local_host, LocalSandbox};
pub use memory::{MemoryProcess, MemorySandbox};
