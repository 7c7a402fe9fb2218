//! # Cabin Cluster
//!
//! Brings a cluster of servers under test up and down.
//!
//! [`ClusterLifecycle`] writes each member's config file, bootstraps the
//! first member, starts the rest and reconfigures the cluster to include
//! everyone. It then starts and kills individual members on request and
//! keeps the running set consistent with the processes it owns. Processes
//! are launched through a [`Sandbox`](cabin_core::Sandbox): [`LocalSandbox`]
//! for real runs and [`MemorySandbox`] for tests.

pub mod config_files;
pub mod lifecycle;
pub mod logs;
pub mod sandbox;

pub use config_files::{config_file_name, render_member_config};
pub use lifecycle::{ClientCommand, ClientOutcome, ClientTarget, ClusterLifecycle};
pub use logs::{MemberLogs, MemoryLogs};
pub use sandbox::{is_local_host, LocalSandbox, MemoryProcess, MemorySandbox};
