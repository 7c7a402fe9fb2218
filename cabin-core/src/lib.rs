//! # Cabin Core
//!
//! Shared building blocks for the cabin fault-injection harness, which drives
//! a replicated, consensus-based server cluster through crashes and restarts
//! and watches the members' logs to judge whether the cluster stays safe.
//!
//! ## Components
//!
//! - **Types**: [`MemberId`], [`MemberIdentity`] and [`Term`]
//! - **Cluster**: [`ClusterSpec`], the static membership and quorum size
//! - **Sandbox**: the [`Sandbox`] trait every process launcher implements
//! - **Logs**: the [`LogSource`] trait the leader detector reads through
//! - **Clock**: [`Clock`] with a wall-clock and a virtual implementation
//! - **Configuration**: [`HarnessConfig`] and [`KillPolicy`]
//! - **Results**: `;`-delimited result rows for external plotting
//! - **Error Handling**: [`HarnessError`] and the [`Result`] alias

pub mod clock;
pub mod cluster;
pub mod config;
pub mod error;
pub mod logs;
pub mod results;
pub mod sandbox;
pub mod types;

pub use clock::{Clock, SystemClock, VirtualClock};
pub use cluster::ClusterSpec;
pub use config::{HarnessConfig, KillPolicy};
pub use error::*;
pub use logs::LogSource;
pub use results::{ResultRow, ResultWriter};
pub use sandbox::{LaunchRequest, ProcessHandle, ProcessStatus, Sandbox};
pub use types::*;
