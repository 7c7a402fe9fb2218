//! Process sandbox abstraction.
//!
//! The sandbox owns every OS process the harness starts. Callers only ever
//! see opaque [`ProcessHandle`]s.

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;

use crate::Result;

/// Opaque token for a process started by a [`Sandbox`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessHandle(pub u64);

impl fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "process#{}", self.0)
    }
}

/// Everything the sandbox needs to launch one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    /// Address of the host to run on; only the host part is used
    pub address: String,
    /// Shell command line
    pub command: String,
    /// Background commands return immediately; foreground commands are
    /// waited for and must exit successfully
    pub background: bool,
    /// File receiving the process's stdout and stderr, truncated on launch
    pub output: Option<PathBuf>,
}

impl LaunchRequest {
    pub fn background(address: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            command: command.into(),
            background: true,
            output: None,
        }
    }

    pub fn foreground(address: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            command: command.into(),
            background: false,
            output: None,
        }
    }

    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Running,
    /// Exit code, `None` when the process was terminated by a signal
    Exited(Option<i32>),
}

impl ProcessStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn success(&self) -> bool {
        matches!(self, Self::Exited(Some(0)))
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Exited(Some(code)) => write!(f, "exit status {}", code),
            Self::Exited(None) => write!(f, "terminated by signal"),
        }
    }
}

/// Starts, polls and kills processes on behalf of the harness.
///
/// Implementations must treat a background process that exits with a
/// non-zero status without having been killed as a fatal failure, reported
/// by the next [`check_failures`](Sandbox::check_failures) call.
#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn start(&self, request: LaunchRequest) -> Result<ProcessHandle>;

    async fn kill(&self, handle: ProcessHandle) -> Result<()>;

    async fn poll(&self, handle: ProcessHandle) -> Result<ProcessStatus>;

    /// Returns an error if any supervised process has failed.
    async fn check_failures(&self) -> Result<()>;

    /// Kills every process still alive and releases all handles.
    async fn shutdown(&self) -> Result<()>;
}
