//! # Error Types
//!
//! Error handling for the cabin fault-injection harness.

use crate::{MemberId, Term};
use thiserror::Error;

/// Errors raised while driving or observing a cluster under test.
///
/// # Error Categories
///
/// - **Infrastructure**: the sandbox could not start, poll or kill a process,
///   or a process it supervises died on its own
/// - **Protocol violations**: the cluster under test broke a safety property
/// - **Harness misuse**: operations on members in the wrong state, bad
///   configuration, malformed input
/// - **Bounded waits**: a wait ran past its deadline
///
/// # Examples
///
/// ```rust
/// use cabin_core::HarnessError;
///
/// let error = HarnessError::sandbox("ssh exited with status 255");
/// assert!(!error.is_retryable());
/// assert!(!error.is_fatal());
/// ```
#[derive(Error, Debug)]
pub enum HarnessError {
    /// The sandbox failed to start, poll or kill a process
    #[error("Sandbox error: {message}")]
    Sandbox { message: String },

    /// A supervised process exited unexpectedly
    #[error("Process failed: {description} ({status})")]
    ProcessFailed { description: String, status: String },

    /// The member must be running for this operation
    #[error("Server {member_id} is not running")]
    MemberNotRunning { member_id: MemberId },

    /// The member must be down for this operation
    #[error("Server {member_id} is already running")]
    MemberAlreadyRunning { member_id: MemberId },

    /// A log or command referenced a member outside the cluster
    #[error("Server {member_id} is not a member of the cluster")]
    UnknownMember { member_id: MemberId },

    /// Two running members agree on a term but not on its leader
    #[error("Safety violation in term {term}: {details}")]
    SafetyViolation { term: Term, details: String },

    /// Not enough members are running for the protocol to make progress
    #[error("Quorum not available: {current}/{required} servers running")]
    QuorumNotAvailable { current: usize, required: usize },

    /// A bounded wait ran out of time
    #[error("Timeout occurred: {operation}")]
    Timeout { operation: String },

    /// Invalid harness or estimator configuration
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// A latency sample the estimator cannot use
    #[error("Invalid sample {value}: {reason}")]
    InvalidSample { value: f64, reason: String },

    /// Malformed textual input
    #[error("Parse error: {message}")]
    Parse { message: String },

    /// File system failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Unexpected internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Result type used across the harness crates.
pub type Result<T> = std::result::Result<T, HarnessError>;

impl HarnessError {
    pub fn sandbox(message: impl Into<String>) -> Self {
        Self::Sandbox {
            message: message.into(),
        }
    }

    pub fn process_failed(description: impl Into<String>, status: impl Into<String>) -> Self {
        Self::ProcessFailed {
            description: description.into(),
            status: status.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether waiting longer or trying again could succeed.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cabin_core::HarnessError;
    ///
    /// assert!(HarnessError::timeout("stable leader").is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::QuorumNotAvailable { .. })
    }

    /// Whether this error is an observation about the cluster under test
    /// (as opposed to a problem with the harness itself).
    ///
    /// Fatal errors abort a run immediately and are never retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::SafetyViolation { .. } | Self::ProcessFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let violation = HarnessError::SafetyViolation {
            term: Term::new(4),
            details: "server 1 follows 2, server 3 follows 3".to_string(),
        };
        assert!(violation.is_fatal());
        assert!(!violation.is_retryable());

        let quorum = HarnessError::QuorumNotAvailable {
            current: 1,
            required: 2,
        };
        assert!(quorum.is_retryable());
        assert!(!quorum.is_fatal());
    }

    #[test]
    fn test_display() {
        let error = HarnessError::MemberNotRunning {
            member_id: MemberId::new(2),
        };
        assert_eq!(error.to_string(), "Server 2 is not running");
    }
}
