//! # Core Types
//!
//! Identities and epochs shared by every part of the harness.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric identifier of a cluster seat.
///
/// This is the `serverId` written into a member's configuration file and the
/// number the server under test prints when it announces a leader.
///
/// # Examples
///
/// ```rust
/// use cabin_core::MemberId;
///
/// let id = MemberId::new(3);
/// assert_eq!(id.value(), 3);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MemberId(pub u64);

impl MemberId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for MemberId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// A cluster seat: its id and the address it listens on.
///
/// Identities are fixed for the lifetime of a cluster. A member that is
/// killed and relaunched keeps the same identity.
///
/// # Examples
///
/// ```rust
/// use cabin_core::MemberIdentity;
///
/// let member = MemberIdentity::new(1, "127.0.0.1:5254");
/// assert_eq!(member.host(), "127.0.0.1");
/// assert_eq!(member.to_string(), "server 1 at 127.0.0.1:5254");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MemberIdentity {
    /// Seat identifier
    pub id: MemberId,
    /// Listen address, usually `host:port`
    pub address: String,
}

impl MemberIdentity {
    pub fn new(id: u64, address: impl Into<String>) -> Self {
        Self {
            id: MemberId(id),
            address: address.into(),
        }
    }

    /// Host part of the address, used to decide where the process runs.
    pub fn host(&self) -> &str {
        host_of(&self.address)
    }
}

impl fmt::Display for MemberIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "server {} at {}", self.id, self.address)
    }
}

/// Strips a trailing `:port` from an address. Brackets around IPv6 literals
/// are dropped.
pub fn host_of(address: &str) -> &str {
    if let Some(rest) = address.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match address.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => {
            host
        }
        _ => address,
    }
}

/// Leadership epoch of the consensus protocol under test.
///
/// Terms only ever grow. [`Term::ZERO`] precedes every term a server can
/// announce, so it is the baseline for "any leader at all".
///
/// # Examples
///
/// ```rust
/// use cabin_core::Term;
///
/// let term = Term::new(5);
/// assert!(term.next() > term);
/// assert!(term > Term::ZERO);
/// ```
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Term(pub u64);

impl Term {
    pub const ZERO: Term = Term(0);

    pub fn new(term: u64) -> Self {
        Self(term)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// Number of terms between `earlier` and `self`, zero if `earlier` is not
    /// actually earlier.
    pub fn since(&self, earlier: Term) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Term {
    fn from(term: u64) -> Self {
        Self(term)
    }
}
