use async_trait::async_trait;

use crate::{MemberIdentity, Result};

/// Read access to the logs the members of a cluster write.
///
/// Logs are append-only while a member runs and start over when it is
/// relaunched.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Full log of `member` so far, or `None` if the member has not written a
    /// log yet.
    async fn read_log(&self, member: &MemberIdentity) -> Result<Option<String>>;
}
