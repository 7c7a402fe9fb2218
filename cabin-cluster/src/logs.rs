//! Where member, bootstrap and client output goes, and how it is read back.

use async_trait::async_trait;
use cabin_core::{LogSource, MemberId, MemberIdentity, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

/// Log files under the debug directory.
///
/// - `server_<id>`: output of a member, truncated on every (re)launch
/// - `bootstrap_server`: output of the bootstrap run
/// - `client_command_<n>`: output of the n-th client command
#[derive(Debug, Clone)]
pub struct MemberLogs {
    dir: PathBuf,
}

impl MemberLogs {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn member_log(&self, member: &MemberIdentity) -> PathBuf {
        self.dir.join(format!("server_{}", member.id))
    }

    pub fn bootstrap_log(&self) -> PathBuf {
        self.dir.join("bootstrap_server")
    }

    pub fn client_log(&self, number: usize) -> PathBuf {
        self.dir.join(format!("client_command_{}", number))
    }

    pub async fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    /// Removes every file in the debug directory, leaving the directory.
    pub async fn clear(&self) -> Result<usize> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl LogSource for MemberLogs {
    async fn read_log(&self, member: &MemberIdentity) -> Result<Option<String>> {
        match fs::read(self.member_log(member)).await {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory member logs for tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryLogs {
    logs: Arc<RwLock<HashMap<MemberId, String>>>,
}

impl MemoryLogs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_line(&self, member: MemberId, line: impl AsRef<str>) {
        let mut logs = self.logs.write();
        let log = logs.entry(member).or_default();
        log.push_str(line.as_ref());
        log.push('\n');
    }

    /// Empties a member's log, as a relaunch does.
    pub fn truncate(&self, member: MemberId) {
        self.logs.write().insert(member, String::new());
    }

    pub fn remove(&self, member: MemberId) {
        self.logs.write().remove(&member);
    }
}

#[async_trait]
impl LogSource for MemoryLogs {
    async fn read_log(&self, member: &MemberIdentity) -> Result<Option<String>> {
        Ok(self.logs.read().get(&member.id).cloned())
    }
}
