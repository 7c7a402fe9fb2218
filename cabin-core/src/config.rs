use std::path::PathBuf;
use std::time::Duration;

/// Limits on how many members the fault scheduler may take down at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KillPolicy {
    /// Never leave fewer than a majority of the cluster running
    #[default]
    PreserveQuorum,
    /// Never leave fewer than this many members running
    MinAlive(usize),
    /// Any running member may be killed at any time
    Unrestricted,
}

impl KillPolicy {
    /// Minimum number of members that must stay running in a cluster of
    /// `cluster_size`.
    pub fn min_alive(&self, cluster_size: usize) -> usize {
        match self {
            Self::PreserveQuorum => (cluster_size / 2) + 1,
            Self::MinAlive(count) => *count,
            Self::Unrestricted => 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub server_command: String,
    pub reconfigure_command: String,
    pub reconfigure_options: String,
    pub config_prefix: String,
    /// Appended to every generated member config
    pub extra_config: Option<PathBuf>,
    pub work_dir: PathBuf,
    pub debug_dir: PathBuf,
    /// Directories holding per-server state, cleared on cleanup
    pub storage_dirs: Vec<PathBuf>,
    pub snapshot_min_log_size: u64,
    pub schedule_poll_interval: Duration,
    pub detect_poll_interval: Duration,
    pub client_poll_interval: Duration,
    pub stable_leader_timeout: Option<Duration>,
    pub kill_policy: KillPolicy,
    pub keep_debug_logs: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            server_command: "build/LogCabin".to_string(),
            reconfigure_command: "build/Examples/Reconfigure".to_string(),
            reconfigure_options: String::new(),
            config_prefix: "logcabin".to_string(),
            extra_config: None,
            work_dir: PathBuf::from("."),
            debug_dir: PathBuf::from("debug"),
            storage_dirs: vec![PathBuf::from("Storage"), PathBuf::from("Server")],
            snapshot_min_log_size: 1024,
            schedule_poll_interval: Duration::from_millis(100),
            detect_poll_interval: Duration::from_millis(250),
            client_poll_interval: Duration::from_millis(100),
            stable_leader_timeout: None,
            kill_policy: KillPolicy::default(),
            keep_debug_logs: false,
        }
    }
}

impl HarnessConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_server_command(mut self, command: impl Into<String>) -> Self {
        self.server_command = command.into();
        self
    }

    pub fn with_reconfigure_command(mut self, command: impl Into<String>) -> Self {
        self.reconfigure_command = command.into();
        self
    }

    /// `''` is accepted as "no options", the way shell wrappers pass an empty
    /// default.
    pub fn with_reconfigure_options(mut self, options: impl Into<String>) -> Self {
        let options = options.into();
        self.reconfigure_options = if options.trim() == "''" {
            String::new()
        } else {
            options
        };
        self
    }

    pub fn with_config_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config_prefix = prefix.into();
        self
    }

    pub fn with_extra_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.extra_config = Some(path.into());
        self
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    pub fn with_debug_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.debug_dir = dir.into();
        self
    }

    pub fn with_storage_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.storage_dirs = dirs;
        self
    }

    pub fn with_snapshot_min_log_size(mut self, bytes: u64) -> Self {
        self.snapshot_min_log_size = bytes;
        self
    }

    pub fn with_schedule_poll_interval(mut self, interval: Duration) -> Self {
        self.schedule_poll_interval = interval;
        self
    }

    pub fn with_detect_poll_interval(mut self, interval: Duration) -> Self {
        self.detect_poll_interval = interval;
        self
    }

    pub fn with_client_poll_interval(mut self, interval: Duration) -> Self {
        self.client_poll_interval = interval;
        self
    }

    pub fn with_stable_leader_timeout(mut self, timeout: Duration) -> Self {
        self.stable_leader_timeout = Some(timeout);
        self
    }

    pub fn with_kill_policy(mut self, policy: KillPolicy) -> Self {
        self.kill_policy = policy;
        self
    }

    pub fn with_keep_debug_logs(mut self, keep: bool) -> Self {
        self.keep_debug_logs = keep;
        self
    }
}
