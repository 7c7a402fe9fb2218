//! Cluster lifecycle management.
//!
//! [`ClusterLifecycle`] is the only owner of member process handles. It knows
//! which members are running (the running set) and keeps that set in step
//! with the sandbox: a member is in the set iff it was started and has not
//! been killed since.

use cabin_core::{
    Clock, ClusterSpec, HarnessConfig, HarnessError, LaunchRequest, MemberIdentity,
    ProcessHandle, ProcessStatus, Result, Sandbox,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, error, info, warn};

use crate::config_files::{config_file_name, remove_member_configs, write_member_configs};
use crate::logs::MemberLogs;

/// Clients run on the machine driving the harness.
const CLIENT_HOST: &str = "localhost";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientTarget {
    /// `--cluster=<every address>`
    Cluster,
    /// `--server=<address>`
    Server(String),
}

/// A client tool invocation against the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCommand {
    pub executable: String,
    pub options: String,
    pub command: String,
    pub target: ClientTarget,
}

impl ClientCommand {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            options: String::new(),
            command: String::new(),
            target: ClientTarget::Cluster,
        }
    }

    pub fn with_options(mut self, options: impl Into<String>) -> Self {
        self.options = options.into();
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    pub fn against_server(mut self, address: impl Into<String>) -> Self {
        self.target = ClientTarget::Server(address.into());
        self
    }

    pub fn render(&self, cluster: &ClusterSpec) -> String {
        let target = match &self.target {
            ClientTarget::Cluster => format!("--cluster={}", cluster.addresses()),
            ClientTarget::Server(address) => format!("--server={}", address),
        };
        join_words(&[&self.executable, &self.options, &target, &self.command])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientOutcome {
    Exited(ProcessStatus),
    /// The client was still running at the deadline and has been killed
    TimedOut,
}

fn join_words(words: &[&str]) -> String {
    words
        .iter()
        .map(|word| word.trim())
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

pub struct ClusterLifecycle {
    cluster: ClusterSpec,
    config: HarnessConfig,
    sandbox: Arc<dyn Sandbox>,
    clock: Arc<dyn Clock>,
    logs: MemberLogs,
    running: BTreeMap<MemberIdentity, ProcessHandle>,
    client_commands: usize,
}

impl ClusterLifecycle {
    pub fn new(
        cluster: ClusterSpec,
        config: HarnessConfig,
        sandbox: Arc<dyn Sandbox>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let logs = MemberLogs::new(config.work_dir.join(&config.debug_dir));
        Self {
            cluster,
            config,
            sandbox,
            clock,
            logs,
            running: BTreeMap::new(),
            client_commands: 0,
        }
    }

    pub fn cluster(&self) -> &ClusterSpec {
        &self.cluster
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn sandbox(&self) -> &Arc<dyn Sandbox> {
        &self.sandbox
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn logs(&self) -> &MemberLogs {
        &self.logs
    }

    /// Running members in id order.
    pub fn running_members(&self) -> Vec<MemberIdentity> {
        self.running.keys().cloned().collect()
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    pub fn is_running(&self, member: &MemberIdentity) -> bool {
        self.running.contains_key(member)
    }

    pub fn handle_of(&self, member: &MemberIdentity) -> Option<ProcessHandle> {
        self.running.get(member).copied()
    }

    /// Cluster members that are not running, in cluster order.
    pub fn down_members(&self) -> Vec<MemberIdentity> {
        self.cluster
            .members()
            .iter()
            .filter(|member| !self.running.contains_key(*member))
            .cloned()
            .collect()
    }

    fn server_command(&self, member: &MemberIdentity, bootstrap: bool) -> String {
        let config_file = config_file_name(&self.config, member);
        if bootstrap {
            format!(
                "{} --bootstrap --config {}",
                self.config.server_command, config_file
            )
        } else {
            format!("{} --config {}", self.config.server_command, config_file)
        }
    }

    fn ensure_member(&self, member: &MemberIdentity) -> Result<()> {
        match self.cluster.member(member.id) {
            Some(known) if known == member => Ok(()),
            _ => Err(HarnessError::UnknownMember {
                member_id: member.id,
            }),
        }
    }

    /// Writes the member config files and creates the debug directory.
    pub async fn prepare(&self) -> Result<()> {
        write_member_configs(&self.cluster, &self.config).await?;
        self.logs.ensure_dir().await
    }

    /// Initializes the first member's log. The bootstrap member acts as the
    /// sole leader until the cluster is reconfigured.
    pub async fn bootstrap(&self) -> Result<()> {
        let member = self.cluster.bootstrap_member();
        let request =
            LaunchRequest::foreground(member.address.clone(), self.server_command(member, true))
                .with_output(self.logs.bootstrap_log());

        info!("Bootstrapping {}", member);
        self.sandbox.start(request).await?;
        Ok(())
    }

    pub async fn start(&mut self, member: &MemberIdentity) -> Result<()> {
        self.ensure_member(member)?;
        if self.running.contains_key(member) {
            return Err(HarnessError::MemberAlreadyRunning {
                member_id: member.id,
            });
        }

        let request = LaunchRequest::background(
            member.address.clone(),
            self.server_command(member, false),
        )
        .with_output(self.logs.member_log(member));

        info!("Starting {}", member);
        let handle = self.sandbox.start(request).await?;
        self.running.insert(member.clone(), handle);
        self.sandbox.check_failures().await
    }

    /// Kills a running member. The member leaves the running set before the
    /// sandbox is asked to kill the process.
    pub async fn kill(&mut self, member: &MemberIdentity) -> Result<()> {
        let handle = self
            .running
            .remove(member)
            .ok_or(HarnessError::MemberNotRunning {
                member_id: member.id,
            })?;

        info!("Killing {}", member);
        self.sandbox.kill(handle).await
    }

    /// Starts every member that is not running and returns them.
    pub async fn restore_all(&mut self) -> Result<Vec<MemberIdentity>> {
        let down = self.down_members();
        for member in &down {
            self.start(member).await?;
        }
        Ok(down)
    }

    /// Points the cluster at `members` through the reconfigure tool.
    pub async fn reconfigure(&self, members: &[MemberIdentity]) -> Result<()> {
        let addresses: Vec<&str> = members
            .iter()
            .map(|member| member.address.as_str())
            .collect();
        let command = join_words(&[
            &self.config.reconfigure_command,
            &format!("--cluster={}", self.cluster.addresses()),
            &self.config.reconfigure_options,
            "set",
            &addresses.join(" "),
        ]);

        info!("Reconfiguring cluster to {} servers", members.len());
        self.sandbox
            .start(LaunchRequest::foreground(CLIENT_HOST, command))
            .await?;
        Ok(())
    }

    /// Bootstraps, starts every member and grows the configuration to the
    /// whole cluster. Cleans up before returning an error.
    pub async fn initialize(&mut self) -> Result<()> {
        let result = self.try_initialize().await;
        if let Err(e) = &result {
            error!("Cluster initialization failed: {}", e);
            if let Err(cleanup_error) = self.cleanup().await {
                warn!("Cleanup after failed initialization failed: {}", cleanup_error);
            }
        }
        result
    }

    async fn try_initialize(&mut self) -> Result<()> {
        self.prepare().await?;
        self.bootstrap().await?;
        self.restore_all().await?;
        let members = self.cluster.members().to_vec();
        self.reconfigure(&members).await
    }

    pub async fn start_client(
        &mut self,
        client: &ClientCommand,
        background: bool,
    ) -> Result<ProcessHandle> {
        self.client_commands += 1;
        let command = client.render(&self.cluster);
        let output = self.logs.client_log(self.client_commands);
        let request = LaunchRequest {
            address: CLIENT_HOST.to_string(),
            command,
            background,
            output: Some(output),
        };

        info!("Starting client command {}: {}", self.client_commands, request.command);
        self.sandbox.start(request).await
    }

    /// Waits for a client to exit. Running past `timeout` is an error.
    pub async fn wait_for_client(
        &self,
        handle: ProcessHandle,
        timeout: Duration,
    ) -> Result<ProcessStatus> {
        match self.watch_client(handle, timeout).await? {
            Some(status) => Ok(status),
            None => Err(HarnessError::timeout(format!(
                "client {} still running after {:?}",
                handle, timeout
            ))),
        }
    }

    /// Waits for a client to exit, killing it once `timeout` has passed.
    pub async fn supervise_client(
        &self,
        handle: ProcessHandle,
        timeout: Duration,
    ) -> Result<ClientOutcome> {
        match self.watch_client(handle, timeout).await? {
            Some(status) => Ok(ClientOutcome::Exited(status)),
            None => {
                self.sandbox.kill(handle).await?;
                info!("Client {} reached {:?} without errors", handle, timeout);
                Ok(ClientOutcome::TimedOut)
            }
        }
    }

    async fn watch_client(
        &self,
        handle: ProcessHandle,
        timeout: Duration,
    ) -> Result<Option<ProcessStatus>> {
        let start = self.clock.now();
        loop {
            let status = self.sandbox.poll(handle).await?;
            if !status.is_running() {
                debug!("Client {} finished with {}", handle, status);
                return Ok(Some(status));
            }

            self.sandbox.check_failures().await?;
            if self.clock.now().saturating_sub(start) > timeout {
                return Ok(None);
            }
            self.clock.sleep(self.config.client_poll_interval).await;
        }
    }

    /// Kills every running member and releases the sandbox.
    pub async fn shutdown(&mut self) -> Result<()> {
        for member in self.running_members() {
            self.kill(&member).await?;
        }
        self.sandbox.shutdown().await
    }

    /// Shuts down and removes config files, storage directories and (unless
    /// configured otherwise) debug logs. Keeps going after individual
    /// failures and returns the first one.
    pub async fn cleanup(&mut self) -> Result<()> {
        let mut first_error = None;

        if let Err(e) = self.shutdown().await {
            warn!("Shutdown during cleanup failed: {}", e);
            first_error.get_or_insert(e);
        }
        if let Err(e) = remove_member_configs(&self.cluster, &self.config).await {
            warn!("Removing config files failed: {}", e);
            first_error.get_or_insert(e);
        }
        if !self.config.keep_debug_logs {
            if let Err(e) = self.logs.clear().await {
                warn!("Removing debug logs failed: {}", e);
                first_error.get_or_insert(e);
            }
        }
        for dir in &self.config.storage_dirs {
            if let Err(e) = remove_server_dirs(&self.config.work_dir.join(dir)).await {
                warn!("Removing storage under {} failed: {}", dir.display(), e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Removes `server*` subdirectories of `dir`.
async fn remove_server_dirs(dir: &std::path::Path) -> Result<()> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        let is_server_dir = entry.file_name().to_string_lossy().starts_with("server")
            && entry.file_type().await?.is_dir();
        if is_server_dir {
            fs::remove_dir_all(entry.path()).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemorySandbox;
    use cabin_core::VirtualClock;

    fn cluster(n: u64) -> ClusterSpec {
        ClusterSpec::with_cluster_uuid(
            (1..=n)
                .map(|id| MemberIdentity::new(id, format!("127.0.0.1:{}", 5253 + id)))
                .collect(),
            "testtest",
        )
        .unwrap()
    }

    fn lifecycle(sandbox: &MemorySandbox, dir: &std::path::Path) -> ClusterLifecycle {
        ClusterLifecycle::new(
            cluster(3),
            HarnessConfig::default().with_work_dir(dir),
            Arc::new(sandbox.clone()),
            Arc::new(VirtualClock::new()),
        )
    }

    #[tokio::test]
    async fn test_start_and_kill_track_running_set() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = MemorySandbox::new();
        let mut lifecycle = lifecycle(&sandbox, dir.path());
        let member = lifecycle.cluster().members()[1].clone();

        lifecycle.start(&member).await.unwrap();
        assert!(lifecycle.is_running(&member));
        assert_eq!(
            sandbox.launches()[0].command,
            "build/LogCabin --config logcabin-2.conf"
        );
        assert!(sandbox.launches()[0]
            .output
            .as_ref()
            .unwrap()
            .ends_with("debug/server_2"));

        assert!(matches!(
            lifecycle.start(&member).await,
            Err(HarnessError::MemberAlreadyRunning { .. })
        ));

        lifecycle.kill(&member).await.unwrap();
        assert!(!lifecycle.is_running(&member));
        assert_eq!(sandbox.kills().len(), 1);

        assert!(matches!(
            lifecycle.kill(&member).await,
            Err(HarnessError::MemberNotRunning { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_member_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = MemorySandbox::new();
        let mut lifecycle = lifecycle(&sandbox, dir.path());

        let stranger = MemberIdentity::new(9, "127.0.0.1:9999");
        assert!(matches!(
            lifecycle.start(&stranger).await,
            Err(HarnessError::UnknownMember { .. })
        ));
        assert!(sandbox.launches().is_empty());
    }

    #[tokio::test]
    async fn test_initialize_runs_bootstrap_start_and_reconfigure() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = MemorySandbox::new();
        let mut lifecycle = lifecycle(&sandbox, dir.path());

        lifecycle.initialize().await.unwrap();

        let launches = sandbox.launches();
        assert_eq!(launches.len(), 5);
        assert_eq!(
            launches[0].command,
            "build/LogCabin --bootstrap --config logcabin-1.conf"
        );
        assert!(!launches[0].background);
        assert!(launches[1..4].iter().all(|launch| launch.background));
        assert_eq!(
            launches[4].command,
            "build/Examples/Reconfigure \
             --cluster=127.0.0.1:5254,127.0.0.1:5255,127.0.0.1:5256 \
             set 127.0.0.1:5254 127.0.0.1:5255 127.0.0.1:5256"
        );
        assert_eq!(lifecycle.running_count(), 3);
        assert!(dir.path().join("logcabin-3.conf").exists());
    }

    #[tokio::test]
    async fn test_failed_initialize_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = MemorySandbox::new();
        sandbox.set_foreground_exit(1);
        let mut lifecycle = lifecycle(&sandbox, dir.path());

        assert!(lifecycle.initialize().await.is_err());
        assert!(sandbox.is_shut_down());
        assert_eq!(lifecycle.running_count(), 0);
        assert!(!dir.path().join("logcabin-1.conf").exists());
    }

    #[tokio::test]
    async fn test_restore_all_starts_only_down_members() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = MemorySandbox::new();
        let mut lifecycle = lifecycle(&sandbox, dir.path());

        lifecycle.restore_all().await.unwrap();
        let victim = lifecycle.cluster().members()[0].clone();
        lifecycle.kill(&victim).await.unwrap();
        assert_eq!(lifecycle.down_members(), vec![victim.clone()]);

        let restored = lifecycle.restore_all().await.unwrap();
        assert_eq!(restored, vec![victim]);
        assert_eq!(lifecycle.running_count(), 3);
    }

    #[tokio::test]
    async fn test_client_commands() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = MemorySandbox::new();
        let mut lifecycle = lifecycle(&sandbox, dir.path());

        let client = ClientCommand::new("build/Examples/TreeOps").with_command("mkdir /dir1");
        let handle = lifecycle.start_client(&client, true).await.unwrap();
        assert_eq!(
            sandbox.process(handle).unwrap().request.command,
            "build/Examples/TreeOps \
             --cluster=127.0.0.1:5254,127.0.0.1:5255,127.0.0.1:5256 mkdir /dir1"
        );

        let client = ClientCommand::new("build/Client/ServerControl")
            .with_options("--timeout=10")
            .with_command("stats dump")
            .against_server("127.0.0.1:5255");
        let handle = lifecycle.start_client(&client, true).await.unwrap();
        let request = sandbox.process(handle).unwrap().request;
        assert_eq!(
            request.command,
            "build/Client/ServerControl --timeout=10 --server=127.0.0.1:5255 stats dump"
        );
        assert!(request.output.unwrap().ends_with("debug/client_command_2"));
    }

    #[tokio::test]
    async fn test_wait_for_client_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = MemorySandbox::new();
        let mut lifecycle = lifecycle(&sandbox, dir.path());

        let handle = lifecycle
            .start_client(&ClientCommand::new("build/Examples/SmokeTest"), true)
            .await
            .unwrap();

        let result = lifecycle
            .wait_for_client(handle, Duration::from_secs(10))
            .await;
        assert!(matches!(result, Err(HarnessError::Timeout { .. })));
        assert!(lifecycle.clock().now() > Duration::from_secs(10));

        sandbox.exit(handle, 0);
        let status = lifecycle
            .wait_for_client(handle, Duration::from_secs(10))
            .await
            .unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn test_supervise_client_kills_at_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = MemorySandbox::new();
        let mut lifecycle = lifecycle(&sandbox, dir.path());

        let handle = lifecycle
            .start_client(&ClientCommand::new("build/Examples/ReconfigureTest"), true)
            .await
            .unwrap();

        let outcome = lifecycle
            .supervise_client(handle, Duration::from_secs(20))
            .await
            .unwrap();
        assert_eq!(outcome, ClientOutcome::TimedOut);
        assert!(sandbox.process(handle).unwrap().killed);
    }

    #[tokio::test]
    async fn test_cleanup_removes_storage_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = MemorySandbox::new();
        let mut lifecycle = lifecycle(&sandbox, dir.path());

        let storage = dir.path().join("Storage");
        std::fs::create_dir_all(storage.join("server1")).unwrap();
        std::fs::create_dir_all(storage.join("keep")).unwrap();

        lifecycle.initialize().await.unwrap();
        lifecycle.cleanup().await.unwrap();

        assert!(!storage.join("server1").exists());
        assert!(storage.join("keep").exists());
        assert_eq!(lifecycle.running_count(), 0);
        assert!(sandbox.is_shut_down());
    }
}
