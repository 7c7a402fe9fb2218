use async_trait::async_trait;
use cabin_core::types::host_of;
use cabin_core::{HarnessError, LaunchRequest, ProcessHandle, ProcessStatus, Result, Sandbox};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

struct Tracked {
    description: String,
    child: Option<Child>,
    status: ProcessStatus,
    background: bool,
}

impl Tracked {
    /// Refreshes `status` from the child without blocking.
    fn refresh(&mut self) -> Result<ProcessStatus> {
        if let Some(child) = self.child.as_mut() {
            if let Some(exit) = child.try_wait()? {
                self.status = to_status(exit);
                self.child = None;
            }
        }
        Ok(self.status)
    }
}

fn to_status(exit: ExitStatus) -> ProcessStatus {
    ProcessStatus::Exited(exit.code())
}

/// Whether a host can be reached without ssh.
pub fn is_local_host(host: &str) -> bool {
    host.is_empty() || host == "localhost" || host == "::1" || host.starts_with("127.")
}

/// Sandbox backed by real OS processes.
///
/// Commands for local hosts run under `sh -c` in the working directory.
/// Commands for other hosts run through ssh after changing into the same
/// directory on the remote side, which assumes a shared file system layout.
/// Remote sessions force a tty and `exec` the command, so killing the local
/// ssh client hangs up the remote process with it.
pub struct LocalSandbox {
    work_dir: PathBuf,
    ssh_command: String,
    next_handle: AtomicU64,
    processes: Mutex<HashMap<ProcessHandle, Tracked>>,
}

impl LocalSandbox {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            ssh_command: "ssh".to_string(),
            next_handle: AtomicU64::new(1),
            processes: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_ssh_command(mut self, ssh_command: impl Into<String>) -> Self {
        self.ssh_command = ssh_command.into();
        self
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    async fn build_command(&self, request: &LaunchRequest) -> Command {
        let host = host_of(&request.address);
        if is_local_host(host) {
            let mut command = Command::new("sh");
            command
                .arg("-c")
                .arg(&request.command)
                .current_dir(&self.work_dir);
            command
        } else {
            let remote_dir = fs::canonicalize(&self.work_dir)
                .await
                .unwrap_or_else(|_| self.work_dir.clone());
            let mut command = Command::new(&self.ssh_command);
            command.args(["-t", "-t"]).arg(host).arg(format!(
                "cd '{}' && exec {}",
                remote_dir.display(),
                request.command
            ));
            command
        }
    }
}

#[async_trait]
impl Sandbox for LocalSandbox {
    async fn start(&self, request: LaunchRequest) -> Result<ProcessHandle> {
        let description = format!("'{}' on {}", request.command, request.address);
        let mut command = self.build_command(&request).await;
        command.stdin(Stdio::null()).kill_on_drop(true);

        if let Some(path) = &request.output {
            let file = fs::File::create(path)
                .await
                .map_err(|e| {
                    HarnessError::sandbox(format!("cannot create {}: {}", path.display(), e))
                })?
                .into_std()
                .await;
            let stderr = file.try_clone()?;
            command.stdout(Stdio::from(file)).stderr(Stdio::from(stderr));
        }

        let mut child = command
            .spawn()
            .map_err(|e| HarnessError::sandbox(format!("failed to launch {}: {}", description, e)))?;
        let handle = ProcessHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));

        if request.background {
            debug!("Started {} in the background as {}", description, handle);
            self.processes.lock().await.insert(
                handle,
                Tracked {
                    description,
                    child: Some(child),
                    status: ProcessStatus::Running,
                    background: true,
                },
            );
            return Ok(handle);
        }

        let status = to_status(child.wait().await?);
        debug!("{} finished with {}", description, status);
        self.processes.lock().await.insert(
            handle,
            Tracked {
                description: description.clone(),
                child: None,
                status,
                background: false,
            },
        );

        if !status.success() {
            return Err(HarnessError::process_failed(description, status.to_string()));
        }
        Ok(handle)
    }

    async fn kill(&self, handle: ProcessHandle) -> Result<()> {
        let tracked = self
            .processes
            .lock()
            .await
            .remove(&handle)
            .ok_or_else(|| HarnessError::sandbox(format!("unknown {}", handle)))?;

        if let Some(mut child) = tracked.child {
            if child.try_wait()?.is_none() {
                child.kill().await.map_err(|e| {
                    HarnessError::sandbox(format!("failed to kill {}: {}", tracked.description, e))
                })?;
            }
        }
        debug!("Killed {}", tracked.description);
        Ok(())
    }

    async fn poll(&self, handle: ProcessHandle) -> Result<ProcessStatus> {
        let mut processes = self.processes.lock().await;
        let tracked = processes
            .get_mut(&handle)
            .ok_or_else(|| HarnessError::sandbox(format!("unknown {}", handle)))?;
        tracked.refresh()
    }

    async fn check_failures(&self) -> Result<()> {
        let mut processes = self.processes.lock().await;
        for tracked in processes.values_mut().filter(|tracked| tracked.background) {
            let status = tracked.refresh()?;
            if !status.is_running() && !status.success() {
                return Err(HarnessError::process_failed(
                    tracked.description.clone(),
                    status.to_string(),
                ));
            }
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        let mut processes = self.processes.lock().await;
        let count = processes.len();
        for (handle, tracked) in processes.drain() {
            if let Some(mut child) = tracked.child {
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill {} ({}): {}", tracked.description, handle, e);
                }
            }
        }
        info!("Sandbox released {} process handles", count);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_local_host() {
        assert!(is_local_host("localhost"));
        assert!(is_local_host("127.0.0.1"));
        assert!(is_local_host("::1"));
        assert!(!is_local_host("10.0.0.2"));
    }

    #[tokio::test]
    async fn test_remote_command_goes_through_ssh_with_a_tty() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = LocalSandbox::new(dir.path()).with_ssh_command("myssh");
        let command = sandbox
            .build_command(&LaunchRequest::background("10.0.0.2:5254", "build/LogCabin"))
            .await;

        let command = command.as_std();
        assert_eq!(command.get_program(), "myssh");
        let args: Vec<_> = command
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        assert_eq!(&args[..3], ["-t", "-t", "10.0.0.2"]);
        assert!(args[3].ends_with("&& exec build/LogCabin"));
    }

    #[tokio::test]
    async fn test_foreground_command_writes_output() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = LocalSandbox::new(dir.path());
        let output = dir.path().join("echo.log");

        sandbox
            .start(LaunchRequest::foreground("localhost", "echo hello").with_output(&output))
            .await
            .unwrap();

        let text = std::fs::read_to_string(&output).unwrap();
        assert_eq!(text.trim(), "hello");
    }

    #[tokio::test]
    async fn test_foreground_failure_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = LocalSandbox::new(dir.path());

        let result = sandbox
            .start(LaunchRequest::foreground("localhost", "exit 3"))
            .await;
        assert!(matches!(result, Err(HarnessError::ProcessFailed { .. })));
    }

    #[tokio::test]
    async fn test_kill_background_process() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = LocalSandbox::new(dir.path());

        let handle = sandbox
            .start(LaunchRequest::background("localhost", "sleep 30"))
            .await
            .unwrap();
        assert!(sandbox.poll(handle).await.unwrap().is_running());

        sandbox.kill(handle).await.unwrap();
        assert!(sandbox.poll(handle).await.is_err());
        assert!(sandbox.check_failures().await.is_ok());
    }

    #[tokio::test]
    async fn test_crashed_background_process_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = LocalSandbox::new(dir.path());

        let handle = sandbox
            .start(LaunchRequest::background("localhost", "exit 7"))
            .await
            .unwrap();

        let mut status = sandbox.poll(handle).await.unwrap();
        for _ in 0..100 {
            if !status.is_running() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            status = sandbox.poll(handle).await.unwrap();
        }
        assert_eq!(status, ProcessStatus::Exited(Some(7)));
        assert!(sandbox.check_failures().await.is_err());

        sandbox.shutdown().await.unwrap();
    }
}
