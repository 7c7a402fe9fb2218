use async_trait::async_trait;
use cabin_core::{HarnessError, LaunchRequest, ProcessHandle, ProcessStatus, Result, Sandbox};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// A process as the in-memory sandbox sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryProcess {
    pub request: LaunchRequest,
    pub status: ProcessStatus,
    pub killed: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_handle: u64,
    processes: HashMap<ProcessHandle, MemoryProcess>,
    launches: Vec<LaunchRequest>,
    kills: Vec<ProcessHandle>,
    foreground_exit: i32,
    start_failure: Option<String>,
    injected_failure: Option<String>,
    shut_down: bool,
}

/// Sandbox that only records what it is asked to do.
///
/// Background launches stay "running" until killed or until a test calls
/// [`exit`](MemorySandbox::exit). Foreground launches exit immediately with
/// the configured status (0 unless changed). Suitable for testing the
/// scheduler and the lifecycle manager without real processes.
#[derive(Debug, Clone, Default)]
pub struct MemorySandbox {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySandbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every launch request, in order.
    pub fn launches(&self) -> Vec<LaunchRequest> {
        self.state.lock().launches.clone()
    }

    /// Every killed handle, in order.
    pub fn kills(&self) -> Vec<ProcessHandle> {
        self.state.lock().kills.clone()
    }

    pub fn process(&self, handle: ProcessHandle) -> Option<MemoryProcess> {
        self.state.lock().processes.get(&handle).cloned()
    }

    pub fn running_count(&self) -> usize {
        self.state
            .lock()
            .processes
            .values()
            .filter(|process| process.status.is_running())
            .count()
    }

    /// Simulates a process exiting on its own.
    pub fn exit(&self, handle: ProcessHandle, code: i32) {
        if let Some(process) = self.state.lock().processes.get_mut(&handle) {
            process.status = ProcessStatus::Exited(Some(code));
        }
    }

    /// Makes the next failure check report `message`.
    pub fn inject_failure(&self, message: impl Into<String>) {
        self.state.lock().injected_failure = Some(message.into());
    }

    /// Makes every later start fail with `message`.
    pub fn fail_starts(&self, message: impl Into<String>) {
        self.state.lock().start_failure = Some(message.into());
    }

    pub fn set_foreground_exit(&self, code: i32) {
        self.state.lock().foreground_exit = code;
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shut_down
    }
}

#[async_trait]
impl Sandbox for MemorySandbox {
    async fn start(&self, request: LaunchRequest) -> Result<ProcessHandle> {
        let mut state = self.state.lock();
        if let Some(message) = &state.start_failure {
            return Err(HarnessError::sandbox(message.clone()));
        }

        state.next_handle += 1;
        let handle = ProcessHandle(state.next_handle);
        let status = if request.background {
            ProcessStatus::Running
        } else {
            ProcessStatus::Exited(Some(state.foreground_exit))
        };

        state.launches.push(request.clone());
        state.processes.insert(
            handle,
            MemoryProcess {
                request: request.clone(),
                status,
                killed: false,
            },
        );

        if !request.background && !status.success() {
            return Err(HarnessError::process_failed(
                request.command,
                status.to_string(),
            ));
        }
        Ok(handle)
    }

    async fn kill(&self, handle: ProcessHandle) -> Result<()> {
        let mut state = self.state.lock();
        let process = state
            .processes
            .get_mut(&handle)
            .ok_or_else(|| HarnessError::sandbox(format!("unknown {}", handle)))?;
        process.killed = true;
        process.status = ProcessStatus::Exited(None);
        state.kills.push(handle);
        Ok(())
    }

    async fn poll(&self, handle: ProcessHandle) -> Result<ProcessStatus> {
        self.state
            .lock()
            .processes
            .get(&handle)
            .map(|process| process.status)
            .ok_or_else(|| HarnessError::sandbox(format!("unknown {}", handle)))
    }

    async fn check_failures(&self) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(message) = state.injected_failure.take() {
            return Err(HarnessError::process_failed(message, "injected"));
        }

        let failed = state.processes.values().find(|process| {
            process.request.background
                && !process.killed
                && !process.status.is_running()
                && !process.status.success()
        });
        match failed {
            Some(process) => Err(HarnessError::process_failed(
                process.request.command.clone(),
                process.status.to_string(),
            )),
            None => Ok(()),
        }
    }

    async fn shutdown(&self) -> Result<()> {
        let mut state = self.state.lock();
        for process in state.processes.values_mut() {
            if process.status.is_running() {
                process.killed = true;
                process.status = ProcessStatus::Exited(None);
            }
        }
        state.shut_down = true;
        Ok(())
    }
}
