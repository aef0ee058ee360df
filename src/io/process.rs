//! Process management layer
//!
//! Owns the lifecycle of a long-running child process (the CMake server):
//! spawning it with piped stdio, draining stderr, observing its exit and
//! tearing it down. Message exchange lives in the transport layer.

use crate::io::transport::{StdioTransport, Transport};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

// ============================================================================
// Process State Management
// ============================================================================

/// How to stop a process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// SIGTERM, the process may still be shutting down afterwards
    Graceful,
    /// SIGKILL
    Force,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    NotStarted,
    Running { pid: u32 },
    Stopped,
}

impl ProcessState {
    pub fn pid(&self) -> Option<u32> {
        match self {
            ProcessState::Running { pid } => Some(*pid),
            _ => None,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ProcessState::Running { .. })
    }
}

// ============================================================================
// Stderr Monitoring Trait
// ============================================================================

/// Trait for monitoring stderr output from external processes
pub trait StderrMonitor: Send + Sync {
    /// Install a handler for stderr lines
    ///
    /// Only one handler can be active at a time. It has to be installed
    /// before the process starts.
    fn on_stderr_line<F>(&mut self, handler: F)
    where
        F: Fn(String) + Send + Sync + 'static;
}

// ============================================================================
// Process Management
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Process not started")]
    NotStarted,

    #[error("Process already started")]
    AlreadyStarted,

    #[error("Stdin not available")]
    StdinNotAvailable,

    #[error("Stdout not available")]
    StdoutNotAvailable,

    #[error("Stderr not available")]
    StderrNotAvailable,
}

/// Manages a child process spawned via [`Command`]
pub struct ChildProcessManager {
    command: String,
    args: Vec<String>,
    working_directory: Option<PathBuf>,
    env: HashMap<String, String>,

    state: Arc<Mutex<ProcessState>>,

    stdio_transport: Option<StdioTransport>,
    stderr_handler: Option<Box<dyn Fn(String) + Send + Sync>>,
    stderr_task: Option<JoinHandle<()>>,
    wait_task: Option<JoinHandle<()>>,

    /// Flips to `true` once the wait task observed the exit
    exited: Option<watch::Receiver<bool>>,
}

impl ChildProcessManager {
    pub fn new(command: String, args: Vec<String>, working_dir: Option<PathBuf>) -> Self {
        Self {
            command,
            args,
            working_directory: working_dir,
            env: HashMap::new(),
            state: Arc::new(Mutex::new(ProcessState::NotStarted)),
            stdio_transport: None,
            stderr_handler: None,
            stderr_task: None,
            wait_task: None,
            exited: None,
        }
    }

    /// Add an environment variable for the child
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn get_state(&self) -> ProcessState {
        match self.state.lock() {
            Ok(state) => state.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_state(&self, new_state: ProcessState) {
        match self.state.lock() {
            Ok(mut state) => *state = new_state,
            Err(poisoned) => *poisoned.into_inner() = new_state,
        }
    }

    pub fn is_running(&self) -> bool {
        self.get_state().is_running()
    }

    pub async fn start(&mut self) -> Result<(), ProcessError> {
        if self.is_running() {
            return Err(ProcessError::AlreadyStarted);
        }

        info!("Starting process: {} {:?}", self.command, self.args);

        let mut command_builder = Command::new(&self.command);
        command_builder
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(working_dir) = &self.working_directory {
            command_builder.current_dir(working_dir);
        }

        let mut child = command_builder.spawn()?;

        let pid = child
            .id()
            .ok_or_else(|| ProcessError::Io(io::Error::other("Failed to get process ID")))?;
        info!("Process started with PID: {}", pid);
        self.set_state(ProcessState::Running { pid });

        let stdin = child.stdin.take().ok_or(ProcessError::StdinNotAvailable)?;
        let stdout = child
            .stdout
            .take()
            .ok_or(ProcessError::StdoutNotAvailable)?;
        let stderr = child
            .stderr
            .take()
            .ok_or(ProcessError::StderrNotAvailable)?;

        self.stdio_transport = Some(StdioTransport::new(stdin, stdout));

        // stderr is always drained, otherwise the child blocks on a full pipe
        self.spawn_stderr_monitor(stderr);
        self.spawn_wait_task(child);

        Ok(())
    }

    fn spawn_stderr_monitor(&mut self, stderr: tokio::process::ChildStderr) {
        if self.stderr_task.is_some() {
            return;
        }

        let handler = self.stderr_handler.take();

        let task = tokio::spawn(async move {
            let mut reader = BufReader::new(stderr);
            let mut line = String::new();

            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let content = line.trim().to_string();
                        if content.is_empty() {
                            continue;
                        }
                        match &handler {
                            Some(handler) => handler(content),
                            None => trace!("ChildProcessManager: stderr drained: {}", content),
                        }
                    }
                    Err(e) => {
                        error!("Failed to read from stderr: {}", e);
                        break;
                    }
                }
            }

            trace!("ChildProcessManager: stderr monitoring finished");
        });

        self.stderr_task = Some(task);
    }

    fn spawn_wait_task(&mut self, mut child: Child) {
        let pid = self.get_state().pid();
        let state = Arc::clone(&self.state);
        let (exit_sender, exit_receiver) = watch::channel(false);

        let task = tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!("Process PID {:?} exited with status: {}", pid, status),
                Err(e) => error!("Error waiting for child process: {}", e),
            }

            match state.lock() {
                Ok(mut state) => *state = ProcessState::Stopped,
                Err(poisoned) => *poisoned.into_inner() = ProcessState::Stopped,
            }
            let _ = exit_sender.send(true);
        });

        self.exited = Some(exit_receiver);
        self.wait_task = Some(task);
    }

    /// Wait until the child exits, returns `false` on timeout
    pub async fn wait_for_exit(&mut self, timeout: Duration) -> Result<bool, ProcessError> {
        let Some(exited) = self.exited.as_mut() else {
            return Err(ProcessError::NotStarted);
        };

        match tokio::time::timeout(timeout, exited.wait_for(|done| *done)).await {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }

    pub async fn stop(&mut self, mode: StopMode) -> Result<(), ProcessError> {
        let Some(pid) = self.get_state().pid() else {
            return Err(ProcessError::NotStarted);
        };

        match mode {
            StopMode::Graceful => info!("Gracefully stopping process with PID: {}", pid),
            StopMode::Force => info!("Force killing process with PID: {}", pid),
        }

        if let Some(mut transport) = self.stdio_transport.take() {
            let _ = transport.close().await;
        }

        Self::send_signal(pid, mode);

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }

        self.set_state(ProcessState::Stopped);
        Ok(())
    }

    /// Close the pipes, give the child `timeout` to exit and kill it otherwise
    ///
    /// Errors from killing a process that exited in the meantime are ignored.
    pub async fn shutdown(&mut self, timeout: Duration) {
        if let Some(mut transport) = self.stdio_transport.take() {
            let _ = transport.close().await;
        }

        let pid = self.get_state().pid();
        match self.wait_for_exit(timeout).await {
            Ok(true) => debug!("Process exited after closing its pipes"),
            Ok(false) => {
                if let Some(pid) = pid {
                    warn!("Process {} did not exit within {:?}, killing it", pid, timeout);
                    Self::send_signal(pid, StopMode::Force);
                }
            }
            Err(_) => {}
        }

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        self.set_state(ProcessState::Stopped);
    }

    fn send_signal(pid: u32, mode: StopMode) {
        #[cfg(unix)]
        {
            let signal = match mode {
                StopMode::Graceful => libc::SIGTERM,
                StopMode::Force => libc::SIGKILL,
            };
            // SAFETY: kill() has no memory-safety preconditions, a stale pid only yields ESRCH
            let rc = unsafe { libc::kill(pid as libc::pid_t, signal) };
            if rc == 0 {
                trace!("Sent signal {} to process {}", signal, pid);
            }
        }
        #[cfg(not(unix))]
        {
            let _ = (pid, mode);
            warn!("Process termination by signal is not supported on this platform");
        }
    }

    /// Take the stdio transport, can only be done once per start
    pub fn create_stdio_transport(&mut self) -> Result<StdioTransport, ProcessError> {
        self.stdio_transport.take().ok_or(ProcessError::NotStarted)
    }

    /// Synchronous force kill for Drop implementations
    pub fn kill_sync(&mut self) {
        let Some(pid) = self.get_state().pid() else {
            return;
        };

        debug!("Synchronously force killing process with PID: {}", pid);
        Self::send_signal(pid, StopMode::Force);

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        self.set_state(ProcessState::Stopped);
    }
}

impl StderrMonitor for ChildProcessManager {
    fn on_stderr_line<F>(&mut self, handler: F)
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.stderr_handler = Some(Box::new(handler));
    }
}

impl Drop for ChildProcessManager {
    fn drop(&mut self) {
        self.kill_sync();
    }
}
