//! Process supervision for natively hosted daemons.
//!
//! The supervisor owns three files in the node directory: the PID file
//! and the two log files the daemon's stdout/stderr are redirected to.
//! Liveness is the PID file plus a signal-0 probe; when this supervisor
//! spawned the process itself it also holds the `Child` and reaps it.
//!
//! Stopping is a staged escalation: SIGTERM, SIGTERM again, SIGQUIT and
//! finally SIGKILL, each stage with its own timeout. A stage timing out
//! only moves on to the next one; the process surviving SIGKILL is the
//! only failure.

use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use nodebed_core::config::StopConfig;
use nodebed_core::{NodeError, NodeResult};

/// PID file name inside the node directory.
pub const PID_FILE: &str = "daemon.pid";

/// Daemon stdout log file name.
pub const STDOUT_LOG: &str = "daemon.stdout";

/// Daemon stderr log file name.
pub const STDERR_LOG: &str = "daemon.stderr";

/// Lifecycle of a supervised daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// No process.
    Stopped,
    /// Spawn in progress.
    Starting,
    /// Process alive.
    Running,
    /// Escalation in progress, or a stop was requested without waiting.
    Stopping,
    /// Process exited without being asked to.
    Crashed,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessState::Stopped => "stopped",
            ProcessState::Starting => "starting",
            ProcessState::Running => "running",
            ProcessState::Stopping => "stopping",
            ProcessState::Crashed => "crashed",
        };
        f.write_str(s)
    }
}

/// Signals used while stopping a daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// SIGTERM.
    Term,
    /// SIGQUIT.
    Quit,
    /// SIGKILL.
    Kill,
}

impl Signal {
    fn raw(self) -> libc::c_int {
        match self {
            Signal::Term => libc::SIGTERM,
            Signal::Quit => libc::SIGQUIT,
            Signal::Kill => libc::SIGKILL,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Signal::Term => "SIGTERM",
            Signal::Quit => "SIGQUIT",
            Signal::Kill => "SIGKILL",
        };
        f.write_str(s)
    }
}

/// Which daemon log to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

/// Signal stages used by [`Supervisor::stop`].
#[derive(Debug, Clone)]
pub struct Escalation {
    /// Signal and how long to wait for exit after sending it.
    pub stages: Vec<(Signal, Duration)>,
    /// Liveness poll interval while waiting.
    pub poll_interval: Duration,
}

impl From<&StopConfig> for Escalation {
    fn from(config: &StopConfig) -> Self {
        Self {
            stages: vec![
                (Signal::Term, Duration::from_millis(config.term_ms)),
                (Signal::Term, Duration::from_millis(config.term_again_ms)),
                (Signal::Quit, Duration::from_millis(config.quit_ms)),
                (Signal::Kill, Duration::from_millis(config.kill_ms)),
            ],
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
        }
    }
}

impl Default for Escalation {
    fn default() -> Self {
        Self::from(&StopConfig::default())
    }
}

/// Program, arguments and environment for a daemon.
#[derive(Debug, Clone, Default)]
pub struct DaemonCommand {
    /// Executable.
    pub program: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Extra environment variables.
    pub envs: Vec<(String, String)>,
}

struct Inner {
    state: ProcessState,
    child: Option<Child>,
}

/// Supervises at most one daemon per node directory.
pub struct Supervisor {
    dir: PathBuf,
    escalation: Escalation,
    inner: Mutex<Inner>,
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("dir", &self.dir)
            .field("escalation", &self.escalation)
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    /// Supervisor for the daemon living in `dir`.
    pub fn new(dir: impl Into<PathBuf>, escalation: Escalation) -> Self {
        Self {
            dir: dir.into(),
            escalation,
            inner: Mutex::new(Inner {
                state: ProcessState::Stopped,
                child: None,
            }),
        }
    }

    /// Node directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the PID file.
    pub fn pid_path(&self) -> PathBuf {
        self.dir.join(PID_FILE)
    }

    /// Path of a daemon log file.
    pub fn log_path(&self, stream: LogStream) -> PathBuf {
        match stream {
            LogStream::Stdout => self.dir.join(STDOUT_LOG),
            LogStream::Stderr => self.dir.join(STDERR_LOG),
        }
    }

    /// Spawn the daemon and return its pid.
    ///
    /// Returns as soon as the process is launched; readiness is the
    /// caller's concern.
    pub async fn start(&self, command: &DaemonCommand) -> NodeResult<u32> {
        let mut inner = self.inner.lock().await;

        if let Some(pid) = self.probe(&mut inner) {
            debug!(node = %self.dir.display(), pid, "daemon already alive");
            return Err(NodeError::AlreadyRunning);
        }

        inner.state = ProcessState::Starting;
        match self.spawn(command) {
            Ok((child, pid)) => {
                inner.child = Some(child);
                inner.state = ProcessState::Running;
                info!(node = %self.dir.display(), pid, program = %command.program, "daemon started");
                Ok(pid)
            }
            Err(e) => {
                inner.state = ProcessState::Stopped;
                Err(e)
            }
        }
    }

    fn spawn(&self, command: &DaemonCommand) -> NodeResult<(Child, u32)> {
        std::fs::create_dir_all(&self.dir)?;
        let stdout = File::create(self.log_path(LogStream::Stdout))?;
        let stderr = File::create(self.log_path(LogStream::Stderr))?;

        let child = Command::new(&command.program)
            .args(&command.args)
            .envs(command.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(&self.dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            // own process group so the whole daemon tree can be signalled
            .process_group(0)
            .spawn()
            .map_err(|source| NodeError::Exec {
                command: command.program.clone(),
                source,
            })?;

        let pid = child
            .id()
            .ok_or_else(|| NodeError::Process("daemon exited before its pid was read".into()))?;
        std::fs::write(self.pid_path(), pid.to_string())?;
        Ok((child, pid))
    }

    /// Stop the daemon.
    ///
    /// With `wait == false` only the first SIGTERM is sent.
    pub async fn stop(&self, wait: bool) -> NodeResult<()> {
        let mut inner = self.inner.lock().await;

        let pid = match self.probe(&mut inner) {
            Some(pid) => pid,
            None => {
                inner.state = ProcessState::Stopped;
                return Err(NodeError::NotRunning);
            }
        };
        inner.state = ProcessState::Stopping;

        if !wait {
            send_signal(pid, Signal::Term)?;
            debug!(node = %self.dir.display(), pid, "sent SIGTERM without waiting");
            return Ok(());
        }

        let stages = self.escalation.stages.clone();
        for (sig, timeout) in stages {
            debug!(node = %self.dir.display(), pid, signal = %sig, ?timeout, "stop stage");
            send_signal(pid, sig)?;
            if self.wait_exit(&mut inner, pid, timeout).await {
                self.finish_stop(&mut inner);
                info!(node = %self.dir.display(), pid, signal = %sig, "daemon stopped");
                return Ok(());
            }
        }

        warn!(node = %self.dir.display(), pid, "daemon survived SIGKILL");
        Err(NodeError::Process(format!(
            "process {} still alive after SIGKILL",
            pid
        )))
    }

    /// Current pid if the daemon is alive.
    pub async fn pid(&self) -> Option<u32> {
        let mut inner = self.inner.lock().await;
        self.probe(&mut inner)
    }

    /// Current state, refreshed by a liveness probe.
    pub async fn state(&self) -> ProcessState {
        let mut inner = self.inner.lock().await;
        self.probe(&mut inner);
        inner.state
    }

    /// Liveness probe. Updates the state machine as a side effect.
    fn probe(&self, inner: &mut Inner) -> Option<u32> {
        let alive = match inner.child.as_mut() {
            Some(child) => match child.try_wait() {
                Ok(None) => child.id(),
                Ok(Some(status)) => {
                    inner.child = None;
                    if inner.state == ProcessState::Running {
                        warn!(node = %self.dir.display(), %status, "daemon exited unexpectedly");
                        inner.state = ProcessState::Crashed;
                    }
                    None
                }
                Err(e) => {
                    warn!(node = %self.dir.display(), error = %e, "could not poll daemon");
                    None
                }
            },
            None => read_pid(&self.pid_path()).filter(|&pid| pid_alive(pid)),
        };

        match alive {
            Some(pid) => {
                if matches!(inner.state, ProcessState::Stopped | ProcessState::Crashed) {
                    inner.state = ProcessState::Running;
                }
                Some(pid)
            }
            None => {
                match inner.state {
                    ProcessState::Running => inner.state = ProcessState::Crashed,
                    ProcessState::Stopping => inner.state = ProcessState::Stopped,
                    _ => {}
                }
                self.remove_pid_file();
                None
            }
        }
    }

    async fn wait_exit(&self, inner: &mut Inner, pid: u32, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.still_alive(inner, pid) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(self.escalation.poll_interval).await;
        }
    }

    fn still_alive(&self, inner: &mut Inner, pid: u32) -> bool {
        match inner.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => pid_alive(pid),
        }
    }

    fn finish_stop(&self, inner: &mut Inner) {
        inner.child = None;
        inner.state = ProcessState::Stopped;
        self.remove_pid_file();
    }

    fn remove_pid_file(&self) {
        match std::fs::remove_file(self.pid_path()) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(node = %self.dir.display(), error = %e, "could not remove pid file"),
        }
    }
}

/// Read a PID file; `None` if missing or malformed.
pub fn read_pid(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Signal-0 probe. EPERM still means the process exists.
pub fn pid_alive(pid: u32) -> bool {
    let Ok(raw) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    // SAFETY: kill with signal 0 only checks for existence
    if unsafe { libc::kill(raw, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Signal the daemon's process group, falling back to the pid alone.
fn send_signal(pid: u32, sig: Signal) -> NodeResult<()> {
    let raw = libc::pid_t::try_from(pid)
        .ok()
        .filter(|&p| p > 0)
        .ok_or_else(|| NodeError::Process(format!("pid {} out of range", pid)))?;

    // SAFETY: plain signal delivery to a pid we spawned or read from our pid file
    if unsafe { libc::killpg(raw, sig.raw()) } == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() != Some(libc::ESRCH) {
        return Err(NodeError::Process(format!("{} to {} failed: {}", sig, pid, err)));
    }

    // SAFETY: as above
    if unsafe { libc::kill(raw, sig.raw()) } == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::ESRCH) => Ok(()),
        _ => Err(NodeError::Process(format!("{} to {} failed: {}", sig, pid, err))),
    }
}
