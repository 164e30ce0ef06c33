//! `localdaemon`: a daemon running as a supervised native process.
//!
//! The node directory is exported to every command through the
//! environment variable named by the `dir_env` extra, so one binary can
//! serve many nodes side by side.

use std::fmt;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWriteExt, ReadBuf};
use tokio::process::{Child, ChildStdout, Command};

use nodebed_core::{
    AttrInfo, ByteStream, ControllableNode, DriverFactory, ExecContext, Extras, NodeError,
    NodeHandle, NodeIdentity, NodeResult, Output,
};

use crate::commands::{self, CommandSet};
use crate::supervisor::{DaemonCommand, Escalation, LogStream, Supervisor};

/// Registry key of this driver.
pub const DRIVER_NAME: &str = "localdaemon";

/// Attributes exposed by local daemons. All are read-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalAttr {
    /// Peer id.
    Id,
    /// Node directory.
    Path,
    /// Daemon pid.
    Pid,
    /// API address.
    Api,
}

impl LocalAttr {
    /// Every attribute, in listing order.
    pub const ALL: [LocalAttr; 4] = [LocalAttr::Id, LocalAttr::Path, LocalAttr::Pid, LocalAttr::Api];

    /// Attribute name.
    pub fn name(self) -> &'static str {
        match self {
            LocalAttr::Id => "id",
            LocalAttr::Path => "path",
            LocalAttr::Pid => "pid",
            LocalAttr::Api => "api",
        }
    }

    /// Human-readable description.
    pub fn description(self) -> &'static str {
        match self {
            LocalAttr::Id => "peer id of the node",
            LocalAttr::Path => "directory owned by the node",
            LocalAttr::Pid => "pid of the running daemon",
            LocalAttr::Api => "api address written by the daemon",
        }
    }

    /// Registry metadata.
    pub fn info(self) -> AttrInfo {
        AttrInfo {
            name: self.name().to_string(),
            description: self.description().to_string(),
            settable: false,
        }
    }
}

impl FromStr for LocalAttr {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LocalAttr::ALL
            .into_iter()
            .find(|a| a.name() == s)
            .ok_or_else(|| NodeError::UnknownAttr(s.to_string()))
    }
}

/// Settings shared by every local daemon in a registry.
#[derive(Debug, Clone)]
pub struct LocalSettings {
    /// Stop escalation stages.
    pub escalation: Escalation,
    /// Timeout for short internal commands (identity, metrics).
    pub command_timeout: Duration,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            escalation: Escalation::default(),
            command_timeout: Duration::from_secs(3),
        }
    }
}

/// A supervised native daemon.
#[derive(Debug)]
pub struct LocalDaemon {
    dir: PathBuf,
    binary: String,
    dir_env: String,
    api_file: String,
    commands: CommandSet,
    command_timeout: Duration,
    supervisor: Supervisor,
    identity: Mutex<Option<NodeIdentity>>,
}

impl LocalDaemon {
    /// Build a node from its directory and extras.
    pub fn new(dir: &Path, extras: &Extras, settings: &LocalSettings) -> NodeResult<Self> {
        let binary = extras.require_string("binary")?.to_string();
        find_program(&binary)?;

        Ok(Self {
            dir: dir.to_path_buf(),
            dir_env: extras.string("dir_env")?.unwrap_or("NODE_DIR").to_string(),
            api_file: extras.string("api_file")?.unwrap_or("api").to_string(),
            commands: CommandSet::from_extras(extras)?,
            binary,
            command_timeout: settings.command_timeout,
            supervisor: Supervisor::new(dir, settings.escalation.clone()),
            identity: Mutex::new(None),
        })
    }

    /// Factory for the registry.
    pub fn factory(settings: LocalSettings) -> DriverFactory {
        Arc::new(move |dir: &Path, extras: &Extras| -> NodeResult<NodeHandle> {
            Ok(Arc::new(LocalDaemon::new(dir, extras, &settings)?))
        })
    }

    /// The process supervisor of this node.
    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    fn forget_identity(&self) {
        if let Ok(mut cached) = self.identity.lock() {
            *cached = None;
        }
    }

    fn cached_identity(&self) -> Option<NodeIdentity> {
        self.identity.lock().ok().and_then(|c| c.clone())
    }

    fn api_addr(&self) -> Option<String> {
        std::fs::read_to_string(self.dir.join(&self.api_file))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn command(&self, program: &str, args: &[String]) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(args).env(&self.dir_env, &self.dir);
        cmd
    }
}

impl fmt::Display for LocalDaemon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", DRIVER_NAME, self.dir.display())
    }
}

#[async_trait]
impl ControllableNode for LocalDaemon {
    async fn init(&self, ctx: &ExecContext, args: &[String]) -> NodeResult<Output> {
        std::fs::create_dir_all(&self.dir)?;
        let argv = self.commands.command(&self.commands.init, args);
        self.run_cmd(ctx, &argv, None).await
    }

    async fn start(&self, ctx: &ExecContext, args: &[String]) -> NodeResult<()> {
        let mut daemon_args = self.commands.daemon.clone();
        daemon_args.extend_from_slice(args);
        let command = DaemonCommand {
            program: self.binary.clone(),
            args: daemon_args,
            envs: vec![(self.dir_env.clone(), self.dir.display().to_string())],
        };

        self.forget_identity();
        ctx.run("start", self.supervisor.start(&command)).await?;
        Ok(())
    }

    async fn stop(&self, ctx: &ExecContext, wait: bool) -> NodeResult<()> {
        self.forget_identity();
        ctx.run("stop", self.supervisor.stop(wait)).await
    }

    async fn run_cmd(
        &self,
        ctx: &ExecContext,
        args: &[String],
        stdin: Option<Vec<u8>>,
    ) -> NodeResult<Output> {
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| NodeError::Process("no command given".into()))?;

        let mut cmd = self.command(program, rest);
        cmd.stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| NodeError::Exec {
            command: program.clone(),
            source,
        })?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            tokio::spawn(async move {
                if let Err(e) = pipe.write_all(&input).await {
                    tracing::debug!(error = %e, "stdin closed early");
                }
            });
        }

        let output = ctx
            .run("run", async { child.wait_with_output().await.map_err(NodeError::from) })
            .await?;

        let (exit_code, error) = match output.status.code() {
            Some(code) => (code, None),
            None => (-1, Some(format!("{}", output.status))),
        };
        Ok(Output::new(
            args.to_vec(),
            exit_code,
            error,
            output.stdout,
            output.stderr,
        ))
    }

    async fn connect(
        &self,
        ctx: &ExecContext,
        other: &dyn ControllableNode,
        timeout: Duration,
    ) -> NodeResult<()> {
        commands::connect_nodes(self, &self.commands, ctx, other, timeout).await
    }

    async fn shell(&self, _ctx: &ExecContext, peers: &[NodeHandle]) -> NodeResult<()> {
        let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
        let mut cmd = self.command(&shell, &[]);

        // peers are exported as NODE0, NODE1, ... holding their peer ids
        let ctx = ExecContext::with_timeout(self.command_timeout);
        for (i, peer) in peers.iter().enumerate() {
            match peer.identity(&ctx).await {
                Ok(id) => {
                    cmd.env(format!("NODE{}", i), id.peer_id);
                }
                Err(e) => tracing::warn!(peer = %peer, error = %e, "peer identity unavailable"),
            }
        }

        let status = cmd.status().await.map_err(|source| NodeError::Exec {
            command: shell.clone(),
            source,
        })?;
        tracing::debug!(node = %self, %status, "shell exited");
        Ok(())
    }

    async fn identity(&self, ctx: &ExecContext) -> NodeResult<NodeIdentity> {
        if let Some(id) = self.cached_identity() {
            return Ok(id);
        }

        let id = commands::query_identity(
            self,
            &self.commands,
            ctx,
            self.command_timeout,
            self.api_addr(),
        )
        .await?;
        if let Ok(mut cached) = self.identity.lock() {
            *cached = Some(id.clone());
        }
        Ok(id)
    }

    fn attr_list(&self) -> Vec<String> {
        LocalAttr::ALL.iter().map(|a| a.name().to_string()).collect()
    }

    fn attr_description(&self, name: &str) -> NodeResult<String> {
        Ok(name.parse::<LocalAttr>()?.description().to_string())
    }

    async fn get_attr(&self, ctx: &ExecContext, name: &str) -> NodeResult<String> {
        match name.parse::<LocalAttr>()? {
            LocalAttr::Id => Ok(self.identity(ctx).await?.peer_id),
            LocalAttr::Path => Ok(self.dir.display().to_string()),
            LocalAttr::Pid => self
                .supervisor
                .pid()
                .await
                .map(|p| p.to_string())
                .ok_or(NodeError::NotRunning),
            LocalAttr::Api => self
                .api_addr()
                .ok_or_else(|| NodeError::Identity("no api address recorded".into())),
        }
    }

    async fn set_attr(&self, _ctx: &ExecContext, name: &str, _value: &str) -> NodeResult<()> {
        let attr = name.parse::<LocalAttr>()?;
        Err(NodeError::ReadOnlyAttr(attr.name().to_string()))
    }

    async fn events(&self) -> NodeResult<ByteStream> {
        let events = self
            .commands
            .events
            .as_ref()
            .ok_or(NodeError::Unsupported("events"))?;
        let argv = self.commands.command(events, &[]);
        let (program, rest) = argv
            .split_first()
            .ok_or_else(|| NodeError::Process("no events command".into()))?;

        let mut child = self
            .command(program, rest)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| NodeError::Exec {
                command: program.clone(),
                source,
            })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| NodeError::Process("events command has no stdout".into()))?;

        Ok(Box::pin(ChildStream {
            _child: child,
            stdout,
        }))
    }

    async fn stdout_reader(&self) -> NodeResult<ByteStream> {
        let file = tokio::fs::File::open(self.supervisor.log_path(LogStream::Stdout)).await?;
        Ok(Box::pin(file))
    }

    async fn stderr_reader(&self) -> NodeResult<ByteStream> {
        let file = tokio::fs::File::open(self.supervisor.log_path(LogStream::Stderr)).await?;
        Ok(Box::pin(file))
    }

    async fn metric(&self, ctx: &ExecContext, name: &str) -> NodeResult<String> {
        commands::query_metric(self, &self.commands, ctx, self.command_timeout, name).await
    }

    fn dir(&self) -> &Path {
        &self.dir
    }

    fn node_type(&self) -> &str {
        "daemon"
    }

    fn deployment(&self) -> &str {
        "local"
    }
}

/// Stdout of a child process that lives as long as the reader.
struct ChildStream {
    _child: Child,
    stdout: ChildStdout,
}

impl AsyncRead for ChildStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stdout).poll_read(cx, buf)
    }
}

/// Check that `program` can be executed: an existing path, or found on `PATH`.
fn find_program(program: &str) -> NodeResult<PathBuf> {
    let missing = || NodeError::Exec {
        command: program.to_string(),
        source: std::io::Error::new(std::io::ErrorKind::NotFound, "binary not found"),
    };

    if program.contains('/') {
        let path = PathBuf::from(program);
        return if path.is_file() { Ok(path) } else { Err(missing()) };
    }

    std::env::var_os("PATH")
        .and_then(|paths| {
            std::env::split_paths(&paths)
                .map(|dir| dir.join(program))
                .find(|candidate| candidate.is_file())
        })
        .ok_or_else(missing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sh_node(dir: &Path, extras: Extras) -> LocalDaemon {
        let extras = extras.merged_over(&Extras::new().with("binary", "/bin/sh"));
        LocalDaemon::new(dir, &extras, &LocalSettings::default()).unwrap()
    }

    #[test]
    fn binary_is_required_and_must_exist() {
        let dir = tempdir().unwrap();
        let settings = LocalSettings::default();
        assert!(matches!(
            LocalDaemon::new(dir.path(), &Extras::new(), &settings),
            Err(NodeError::MissingExtra(k)) if k == "binary"
        ));
        let missing = Extras::new().with("binary", "/nonexistent/nodebed-daemon");
        assert!(matches!(
            LocalDaemon::new(dir.path(), &missing, &settings),
            Err(NodeError::Exec { .. })
        ));
        assert!(find_program("sh").is_ok());
    }

    #[test]
    fn attrs_are_a_closed_read_only_set() {
        assert_eq!("pid".parse::<LocalAttr>().unwrap(), LocalAttr::Pid);
        assert!(matches!(
            "latency".parse::<LocalAttr>(),
            Err(NodeError::UnknownAttr(_))
        ));
        assert!(LocalAttr::ALL.iter().all(|a| !a.info().settable));
    }

    #[tokio::test]
    async fn run_cmd_exports_node_dir() {
        let dir = tempdir().unwrap();
        let node = sh_node(dir.path(), Extras::new().with("dir_env", "TEST_NODE_DIR"));
        let ctx = ExecContext::background();

        let out = node
            .run_cmd(
                &ctx,
                &["/bin/sh".into(), "-c".into(), "echo $TEST_NODE_DIR; exit 4".into()],
                None,
            )
            .await
            .unwrap();
        assert_eq!(out.exit_code(), 4);
        assert_eq!(out.stdout_lossy().trim(), dir.path().display().to_string());
    }

    #[tokio::test]
    async fn run_cmd_feeds_stdin() {
        let dir = tempdir().unwrap();
        let node = sh_node(dir.path(), Extras::new());
        let out = node
            .run_cmd(
                &ExecContext::background(),
                &["cat".into()],
                Some(b"piped".to_vec()),
            )
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout(), b"piped");
    }

    #[tokio::test]
    async fn run_cmd_times_out() {
        let dir = tempdir().unwrap();
        let node = sh_node(dir.path(), Extras::new());
        let ctx = ExecContext::with_timeout(Duration::from_millis(100));
        let err = node
            .run_cmd(&ctx, &["sleep".into(), "5".into()], None)
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn missing_program_is_exec_error() {
        let dir = tempdir().unwrap();
        let node = sh_node(dir.path(), Extras::new());
        let err = node
            .run_cmd(&ExecContext::background(), &["/nonexistent/tool".into()], None)
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Exec { .. }));
    }

    #[tokio::test]
    async fn identity_comes_from_id_args() {
        let dir = tempdir().unwrap();
        let script = dir.path().join("id.sh");
        std::fs::write(&script, "echo peer-a\necho /ip4/127.0.0.1/tcp/1\n").unwrap();
        std::fs::write(dir.path().join("api"), "/ip4/127.0.0.1/tcp/5001\n").unwrap();
        let node = sh_node(
            dir.path(),
            Extras::new().with("id_args", &script.display().to_string()),
        );

        let ctx = ExecContext::background();
        let id = node.identity(&ctx).await.unwrap();
        assert_eq!(id.peer_id, "peer-a");
        assert_eq!(id.swarm_addrs, vec!["/ip4/127.0.0.1/tcp/1"]);
        assert_eq!(id.api_addr.as_deref(), Some("/ip4/127.0.0.1/tcp/5001"));
        assert_eq!(node.get_attr(&ctx, "id").await.unwrap(), "peer-a");
        assert!(matches!(
            node.set_attr(&ctx, "id", "x").await,
            Err(NodeError::ReadOnlyAttr(_))
        ));
    }
}
