//! `dockerdaemon`: a daemon running in a docker container.
//!
//! The node directory is bind-mounted into the container at `mount`; the
//! container id lives in `<dir>/dockerid` so later invocations can find
//! it. Commands run through `docker exec`; shaping attributes install a
//! `tc netem` qdisc inside the container.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, InspectContainerOptions,
    KillContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions, WaitContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use nodebed_core::{
    AttrInfo, ByteStream, ControllableNode, DriverFactory, ExecContext, Extras, NodeError,
    NodeHandle, NodeIdentity, NodeResult, Output,
};

use crate::commands::{self, CommandSet};
use crate::netem::{parse_kbit, parse_millis, parse_percent, Shaping};

/// Registry key of this driver.
pub const DRIVER_NAME: &str = "dockerdaemon";

/// File in the node directory holding the container id.
pub const CONTAINER_ID_FILE: &str = "dockerid";

/// Attributes exposed by docker nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DockerAttr {
    /// Peer id.
    Id,
    /// Node directory on the host.
    Path,
    /// Container id.
    Container,
    /// Added latency.
    Latency,
    /// Latency jitter.
    Jitter,
    /// Packet loss.
    Loss,
    /// Bandwidth cap.
    Bandwidth,
}

impl DockerAttr {
    /// Every attribute, in listing order.
    pub const ALL: [DockerAttr; 7] = [
        DockerAttr::Id,
        DockerAttr::Path,
        DockerAttr::Container,
        DockerAttr::Latency,
        DockerAttr::Jitter,
        DockerAttr::Loss,
        DockerAttr::Bandwidth,
    ];

    /// Attribute name.
    pub fn name(self) -> &'static str {
        match self {
            DockerAttr::Id => "id",
            DockerAttr::Path => "path",
            DockerAttr::Container => "container",
            DockerAttr::Latency => "latency",
            DockerAttr::Jitter => "jitter",
            DockerAttr::Loss => "loss",
            DockerAttr::Bandwidth => "bandwidth",
        }
    }

    /// Human-readable description.
    pub fn description(self) -> &'static str {
        match self {
            DockerAttr::Id => "peer id of the node",
            DockerAttr::Path => "host directory mounted into the container",
            DockerAttr::Container => "docker container id",
            DockerAttr::Latency => "added latency, e.g. 50ms",
            DockerAttr::Jitter => "latency jitter, e.g. 10ms (needs latency)",
            DockerAttr::Loss => "packet loss in percent",
            DockerAttr::Bandwidth => "bandwidth cap in kbit/s, e.g. 500 or 2mbit",
        }
    }

    /// Whether `set_attr` accepts it.
    pub fn settable(self) -> bool {
        matches!(
            self,
            DockerAttr::Latency | DockerAttr::Jitter | DockerAttr::Loss | DockerAttr::Bandwidth
        )
    }

    /// Registry metadata.
    pub fn info(self) -> AttrInfo {
        AttrInfo {
            name: self.name().to_string(),
            description: self.description().to_string(),
            settable: self.settable(),
        }
    }
}

impl std::str::FromStr for DockerAttr {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DockerAttr::ALL
            .into_iter()
            .find(|a| a.name() == s)
            .ok_or_else(|| NodeError::UnknownAttr(s.to_string()))
    }
}

/// Settings shared by every docker node in a registry.
#[derive(Debug, Clone)]
pub struct DockerSettings {
    /// Timeout for short internal commands.
    pub command_timeout: Duration,
    /// Grace period handed to `docker stop`.
    pub stop_grace: Duration,
}

impl Default for DockerSettings {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(3),
            stop_grace: Duration::from_secs(8),
        }
    }
}

fn docker_err(e: bollard::errors::Error) -> NodeError {
    NodeError::Driver(format!("docker: {}", e))
}

/// A daemon in a docker container.
pub struct DockerNode {
    dir: PathBuf,
    image: String,
    mount: String,
    dir_env: String,
    api_file: String,
    commands: CommandSet,
    settings: DockerSettings,
    docker: Docker,
    shaping: Mutex<Shaping>,
    identity: Mutex<Option<NodeIdentity>>,
}

impl fmt::Debug for DockerNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DockerNode")
            .field("dir", &self.dir)
            .field("image", &self.image)
            .field("mount", &self.mount)
            .finish_non_exhaustive()
    }
}

impl DockerNode {
    /// Build a node from its directory and extras.
    pub fn new(dir: &Path, extras: &Extras, settings: &DockerSettings) -> NodeResult<Self> {
        let docker = Docker::connect_with_local_defaults().map_err(docker_err)?;

        Ok(Self {
            dir: dir.to_path_buf(),
            image: extras.require_string("image")?.to_string(),
            mount: extras.string("mount")?.unwrap_or("/data").to_string(),
            dir_env: extras.string("dir_env")?.unwrap_or("NODE_DIR").to_string(),
            api_file: extras.string("api_file")?.unwrap_or("api").to_string(),
            commands: CommandSet::from_extras(extras)?,
            settings: settings.clone(),
            docker,
            shaping: Mutex::new(Shaping::new()),
            identity: Mutex::new(None),
        })
    }

    /// Factory for the registry.
    pub fn factory(settings: DockerSettings) -> DriverFactory {
        Arc::new(move |dir: &Path, extras: &Extras| -> NodeResult<NodeHandle> {
            Ok(Arc::new(DockerNode::new(dir, extras, &settings)?))
        })
    }

    fn id_path(&self) -> PathBuf {
        self.dir.join(CONTAINER_ID_FILE)
    }

    /// Id of the node's container, if one was started.
    pub fn container_id(&self) -> NodeResult<String> {
        match std::fs::read_to_string(self.id_path()) {
            Ok(id) if !id.trim().is_empty() => Ok(id.trim().to_string()),
            Ok(_) => Err(NodeError::NotRunning),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(NodeError::NotRunning),
            Err(e) => Err(e.into()),
        }
    }

    fn env(&self) -> Vec<String> {
        vec![format!("{}={}", self.dir_env, self.mount)]
    }

    fn container_config(&self, cmd: Vec<String>) -> ContainerConfig<String> {
        ContainerConfig {
            image: Some(self.image.clone()),
            cmd: Some(cmd),
            env: Some(self.env()),
            host_config: Some(HostConfig {
                binds: Some(vec![format!("{}:{}", self.dir.display(), self.mount)]),
                cap_add: Some(vec!["NET_ADMIN".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    async fn is_running(&self, id: &str) -> NodeResult<bool> {
        match self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
        {
            Ok(info) => Ok(info.state.and_then(|s| s.running).unwrap_or(false)),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(docker_err(e)),
        }
    }

    /// Force-remove `id`, which may also be a container name.
    ///
    /// Runs outside any caller deadline, bounded by the command timeout.
    async fn remove_container(&self, id: &str) {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        let removal = self.docker.remove_container(id, Some(options));
        match tokio::time::timeout(self.settings.command_timeout, removal).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(container = %id, error = %e, "container removal failed"),
            Err(_) => warn!(container = %id, "container removal timed out"),
        }
    }

    fn forget_container(&self) {
        match std::fs::remove_file(self.id_path()) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(node = %self.dir.display(), error = %e, "could not remove container id file"),
        }
        self.forget_identity();
        if let Ok(mut shaping) = self.shaping.lock() {
            *shaping = Shaping::new();
        }
    }

    fn forget_identity(&self) {
        if let Ok(mut cached) = self.identity.lock() {
            *cached = None;
        }
    }

    fn api_addr(&self) -> Option<String> {
        std::fs::read_to_string(self.dir.join(&self.api_file))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn current_shaping(&self) -> Shaping {
        self.shaping
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|_| Shaping::new())
    }

    /// Run `argv` to completion in a throwaway container.
    ///
    /// The container is named up front and removed by name afterwards,
    /// whether the run finished, failed or was cut short by `ctx`.
    async fn run_oneshot(&self, ctx: &ExecContext, argv: Vec<String>) -> NodeResult<Output> {
        let name = container_name();
        let result = ctx
            .run("init", async {
                let options = CreateContainerOptions {
                    name: name.clone(),
                    platform: None,
                };
                let created = self
                    .docker
                    .create_container(Some(options), self.container_config(argv.clone()))
                    .await
                    .map_err(docker_err)?;
                self.wait_oneshot(&created.id, &argv).await
            })
            .await;
        self.remove_container(&name).await;
        result
    }

    async fn wait_oneshot(&self, id: &str, argv: &[String]) -> NodeResult<Output> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(docker_err)?;

        let mut wait = self
            .docker
            .wait_container(id, None::<WaitContainerOptions<String>>);
        let exit_code = match wait.next().await {
            Some(Ok(done)) => done.status_code,
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => code,
            Some(Err(e)) => return Err(docker_err(e)),
            None => -1,
        };

        let (stdout, stderr) = self.collect_logs(id, true, true).await?;
        Ok(Output::new(
            argv.to_vec(),
            i32::try_from(exit_code).unwrap_or(-1),
            None,
            stdout,
            stderr,
        ))
    }

    async fn collect_logs(
        &self,
        id: &str,
        stdout: bool,
        stderr: bool,
    ) -> NodeResult<(Vec<u8>, Vec<u8>)> {
        let options = LogsOptions::<String> {
            stdout,
            stderr,
            follow: false,
            ..Default::default()
        };

        let mut log_stream = self.docker.logs(id, Some(options));
        let mut out = Vec::new();
        let mut err = Vec::new();

        while let Some(chunk) = log_stream.next().await {
            match chunk.map_err(docker_err)? {
                LogOutput::StdOut { message } => out.extend_from_slice(&message),
                LogOutput::StdErr { message } => err.extend_from_slice(&message),
                _ => {}
            }
        }

        Ok((out, err))
    }

    async fn exec(&self, id: &str, argv: &[String], stdin: Option<Vec<u8>>) -> NodeResult<Output> {
        let exec_options = CreateExecOptions {
            cmd: Some(argv.to_vec()),
            env: Some(self.env()),
            attach_stdin: Some(stdin.is_some()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(id, exec_options)
            .await
            .map_err(docker_err)?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        if let StartExecResults::Attached {
            mut output,
            mut input,
        } = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(docker_err)?
        {
            if let Some(data) = stdin {
                input.write_all(&data).await?;
                input.shutdown().await?;
            }

            while let Some(msg) = output.next().await {
                match msg.map_err(docker_err)? {
                    LogOutput::StdOut { message } => stdout.extend_from_slice(&message),
                    LogOutput::StdErr { message } => stderr.extend_from_slice(&message),
                    _ => {}
                }
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(docker_err)?;
        let exit_code = inspect.exit_code.unwrap_or(-1);

        Ok(Output::new(
            argv.to_vec(),
            i32::try_from(exit_code).unwrap_or(-1),
            None,
            stdout,
            stderr,
        ))
    }

    async fn apply_shaping(&self, ctx: &ExecContext, shaping: Shaping) -> NodeResult<()> {
        let id = self.container_id()?;
        let argv = shaping.tc_command();
        let ctx = ctx.child_with_timeout(self.settings.command_timeout);
        let output = ctx.run("shaping", self.exec(&id, &argv, None)).await?;

        // deleting a qdisc that was never installed fails harmlessly
        if !output.success() && !shaping.is_empty() {
            return Err(NodeError::Process(format!(
                "`{}` exited {}: {}",
                argv.join(" "),
                output.exit_code(),
                output.stderr_lossy().trim()
            )));
        }

        info!(node = %self.dir.display(), command = %argv.join(" "), "traffic shaping applied");
        if let Ok(mut current) = self.shaping.lock() {
            *current = shaping;
        }
        Ok(())
    }
}

impl fmt::Display for DockerNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", DRIVER_NAME, self.dir.display())
    }
}

fn container_name() -> String {
    format!("nodebed-{}", uuid::Uuid::new_v4().as_simple())
}

fn show<T: fmt::Display>(value: Option<T>, unit: &str) -> String {
    value.map(|v| format!("{}{}", v, unit)).unwrap_or_default()
}

#[async_trait]
impl ControllableNode for DockerNode {
    async fn init(&self, ctx: &ExecContext, args: &[String]) -> NodeResult<Output> {
        std::fs::create_dir_all(&self.dir)?;
        let argv = self.commands.command(&self.commands.init, args);
        self.run_oneshot(ctx, argv).await
    }

    async fn start(&self, ctx: &ExecContext, args: &[String]) -> NodeResult<()> {
        if let Ok(id) = self.container_id() {
            if self.is_running(&id).await? {
                return Err(NodeError::AlreadyRunning);
            }
            self.remove_container(&id).await;
            self.forget_container();
        }

        let name = container_name();
        let argv = self.commands.command(&self.commands.daemon, args);
        let options = CreateContainerOptions {
            name: name.clone(),
            platform: None,
        };

        // the name addresses the container until its id is known
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.id_path(), &name)?;

        let started = ctx
            .run("start", async {
                let created = self
                    .docker
                    .create_container(Some(options), self.container_config(argv))
                    .await
                    .map_err(docker_err)?;
                self.docker
                    .start_container(&created.id, None::<StartContainerOptions<String>>)
                    .await
                    .map_err(docker_err)?;
                Ok::<_, NodeError>(created.id)
            })
            .await;

        let id = match started {
            Ok(id) => id,
            Err(e) => {
                warn!(node = %self.dir.display(), %name, error = %e, "container start failed, removing");
                self.remove_container(&name).await;
                self.forget_container();
                return Err(e);
            }
        };

        std::fs::write(self.id_path(), &id)?;
        self.forget_identity();
        info!(node = %self.dir.display(), container = %id, %name, "container started");
        Ok(())
    }

    async fn stop(&self, ctx: &ExecContext, wait: bool) -> NodeResult<()> {
        let id = self.container_id()?;
        if !self.is_running(&id).await? {
            self.remove_container(&id).await;
            self.forget_container();
            return Err(NodeError::NotRunning);
        }

        if !wait {
            let options = KillContainerOptions { signal: "SIGTERM" };
            self.docker
                .kill_container(&id, Some(options))
                .await
                .map_err(docker_err)?;
            self.forget_identity();
            return Ok(());
        }

        let grace = i64::try_from(self.settings.stop_grace.as_secs()).unwrap_or(i64::MAX);
        ctx.run("stop", async {
            self.docker
                .stop_container(&id, Some(StopContainerOptions { t: grace }))
                .await
                .map_err(docker_err)
        })
        .await?;

        self.remove_container(&id).await;
        self.forget_container();
        info!(node = %self.dir.display(), container = %id, "container stopped");
        Ok(())
    }

    async fn run_cmd(
        &self,
        ctx: &ExecContext,
        args: &[String],
        stdin: Option<Vec<u8>>,
    ) -> NodeResult<Output> {
        if args.is_empty() {
            return Err(NodeError::Process("no command given".into()));
        }
        let id = self.container_id()?;
        ctx.run("run", self.exec(&id, args, stdin)).await
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
        let id = self.container_id()?;
        let mut cmd = tokio::process::Command::new("docker");
        cmd.arg("exec").arg("-it");
        cmd.arg("-e").arg(format!("{}={}", self.dir_env, self.mount));

        let ctx = ExecContext::with_timeout(self.settings.command_timeout);
        for (i, peer) in peers.iter().enumerate() {
            match peer.identity(&ctx).await {
                Ok(peer_id) => {
                    cmd.arg("-e").arg(format!("NODE{}={}", i, peer_id.peer_id));
                }
                Err(e) => warn!(peer = %peer, error = %e, "peer identity unavailable"),
            }
        }
        cmd.arg(&id).arg("/bin/sh");

        let status = cmd.status().await.map_err(|source| NodeError::Exec {
            command: "docker".into(),
            source,
        })?;
        debug!(node = %self, %status, "shell exited");
        Ok(())
    }

    async fn identity(&self, ctx: &ExecContext) -> NodeResult<NodeIdentity> {
        let cached = self.identity.lock().ok().and_then(|c| c.clone());
        if let Some(id) = cached {
            return Ok(id);
        }

        let id = commands::query_identity(
            self,
            &self.commands,
            ctx,
            self.settings.command_timeout,
            self.api_addr(),
        )
        .await?;
        if let Ok(mut cached) = self.identity.lock() {
            *cached = Some(id.clone());
        }
        Ok(id)
    }

    fn attr_list(&self) -> Vec<String> {
        DockerAttr::ALL.iter().map(|a| a.name().to_string()).collect()
    }

    fn attr_description(&self, name: &str) -> NodeResult<String> {
        Ok(name.parse::<DockerAttr>()?.description().to_string())
    }

    async fn get_attr(&self, ctx: &ExecContext, name: &str) -> NodeResult<String> {
        let shaping = self.current_shaping();
        match name.parse::<DockerAttr>()? {
            DockerAttr::Id => Ok(self.identity(ctx).await?.peer_id),
            DockerAttr::Path => Ok(self.dir.display().to_string()),
            DockerAttr::Container => self.container_id(),
            DockerAttr::Latency => Ok(show(shaping.latency_ms, "ms")),
            DockerAttr::Jitter => Ok(show(shaping.jitter_ms, "ms")),
            DockerAttr::Loss => Ok(show(shaping.loss_percent, "%")),
            DockerAttr::Bandwidth => Ok(show(shaping.rate_kbit, "kbit")),
        }
    }

    async fn set_attr(&self, ctx: &ExecContext, name: &str, value: &str) -> NodeResult<()> {
        let attr = name.parse::<DockerAttr>()?;
        let mut shaping = self.current_shaping();
        match attr {
            DockerAttr::Latency => shaping.latency_ms = parse_millis(name, value)?,
            DockerAttr::Jitter => shaping.jitter_ms = parse_millis(name, value)?,
            DockerAttr::Loss => shaping.loss_percent = parse_percent(name, value)?,
            DockerAttr::Bandwidth => shaping.rate_kbit = parse_kbit(name, value)?,
            DockerAttr::Id | DockerAttr::Path | DockerAttr::Container => {
                return Err(NodeError::ReadOnlyAttr(attr.name().to_string()))
            }
        }
        self.apply_shaping(ctx, shaping).await
    }

    async fn events(&self) -> NodeResult<ByteStream> {
        let id = self.container_id()?;
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: true,
            tail: "0".to_string(),
            ..Default::default()
        };
        let mut log_stream = self.docker.logs(&id, Some(options));
        let (mut writer, reader) = tokio::io::duplex(64 * 1024);

        tokio::spawn(async move {
            while let Some(Ok(chunk)) = log_stream.next().await {
                if writer.write_all(&chunk.into_bytes()).await.is_err() {
                    break;
                }
            }
        });

        Ok(Box::pin(reader))
    }

    async fn stdout_reader(&self) -> NodeResult<ByteStream> {
        let id = self.container_id()?;
        let (out, _) = self.collect_logs(&id, true, false).await?;
        Ok(Box::pin(std::io::Cursor::new(out)))
    }

    async fn stderr_reader(&self) -> NodeResult<ByteStream> {
        let id = self.container_id()?;
        let (_, err) = self.collect_logs(&id, false, true).await?;
        Ok(Box::pin(std::io::Cursor::new(err)))
    }

    async fn metric(&self, ctx: &ExecContext, name: &str) -> NodeResult<String> {
        commands::query_metric(self, &self.commands, ctx, self.settings.command_timeout, name).await
    }

    fn dir(&self) -> &Path {
        &self.dir
    }

    fn node_type(&self) -> &str {
        "daemon"
    }

    fn deployment(&self) -> &str {
        "docker"
    }
}
