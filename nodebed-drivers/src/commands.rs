//! Daemon command lines shared by the local and docker drivers.
//!
//! Every command a driver issues is described by a spec extra holding a
//! whitespace-separated argument string, prefixed by the node binary.

use std::time::Duration;

use nodebed_core::{ControllableNode, ExecContext, Extras, NodeError, NodeIdentity, NodeResult};

/// Placeholder replaced by the peer address in `connect_args`.
pub const ADDR_PLACEHOLDER: &str = "{addr}";

/// Commands used to drive one kind of daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSet {
    /// Program prefixed to every command, if any.
    pub binary: Option<String>,
    /// One-time bootstrap arguments.
    pub init: Vec<String>,
    /// Long-running daemon arguments.
    pub daemon: Vec<String>,
    /// Connect arguments, containing `{addr}`.
    pub connect: Vec<String>,
    /// Identity arguments.
    pub id: Vec<String>,
    /// Metric arguments; the metric name is appended.
    pub metric: Option<Vec<String>>,
    /// Event stream arguments.
    pub events: Option<Vec<String>>,
}

fn split(s: &str) -> Vec<String> {
    s.split_whitespace().map(str::to_string).collect()
}

impl CommandSet {
    /// Read the command extras, applying defaults.
    pub fn from_extras(extras: &Extras) -> NodeResult<Self> {
        let connect = split(extras.string("connect_args")?.unwrap_or("swarm connect {addr}"));
        if !connect.iter().any(|a| a.contains(ADDR_PLACEHOLDER)) {
            return Err(NodeError::InvalidExtra {
                key: "connect_args".into(),
                reason: format!("must contain {}", ADDR_PLACEHOLDER),
            });
        }

        Ok(Self {
            binary: extras.string("binary")?.map(str::to_string),
            init: split(extras.string("init_args")?.unwrap_or("init")),
            daemon: split(extras.string("daemon_args")?.unwrap_or("daemon")),
            connect,
            id: split(extras.string("id_args")?.unwrap_or("id")),
            metric: extras.string("metric_args")?.map(split),
            events: extras.string("events_args")?.map(split),
        })
    }

    /// `binary + sub + extra`.
    pub fn command(&self, sub: &[String], extra: &[String]) -> Vec<String> {
        self.binary
            .iter()
            .cloned()
            .chain(sub.iter().cloned())
            .chain(extra.iter().cloned())
            .collect()
    }

    /// Connect command with `addr` substituted.
    pub fn connect_command(&self, addr: &str) -> Vec<String> {
        let sub: Vec<String> = self
            .connect
            .iter()
            .map(|a| a.replace(ADDR_PLACEHOLDER, addr))
            .collect();
        self.command(&sub, &[])
    }

    /// Metric command for `name`, if the driver is configured for metrics.
    pub fn metric_command(&self, name: &str) -> Option<Vec<String>> {
        self.metric
            .as_ref()
            .map(|m| self.command(m, &[name.to_string()]))
    }
}

/// Parse identity output: first line peer id, remaining lines addresses.
pub fn parse_identity(stdout: &str, api_addr: Option<String>) -> NodeResult<NodeIdentity> {
    let mut lines = stdout.lines().map(str::trim).filter(|l| !l.is_empty());
    let peer_id = lines
        .next()
        .ok_or_else(|| NodeError::Identity("empty identity output".into()))?
        .to_string();

    Ok(NodeIdentity {
        peer_id,
        api_addr,
        swarm_addrs: lines.map(str::to_string).collect(),
    })
}

/// Run the identity command on `node` under the short command timeout.
pub async fn query_identity(
    node: &dyn ControllableNode,
    commands: &CommandSet,
    ctx: &ExecContext,
    command_timeout: Duration,
    api_addr: Option<String>,
) -> NodeResult<NodeIdentity> {
    let ctx = ctx.child_with_timeout(command_timeout);
    let argv = commands.command(&commands.id, &[]);
    let output = ctx.run("identity", node.run_cmd(&ctx, &argv, None)).await?;
    if !output.success() {
        return Err(NodeError::Identity(format!(
            "`{}` exited {}: {}",
            argv.join(" "),
            output.exit_code(),
            output.stderr_lossy().trim()
        )));
    }
    parse_identity(&output.stdout_lossy(), api_addr)
}

/// Connect `node` to `other` by dialing the other's first swarm address.
pub async fn connect_nodes(
    node: &dyn ControllableNode,
    commands: &CommandSet,
    ctx: &ExecContext,
    other: &dyn ControllableNode,
    timeout: Duration,
) -> NodeResult<()> {
    let ctx = ctx.child_with_timeout(timeout);
    let peer = other.identity(&ctx).await?;
    let addr = peer.swarm_addrs.first().ok_or_else(|| {
        NodeError::Identity(format!("{} advertises no swarm address", other))
    })?;

    let argv = commands.connect_command(addr);
    let output = ctx.run("connect", node.run_cmd(&ctx, &argv, None)).await?;
    if !output.success() {
        return Err(NodeError::Process(format!(
            "connect to {} exited {}: {}",
            addr,
            output.exit_code(),
            output.stderr_lossy().trim()
        )));
    }
    tracing::debug!(from = %node, to = %other, %addr, "connected");
    Ok(())
}

/// Run the metric command and return its trimmed stdout.
pub async fn query_metric(
    node: &dyn ControllableNode,
    commands: &CommandSet,
    ctx: &ExecContext,
    command_timeout: Duration,
    name: &str,
) -> NodeResult<String> {
    let argv = commands
        .metric_command(name)
        .ok_or(NodeError::Unsupported("metric"))?;
    let ctx = ctx.child_with_timeout(command_timeout);
    let output = ctx.run("metric", node.run_cmd(&ctx, &argv, None)).await?;
    if !output.success() {
        return Err(NodeError::Process(format!(
            "metric `{}` exited {}",
            name,
            output.exit_code()
        )));
    }
    Ok(output.stdout_lossy().trim().to_string())
}
