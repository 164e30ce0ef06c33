//! The capability contract every driver-produced node satisfies.
//!
//! # Design
//!
//! Nodes are shared as `Arc<dyn ControllableNode>`; all methods take
//! `&self` so a node can be driven from several fan-out tasks at once.
//! Every operation receives an [`ExecContext`] and must return
//! [`NodeError::Timeout`] rather than hang past its deadline.

use std::fmt;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

use crate::context::ExecContext;
use crate::error::{NodeError, NodeResult};
use crate::output::Output;

/// Owned, async byte stream (log tailers, event readers).
pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;

/// Shared handle to a live node.
pub type NodeHandle = Arc<dyn ControllableNode>;

/// External identity of a node, computed lazily by the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentity {
    /// Peer id.
    pub peer_id: String,
    /// API address, if the daemon exposes one.
    pub api_addr: Option<String>,
    /// Addresses other peers can dial.
    pub swarm_addrs: Vec<String>,
}

/// Name and description of a driver attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrInfo {
    /// Attribute name as accepted by `get_attr` / `set_attr`.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Whether `set_attr` accepts it.
    pub settable: bool,
}

/// A live, controllable test-network node.
#[async_trait]
pub trait ControllableNode: Send + Sync + fmt::Display {
    /// One-time bootstrap (create on-disk state, keys, config).
    async fn init(&self, ctx: &ExecContext, args: &[String]) -> NodeResult<Output>;

    /// Launch the node. Returns once the daemon is spawned, not once ready.
    async fn start(&self, ctx: &ExecContext, args: &[String]) -> NodeResult<()>;

    /// Stop the node. With `wait`, block until the process is gone.
    async fn stop(&self, ctx: &ExecContext, wait: bool) -> NodeResult<()>;

    /// `stop` followed by `start`. A node that is not running is just started.
    async fn restart(&self, ctx: &ExecContext, args: &[String]) -> NodeResult<()> {
        match self.stop(ctx, true).await {
            Ok(()) | Err(NodeError::NotRunning) => {}
            Err(e) => return Err(e),
        }
        self.start(ctx, args).await
    }

    /// Run a command in the context of the node.
    ///
    /// Non-zero exits are reported through [`Output::exit_code`]; an `Err`
    /// means the command could not run or did not finish in time.
    async fn run_cmd(
        &self,
        ctx: &ExecContext,
        args: &[String],
        stdin: Option<Vec<u8>>,
    ) -> NodeResult<Output>;

    /// Connect this node to `other`.
    async fn connect(
        &self,
        ctx: &ExecContext,
        other: &dyn ControllableNode,
        timeout: Duration,
    ) -> NodeResult<()>;

    /// Hand the terminal to an interactive shell in the node's environment.
    async fn shell(&self, ctx: &ExecContext, peers: &[NodeHandle]) -> NodeResult<()>;

    /// Peer id and addresses. Drivers cache this until the process changes.
    async fn identity(&self, ctx: &ExecContext) -> NodeResult<NodeIdentity>;

    /// Names of the attributes this driver exposes.
    fn attr_list(&self) -> Vec<String>;

    /// Description of one attribute.
    fn attr_description(&self, name: &str) -> NodeResult<String>;

    /// Read an attribute.
    async fn get_attr(&self, ctx: &ExecContext, name: &str) -> NodeResult<String>;

    /// Write an attribute.
    async fn set_attr(&self, ctx: &ExecContext, name: &str, value: &str) -> NodeResult<()>;

    /// Live event stream.
    async fn events(&self) -> NodeResult<ByteStream>;

    /// Reader over the daemon's standard output.
    async fn stdout_reader(&self) -> NodeResult<ByteStream>;

    /// Reader over the daemon's standard error.
    async fn stderr_reader(&self) -> NodeResult<ByteStream>;

    /// Read a numeric metric, used by `run --collect`.
    async fn metric(&self, _ctx: &ExecContext, _name: &str) -> NodeResult<String> {
        Err(NodeError::Unsupported("metric"))
    }

    /// Directory assigned to the node.
    fn dir(&self) -> &Path;

    /// What kind of node this is (`daemon`, `ipfs`, ...).
    fn node_type(&self) -> &str;

    /// How the node is hosted (`local`, `docker`, ...).
    fn deployment(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_serializes() {
        let id = NodeIdentity {
            peer_id: "QmPeer".into(),
            api_addr: Some("/ip4/127.0.0.1/tcp/5001".into()),
            swarm_addrs: vec!["/ip4/127.0.0.1/tcp/4001".into()],
        };
        let json = serde_json::to_string(&id).unwrap();
        let back: NodeIdentity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
