//! Mock node for testing.
//!
//! Records every call, can be told to fail or to stall, and keeps an
//! in-memory running flag instead of a real process.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::context::ExecContext;
use crate::error::{NodeError, NodeResult};
use crate::node::{ByteStream, ControllableNode, NodeHandle, NodeIdentity};
use crate::output::Output;
use crate::registry::DriverFactory;
use crate::spec::Extras;

/// Mock controllable node.
#[derive(Debug, Clone)]
pub struct MockNode {
    dir: PathBuf,
    inner: Arc<Mutex<MockNodeInner>>,
}

#[derive(Debug, Default)]
struct MockNodeInner {
    running: bool,
    calls: Vec<String>,
    connected_to: Vec<String>,
    latency: String,
    delay: Option<Duration>,
    fail_with: Option<String>,
    metric: f64,
}

impl MockNode {
    /// Create a mock node rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            inner: Arc::new(Mutex::new(MockNodeInner::default())),
        }
    }

    /// Factory registering mock nodes; honours `delay_ms` and `fail` extras.
    pub fn factory() -> DriverFactory {
        Arc::new(|dir: &Path, extras: &Extras| -> NodeResult<NodeHandle> {
            let node = MockNode::new(dir);
            if let Some(ms) = extras.string("delay_ms")? {
                let ms = ms.parse::<u64>().map_err(|_| NodeError::InvalidExtra {
                    key: "delay_ms".into(),
                    reason: format!("`{}` is not a number", ms),
                })?;
                node.set_delay(Duration::from_millis(ms));
            }
            if let Some(reason) = extras.string("fail")? {
                node.fail_with(reason);
            }
            Ok(Arc::new(node))
        })
    }

    /// Make every operation sleep for `delay` first.
    pub fn set_delay(&self, delay: Duration) {
        self.inner.lock().unwrap().delay = Some(delay);
    }

    /// Make every operation fail with `reason`.
    pub fn fail_with(&self, reason: &str) {
        self.inner.lock().unwrap().fail_with = Some(reason.to_string());
    }

    /// Set the value returned by `metric`.
    pub fn set_metric(&self, value: f64) {
        self.inner.lock().unwrap().metric = value;
    }

    /// Names of the operations invoked so far.
    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }

    /// Peer ids this node was connected to.
    pub fn connected_to(&self) -> Vec<String> {
        self.inner.lock().unwrap().connected_to.clone()
    }

    /// Whether the mock daemon is "running".
    pub fn is_running(&self) -> bool {
        self.inner.lock().unwrap().running
    }

    fn peer_id(&self) -> String {
        format!("mock-{}", self.dir.display())
    }

    async fn enter(&self, op: &str) -> NodeResult<()> {
        let (delay, fail) = {
            let mut inner = self.inner.lock().unwrap();
            inner.calls.push(op.to_string());
            (inner.delay, inner.fail_with.clone())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match fail {
            Some(reason) => Err(NodeError::Driver(reason)),
            None => Ok(()),
        }
    }
}

impl fmt::Display for MockNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mock {}", self.dir.display())
    }
}

#[async_trait]
impl ControllableNode for MockNode {
    async fn init(&self, _ctx: &ExecContext, args: &[String]) -> NodeResult<Output> {
        self.enter("init").await?;
        Ok(Output::empty(args.to_vec()))
    }

    async fn start(&self, _ctx: &ExecContext, _args: &[String]) -> NodeResult<()> {
        self.enter("start").await?;
        let mut inner = self.inner.lock().unwrap();
        if inner.running {
            return Err(NodeError::AlreadyRunning);
        }
        inner.running = true;
        Ok(())
    }

    async fn stop(&self, _ctx: &ExecContext, _wait: bool) -> NodeResult<()> {
        self.enter("stop").await?;
        let mut inner = self.inner.lock().unwrap();
        if !inner.running {
            return Err(NodeError::NotRunning);
        }
        inner.running = false;
        Ok(())
    }

    async fn run_cmd(
        &self,
        _ctx: &ExecContext,
        args: &[String],
        stdin: Option<Vec<u8>>,
    ) -> NodeResult<Output> {
        self.enter("run_cmd").await?;
        let mut stdout = args.join(" ").into_bytes();
        if let Some(input) = stdin {
            stdout.extend_from_slice(&input);
        }
        Ok(Output::new(args.to_vec(), 0, None, stdout, Vec::new()))
    }

    async fn connect(
        &self,
        ctx: &ExecContext,
        other: &dyn ControllableNode,
        _timeout: Duration,
    ) -> NodeResult<()> {
        self.enter("connect").await?;
        let peer = other.identity(ctx).await?;
        self.inner.lock().unwrap().connected_to.push(peer.peer_id);
        Ok(())
    }

    async fn shell(&self, _ctx: &ExecContext, _peers: &[NodeHandle]) -> NodeResult<()> {
        Err(NodeError::Unsupported("shell"))
    }

    async fn identity(&self, _ctx: &ExecContext) -> NodeResult<NodeIdentity> {
        Ok(NodeIdentity {
            peer_id: self.peer_id(),
            api_addr: None,
            swarm_addrs: vec![format!("/mock/{}", self.peer_id())],
        })
    }

    fn attr_list(&self) -> Vec<String> {
        vec!["latency".to_string()]
    }

    fn attr_description(&self, name: &str) -> NodeResult<String> {
        match name {
            "latency" => Ok("simulated latency".to_string()),
            other => Err(NodeError::UnknownAttr(other.to_string())),
        }
    }

    async fn get_attr(&self, _ctx: &ExecContext, name: &str) -> NodeResult<String> {
        match name {
            "latency" => Ok(self.inner.lock().unwrap().latency.clone()),
            other => Err(NodeError::UnknownAttr(other.to_string())),
        }
    }

    async fn set_attr(&self, _ctx: &ExecContext, name: &str, value: &str) -> NodeResult<()> {
        match name {
            "latency" => {
                self.inner.lock().unwrap().latency = value.to_string();
                Ok(())
            }
            other => Err(NodeError::UnknownAttr(other.to_string())),
        }
    }

    async fn events(&self) -> NodeResult<ByteStream> {
        Ok(Box::pin(std::io::Cursor::new(b"mock event\n".to_vec())))
    }

    async fn stdout_reader(&self) -> NodeResult<ByteStream> {
        Ok(Box::pin(std::io::Cursor::new(Vec::new())))
    }

    async fn stderr_reader(&self) -> NodeResult<ByteStream> {
        Ok(Box::pin(std::io::Cursor::new(Vec::new())))
    }

    async fn metric(&self, _ctx: &ExecContext, _name: &str) -> NodeResult<String> {
        self.enter("metric").await?;
        Ok(self.inner.lock().unwrap().metric.to_string())
    }

    fn dir(&self) -> &Path {
        &self.dir
    }

    fn node_type(&self) -> &str {
        "daemon"
    }

    fn deployment(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_twice_is_already_running() {
        let node = MockNode::new("/tmp/mock/0");
        let ctx = ExecContext::background();
        node.start(&ctx, &[]).await.unwrap();
        assert!(matches!(
            node.start(&ctx, &[]).await,
            Err(NodeError::AlreadyRunning)
        ));
        assert_eq!(node.calls(), vec!["start", "start"]);
    }

    #[tokio::test]
    async fn restart_stops_then_starts() {
        let node = MockNode::new("/tmp/mock/0");
        let ctx = ExecContext::background();
        node.start(&ctx, &[]).await.unwrap();
        node.restart(&ctx, &[]).await.unwrap();
        assert!(node.is_running());
        assert_eq!(node.calls(), vec!["start", "stop", "start"]);

        node.stop(&ctx, true).await.unwrap();
        node.restart(&ctx, &[]).await.unwrap();
        assert!(node.is_running());
    }

    #[tokio::test]
    async fn factory_reads_extras() {
        let factory = MockNode::factory();
        let extras = Extras::new().with("fail", "boom");
        let node = factory(Path::new("/tmp/mock/1"), &extras).unwrap();
        let err = node
            .init(&ExecContext::background(), &[])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "driver error: boom");

        let bad = Extras::new().with("delay_ms", "soon");
        assert!(factory(Path::new("/tmp/mock/2"), &bad).is_err());
    }
}
