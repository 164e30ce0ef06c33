//! Concurrent fan-out of one operation across a node subset.
//!
//! Indices are validated up front; after that every requested node gets
//! its own task, its own deadline, and exactly one [`NodeOutcome`] in the
//! returned vector, positioned where it was requested.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::context::ExecContext;
use crate::error::{MultiError, NodeError, NodeResult, Result};
use crate::node::NodeHandle;
use crate::output::Output;
use crate::range::validate_range;
use crate::topology::Edge;

/// Result of one unit of fan-out work.
#[derive(Debug)]
pub struct NodeOutcome {
    /// Index of the node the operation ran on.
    pub node: usize,
    /// Index of the peer for pairwise operations.
    pub peer: Option<usize>,
    /// Output, if the operation produces one, or the node's error.
    pub result: NodeResult<Option<Output>>,
    /// Wall-clock time spent on this node.
    pub elapsed: Duration,
}

impl NodeOutcome {
    /// Elapsed time in seconds.
    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }

    /// `node[i]`, or `node[i] => node[j]` for pairs.
    pub fn label(&self) -> String {
        match self.peer {
            Some(peer) => format!("node[{}] => node[{}]", self.node, peer),
            None => format!("node[{}]", self.node),
        }
    }

    /// The output, if the operation succeeded and produced one.
    pub fn output(&self) -> Option<&Output> {
        self.result.as_ref().ok().and_then(|o| o.as_ref())
    }

    /// The error, if the operation failed.
    pub fn error(&self) -> Option<&NodeError> {
        self.result.as_ref().err()
    }

    /// Returns true if the operation failed.
    pub fn is_err(&self) -> bool {
        self.result.is_err()
    }
}

type Pending = (usize, Option<usize>, JoinHandle<(NodeResult<Option<Output>>, Duration)>);

/// Apply `op` to every node in `list` concurrently.
///
/// Each call runs under a child of `parent` bounded by `timeout`. An
/// out-of-range index fails the whole call before anything is spawned.
pub async fn map_with_output<F, Fut>(
    parent: &ExecContext,
    list: &[usize],
    nodes: &[NodeHandle],
    timeout: Duration,
    op: F,
) -> Result<Vec<NodeOutcome>>
where
    F: Fn(NodeHandle, ExecContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = NodeResult<Option<Output>>> + Send + 'static,
{
    validate_range(list, nodes.len())?;

    let op = Arc::new(op);
    let mut pending: Vec<Pending> = Vec::with_capacity(list.len());

    for &index in list {
        let node = Arc::clone(&nodes[index]);
        let ctx = parent.child_with_timeout(timeout);
        let op = Arc::clone(&op);

        let handle = tokio::spawn(async move {
            let started = Instant::now();
            let result = ctx.run("node operation", op(node, ctx.clone())).await;
            (result, started.elapsed())
        });
        pending.push((index, None, handle));
    }

    Ok(join_in_order(pending).await)
}

/// [`map_with_output`] for operations that produce no output.
pub async fn map<F, Fut>(
    parent: &ExecContext,
    list: &[usize],
    nodes: &[NodeHandle],
    timeout: Duration,
    op: F,
) -> Result<Vec<NodeOutcome>>
where
    F: Fn(NodeHandle, ExecContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = NodeResult<()>> + Send + 'static,
{
    map_with_output(parent, list, nodes, timeout, move |node, ctx| {
        let fut = op(node, ctx);
        async move { fut.await.map(|()| None) }
    })
    .await
}

/// Connect every node in `from` to every node in `to`.
///
/// Self-pairs are skipped. Outcomes are ordered from-major and carry the
/// peer index.
pub async fn map_connect(
    parent: &ExecContext,
    from: &[usize],
    to: &[usize],
    nodes: &[NodeHandle],
    timeout: Duration,
) -> Result<Vec<NodeOutcome>> {
    validate_range(from, nodes.len())?;
    validate_range(to, nodes.len())?;

    let pairs: Vec<Edge> = from
        .iter()
        .flat_map(|&f| to.iter().map(move |&t| (f, t)))
        .filter(|(f, t)| f != t)
        .collect();

    map_connect_pairs(parent, &pairs, nodes, timeout).await
}

/// Dial each `(from, to)` pair concurrently, one outcome per pair in order.
pub async fn map_connect_pairs(
    parent: &ExecContext,
    pairs: &[Edge],
    nodes: &[NodeHandle],
    timeout: Duration,
) -> Result<Vec<NodeOutcome>> {
    let (from, to): (Vec<usize>, Vec<usize>) = pairs.iter().copied().unzip();
    validate_range(&from, nodes.len())?;
    validate_range(&to, nodes.len())?;

    let mut pending: Vec<Pending> = Vec::with_capacity(pairs.len());

    for &(f, t) in pairs {
        let node = Arc::clone(&nodes[f]);
        let peer = Arc::clone(&nodes[t]);
        let ctx = parent.child_with_timeout(timeout);

        let handle = tokio::spawn(async move {
            let started = Instant::now();
            let result = ctx
                .run("connect", node.connect(&ctx, peer.as_ref(), timeout))
                .await
                .map(|()| None);
            (result, started.elapsed())
        });
        pending.push((f, Some(t), handle));
    }

    Ok(join_in_order(pending).await)
}

async fn join_in_order(pending: Vec<Pending>) -> Vec<NodeOutcome> {
    let mut outcomes = Vec::with_capacity(pending.len());

    for (node, peer, handle) in pending {
        let (result, elapsed) = match handle.await {
            Ok(done) => done,
            Err(e) => {
                tracing::warn!(node, error = %e, "fan-out task did not complete");
                (
                    Err(NodeError::Process(format!("task failed: {}", e))),
                    Duration::ZERO,
                )
            }
        };
        outcomes.push(NodeOutcome {
            node,
            peer,
            result,
            elapsed,
        });
    }

    outcomes
}

/// Gather every failed outcome into one aggregate, in result order.
pub fn collect_errors(outcomes: &[NodeOutcome]) -> MultiError {
    let mut errors = MultiError::default();
    for outcome in outcomes {
        if let Some(err) = outcome.error() {
            errors.push(format!("{}: {}", outcome.label(), err));
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TestbedError;
    use crate::mock::MockNode;

    fn fleet(n: usize) -> (Vec<MockNode>, Vec<NodeHandle>) {
        let mocks: Vec<MockNode> = (0..n)
            .map(|i| MockNode::new(format!("/tb/{}", i)))
            .collect();
        let handles = mocks
            .iter()
            .map(|m| Arc::new(m.clone()) as NodeHandle)
            .collect();
        (mocks, handles)
    }

    fn echo_dir(node: NodeHandle, _ctx: ExecContext) -> impl Future<Output = NodeResult<Option<Output>>> {
        async move {
            let dir = node.dir().display().to_string();
            Ok(Some(Output::new(vec![dir], 0, None, Vec::new(), Vec::new())))
        }
    }

    // =========================================================================
    // Ordering
    // =========================================================================

    #[tokio::test]
    async fn results_follow_request_order() {
        let (mocks, nodes) = fleet(5);
        // slower nodes first so completion order differs from request order
        mocks[3].set_delay(Duration::from_millis(40));
        mocks[0].set_delay(Duration::from_millis(20));

        let list = vec![3, 0, 4, 1, 0];
        let ctx = ExecContext::background();
        let outcomes = map_with_output(&ctx, &list, &nodes, Duration::from_secs(5), |node, ctx| async move {
            let ran = node.run_cmd(&ctx, &[], None).await;
            ran.map(|_| {
                Some(Output::new(
                    vec![node.dir().display().to_string()],
                    0,
                    None,
                    Vec::new(),
                    Vec::new(),
                ))
            })
        })
        .await
        .unwrap();

        assert_eq!(outcomes.len(), list.len());
        for (outcome, &requested) in outcomes.iter().zip(&list) {
            assert_eq!(outcome.node, requested);
            assert_eq!(
                outcome.output().unwrap().args(),
                &[format!("/tb/{}", requested)]
            );
        }
    }

    // =========================================================================
    // Failure isolation
    // =========================================================================

    #[tokio::test]
    async fn failing_node_does_not_short_circuit() {
        let (mocks, nodes) = fleet(4);
        mocks[2].fail_with("boom");

        let ctx = ExecContext::background();
        let outcomes = map(&ctx, &[0, 1, 2, 3], &nodes, Duration::from_secs(5), |node, ctx| async move {
            node.start(&ctx, &[]).await
        })
        .await
        .unwrap();

        assert_eq!(outcomes.len(), 4);
        assert_eq!(outcomes.iter().filter(|o| o.is_err()).count(), 1);
        assert!(outcomes[2].is_err());
        assert!(mocks[3].is_running());

        let errors = collect_errors(&outcomes);
        assert_eq!(errors.to_string(), "node[2]: driver error: boom");
    }

    #[tokio::test]
    async fn out_of_range_aborts_before_dispatch() {
        let (mocks, nodes) = fleet(2);
        let ctx = ExecContext::background();

        let err = map_with_output(&ctx, &[0, 3], &nodes, Duration::from_secs(5), echo_dir)
            .await
            .unwrap_err();

        assert!(matches!(err, TestbedError::Validation(_)));
        assert_eq!(
            err.to_string(),
            "Node range contains value (3) outside of valid range [0-1]"
        );
        assert!(mocks.iter().all(|m| m.calls().is_empty()));
    }

    #[tokio::test]
    async fn slow_node_times_out_alone() {
        let (mocks, nodes) = fleet(3);
        mocks[1].set_delay(Duration::from_secs(10));

        let ctx = ExecContext::background();
        let outcomes = map(&ctx, &[0, 1, 2], &nodes, Duration::from_millis(50), |node, ctx| async move {
            node.start(&ctx, &[]).await
        })
        .await
        .unwrap();

        assert!(outcomes[0].result.is_ok());
        assert!(outcomes[1].error().unwrap().is_timeout());
        assert!(outcomes[2].result.is_ok());
        assert!(outcomes[1].elapsed < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn cancelled_parent_still_reports_every_node() {
        let (mocks, nodes) = fleet(3);
        for mock in &mocks {
            mock.set_delay(Duration::from_secs(10));
        }

        let ctx = ExecContext::background();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            canceller.cancel();
        });

        let list = vec![2, 0, 1];
        let outcomes = map(&ctx, &list, &nodes, Duration::from_secs(30), |node, ctx| async move {
            node.start(&ctx, &[]).await
        })
        .await
        .unwrap();

        assert_eq!(outcomes.len(), list.len());
        for (outcome, &requested) in outcomes.iter().zip(&list) {
            assert_eq!(outcome.node, requested);
            assert!(
                matches!(outcome.error(), Some(NodeError::Cancelled)),
                "node {} gave {:?}",
                requested,
                outcome.result
            );
        }
    }

    #[tokio::test]
    async fn panicking_task_becomes_process_error() {
        let (_mocks, nodes) = fleet(3);
        let ctx = ExecContext::background();

        let outcomes = map_with_output(&ctx, &[0, 1, 2], &nodes, Duration::from_secs(5), |node, ctx| async move {
            if node.dir().ends_with("1") {
                panic!("driver bug");
            }
            echo_dir(node, ctx).await
        })
        .await
        .unwrap();

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].output().is_some());
        assert!(matches!(outcomes[1].error(), Some(NodeError::Process(_))));
        assert_eq!(outcomes[1].node, 1);
        assert!(outcomes[2].output().is_some());
    }

    // =========================================================================
    // Pairwise connect
    // =========================================================================

    #[tokio::test]
    async fn connect_skips_self_pairs_and_orders_from_major() {
        let (mocks, nodes) = fleet(3);
        let all = vec![0, 1, 2];
        let ctx = ExecContext::background();

        let outcomes = map_connect(&ctx, &all, &all, &nodes, Duration::from_secs(5))
            .await
            .unwrap();

        let pairs: Vec<(usize, Option<usize>)> =
            outcomes.iter().map(|o| (o.node, o.peer)).collect();
        assert_eq!(
            pairs,
            vec![
                (0, Some(1)),
                (0, Some(2)),
                (1, Some(0)),
                (1, Some(2)),
                (2, Some(0)),
                (2, Some(1)),
            ]
        );
        assert!(outcomes.iter().all(|o| o.result.is_ok()));
        let mut peers = mocks[0].connected_to();
        peers.sort();
        assert_eq!(peers, vec!["mock-/tb/1".to_string(), "mock-/tb/2".to_string()]);
        assert_eq!(outcomes[3].label(), "node[1] => node[2]");
    }

    #[tokio::test]
    async fn connect_pairs_keep_graph_order() {
        let (mocks, nodes) = fleet(3);
        let ctx = ExecContext::background();
        mocks[2].fail_with("refused");

        let pairs = vec![(2, 0), (0, 1), (1, 2)];
        let outcomes = map_connect_pairs(&ctx, &pairs, &nodes, Duration::from_secs(5))
            .await
            .unwrap();

        let got: Vec<(usize, Option<usize>)> = outcomes.iter().map(|o| (o.node, o.peer)).collect();
        assert_eq!(got, vec![(2, Some(0)), (0, Some(1)), (1, Some(2))]);
        assert!(outcomes[0].is_err());
        assert!(outcomes[1].result.is_ok());
        assert_eq!(mocks[0].connected_to(), vec!["mock-/tb/1".to_string()]);

        assert!(map_connect_pairs(&ctx, &[(0, 3)], &nodes, Duration::from_secs(1))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn connect_validates_both_sides() {
        let (_mocks, nodes) = fleet(2);
        let ctx = ExecContext::background();
        assert!(map_connect(&ctx, &[0], &[2], &nodes, Duration::from_secs(1))
            .await
            .is_err());
    }
}
