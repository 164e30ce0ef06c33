//! Connect nodes pairwise or along a connection graph.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use nodebed_core::{load_topology, map_connect, map_connect_pairs, parse_pair, star_topology};

use super::finish;
use crate::app::App;

/// Connect every node of the first range to every node of the second.
pub async fn run(app: &App, ranges: &[String], timeout: Option<Duration>) -> Result<()> {
    let nodes = app.nodes()?;
    let (from, to) = parse_pair(ranges, nodes.len())?;
    let timeout = timeout.unwrap_or_else(|| app.config.timeouts.connect());

    let outcomes = map_connect(&app.context(), &from, &to, &nodes, timeout).await?;
    tracing::info!(pairs = outcomes.len(), "connect finished");
    finish(&outcomes)
}

/// Where the edges of a topology come from.
#[derive(Debug, Clone)]
pub enum Graph {
    /// Node 0 dials every other node.
    Star,
    /// `origin:target,...` lines read from a file.
    File(PathBuf),
}

/// Connect the testbed along `graph`, one outcome per edge.
pub async fn topology(app: &App, graph: &Graph, timeout: Option<Duration>) -> Result<()> {
    let nodes = app.nodes()?;
    let edges = match graph {
        Graph::Star => {
            println!("Creating star topology around node 0");
            star_topology(nodes.len())
        }
        Graph::File(path) => load_topology(path, nodes.len())?,
    };
    let timeout = timeout.unwrap_or_else(|| app.config.timeouts.connect());

    let outcomes = map_connect_pairs(&app.context(), &edges, &nodes, timeout).await?;
    tracing::info!(edges = outcomes.len(), "topology connected");
    finish(&outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::tests::mock_app;
    use tempfile::tempdir;

    #[tokio::test]
    async fn connects_all_pairs() {
        let root = tempdir().unwrap();
        let app = mock_app(&root, 3);
        run(&app, &[], None).await.unwrap();
        run(&app, &["0".into(), "[1-2]".into()], Some(Duration::from_secs(1)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn bad_range_is_rejected() {
        let root = tempdir().unwrap();
        let app = mock_app(&root, 2);
        assert!(run(&app, &["0".into(), "[1-4]".into()], None).await.is_err());
        assert!(run(&app, &["x".into()], None).await.is_err());
    }

    #[tokio::test]
    async fn graph_file_drives_connections() {
        let root = tempdir().unwrap();
        let app = mock_app(&root, 3);
        let graph = root.path().join("ring");
        std::fs::write(&graph, "# ring\n0:1\n1:2\n2:0\n").unwrap();

        topology(&app, &Graph::File(graph), None).await.unwrap();
        topology(&app, &Graph::Star, None).await.unwrap();
    }

    #[tokio::test]
    async fn graph_outside_testbed_is_rejected() {
        let root = tempdir().unwrap();
        let app = mock_app(&root, 2);
        let graph = root.path().join("bad");
        std::fs::write(&graph, "0:1\n1:4\n").unwrap();

        let err = topology(&app, &Graph::File(graph), None).await.unwrap_err();
        assert!(err.to_string().contains("line 2"));
        assert!(topology(&app, &Graph::File(root.path().join("missing")), None)
            .await
            .is_err());
    }
}
