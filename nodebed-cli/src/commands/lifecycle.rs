//! `start`, `stop` and `restart` over a node range.

use std::sync::Arc;

use anyhow::Result;
use nodebed_core::map;

use super::finish;
use crate::app::App;

/// Start the selected daemons.
pub async fn start(app: &App, range: Option<&str>, args: Vec<String>) -> Result<()> {
    let nodes = app.nodes()?;
    let list = app.select(range, nodes.len())?;
    let args = Arc::new(args);

    let outcomes = map(
        &app.context(),
        &list,
        &nodes,
        app.config.timeouts.operation(),
        move |node, ctx| {
            let args = Arc::clone(&args);
            async move { node.start(&ctx, &args).await }
        },
    )
    .await?;
    finish(&outcomes)
}

/// Stop the selected daemons, escalating unless `wait` is false.
pub async fn stop(app: &App, range: Option<&str>, wait: bool) -> Result<()> {
    let nodes = app.nodes()?;
    let list = app.select(range, nodes.len())?;

    let outcomes = map(
        &app.context(),
        &list,
        &nodes,
        app.config.timeouts.operation(),
        move |node, ctx| async move { node.stop(&ctx, wait).await },
    )
    .await?;
    finish(&outcomes)
}

/// Restart the selected daemons.
pub async fn restart(app: &App, range: Option<&str>, args: Vec<String>) -> Result<()> {
    let nodes = app.nodes()?;
    let list = app.select(range, nodes.len())?;
    let args = Arc::new(args);

    let outcomes = map(
        &app.context(),
        &list,
        &nodes,
        app.config.timeouts.operation(),
        move |node, ctx| {
            let args = Arc::clone(&args);
            async move { node.restart(&ctx, &args).await }
        },
    )
    .await?;
    finish(&outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::tests::mock_app;
    use tempfile::tempdir;

    #[tokio::test]
    async fn start_stop_cycle() {
        let root = tempdir().unwrap();
        let app = mock_app(&root, 3);

        start(&app, None, Vec::new()).await.unwrap();

        // second start fails per node and reports every one of them
        let err = start(&app, Some("[0-1]"), Vec::new()).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("node[0]") && msg.contains("node[1]"));
        assert!(!msg.contains("node[2]"));

        stop(&app, None, true).await.unwrap();
        restart(&app, Some("2"), Vec::new()).await.unwrap();
    }

    #[tokio::test]
    async fn out_of_range_fails_before_dispatch() {
        let root = tempdir().unwrap();
        let app = mock_app(&root, 2);
        let err = start(&app, Some("[0-5]"), Vec::new()).await.unwrap_err();
        assert!(err.to_string().contains("outside of valid range [0-1]"));
    }
}
