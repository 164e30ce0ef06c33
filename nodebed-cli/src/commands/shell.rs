//! Interactive shell in a node's environment.

use anyhow::Result;

use crate::app::App;

/// Open a shell for `node`; every testbed node's peer id is exported as `NODE<i>`.
pub async fn run(app: &App, node: usize) -> Result<()> {
    let nodes = app.nodes()?;
    let handle = app.node(node)?;
    handle.shell(&app.context(), &nodes).await?;
    Ok(())
}
