//! Stream daemon logs and events to stdout.

use anyhow::{Context, Result};
use nodebed_core::ByteStream;

use crate::app::App;

/// Copy `stream` to stdout until EOF or Ctrl-C.
async fn pump(mut stream: ByteStream) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    tokio::select! {
        copied = tokio::io::copy(&mut stream, &mut stdout) => {
            let bytes = copied.context("Failed to copy stream")?;
            tracing::debug!(bytes, "stream ended");
        }
        _ = tokio::signal::ctrl_c() => {}
    }
    Ok(())
}

/// Print a node's stdout (or stderr) log.
pub async fn logs(app: &App, node: usize, stderr: bool) -> Result<()> {
    let handle = app.node(node)?;
    let stream = if stderr {
        handle.stderr_reader().await?
    } else {
        handle.stdout_reader().await?
    };
    pump(stream).await
}

/// Follow a node's event stream.
pub async fn events(app: &App, node: usize) -> Result<()> {
    let handle = app.node(node)?;
    pump(handle.events().await?).await
}
