//! CLI command implementations.

pub mod attr;
pub mod connect;
pub mod drivers;
pub mod init;
pub mod lifecycle;
pub mod logs;
pub mod run;
pub mod shell;

use anyhow::Result;
use nodebed_core::{collect_errors, NodeOutcome};

/// Fail with every per-node error, one per line, if any node failed.
pub(crate) fn finish(outcomes: &[NodeOutcome]) -> Result<()> {
    for outcome in outcomes.iter().filter(|o| !o.is_err()) {
        tracing::debug!(node = %outcome.label(), elapsed = ?outcome.elapsed, "ok");
    }
    collect_errors(outcomes).into_result()?;
    Ok(())
}
