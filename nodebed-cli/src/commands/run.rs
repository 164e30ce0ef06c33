//! Run a command on a node range.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use nodebed_core::{
    build_metric_report, build_report, map_with_output, validate_range, ExecContext, NodeHandle,
    RunRecord,
};

use crate::app::App;

/// Run `cmd` on the selected nodes and print the per-node report.
///
/// With `time`, timing statistics are printed and the run is appended to
/// `<root>/results.jsonl`. Each `collect` metric is read before and after
/// the command and its per-node delta summarised.
pub async fn run(
    app: &App,
    range: Option<&str>,
    time: bool,
    collect: &[String],
    cmd: Vec<String>,
) -> Result<()> {
    if cmd.is_empty() {
        anyhow::bail!("no command given");
    }

    let nodes = app.nodes()?;
    let list = app.select(range, nodes.len())?;
    validate_range(&list, nodes.len())?;
    let ctx = app.context();
    let command = cmd.join(" ");
    let mut out = std::io::stdout();

    let mut before = BTreeMap::new();
    for metric in collect {
        let values =
            gather_metric(&ctx, &list, &nodes, metric, app.config.timeouts.command()).await?;
        before.insert(metric.clone(), values);
    }

    let cmd = Arc::new(cmd);
    let outcomes = map_with_output(
        &ctx,
        &list,
        &nodes,
        app.config.timeouts.operation(),
        move |node, ctx| {
            let cmd = Arc::clone(&cmd);
            async move { node.run_cmd(&ctx, &cmd, None).await.map(Some) }
        },
    )
    .await?;

    let report = build_report(&mut out, &outcomes, &command, time)?;
    let mut record = RunRecord::new(&app.testbed.name(), &command, list.len()).with_report(&report);

    for (metric, before) in &before {
        let after =
            gather_metric(&ctx, &list, &nodes, metric, app.config.timeouts.command()).await?;
        let (stats, samples) = build_metric_report(&mut out, &list, before, &after, metric)?;
        record.metrics.insert(metric.clone(), stats);
        record.metric_samples.insert(metric.clone(), samples);
    }
    out.flush()?;

    if time || !collect.is_empty() {
        let path = app.results_path();
        record
            .append_jsonl(&path)
            .with_context(|| format!("Failed to record run in {}", path.display()))?;
    }

    report.errors.into_result()?;
    Ok(())
}

/// Read `metric` from every selected node, in selection order.
async fn gather_metric(
    ctx: &ExecContext,
    list: &[usize],
    nodes: &[NodeHandle],
    metric: &str,
    timeout: Duration,
) -> Result<Vec<String>> {
    let handles: Vec<_> = list
        .iter()
        .map(|&i| {
            let node = Arc::clone(&nodes[i]);
            let ctx = ctx.child_with_timeout(timeout);
            let metric = metric.to_string();
            tokio::spawn(async move { node.metric(&ctx, &metric).await })
        })
        .collect();

    let mut values = Vec::with_capacity(handles.len());
    for (handle, &i) in handles.into_iter().zip(list) {
        let value = handle
            .await
            .context("metric task failed")?
            .with_context(|| format!("node[{}]: metric `{}`", i, metric))?;
        values.push(value);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::tests::mock_app;
    use tempfile::tempdir;

    fn cmd(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn untimed_run_leaves_no_record() {
        let root = tempdir().unwrap();
        let app = mock_app(&root, 2);
        run(&app, None, false, &[], cmd(&["echo", "hi"])).await.unwrap();
        assert!(!app.results_path().exists());
    }

    #[tokio::test]
    async fn timed_run_appends_record() {
        let root = tempdir().unwrap();
        let app = mock_app(&root, 3);

        run(&app, Some("[0-1]"), true, &[], cmd(&["echo"])).await.unwrap();
        run(&app, None, true, &["bw".into()], cmd(&["echo"])).await.unwrap();

        let text = std::fs::read_to_string(app.results_path()).unwrap();
        let records: Vec<RunRecord> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].nodes, 2);
        assert_eq!(records[0].timings.len(), 2);
        assert!(records[0].stats.is_some());
        assert!(records[1].metrics.contains_key("bw"));
        assert_ne!(records[0].run_id, records[1].run_id);
    }

    #[tokio::test]
    async fn range_outside_testbed() {
        let root = tempdir().unwrap();
        let app = mock_app(&root, 2);
        assert!(run(&app, Some("7"), false, &[], cmd(&["true"])).await.is_err());
    }

    #[tokio::test]
    async fn collect_outside_testbed_is_a_validation_error() {
        let root = tempdir().unwrap();
        let app = mock_app(&root, 2);
        let err = run(&app, Some("7"), false, &["bw".into()], cmd(&["true"]))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Node range contains value (7) outside of valid range [0-1]"
        );
        assert!(!app.results_path().exists());
    }

    #[tokio::test]
    async fn collected_samples_carry_node_indices() {
        let root = tempdir().unwrap();
        let app = mock_app(&root, 4);
        run(&app, Some("[3,1]"), false, &["bw".into()], cmd(&["echo"]))
            .await
            .unwrap();

        let text = std::fs::read_to_string(app.results_path()).unwrap();
        let record: RunRecord = serde_json::from_str(text.trim()).unwrap();
        let nodes: Vec<usize> = record.metric_samples["bw"].iter().map(|s| s.node).collect();
        assert_eq!(nodes, vec![3, 1]);
        assert_eq!(record.nodes, 2);
    }

    #[tokio::test]
    async fn empty_command_is_rejected() {
        let root = tempdir().unwrap();
        let app = mock_app(&root, 1);
        assert!(run(&app, None, false, &[], Vec::new()).await.is_err());
    }
}
