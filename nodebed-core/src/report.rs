//! Human-readable run reports and the persisted per-run record.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{MultiError, Result, TestbedError};
use crate::fanout::NodeOutcome;
use crate::stats::{build_stats, subtract_arrays, Stats};

/// One node's measured value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSample {
    /// Node index.
    pub node: usize,
    /// Value in seconds for timings, raw units for metrics.
    pub value: f64,
}

/// What [`build_report`] found.
#[derive(Debug, Default)]
pub struct Report {
    /// Time statistics, when requested and computable.
    pub stats: Option<Stats>,
    /// Per-node timings of the nodes that produced output.
    pub timings: Vec<NodeSample>,
    /// Aggregated per-node failures.
    pub errors: MultiError,
}

/// Print per-node output and, with `with_stats`, the time statistics.
///
/// Node failures are collected into [`Report::errors`]; only a failure to
/// write to `out` is returned as an error.
pub fn build_report<W: Write>(
    out: &mut W,
    outcomes: &[NodeOutcome],
    command: &str,
    with_stats: bool,
) -> Result<Report> {
    let mut report = Report::default();

    for outcome in outcomes {
        if let Some(err) = outcome.error() {
            report.errors.push(format!("{}: {}", outcome.label(), err));
        }

        if let Some(output) = outcome.output() {
            writeln!(out, "node[{}] exit {}", outcome.node, output.exit_code())?;
            if let Some(err) = output.error() {
                write!(out, "{}", err)?;
            }
            writeln!(out)?;
            out.write_all(output.stdout())?;
            out.write_all(output.stderr())?;
            writeln!(out)?;

            report.timings.push(NodeSample {
                node: outcome.node,
                value: outcome.elapsed_secs(),
            });
        }
    }

    if with_stats {
        let values: Vec<f64> = report.timings.iter().map(|s| s.value).collect();
        match build_stats(&values) {
            Ok(stats) => {
                writeln!(
                    out,
                    "Executed command < {} > on {} node(s)",
                    command,
                    outcomes.len()
                )?;
                writeln!(out, "Time Statistics: {}", serde_json::to_string(&stats)?)?;
                write_samples(out, &report.timings, "time")?;
                report.stats = Some(stats);
            }
            Err(e) => report.errors.push(e.to_string()),
        }
    }

    Ok(report)
}

/// Summarise a metric read before and after a run.
///
/// `nodes` holds the index each reading came from, in reading order.
/// Returns the statistics over `after - before` and the per-node deltas.
pub fn build_metric_report<W: Write>(
    out: &mut W,
    nodes: &[usize],
    before: &[String],
    after: &[String],
    metric: &str,
) -> Result<(Stats, Vec<NodeSample>)> {
    let deltas = subtract_arrays(before, after)?;
    if deltas.len() != nodes.len() {
        return Err(TestbedError::Validation(format!(
            "{} readings of `{}` for {} node(s)",
            deltas.len(),
            metric,
            nodes.len()
        )));
    }
    let stats = build_stats(&deltas)?;
    let samples: Vec<NodeSample> = nodes
        .iter()
        .zip(deltas)
        .map(|(&node, value)| NodeSample { node, value })
        .collect();

    writeln!(
        out,
        "Metric collected < {} > on {} node(s)",
        metric,
        after.len()
    )?;
    writeln!(out, "Statistics: {}", serde_json::to_string(&stats)?)?;
    write_samples(out, &samples, metric)?;

    Ok((stats, samples))
}

fn write_samples<W: Write>(out: &mut W, samples: &[NodeSample], label: &str) -> Result<()> {
    let entries: Vec<String> = samples
        .iter()
        .map(|s| format!("{{Node: {}, {}: {:.6}}}", s.node, label, s.value))
        .collect();
    writeln!(out, "Analytic Results: {{[{}]}}", entries.join(","))?;
    Ok(())
}

/// One line of `results.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Unique id of this invocation.
    pub run_id: Uuid,
    /// Seconds since the unix epoch.
    pub timestamp: u64,
    /// Testbed the command ran against.
    pub testbed: String,
    /// Command line that was executed.
    pub command: String,
    /// Number of nodes the command targeted.
    pub nodes: usize,
    /// Time statistics.
    pub stats: Option<Stats>,
    /// Per-node timings.
    pub timings: Vec<NodeSample>,
    /// Collected metric statistics by metric name.
    #[serde(default)]
    pub metrics: BTreeMap<String, Stats>,
    /// Per-node metric deltas by metric name.
    #[serde(default)]
    pub metric_samples: BTreeMap<String, Vec<NodeSample>>,
}

impl RunRecord {
    /// Start a record for `command` over `nodes` nodes.
    pub fn new(testbed: &str, command: &str, nodes: usize) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self {
            run_id: Uuid::new_v4(),
            timestamp,
            testbed: testbed.to_string(),
            command: command.to_string(),
            nodes,
            stats: None,
            timings: Vec::new(),
            metrics: BTreeMap::new(),
            metric_samples: BTreeMap::new(),
        }
    }

    /// Fill in timing data from a report.
    pub fn with_report(mut self, report: &Report) -> Self {
        self.stats = report.stats;
        self.timings = report.timings.clone();
        self
    }

    /// Append this record as one JSON line, creating the file if needed.
    pub fn append_jsonl(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let line = serde_json::to_string(self)?;
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", line)?;
        tracing::debug!(path = %path.display(), run_id = %self.run_id, "run record appended");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NodeError;
    use crate::output::Output;
    use std::time::Duration;
    use tempfile::tempdir;

    fn ok_outcome(node: usize, millis: u64, stdout: &str) -> NodeOutcome {
        NodeOutcome {
            node,
            peer: None,
            result: Ok(Some(Output::new(
                vec!["echo".into()],
                0,
                None,
                stdout.as_bytes().to_vec(),
                Vec::new(),
            ))),
            elapsed: Duration::from_millis(millis),
        }
    }

    #[test]
    fn report_prints_output_and_collects_errors() {
        let outcomes = vec![
            ok_outcome(0, 100, "hello\n"),
            NodeOutcome {
                node: 1,
                peer: None,
                result: Err(NodeError::NotRunning),
                elapsed: Duration::from_millis(5),
            },
        ];

        let mut out = Vec::new();
        let report = build_report(&mut out, &outcomes, "echo hello", false).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("node[0] exit 0\n\nhello\n"));
        assert!(!text.contains("node[1] exit"));
        assert_eq!(report.errors.to_string(), "node[1]: node is not running");
        assert!(report.stats.is_none());
        assert_eq!(report.timings.len(), 1);
    }

    #[test]
    fn report_with_stats_uses_nodes_with_output() {
        let outcomes = vec![ok_outcome(0, 1000, ""), ok_outcome(2, 3000, "")];

        let mut out = Vec::new();
        let report = build_report(&mut out, &outcomes, "true", true).unwrap();
        let text = String::from_utf8(out).unwrap();

        let stats = report.stats.unwrap();
        assert!((stats.mean - 2.0).abs() < 1e-9);
        assert!(text.contains("Executed command < true > on 2 node(s)"));
        assert!(text.contains("Time Statistics: {\"Mean\":2.0"));
        assert!(text.contains("Analytic Results: {[{Node: 0, time: 1.000000},{Node: 2, time: 3.000000}]}"));
    }

    #[test]
    fn stats_over_no_output_is_an_error_entry() {
        let outcomes = vec![NodeOutcome {
            node: 0,
            peer: None,
            result: Ok(None),
            elapsed: Duration::from_millis(1),
        }];
        let report = build_report(&mut Vec::new(), &outcomes, "x", true).unwrap();
        assert_eq!(report.errors.to_string(), "results are empty");
    }

    #[test]
    fn metric_report_subtracts() {
        let before = vec!["10".to_string(), "20".to_string()];
        let after = vec!["15".to_string(), "30".to_string()];
        let mut out = Vec::new();
        let (stats, samples) = build_metric_report(&mut out, &[3, 5], &before, &after, "bw").unwrap();
        assert_eq!(stats.min, 5.0);
        assert_eq!(stats.max, 10.0);
        assert_eq!(samples[0], NodeSample { node: 3, value: 5.0 });
        assert_eq!(samples[1], NodeSample { node: 5, value: 10.0 });
        assert!(String::from_utf8(out).unwrap().contains("{Node: 5, bw: 10.000000}"));

        assert!(build_metric_report(&mut Vec::new(), &[3, 5], &before, &after[..1], "bw").is_err());
        assert!(build_metric_report(&mut Vec::new(), &[3], &before, &after, "bw").is_err());
    }

    #[test]
    fn run_records_append_one_line_each() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("results.jsonl");

        let first = RunRecord::new("default", "echo a", 2);
        let second = RunRecord::new("default", "echo b", 2);
        first.append_jsonl(&path).unwrap();
        second.append_jsonl(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: RunRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed, second);
        assert_ne!(parsed.run_id, first.run_id);
    }
}
