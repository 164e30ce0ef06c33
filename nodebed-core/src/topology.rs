//! Connection graphs for wiring a testbed.
//!
//! A graph file lists one origin per line followed by the nodes it dials:
//!
//! ```text
//! # ring of four
//! 0:1
//! 1:2
//! 2:3
//! 3:0,1
//! ```
//!
//! Blank lines and lines starting with `#` are skipped. Pairs keep file
//! order, so results can be reported line by line.

use std::path::Path;

use crate::error::{Result, TestbedError};

/// One directed connection: `from` dials `to`.
pub type Edge = (usize, usize);

/// Parse a connection graph for a testbed of `count` nodes.
pub fn parse_topology(text: &str, count: usize) -> Result<Vec<Edge>> {
    let mut edges = Vec::new();

    for (number, line) in text.lines().enumerate() {
        let number = number + 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (origin, targets) = line.split_once(':').ok_or_else(|| {
            TestbedError::Parse(format!(
                "line {} does not follow the `origin:target,...` format",
                number
            ))
        })?;

        let origin = parse_node(origin, number, count)?;
        for target in targets.split(',') {
            let target = parse_node(target, number, count)?;
            if target == origin {
                return Err(TestbedError::Validation(format!(
                    "line {} connects node {} to itself",
                    number, origin
                )));
            }
            edges.push((origin, target));
        }
    }

    Ok(edges)
}

/// Read and parse a graph file.
pub fn load_topology(path: &Path, count: usize) -> Result<Vec<Edge>> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        TestbedError::Parse(format!("cannot read topology {}: {}", path.display(), e))
    })?;
    parse_topology(&text, count)
}

/// Node 0 dials every other node.
pub fn star_topology(count: usize) -> Vec<Edge> {
    (1..count).map(|i| (0, i)).collect()
}

fn parse_node(token: &str, line: usize, count: usize) -> Result<usize> {
    let token = token.trim();
    let index = token.parse::<usize>().map_err(|_| {
        TestbedError::Parse(format!("line {}: `{}` is not a valid node index", line, token))
    })?;
    if index >= count {
        return Err(TestbedError::Validation(format!(
            "line {}: node {} outside of valid range [0-{}]",
            line,
            index,
            count as i64 - 1
        )));
    }
    Ok(index)
}
