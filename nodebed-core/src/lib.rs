//! # nodebed-core
//!
//! Orchestration engine for fleets of test-network nodes.
//!
//! A [`Testbed`] is a directory holding an ordered list of [`NodeSpec`]s.
//! Each spec names a driver (`deployment + type`) in the
//! [`DriverRegistry`], which turns it into a live [`ControllableNode`].
//! The fan-out executor then applies one operation to any subset of
//! nodes concurrently and returns one outcome per requested index.
//!
//! ## Example
//!
//! ```ignore
//! use nodebed_core::{fanout, parse_range, ExecContext, Testbed};
//!
//! let testbed = Testbed::new(dir, registry);
//! let nodes = testbed.nodes()?;
//! let list = parse_range("[0-3]")?;
//!
//! let outcomes = fanout::map(&ExecContext::background(), &list, &nodes, timeout,
//!     |node, ctx| async move { node.start(&ctx, &[]).await }).await?;
//! fanout::collect_errors(&outcomes).into_result()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod context;
pub mod error;
pub mod fanout;
pub mod mock;
pub mod node;
pub mod output;
pub mod range;
pub mod registry;
pub mod report;
pub mod spec;
pub mod stats;
pub mod testbed;
pub mod topology;

pub use config::{Config, ConfigError};
pub use context::ExecContext;
pub use error::{MultiError, NodeError, NodeResult, Result, TestbedError};
pub use fanout::{
    collect_errors, map, map_connect, map_connect_pairs, map_with_output, NodeOutcome,
};
pub use mock::MockNode;
pub use node::{AttrInfo, ByteStream, ControllableNode, NodeHandle, NodeIdentity};
pub use output::Output;
pub use range::{
    full_range, parse_attr_pairs, parse_pair, parse_range, validate_range, MAX_RANGE_SPAN,
};
pub use registry::{Driver, DriverFactory, DriverRegistry};
pub use report::{build_metric_report, build_report, NodeSample, Report, RunRecord};
pub use spec::{ExtraValue, Extras, NodeSpec, SpecTemplate};
pub use stats::{build_stats, subtract_arrays, Stats};
pub use testbed::{Testbed, SPEC_FILE};
pub use topology::{load_topology, parse_topology, star_topology, Edge};
