//! Error types for nodebed.

use std::path::PathBuf;
use std::time::Duration;

/// Main error type for testbed-level operations.
#[derive(Debug, thiserror::Error)]
pub enum TestbedError {
    /// Malformed range or specification input.
    #[error("parse error: {0}")]
    Parse(String),

    /// Input that parsed but violates a constraint (out-of-range index, etc).
    #[error("{0}")]
    Validation(String),

    /// No driver registered under the `deployment + type` key.
    #[error("driver not found: {key}")]
    DriverNotFound {
        /// The registry key that was looked up.
        key: String,
    },

    /// Statistics requested over an empty sample.
    #[error("results are empty")]
    EmptyInput,

    /// A plugin manifest could not be loaded.
    #[error("failed to load plugin {path}: {reason}")]
    PluginLoad {
        /// Path of the offending plugin file.
        path: PathBuf,
        /// Why it was rejected.
        reason: String,
    },

    /// A driver factory refused to build a node from its spec.
    #[error("could not realize {key} node at {dir}: {source}")]
    Realize {
        /// Driver key of the spec.
        key: String,
        /// Node directory.
        dir: PathBuf,
        /// Factory error.
        #[source]
        source: NodeError,
    },

    /// A node operation failed.
    #[error("node[{index}]: {source}")]
    Node {
        /// Index of the node within the testbed.
        index: usize,
        /// Underlying node error.
        #[source]
        source: NodeError,
    },

    /// The testbed already holds node specifications.
    #[error("testbed already initialized at {0}")]
    AlreadyInitialized(PathBuf),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Specification (de)serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by a single controllable node.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// `start` was called while the daemon is alive.
    #[error("node is already running")]
    AlreadyRunning,

    /// The operation needs a running daemon and there is none.
    #[error("node is not running")]
    NotRunning,

    /// The operation did not finish before its deadline.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// Name of the operation that timed out.
        operation: String,
        /// How long it was allowed to run.
        after: Duration,
    },

    /// The execution context was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// Signal delivery or spawn bookkeeping failed.
    #[error("process error: {0}")]
    Process(String),

    /// A command could not be executed at all (missing binary, etc).
    #[error("failed to execute {command}: {source}")]
    Exec {
        /// Program that was being executed.
        command: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A required spec extra was not provided.
    #[error("missing required extra `{0}`")]
    MissingExtra(String),

    /// A spec extra has the wrong shape.
    #[error("invalid extra `{key}`: {reason}")]
    InvalidExtra {
        /// Extra key.
        key: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Attribute name not known to the driver.
    #[error("unrecognized attribute: {0}")]
    UnknownAttr(String),

    /// Attribute can be read but not written.
    #[error("attribute `{0}` is read-only")]
    ReadOnlyAttr(String),

    /// Attribute value could not be parsed.
    #[error("invalid value `{value}` for attribute `{attr}`")]
    InvalidAttrValue {
        /// Attribute name.
        attr: String,
        /// Rejected value.
        value: String,
    },

    /// The driver does not implement this capability.
    #[error("operation not supported by this driver: {0}")]
    Unsupported(&'static str),

    /// Node identity could not be determined.
    #[error("identity unavailable: {0}")]
    Identity(String),

    /// Error reported by a driver backend (docker daemon, etc).
    #[error("driver error: {0}")]
    Driver(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NodeError {
    /// Returns true if this error is a deadline expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, NodeError::Timeout { .. })
    }
}

/// Aggregate of per-node failures from a fan-out.
#[derive(Debug, Default, thiserror::Error)]
#[error("{}", .messages.join("\n"))]
pub struct MultiError {
    /// One message per failed node, in result order.
    pub messages: Vec<String>,
}

impl MultiError {
    /// Append a failure message.
    pub fn push(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    /// Returns true if no failures were recorded.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Number of recorded failures.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// `Ok(())` when empty, otherwise `Err(self)`.
    pub fn into_result(self) -> std::result::Result<(), MultiError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

/// Result type alias for testbed operations.
pub type Result<T> = std::result::Result<T, TestbedError>;

/// Result type alias for node operations.
pub type NodeResult<T> = std::result::Result<T, NodeError>;
