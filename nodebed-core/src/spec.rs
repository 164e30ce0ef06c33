//! Declarative node specifications.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{NodeError, NodeResult, Result, TestbedError};
use crate::node::NodeHandle;
use crate::registry::DriverRegistry;

/// Value of a spec extra: drivers accept strings and flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtraValue {
    /// Flag.
    Bool(bool),
    /// Free-form string.
    String(String),
}

impl ExtraValue {
    /// Interpret a CLI string: `true`/`false` become flags.
    pub fn from_cli(raw: &str) -> Self {
        match raw {
            "true" => ExtraValue::Bool(true),
            "false" => ExtraValue::Bool(false),
            other => ExtraValue::String(other.to_string()),
        }
    }
}

impl fmt::Display for ExtraValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtraValue::Bool(b) => write!(f, "{}", b),
            ExtraValue::String(s) => write!(f, "{}", s),
        }
    }
}

/// Driver-specific extras, fixed at creation time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Extras(BTreeMap<String, ExtraValue>);

impl Extras {
    /// Empty extras.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value.
    pub fn insert(&mut self, key: impl Into<String>, value: ExtraValue) {
        self.0.insert(key.into(), value);
    }

    /// Builder form of [`Extras::insert`] for strings.
    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.insert(key, ExtraValue::String(value.to_string()));
        self
    }

    /// Raw value.
    pub fn get(&self, key: &str) -> Option<&ExtraValue> {
        self.0.get(key)
    }

    /// String value; flags are rejected.
    pub fn string(&self, key: &str) -> NodeResult<Option<&str>> {
        match self.0.get(key) {
            None => Ok(None),
            Some(ExtraValue::String(s)) => Ok(Some(s)),
            Some(ExtraValue::Bool(_)) => Err(NodeError::InvalidExtra {
                key: key.to_string(),
                reason: "expected a string".into(),
            }),
        }
    }

    /// String value that must be present.
    pub fn require_string(&self, key: &str) -> NodeResult<&str> {
        self.string(key)?
            .ok_or_else(|| NodeError::MissingExtra(key.to_string()))
    }

    /// Flag value; the strings `true`/`false` are accepted too.
    pub fn flag(&self, key: &str) -> NodeResult<Option<bool>> {
        match self.0.get(key) {
            None => Ok(None),
            Some(ExtraValue::Bool(b)) => Ok(Some(*b)),
            Some(ExtraValue::String(s)) => match s.as_str() {
                "true" => Ok(Some(true)),
                "false" => Ok(Some(false)),
                _ => Err(NodeError::InvalidExtra {
                    key: key.to_string(),
                    reason: format!("expected a flag, got `{}`", s),
                }),
            },
        }
    }

    /// `self` with `defaults` filled in underneath.
    pub fn merged_over(&self, defaults: &Extras) -> Extras {
        let mut out = defaults.clone();
        for (k, v) in &self.0 {
            out.0.insert(k.clone(), v.clone());
        }
        out
    }

    /// Iterate in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ExtraValue)> {
        self.0.iter()
    }

    /// Returns true if no extras are set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, ExtraValue)> for Extras {
    fn from_iter<I: IntoIterator<Item = (String, ExtraValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Persisted description of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// How the node is hosted.
    #[serde(rename = "Deployment")]
    pub deployment: String,
    /// What the node is.
    #[serde(rename = "Type")]
    pub node_type: String,
    /// Directory owned by the node.
    #[serde(rename = "Dir")]
    pub dir: PathBuf,
    /// Driver-specific extras.
    #[serde(rename = "Extra", default)]
    pub extra: Extras,
}

impl NodeSpec {
    /// Registry key for this spec's driver.
    pub fn driver_key(&self) -> String {
        format!("{}{}", self.deployment, self.node_type)
    }

    /// Materialize a live node through the registry.
    pub fn load(&self, registry: &DriverRegistry) -> Result<NodeHandle> {
        let factory = registry.resolve(&self.deployment, &self.node_type)?;
        factory(&self.dir, &self.extra).map_err(|source| TestbedError::Realize {
            key: self.driver_key(),
            dir: self.dir.clone(),
            source,
        })
    }
}

/// `count × template` input for [`Testbed::init_specs`](crate::Testbed::init_specs).
#[derive(Debug, Clone)]
pub struct SpecTemplate {
    /// Deployment for every node.
    pub deployment: String,
    /// Type for every node.
    pub node_type: String,
    /// Extras copied into every node.
    pub extra: Extras,
}

impl SpecTemplate {
    /// Build the spec for node `index` under `testbed_dir`.
    pub fn instantiate(&self, testbed_dir: &Path, index: usize) -> NodeSpec {
        NodeSpec {
            deployment: self.deployment.clone(),
            node_type: self.node_type.clone(),
            dir: testbed_dir.join(index.to_string()),
            extra: self.extra.clone(),
        }
    }
}
