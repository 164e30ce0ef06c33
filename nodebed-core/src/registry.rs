//! Driver registry: maps `deployment + type` keys to node factories.
//!
//! Populated once at start-up (built-ins first, then plugin manifests) and
//! shared read-only behind an `Arc` afterwards.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::error::{NodeResult, Result, TestbedError};
use crate::node::{AttrInfo, NodeHandle};
use crate::spec::Extras;

/// Builds a live node from its directory and extras.
pub type DriverFactory = Arc<dyn Fn(&Path, &Extras) -> NodeResult<NodeHandle> + Send + Sync>;

/// One registered driver.
#[derive(Clone)]
pub struct Driver {
    /// Registry key.
    pub name: String,
    /// Node constructor.
    pub factory: DriverFactory,
    /// Whether this driver is compiled in.
    pub builtin: bool,
    /// Attributes exposed by nodes of this driver.
    pub attrs: Vec<AttrInfo>,
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("name", &self.name)
            .field("builtin", &self.builtin)
            .field("attrs", &self.attrs)
            .finish_non_exhaustive()
    }
}

/// Name-keyed table of drivers.
#[derive(Debug, Default, Clone)]
pub struct DriverRegistry {
    drivers: BTreeMap<String, Driver>,
}

impl DriverRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a driver, replacing any previous entry with the same name.
    ///
    /// Returns the replaced driver. Overrides are logged, never rejected.
    pub fn register(&mut self, driver: Driver) -> Option<Driver> {
        let previous = self.drivers.insert(driver.name.clone(), driver);
        if let Some(prev) = &previous {
            tracing::warn!(
                driver = %prev.name,
                builtin = prev.builtin,
                "driver registration overrides an existing entry"
            );
        }
        previous
    }

    /// Shorthand for registering a driver without attribute metadata.
    pub fn register_factory(
        &mut self,
        name: &str,
        factory: DriverFactory,
        builtin: bool,
    ) -> Option<Driver> {
        self.register(Driver {
            name: name.to_string(),
            factory,
            builtin,
            attrs: Vec::new(),
        })
    }

    /// Look up the factory for `deployment + type`.
    pub fn resolve(&self, deployment: &str, node_type: &str) -> Result<DriverFactory> {
        let key = format!("{}{}", deployment, node_type);
        self.drivers
            .get(&key)
            .map(|d| Arc::clone(&d.factory))
            .ok_or(TestbedError::DriverNotFound { key })
    }

    /// Driver metadata by key.
    pub fn get(&self, name: &str) -> Option<&Driver> {
        self.drivers.get(name)
    }

    /// All drivers in key order.
    pub fn drivers(&self) -> impl Iterator<Item = &Driver> {
        self.drivers.values()
    }

    /// Number of registered drivers.
    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }
}
