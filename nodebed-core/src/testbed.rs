//! A named directory of node specifications and the nodes realized from it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::context::ExecContext;
use crate::error::{Result, TestbedError};
use crate::fanout::{map_with_output, NodeOutcome};
use crate::node::NodeHandle;
use crate::registry::DriverRegistry;
use crate::spec::{NodeSpec, SpecTemplate};

/// File inside the testbed directory holding the JSON spec list.
pub const SPEC_FILE: &str = "nodespec";

/// Persisted specs plus a cache of realized nodes.
///
/// Once a node index has been realized the same instance is returned for
/// the lifetime of the `Testbed`.
pub struct Testbed {
    dir: PathBuf,
    registry: Arc<DriverRegistry>,
    nodes: DashMap<usize, NodeHandle>,
}

impl std::fmt::Debug for Testbed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Testbed")
            .field("dir", &self.dir)
            .field("realized", &self.nodes.len())
            .finish_non_exhaustive()
    }
}

impl Testbed {
    /// Open the testbed rooted at `dir`. Nothing is read until needed.
    pub fn new(dir: impl Into<PathBuf>, registry: Arc<DriverRegistry>) -> Self {
        Self {
            dir: dir.into(),
            registry,
            nodes: DashMap::new(),
        }
    }

    /// Testbed name (last path component).
    pub fn name(&self) -> String {
        self.dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Testbed directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the persisted spec list.
    pub fn spec_path(&self) -> PathBuf {
        self.dir.join(SPEC_FILE)
    }

    /// The driver registry nodes are realized through.
    pub fn registry(&self) -> &DriverRegistry {
        &self.registry
    }

    /// Returns true if a spec list has already been written.
    pub fn already_initialized(&self) -> bool {
        self.spec_path().exists()
    }

    /// Clear an existing testbed before re-initialization.
    ///
    /// Without `force` an initialized testbed is left alone and
    /// [`TestbedError::AlreadyInitialized`] is returned.
    pub fn reset(&self, force: bool) -> Result<()> {
        if !self.already_initialized() {
            return Ok(());
        }
        if !force {
            return Err(TestbedError::AlreadyInitialized(self.dir.clone()));
        }

        tracing::info!(testbed = %self.dir.display(), "removing existing testbed");
        std::fs::remove_dir_all(&self.dir)?;
        self.nodes.clear();
        Ok(())
    }

    /// Write `count` specs built from `template`, node `i` owning `<dir>/<i>`.
    pub fn init_specs(&self, count: usize, template: &SpecTemplate) -> Result<Vec<NodeSpec>> {
        if count == 0 {
            return Err(TestbedError::Validation(
                "node count must be at least 1".into(),
            ));
        }

        let specs: Vec<NodeSpec> = (0..count)
            .map(|i| template.instantiate(&self.dir, i))
            .collect();
        self.write_node_specs(&specs)?;
        self.nodes.clear();
        Ok(specs)
    }

    /// Read the whole spec list.
    pub fn read_node_specs(&self) -> Result<Vec<NodeSpec>> {
        let data = std::fs::read(self.spec_path())?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Overwrite the whole spec list.
    pub fn write_node_specs(&self, specs: &[NodeSpec]) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let data = serde_json::to_vec(specs)?;
        std::fs::write(self.spec_path(), data)?;
        tracing::debug!(testbed = %self.dir.display(), count = specs.len(), "node specs written");
        Ok(())
    }

    /// Realize node `n`, reusing the cached instance when there is one.
    pub fn load_node(&self, n: usize) -> Result<NodeHandle> {
        if let Some(node) = self.nodes.get(&n) {
            return Ok(Arc::clone(node.value()));
        }

        let specs = self.read_node_specs()?;
        let spec = specs.get(n).ok_or_else(|| {
            TestbedError::Validation(format!(
                "Node index ({}) outside of valid range [0-{}]",
                n,
                specs.len() as i64 - 1
            ))
        })?;
        self.realize(n, spec)
    }

    /// Realize every node, in spec order.
    pub fn nodes(&self) -> Result<Vec<NodeHandle>> {
        let specs = self.read_node_specs()?;
        self.nodes_from_specs(&specs)
    }

    /// Realize nodes for an explicit spec list.
    ///
    /// The first factory failure is returned; the persisted specs are not
    /// touched.
    pub fn nodes_from_specs(&self, specs: &[NodeSpec]) -> Result<Vec<NodeHandle>> {
        specs
            .iter()
            .enumerate()
            .map(|(i, spec)| match self.nodes.get(&i) {
                Some(node) => Ok(Arc::clone(node.value())),
                None => self.realize(i, spec),
            })
            .collect()
    }

    fn realize(&self, n: usize, spec: &NodeSpec) -> Result<NodeHandle> {
        let node = spec.load(&self.registry)?;
        // a concurrent loader may have won; keep whichever landed first
        let entry = self.nodes.entry(n).or_insert(node);
        Ok(Arc::clone(entry.value()))
    }

    /// Run `init` on the selected nodes concurrently.
    pub async fn init_nodes(
        &self,
        ctx: &ExecContext,
        list: &[usize],
        args: Vec<String>,
        timeout: Duration,
    ) -> Result<Vec<NodeOutcome>> {
        let nodes = self.nodes()?;
        let args = Arc::new(args);
        map_with_output(ctx, list, &nodes, timeout, move |node, ctx| {
            let args = Arc::clone(&args);
            async move { node.init(&ctx, &args).await.map(Some) }
        })
        .await
    }
}
