//! Per-invocation state: root directory, config, registry and testbed.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use nodebed_core::config::{root_dir, testbed_dir};
use nodebed_core::{full_range, parse_range, Config, DriverRegistry, ExecContext, NodeHandle, Testbed};
use nodebed_drivers::{builtin_registry, load_plugins};

/// Results log appended to by timed runs.
pub const RESULTS_FILE: &str = "results.jsonl";

/// Everything a command needs.
pub struct App {
    pub root: PathBuf,
    pub config: Config,
    pub testbed: Testbed,
}

impl App {
    /// Resolve the root, load config and plugins, and open the testbed.
    pub fn open(root: Option<PathBuf>, testbed: &str, plugins: Option<PathBuf>) -> Result<Self> {
        let root = match root {
            Some(root) => root,
            None => default_root()?,
        };
        let config = Config::load_from_root(&root)
            .with_context(|| format!("Failed to load config from {}", root.display()))?;

        let mut registry = builtin_registry(&config);
        let plugin_dir = plugins.unwrap_or_else(|| config.plugin_dir(&root));
        let report = load_plugins(&mut registry, &plugin_dir);
        tracing::debug!(
            dir = %plugin_dir.display(),
            loaded = report.loaded.len(),
            failed = report.failures.len(),
            "plugin scan finished"
        );

        Ok(Self::with_registry(root, config, testbed, registry))
    }

    /// Open `testbed` under `root` with an explicit registry.
    pub fn with_registry(
        root: PathBuf,
        config: Config,
        testbed: &str,
        registry: DriverRegistry,
    ) -> Self {
        let testbed = Testbed::new(testbed_dir(&root, testbed), Arc::new(registry));
        Self {
            root,
            config,
            testbed,
        }
    }

    /// `<root>/results.jsonl`.
    pub fn results_path(&self) -> PathBuf {
        self.root.join(RESULTS_FILE)
    }

    /// Every node of the testbed, realized.
    pub fn nodes(&self) -> Result<Vec<NodeHandle>> {
        if !self.testbed.already_initialized() {
            anyhow::bail!(
                "testbed `{}` is not initialized (run `nodebed init` first)",
                self.testbed.name()
            );
        }
        Ok(self.testbed.nodes()?)
    }

    /// One realized node.
    pub fn node(&self, index: usize) -> Result<NodeHandle> {
        Ok(self.testbed.load_node(index)?)
    }

    /// Parse an optional range argument; absent means every node.
    pub fn select(&self, range: Option<&str>, count: usize) -> Result<Vec<usize>> {
        match range {
            Some(range) => Ok(parse_range(range)?),
            None => Ok(full_range(count)),
        }
    }

    /// Context for the whole invocation; Ctrl-C cancels it.
    pub fn context(&self) -> ExecContext {
        let ctx = ExecContext::background();
        let cancel = ctx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupted, cancelling outstanding operations");
                cancel.cancel();
            }
        });
        ctx
    }
}

fn default_root() -> Result<PathBuf> {
    if let Ok(root) = root_dir() {
        return Ok(root);
    }
    let dirs = directories::ProjectDirs::from("io", "nodebed", "nodebed")
        .context("Could not determine home directory")?;
    Ok(dirs.data_dir().to_path_buf())
}
