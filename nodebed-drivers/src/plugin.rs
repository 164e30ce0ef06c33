//! Plugin manifests: TOML presets layered over a registered driver.
//!
//! ```toml
//! protocol = 1
//! name = "localipfs"
//! backend = "localdaemon"
//!
//! [extras]
//! binary = "ipfs"
//! dir_env = "IPFS_PATH"
//!
//! [attrs]
//! id = "ipfs peer id"
//! ```
//!
//! A plugin registers `name` with a factory that merges its extras
//! beneath the spec's own before delegating to `backend`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};

use nodebed_core::{Driver, DriverFactory, DriverRegistry, Extras, TestbedError};

/// Manifest protocol version understood by this loader.
pub const PLUGIN_PROTOCOL: u32 = 1;

/// Why a single manifest was rejected.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// File could not be read.
    #[error("cannot read manifest: {0}")]
    Read(#[from] std::io::Error),

    /// File is not a valid manifest.
    #[error("invalid manifest: {0}")]
    Parse(#[from] toml::de::Error),

    /// Manifest targets a protocol this loader does not speak.
    #[error("unsupported protocol version {0} (expected 1)")]
    Protocol(u32),

    /// Manifest name is blank.
    #[error("plugin name is empty")]
    EmptyName,

    /// `backend` is not registered.
    #[error("unknown backend driver `{0}`")]
    UnknownBackend(String),

    /// `[attrs]` names an attribute the backend does not expose.
    #[error("backend `{backend}` has no attribute `{attr}`")]
    UnknownAttr {
        /// Backend driver name.
        backend: String,
        /// Attribute named in the manifest.
        attr: String,
    },
}

/// Parsed plugin manifest.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginManifest {
    /// Manifest protocol version.
    pub protocol: u32,
    /// Registry key to register.
    pub name: String,
    /// Driver this preset configures.
    pub backend: String,
    /// Defaults merged beneath the spec's extras.
    #[serde(default)]
    pub extras: Extras,
    /// Attribute description overrides.
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
}

impl PluginManifest {
    /// Read and validate a manifest file.
    pub fn from_file(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate manifest text.
    pub fn parse(content: &str) -> Result<Self, ManifestError> {
        let manifest: PluginManifest = toml::from_str(content)?;
        if manifest.protocol != PLUGIN_PROTOCOL {
            return Err(ManifestError::Protocol(manifest.protocol));
        }
        if manifest.name.trim().is_empty() {
            return Err(ManifestError::EmptyName);
        }
        Ok(manifest)
    }

    /// Build the driver entry on top of `backend` from `registry`.
    pub fn into_driver(self, registry: &DriverRegistry) -> Result<Driver, ManifestError> {
        let backend = registry
            .get(&self.backend)
            .ok_or_else(|| ManifestError::UnknownBackend(self.backend.clone()))?;

        let mut attrs = backend.attrs.clone();
        for (name, description) in &self.attrs {
            let attr = attrs
                .iter_mut()
                .find(|a| &a.name == name)
                .ok_or_else(|| ManifestError::UnknownAttr {
                    backend: self.backend.clone(),
                    attr: name.clone(),
                })?;
            attr.description = description.clone();
        }

        let inner = backend.factory.clone();
        let defaults = self.extras;
        let factory: DriverFactory =
            Arc::new(move |dir: &Path, extras: &Extras| inner(dir, &extras.merged_over(&defaults)));

        Ok(Driver {
            name: self.name,
            factory,
            builtin: false,
            attrs,
        })
    }
}

/// Outcome of a plugin directory scan.
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Names registered, in load order.
    pub loaded: Vec<String>,
    /// One [`TestbedError::PluginLoad`] per rejected file.
    pub failures: Vec<TestbedError>,
}

/// Register every `*.toml` manifest in `dir`, in sorted path order.
///
/// A missing directory loads nothing. Broken manifests are logged and
/// reported; they never stop the scan.
pub fn load_plugins(registry: &mut DriverRegistry, dir: &Path) -> ScanReport {
    let mut report = ScanReport::default();

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(dir = %dir.display(), "no plugin directory");
            return report;
        }
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "cannot scan plugin directory");
            report.failures.push(TestbedError::PluginLoad {
                path: dir.to_path_buf(),
                reason: e.to_string(),
            });
            return report;
        }
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "toml"))
        .collect();
    paths.sort();

    for path in paths {
        let loaded = PluginManifest::from_file(&path).and_then(|m| m.into_driver(registry));
        match loaded {
            Ok(driver) => {
                info!(plugin = %driver.name, path = %path.display(), "plugin loaded");
                report.loaded.push(driver.name.clone());
                registry.register(driver);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping plugin");
                report.failures.push(TestbedError::PluginLoad {
                    path,
                    reason: e.to_string(),
                });
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodebed_core::{AttrInfo, MockNode};
    use tempfile::tempdir;

    fn registry() -> DriverRegistry {
        let mut registry = DriverRegistry::new();
        registry.register(Driver {
            name: "mockdaemon".into(),
            factory: MockNode::factory(),
            builtin: true,
            attrs: vec![AttrInfo {
                name: "latency".into(),
                description: "simulated latency".into(),
                settable: true,
            }],
        });
        registry
    }

    fn manifest(name: &str) -> String {
        format!(
            "protocol = 1\nname = \"{}\"\nbackend = \"mockdaemon\"\n\n[extras]\ndelay_ms = \"5\"\n",
            name
        )
    }

    #[test]
    fn corrupt_manifest_does_not_stop_scan() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.toml"), manifest("mocka")).unwrap();
        std::fs::write(dir.path().join("b.toml"), "protocol = = 1").unwrap();
        std::fs::write(dir.path().join("c.toml"), manifest("mockc")).unwrap();
        std::fs::write(dir.path().join("README.md"), "not a plugin").unwrap();

        let mut registry = registry();
        let report = load_plugins(&mut registry, dir.path());

        assert_eq!(report.loaded, vec!["mocka", "mockc"]);
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(
            &report.failures[0],
            TestbedError::PluginLoad { path, .. } if path.ends_with("b.toml")
        ));
        assert!(registry.get("mocka").is_some_and(|d| !d.builtin));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn missing_directory_is_empty_scan() {
        let dir = tempdir().unwrap();
        let mut registry = registry();
        let report = load_plugins(&mut registry, &dir.path().join("nope"));
        assert!(report.loaded.is_empty());
        assert!(report.failures.is_empty());
    }

    #[test]
    fn protocol_and_backend_are_checked() {
        assert!(matches!(
            PluginManifest::parse("protocol = 2\nname = \"x\"\nbackend = \"mockdaemon\"\n"),
            Err(ManifestError::Protocol(2))
        ));

        let m = PluginManifest::parse("protocol = 1\nname = \"x\"\nbackend = \"ghost\"\n").unwrap();
        assert!(matches!(
            m.into_driver(&registry()),
            Err(ManifestError::UnknownBackend(b)) if b == "ghost"
        ));
    }

    #[test]
    fn attr_overrides() {
        let m = PluginManifest::parse(
            "protocol = 1\nname = \"x\"\nbackend = \"mockdaemon\"\n[attrs]\nlatency = \"rtt\"\n",
        )
        .unwrap();
        let driver = m.into_driver(&registry()).unwrap();
        assert_eq!(driver.attrs[0].description, "rtt");

        let m = PluginManifest::parse(
            "protocol = 1\nname = \"x\"\nbackend = \"mockdaemon\"\n[attrs]\ncolour = \"?\"\n",
        )
        .unwrap();
        assert!(matches!(
            m.into_driver(&registry()),
            Err(ManifestError::UnknownAttr { .. })
        ));
    }

    #[test]
    fn manifest_extras_sit_beneath_spec_extras() {
        let dir = tempdir().unwrap();
        let m = PluginManifest::parse(
            "protocol = 1\nname = \"x\"\nbackend = \"mockdaemon\"\n[extras]\ndelay_ms = \"oops\"\n",
        )
        .unwrap();
        let driver = m.into_driver(&registry()).unwrap();

        // the preset's bad default is rejected unless the spec overrides it
        assert!((driver.factory)(dir.path(), &Extras::new()).is_err());
        let extras = Extras::new().with("delay_ms", "1");
        assert!((driver.factory)(dir.path(), &extras).is_ok());
    }
}
