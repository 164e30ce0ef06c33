//! Configuration loading for nodebed.
//!
//! Configuration is loaded from an optional TOML file (`<root>/nodebed.toml`);
//! the root and plugin directory can be overridden from the environment.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable locating the nodebed root directory.
pub const ROOT_ENV: &str = "NODEBED_ROOT";

/// Environment variable locating the plugin manifest directory.
pub const PLUGINS_ENV: &str = "NODEBED_PLUGINS";

/// Name of the optional config file inside the root.
pub const CONFIG_FILE: &str = "nodebed.toml";

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Per-operation timeouts.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Graceful-escalation stop timings.
    #[serde(default)]
    pub stop: StopConfig,
    /// Plugin discovery.
    #[serde(default)]
    pub plugins: PluginConfig,
}

/// Timeouts applied to fan-out operations.
#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutConfig {
    /// Per-node timeout for start/stop/run (default: 30).
    #[serde(default = "default_operation_secs")]
    pub operation_secs: u64,
    /// Internal timeout for short exec-based commands (default: 3).
    #[serde(default = "default_command_secs")]
    pub command_secs: u64,
    /// Per-pair timeout for connect (default: 30).
    #[serde(default = "default_connect_secs")]
    pub connect_secs: u64,
}

/// Stage timeouts for terminate → terminate → quit → kill.
#[derive(Debug, Clone, Deserialize)]
pub struct StopConfig {
    /// First SIGTERM wait in milliseconds (default: 1000).
    #[serde(default = "default_term_ms")]
    pub term_ms: u64,
    /// Second SIGTERM wait in milliseconds (default: 2000).
    #[serde(default = "default_term_again_ms")]
    pub term_again_ms: u64,
    /// SIGQUIT wait in milliseconds (default: 5000).
    #[serde(default = "default_quit_ms")]
    pub quit_ms: u64,
    /// SIGKILL wait in milliseconds (default: 5000).
    #[serde(default = "default_kill_ms")]
    pub kill_ms: u64,
    /// Liveness poll interval in milliseconds (default: 10).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// Plugin discovery configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PluginConfig {
    /// Directory scanned for plugin manifests (default: `<root>/plugins`).
    pub dir: Option<PathBuf>,
}

fn default_operation_secs() -> u64 {
    30
}

fn default_command_secs() -> u64 {
    3
}

fn default_connect_secs() -> u64 {
    30
}

fn default_term_ms() -> u64 {
    1000
}

fn default_term_again_ms() -> u64 {
    2000
}

fn default_quit_ms() -> u64 {
    5000
}

fn default_kill_ms() -> u64 {
    5000
}

fn default_poll_interval_ms() -> u64 {
    10
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            operation_secs: default_operation_secs(),
            command_secs: default_command_secs(),
            connect_secs: default_connect_secs(),
        }
    }
}

impl Default for StopConfig {
    fn default() -> Self {
        Self {
            term_ms: default_term_ms(),
            term_again_ms: default_term_again_ms(),
            quit_ms: default_quit_ms(),
            kill_ms: default_kill_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl TimeoutConfig {
    /// Per-node operation timeout.
    pub fn operation(&self) -> Duration {
        Duration::from_secs(self.operation_secs)
    }

    /// Internal command timeout.
    pub fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    /// Per-pair connect timeout.
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Load `<root>/nodebed.toml` if present, defaults otherwise.
    pub fn load_from_root(root: &Path) -> Result<Self, ConfigError> {
        let path = root.join(CONFIG_FILE);
        if path.exists() {
            Self::from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Plugin directory: `NODEBED_PLUGINS`, then the config file, then `<root>/plugins`.
    pub fn plugin_dir(&self, root: &Path) -> PathBuf {
        if let Some(dir) = std::env::var_os(PLUGINS_ENV).filter(|v| !v.is_empty()) {
            return PathBuf::from(dir);
        }
        self.plugins
            .dir
            .clone()
            .unwrap_or_else(|| root.join("plugins"))
    }
}

/// Resolve the root directory: `NODEBED_ROOT`, else `$HOME/testbed`.
pub fn root_dir() -> Result<PathBuf, ConfigError> {
    if let Some(root) = std::env::var_os(ROOT_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(root));
    }

    std::env::var_os("HOME")
        .filter(|v| !v.is_empty())
        .map(|home| PathBuf::from(home).join("testbed"))
        .ok_or(ConfigError::NoRoot)
}

/// Directory of the named testbed under `root`.
pub fn testbed_dir(root: &Path, name: &str) -> PathBuf {
    root.join("testbeds").join(name)
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
    /// Neither `NODEBED_ROOT` nor `HOME` is set.
    #[error("environment variable {} or HOME must be set", ROOT_ENV)]
    NoRoot,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::tempdir;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.timeouts.operation(), Duration::from_secs(30));
        assert_eq!(config.timeouts.command(), Duration::from_secs(3));
        assert_eq!(config.stop.term_ms, 1000);
        assert_eq!(config.stop.term_again_ms, 2000);
        assert_eq!(config.stop.quit_ms, 5000);
        assert_eq!(config.stop.kill_ms, 5000);
        assert_eq!(config.stop.poll_interval_ms, 10);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "[timeouts]\noperation_secs = 5\n\n[stop]\nkill_ms = 250\n",
        )
        .unwrap();

        let config = Config::load_from_root(dir.path()).unwrap();
        assert_eq!(config.timeouts.operation_secs, 5);
        assert_eq!(config.timeouts.connect_secs, 30);
        assert_eq!(config.stop.kill_ms, 250);
        assert_eq!(config.stop.term_ms, 1000);
    }

    #[test]
    fn missing_file_is_default() {
        let dir = tempdir().unwrap();
        let config = Config::load_from_root(dir.path()).unwrap();
        assert_eq!(config.timeouts.operation_secs, 30);
    }

    #[test]
    fn malformed_file_names_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[timeouts\n").unwrap();

        let err = Config::load_from_root(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
        assert!(err.to_string().contains(CONFIG_FILE));
    }

    #[test]
    #[serial]
    fn root_from_env() {
        std::env::set_var(ROOT_ENV, "/srv/nodebed");
        assert_eq!(root_dir().unwrap(), PathBuf::from("/srv/nodebed"));
        std::env::remove_var(ROOT_ENV);

        let home = std::env::var_os("HOME");
        std::env::set_var("HOME", "/home/tester");
        assert_eq!(root_dir().unwrap(), PathBuf::from("/home/tester/testbed"));
        match home {
            Some(h) => std::env::set_var("HOME", h),
            None => std::env::remove_var("HOME"),
        }
    }

    #[test]
    #[serial]
    fn plugin_dir_precedence() {
        let root = Path::new("/srv/nodebed");
        std::env::remove_var(PLUGINS_ENV);

        let mut config = Config::default();
        assert_eq!(config.plugin_dir(root), root.join("plugins"));

        config.plugins.dir = Some(PathBuf::from("/etc/nodebed/plugins"));
        assert_eq!(config.plugin_dir(root), PathBuf::from("/etc/nodebed/plugins"));

        std::env::set_var(PLUGINS_ENV, "/opt/plugins");
        assert_eq!(config.plugin_dir(root), PathBuf::from("/opt/plugins"));
        std::env::remove_var(PLUGINS_ENV);
    }

    #[test]
    fn testbed_dir_layout() {
        assert_eq!(
            testbed_dir(Path::new("/r"), "default"),
            PathBuf::from("/r/testbeds/default")
        );
    }
}
