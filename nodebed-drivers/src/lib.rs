//! # nodebed-drivers
//!
//! Built-in node drivers for nodebed:
//!
//! - `localdaemon`: a daemon supervised as a local child process
//!   ([`local::LocalDaemon`], on top of [`supervisor::Supervisor`])
//! - `dockerdaemon`: a daemon in a docker container ([`docker::DockerNode`])
//!
//! Plugin manifests ([`plugin`]) register presets on top of these.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod commands;
pub mod docker;
pub mod local;
pub mod netem;
pub mod plugin;
pub mod supervisor;

use std::time::Duration;

use nodebed_core::{Config, Driver, DriverRegistry};

pub use docker::{DockerNode, DockerSettings};
pub use local::{LocalDaemon, LocalSettings};
pub use plugin::{load_plugins, PluginManifest, ScanReport};
pub use supervisor::{Escalation, ProcessState, Supervisor};

/// Registry holding the compiled-in drivers, configured from `config`.
pub fn builtin_registry(config: &Config) -> DriverRegistry {
    let escalation = Escalation::from(&config.stop);

    // docker gets the whole escalation budget as its stop grace
    let grace_ms = config.stop.term_ms + config.stop.term_again_ms + config.stop.quit_ms;
    let stop_grace = Duration::from_millis(grace_ms).max(Duration::from_secs(1));

    let mut registry = DriverRegistry::new();
    registry.register(Driver {
        name: local::DRIVER_NAME.to_string(),
        factory: LocalDaemon::factory(LocalSettings {
            escalation,
            command_timeout: config.timeouts.command(),
        }),
        builtin: true,
        attrs: local::LocalAttr::ALL.iter().map(|a| a.info()).collect(),
    });
    registry.register(Driver {
        name: docker::DRIVER_NAME.to_string(),
        factory: DockerNode::factory(DockerSettings {
            command_timeout: config.timeouts.command(),
            stop_grace,
        }),
        builtin: true,
        attrs: docker::DockerAttr::ALL.iter().map(|a| a.info()).collect(),
    });
    registry
}
