//! Create node specs and bootstrap the nodes.

use anyhow::{Context, Result};
use nodebed_core::{build_report, full_range, parse_attr_pairs, ExtraValue, Extras, SpecTemplate};

use crate::app::App;

/// Arguments of `nodebed init`.
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    pub count: usize,
    pub node_type: String,
    pub deployment: String,
    pub extras: Vec<String>,
    pub force: bool,
    pub bootstrap: bool,
    pub args: Vec<String>,
}

/// Run the init command.
pub async fn run(app: &App, opts: InitOptions) -> Result<()> {
    app.testbed.reset(opts.force)?;

    let extra: Extras = parse_attr_pairs(&opts.extras)
        .into_iter()
        .map(|(key, value)| (key, ExtraValue::from_cli(&value)))
        .collect();
    let template = SpecTemplate {
        deployment: opts.deployment,
        node_type: opts.node_type,
        extra,
    };

    let specs = app.testbed.init_specs(opts.count, &template)?;
    // realize once so a bad driver or extra fails here rather than on first use
    app.testbed
        .nodes_from_specs(&specs)
        .context("Node specs were written but cannot be realized")?;

    if opts.bootstrap {
        let ctx = app.context();
        let outcomes = app
            .testbed
            .init_nodes(
                &ctx,
                &full_range(specs.len()),
                opts.args,
                app.config.timeouts.operation(),
            )
            .await?;

        let report = build_report(&mut std::io::stdout(), &outcomes, "init", false)?;
        report.errors.into_result()?;
    }

    println!(
        "Initialized {} node(s) in {}",
        specs.len(),
        app.testbed.dir().display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodebed_core::{Config, DriverRegistry, MockNode, TestbedError};
    use tempfile::tempdir;

    fn app(root: &std::path::Path) -> App {
        let mut registry = DriverRegistry::new();
        registry.register_factory("mockdaemon", MockNode::factory(), true);
        App::with_registry(root.to_path_buf(), Config::default(), "default", registry)
    }

    fn opts(count: usize) -> InitOptions {
        InitOptions {
            count,
            node_type: "daemon".into(),
            deployment: "mock".into(),
            bootstrap: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn init_writes_specs_and_bootstraps() {
        let root = tempdir().unwrap();
        let app = app(root.path());

        run(&app, opts(3)).await.unwrap();
        let specs = app.testbed.read_node_specs().unwrap();
        assert_eq!(specs.len(), 3);
        assert_eq!(specs[0].driver_key(), "mockdaemon");
    }

    #[tokio::test]
    async fn reinit_needs_force() {
        let root = tempdir().unwrap();
        let app = app(root.path());
        run(&app, opts(2)).await.unwrap();

        let err = run(&app, opts(4)).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TestbedError>(),
            Some(TestbedError::AlreadyInitialized(_))
        ));

        run(&app, InitOptions { force: true, ..opts(4) }).await.unwrap();
        assert_eq!(app.testbed.read_node_specs().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn cli_extras_reach_the_driver() {
        let root = tempdir().unwrap();
        let app = app(root.path());
        let bad = InitOptions {
            extras: vec!["delay_ms,soon".into()],
            ..opts(1)
        };
        assert!(run(&app, bad).await.is_err());
    }

    #[tokio::test]
    async fn unknown_driver_is_rejected() {
        let root = tempdir().unwrap();
        let app = app(root.path());
        let err = run(
            &app,
            InitOptions {
                deployment: "browser".into(),
                ..opts(1)
            },
        )
        .await
        .unwrap_err();
        assert!(format!("{:#}", err).contains("driver not found"));
    }
}
