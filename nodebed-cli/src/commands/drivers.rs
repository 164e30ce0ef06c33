//! List registered drivers.

use anyhow::Result;
use serde_json::json;

use crate::app::App;

/// Print every driver with its origin and attributes.
pub fn run(app: &App, as_json: bool) -> Result<()> {
    let registry = app.testbed.registry();

    if as_json {
        let drivers: Vec<_> = registry
            .drivers()
            .map(|d| {
                json!({
                    "name": d.name,
                    "builtin": d.builtin,
                    "attrs": d.attrs,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&drivers)?);
        return Ok(());
    }

    for driver in registry.drivers() {
        let origin = if driver.builtin { "built-in" } else { "plugin" };
        let attrs: Vec<&str> = driver.attrs.iter().map(|a| a.name.as_str()).collect();
        println!("{:<16} {:<9} {}", driver.name, origin, attrs.join(","));
    }
    Ok(())
}
