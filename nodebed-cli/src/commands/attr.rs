//! Node attribute inspection.

use anyhow::Result;
use nodebed_core::AttrInfo;

use crate::app::App;

/// Registry metadata for `node`'s driver, if the driver declared any.
fn driver_attrs(app: &App, node: usize) -> Result<Vec<AttrInfo>> {
    let specs = app.testbed.read_node_specs()?;
    Ok(specs
        .get(node)
        .and_then(|spec| app.testbed.registry().get(&spec.driver_key()))
        .map(|driver| driver.attrs.clone())
        .unwrap_or_default())
}

/// Print every attribute of `node` with its description.
pub fn list(app: &App, node: usize) -> Result<()> {
    let handle = app.node(node)?;
    let declared = driver_attrs(app, node)?;

    for name in handle.attr_list() {
        match declared.iter().find(|a| a.name == name) {
            Some(info) if info.settable => println!("{:<12} {} (settable)", name, info.description),
            Some(info) => println!("{:<12} {}", name, info.description),
            None => println!("{:<12} {}", name, handle.attr_description(&name)?),
        }
    }
    Ok(())
}

/// Print one attribute's description.
pub fn describe(app: &App, node: usize, attr: &str) -> Result<()> {
    let handle = app.node(node)?;
    let declared = driver_attrs(app, node)?;
    let description = match declared.iter().find(|a| a.name == attr) {
        Some(info) => info.description.clone(),
        None => handle.attr_description(attr)?,
    };
    println!("{}", description);
    Ok(())
}

/// Print an attribute's current value.
pub async fn get(app: &App, node: usize, attr: &str) -> Result<()> {
    let handle = app.node(node)?;
    let ctx = app.context().child_with_timeout(app.config.timeouts.operation());
    println!("{}", handle.get_attr(&ctx, attr).await?);
    Ok(())
}

/// Change an attribute.
pub async fn set(app: &App, node: usize, attr: &str, value: &str) -> Result<()> {
    let handle = app.node(node)?;
    let ctx = app.context().child_with_timeout(app.config.timeouts.operation());
    handle.set_attr(&ctx, attr, value).await?;
    tracing::info!(node, attr, value, "attribute set");
    Ok(())
}
