use anyhow::{Result, bail};
use brewdeck::PackageManager;

use super::utils;

/// Install packages one at a time, continuing past failures.
pub async fn install(pm: &PackageManager, names: &[String]) -> Result<()> {
    let mut failed = Vec::new();
    for name in names {
        if !pm.install(name).await.is_success() {
            failed.push(name.as_str());
        }
    }
    report(&failed, "install")
}

pub async fn uninstall(pm: &PackageManager, names: &[String]) -> Result<()> {
    let mut failed = Vec::new();
    for name in names {
        if !pm.uninstall(name).await.is_success() {
            failed.push(name.as_str());
        }
    }
    report(&failed, "uninstall")
}

pub async fn upgrade(pm: &PackageManager, name: &str, force: bool) -> Result<()> {
    utils::finish(pm.upgrade(name, force).await)
}

pub async fn upgrade_selected(pm: &PackageManager, names: &[String]) -> Result<()> {
    utils::finish(pm.upgrade_selected(names).await)
}

pub async fn upgrade_all(pm: &PackageManager) -> Result<()> {
    utils::finish(pm.upgrade_all().await)
}

fn report(failed: &[&str], verb: &str) -> Result<()> {
    if failed.is_empty() {
        return Ok(());
    }
    bail!("Failed to {} {}", verb, failed.join(", "))
}
