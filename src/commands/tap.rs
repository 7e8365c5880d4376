use anyhow::Result;
use brewdeck::PackageManager;

use super::utils;

/// Add a tap, or list taps when no name is given.
pub async fn tap(pm: &PackageManager, name: Option<&str>) -> Result<()> {
    let Some(name) = name else {
        for tap in pm.taps().await? {
            println!("{}", tap);
        }
        return Ok(());
    };
    utils::finish(pm.tap(name).await)
}

pub async fn untap(pm: &PackageManager, name: &str) -> Result<()> {
    utils::finish(pm.untap(name).await)
}
