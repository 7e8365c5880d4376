use anyhow::Result;
use brewdeck::{PackageManager, UpdateOutcome};
use colored::Colorize;
use std::path::Path;

use super::utils;

pub async fn update(pm: &PackageManager) -> Result<()> {
    let spinner = utils::spinner("Updating package database...", true);
    let outcome = pm.update_database().await;
    spinner.finish_and_clear();

    match outcome? {
        UpdateOutcome::Updated { .. } => {}
        UpdateOutcome::Skipped => {
            println!("{}", "Database was updated less than 5 minutes ago".dimmed());
        }
    }
    Ok(())
}

pub async fn doctor(pm: &PackageManager) -> Result<()> {
    let spinner = utils::spinner("Running brew doctor...", true);
    let report = pm.doctor().await;
    spinner.finish_and_clear();
    println!("{}", report?.trim_end());
    Ok(())
}

pub async fn cleanup(pm: &PackageManager, dry_run: bool) -> Result<()> {
    if dry_run {
        let estimate = pm.cleanup_estimate().await?;
        if estimate.bytes == 0 {
            println!("Nothing to clean up");
        } else {
            print!("{}", estimate.details);
            println!(
                "{} {} can be freed",
                "==>".bold().green(),
                estimate.size.bold()
            );
        }
        return Ok(());
    }

    let spinner = utils::spinner("Cleaning up...", true);
    let output = pm.cleanup().await;
    spinner.finish_and_clear();
    let output = output?;
    if !output.trim().is_empty() {
        println!("{}", output.trim_end());
    }
    println!("{} Cleanup complete", "✓".green());
    Ok(())
}

pub async fn export(pm: &PackageManager, path: &Path) -> Result<()> {
    pm.export_brewfile(path).await?;
    println!("{} Wrote {}", "✓".green(), path.display().to_string().bold());
    Ok(())
}

/// Check the installation and print its version.
pub async fn validate(pm: &PackageManager) -> Result<()> {
    pm.validate_installation().await?;
    let version = pm.executor().version().await?;
    println!(
        "{} {} at {}",
        "✓".green(),
        version.bold(),
        pm.config().brew_path.display()
    );
    Ok(())
}
