use anyhow::Result;
use brewdeck::{EntityKind, PackageManager, UpdateOutcome};
use colored::Colorize;

use super::utils;

pub async fn info(pm: &PackageManager, names: &[String], cask: bool, json: bool) -> Result<()> {
    let kind = if cask {
        EntityKind::Cask
    } else {
        EntityKind::Formula
    };

    let spinner = utils::spinner(format!("Fetching info for {}...", names.join(", ")), !json);
    let packages = pm.info(names, kind).await;
    spinner.finish_and_clear();
    let packages = packages?;

    if json {
        println!("{}", serde_json::to_string_pretty(&packages)?);
        return Ok(());
    }

    for (i, pkg) in packages.iter().enumerate() {
        if i > 0 {
            println!();
        }
        let version = pkg.version.as_deref().unwrap_or(brewdeck::parse::UNKNOWN_VERSION);
        println!("{}", format!("==> {}: {}", pkg.name, version).bold().green());
        if let Some(desc) = &pkg.description {
            println!("{}", desc);
        }
        if let Some(homepage) = &pkg.homepage {
            println!("{}: {}", "Homepage".bold(), homepage);
        }
        let installed = match &pkg.installed {
            Some(version) => version.green(),
            None => "Not installed".dimmed(),
        };
        println!("{}: {}", "Installed".bold(), installed);
        if !pkg.dependencies.is_empty() {
            println!(
                "{}: {}",
                "Dependencies".bold(),
                pkg.dependencies.join(", ")
            );
        }
        if let Some(warnings) = &pkg.warnings {
            println!("{}", warnings.yellow());
        }
    }
    Ok(())
}

pub async fn deps(pm: &PackageManager, name: &str) -> Result<()> {
    let deps = pm.installed_dependencies(name).await?;
    if deps.is_empty() {
        println!("{} has no installed dependencies", name.bold());
        return Ok(());
    }
    for dep in deps {
        println!("{}", dep);
    }
    Ok(())
}

/// Refresh the database and report formulae and casks it added.
pub async fn new_entities(pm: &PackageManager, json: bool) -> Result<()> {
    // Adopt the current catalog first so the later listing can be diffed.
    pm.new_entities().await?;
    let added = match pm.update_database().await? {
        UpdateOutcome::Updated { new_entities } => new_entities,
        UpdateOutcome::Skipped => pm.new_entities().await?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&added)?);
        return Ok(());
    }

    if added.is_empty() {
        println!("No new formulae or casks");
        return Ok(());
    }
    for (title, names) in [("New Formulae", &added.formulae), ("New Casks", &added.casks)] {
        if names.is_empty() {
            continue;
        }
        println!("{}", format!("==> {}", title).bold().green());
        for name in names {
            println!("  {}", name);
        }
    }
    Ok(())
}
