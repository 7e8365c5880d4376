use anyhow::Result;
use brewdeck::{InstalledEntry, PackageManager, Section, UpdateOutcome};
use colored::Colorize;

use super::utils;

/// Print everything the UI loads on startup.
pub async fn snapshot(pm: &PackageManager, refresh: bool, json: bool) -> Result<()> {
    let spinner = utils::spinner("Loading installed packages...", !json);
    let snapshot = if refresh {
        pm.startup_snapshot_refreshed().await
    } else {
        pm.startup_snapshot().await
    };
    spinner.finish_and_clear();

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    if let Some(UpdateOutcome::Skipped) = snapshot.update {
        println!("{}", "Database updated recently, skipped refresh".dimmed());
    }

    print_section("Installed Formulae", &snapshot.installed_formulae, versioned);
    print_section("Installed Casks", &snapshot.installed_casks, versioned);
    print_section("Outdated", &snapshot.outdated, |entry| {
        let pinned = if entry.pinned { " (pinned)" } else { "" };
        let flagged = if entry.warnings.is_some() { " ⚠" } else { "" };
        format!(
            "{} {} → {}{}{}",
            entry.name.bold(),
            entry.installed.dimmed(),
            entry.latest.green(),
            pinned,
            flagged.yellow()
        )
    });
    print_section("Leaves", &snapshot.leaves, |name| name.to_string());
    print_section("Taps", &snapshot.taps, |name| name.to_string());

    let failed = snapshot.failed_sections();
    if !failed.is_empty() {
        println!();
        println!(
            "{} Could not load: {}",
            "⚠".yellow(),
            failed.join(", ").yellow()
        );
    }
    Ok(())
}

fn versioned(entry: &InstalledEntry) -> String {
    format!("{} {}", entry.name, entry.version.dimmed())
}

fn print_section<T>(title: &str, section: &Section<T>, render: impl Fn(&T) -> String) {
    match section {
        Section::Loaded(items) => {
            println!(
                "{} {} ({})",
                "==>".bold().green(),
                title.bold(),
                items.len()
            );
            for item in items {
                println!("  {}", render(item));
            }
        }
        Section::Failed(message) => {
            println!("{} {}", "==>".bold().red(), title.bold());
            println!("  {} {}", "⚠".yellow(), message.dimmed());
        }
    }
    println!();
}
