//! Startup snapshot: every inventory listing, fetched concurrently.

use crate::database::UpdateOutcome;
use crate::error::Result;
use crate::package_manager::PackageManager;
use crate::parse::{InstalledEntry, OutdatedEntry};
use serde::{Deserialize, Serialize};

/// One listing of the snapshot, or the reason it could not be loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "data", rename_all = "lowercase")]
pub enum Section<T> {
    Loaded(Vec<T>),
    Failed(String),
}

impl<T> Section<T> {
    fn from_result(label: &str, result: Result<Vec<T>>) -> Self {
        match result {
            Ok(items) => Section::Loaded(items),
            Err(err) => {
                tracing::warn!("Could not load {}: {}", label, err);
                Section::Failed(err.to_string())
            }
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, Section::Loaded(_))
    }

    pub fn items(&self) -> Option<&[T]> {
        match self {
            Section::Loaded(items) => Some(items.as_slice()),
            Section::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Section::Loaded(_) => None,
            Section::Failed(message) => Some(message.as_str()),
        }
    }
}

/// Everything the UI shows on launch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartupSnapshot {
    pub installed_formulae: Section<InstalledEntry>,
    pub installed_casks: Section<InstalledEntry>,
    pub outdated: Section<OutdatedEntry>,
    pub leaves: Section<String>,
    pub taps: Section<String>,
    /// Present when the snapshot was preceded by a database refresh
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update: Option<UpdateOutcome>,
}

impl StartupSnapshot {
    pub fn failed_sections(&self) -> Vec<&'static str> {
        [
            ("installed formulae", self.installed_formulae.is_loaded()),
            ("installed casks", self.installed_casks.is_loaded()),
            ("outdated packages", self.outdated.is_loaded()),
            ("leaves", self.leaves.is_loaded()),
            ("taps", self.taps.is_loaded()),
        ]
        .into_iter()
        .filter(|(_, loaded)| !loaded)
        .map(|(label, _)| label)
        .collect()
    }
}

impl PackageManager {
    /// Load all five listings concurrently.
    ///
    /// A failing listing becomes a [`Section::Failed`] placeholder and never
    /// affects the others. Listings already in the command cache are reused.
    pub async fn startup_snapshot(&self) -> StartupSnapshot {
        let (installed_formulae, installed_casks, outdated, leaves, taps) = tokio::join!(
            self.installed_formulae(),
            self.installed_casks(),
            self.outdated(),
            self.leaves(),
            self.taps(),
        );

        StartupSnapshot {
            installed_formulae: Section::from_result("installed formulae", installed_formulae),
            installed_casks: Section::from_result("installed casks", installed_casks),
            outdated: Section::from_result("outdated packages", outdated),
            leaves: Section::from_result("leaves", leaves),
            taps: Section::from_result("taps", taps),
            update: None,
        }
    }

    /// Refresh the package database (subject to throttling), then load the snapshot.
    ///
    /// A failed refresh is logged and the snapshot is loaded anyway.
    pub async fn startup_snapshot_refreshed(&self) -> StartupSnapshot {
        let update = match self.update_database().await {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                tracing::warn!("Database update failed: {}", err);
                None
            }
        };

        StartupSnapshot {
            update,
            ..self.startup_snapshot().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::events::EnglishMessages;
    use crate::logging::TracingLog;
    use crate::testing::{RecordingSink, ScriptedRunner};
    use std::sync::Arc;
    use std::time::Duration;

    fn manager(scripted: Arc<ScriptedRunner>) -> PackageManager {
        PackageManager::with_parts(
            Config::with_brew_path("/bin/sh"),
            scripted,
            Arc::new(RecordingSink::default()),
            Arc::new(EnglishMessages::new()),
            Arc::new(TracingLog),
        )
    }

    fn inventory() -> ScriptedRunner {
        ScriptedRunner::new()
            .respond("--version", "Homebrew 4.4.2\n")
            .respond("list --formula --versions", "git 2.40.0\nwget 1.21\n")
            .respond("list --cask --versions", "firefox 120.0\n")
            .respond("leaves", "wget\n")
            .respond("tap", "homebrew/core\nhomebrew/cask\n")
    }

    #[tokio::test]
    async fn test_failing_section_does_not_affect_others() {
        let scripted = Arc::new(inventory().fail("outdated --json=v2", "Error: network down", 1));
        let pm = manager(scripted);

        let snapshot = pm.startup_snapshot().await;
        assert_eq!(snapshot.installed_formulae.items().map(<[_]>::len), Some(2));
        assert_eq!(snapshot.installed_casks.items().map(<[_]>::len), Some(1));
        assert_eq!(snapshot.leaves, Section::Loaded(vec!["wget".to_string()]));
        assert_eq!(snapshot.taps.items().map(<[_]>::len), Some(2));
        assert!(snapshot.outdated.error().unwrap().contains("network down"));
        assert_eq!(snapshot.failed_sections(), vec!["outdated packages"]);
    }

    #[tokio::test]
    async fn test_concurrent_snapshots_share_executions() {
        let scripted = Arc::new(
            inventory()
                .respond("outdated --json=v2", r#"{"formulae":[],"casks":[]}"#)
                .with_delay(Duration::from_millis(20)),
        );
        let pm = manager(scripted.clone());

        let (a, b) = tokio::join!(pm.startup_snapshot(), pm.startup_snapshot());
        assert_eq!(a, b);
        assert!(a.failed_sections().is_empty());
        assert_eq!(scripted.call_count("--version"), 1);
        assert_eq!(scripted.call_count("list --formula --versions"), 1);
        assert_eq!(scripted.call_count("outdated --json=v2"), 1);
    }

    #[tokio::test]
    async fn test_missing_brew_fails_every_section() {
        let pm = PackageManager::with_parts(
            Config::with_brew_path("/nonexistent/bin/brew"),
            Arc::new(ScriptedRunner::new()),
            Arc::new(RecordingSink::default()),
            Arc::new(EnglishMessages::new()),
            Arc::new(TracingLog),
        );
        let snapshot = pm.startup_snapshot().await;
        assert_eq!(snapshot.failed_sections().len(), 5);
    }

    #[tokio::test]
    async fn test_refreshed_snapshot_survives_update_failure() {
        let scripted = Arc::new(
            inventory()
                .respond("outdated --json=v2", r#"{"formulae":[],"casks":[]}"#)
                .fail("update", "fatal: unable to access", 1),
        );
        let pm = manager(scripted.clone());

        let snapshot = pm.startup_snapshot_refreshed().await;
        assert_eq!(snapshot.update, None);
        assert!(snapshot.failed_sections().is_empty());
        assert_eq!(scripted.call_count("update"), 1);
    }

    #[test]
    fn test_section_serialization() {
        let failed: Section<String> = Section::Failed("boom".into());
        assert_eq!(
            serde_json::to_string(&failed).unwrap(),
            r#"{"state":"failed","data":"boom"}"#
        );
    }
}
