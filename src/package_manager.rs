//! High-level PackageManager API - the backend a UI talks to.
//!
//! A [`PackageManager`] lives for one application session. It owns the
//! command cache, the known-entity baseline and the update throttle, so
//! keep a single instance (typically behind an `Arc`) and share it.
//!
//! # Quick Start
//!
//! ```no_run
//! use brewdeck::{ChannelSink, Config, PackageManager};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let (sink, mut events) = ChannelSink::new();
//!     let pm = PackageManager::new(Config::detect(), Arc::new(sink));
//!
//!     let snapshot = pm.startup_snapshot().await;
//!     println!("{} outdated", snapshot.outdated.items().map_or(0, |o| o.len()));
//!
//!     pm.install("ripgrep").await;
//!     while let Ok(event) = events.try_recv() {
//!         println!("{}: {}", event.name, event.payload);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Error Handling
//!
//! Read-only queries return [`Result`]; the startup snapshot turns each
//! failure into a placeholder for that section only. Mutating operations
//! never return an error: the outcome is published as their final event
//! and also returned as an [`ActionOutcome`].

use crate::actions::{ActionOutcome, ActionRunner, Operation};
use crate::config::Config;
use crate::database::{UpdateOutcome, UpdateThrottle, parse_update_summary};
use crate::error::{BrewError, Result};
use crate::events::{self, EnglishMessages, EventSink, Messages};
use crate::executor::{
    BUNDLE_TIMEOUT, CLEANUP_DRY_RUN_TIMEOUT, CLEANUP_TIMEOUT, CommandRunner, DEFAULT_TIMEOUT,
    Executor, SystemRunner, UPDATE_TIMEOUT,
};
use crate::known::{Catalog, EntityKind, KnownEntities};
use crate::logging::{LogQueue, SessionLog, TracingLog};
use crate::parse::{
    self, InstalledEntry, OutdatedEntry, PackageInfo, format_size, parse_cleanup_estimate,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

/// Disk space `brew cleanup` would reclaim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupEstimate {
    pub bytes: u64,
    /// Human-readable form of `bytes`
    pub size: String,
    /// Full dry-run report
    pub details: String,
}

/// Session-scoped backend over the brew CLI
pub struct PackageManager {
    config: Config,
    executor: Executor,
    known: KnownEntities,
    throttle: UpdateThrottle,
    actions: ActionRunner,
    sink: Arc<dyn EventSink>,
    messages: Arc<dyn Messages>,
}

impl PackageManager {
    /// Create a PackageManager running the real brew binary.
    ///
    /// Must be called inside a tokio runtime for the session log to be active.
    pub fn new(config: Config, sink: Arc<dyn EventSink>) -> Self {
        Self::with_parts(
            config,
            Arc::new(SystemRunner),
            sink,
            Arc::new(EnglishMessages::new()),
            Arc::new(TracingLog),
        )
    }

    /// Create a PackageManager from explicit collaborators.
    pub fn with_parts(
        config: Config,
        runner: Arc<dyn CommandRunner>,
        sink: Arc<dyn EventSink>,
        messages: Arc<dyn Messages>,
        log: Arc<dyn SessionLog>,
    ) -> Self {
        let executor = Executor::new(
            runner,
            config.brew_path.clone(),
            config.env.clone(),
            LogQueue::spawn(log),
        );
        let actions = ActionRunner::new(
            executor.clone(),
            Arc::clone(&sink),
            Arc::clone(&messages),
            config.self_package.clone(),
        );

        Self {
            config,
            executor,
            known: KnownEntities::new(),
            throttle: UpdateThrottle::new(),
            actions,
            sink,
            messages,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn known(&self) -> &KnownEntities {
        &self.known
    }

    pub fn clear_cache(&self) {
        self.executor.clear_cache();
    }

    /// Fail with a validation error if brew is missing or broken.
    pub async fn validate_installation(&self) -> Result<()> {
        self.executor.validate_installation().await
    }

    async fn query<S: AsRef<str>>(&self, args: &[S]) -> Result<String> {
        self.validate_installation().await?;
        let output = self.executor.run(args, DEFAULT_TIMEOUT).await?;
        Ok(output.stdout.clone())
    }

    /// Installed formulae with versions (`brew list --formula --versions`).
    pub async fn installed_formulae(&self) -> Result<Vec<InstalledEntry>> {
        let text = self.query(&["list", "--formula", "--versions"]).await?;
        Ok(parse::parse_versions_listing(&text))
    }

    /// Installed casks with versions (`brew list --cask --versions`).
    pub async fn installed_casks(&self) -> Result<Vec<InstalledEntry>> {
        let text = self.query(&["list", "--cask", "--versions"]).await?;
        Ok(parse::parse_versions_listing(&text))
    }

    /// Packages with a newer version available, honoring the outdated mode.
    pub async fn outdated(&self) -> Result<Vec<OutdatedEntry>> {
        let text = self.query(&self.config.outdated_args()).await?;
        let (entries, warnings) = parse::parse_outdated(&text)?;
        if !warnings.is_empty() {
            tracing::warn!("brew outdated reported: {}", warnings);
        }
        Ok(entries)
    }

    /// Installed formulae nothing else depends on.
    pub async fn leaves(&self) -> Result<Vec<String>> {
        let text = self.query(&["leaves"]).await?;
        Ok(parse::parse_name_listing(&text))
    }

    pub async fn taps(&self) -> Result<Vec<String>> {
        let text = self.query(&["tap"]).await?;
        Ok(parse::parse_name_listing(&text))
    }

    /// Details for one or more packages of the same kind.
    pub async fn info(&self, names: &[String], kind: EntityKind) -> Result<Vec<PackageInfo>> {
        let mut args = vec!["info".to_string(), "--json=v2".to_string()];
        if kind == EntityKind::Cask {
            args.push("--cask".to_string());
        }
        args.extend(names.iter().cloned());
        let text = self.query(&args).await?;
        parse::parse_info(&text)
    }

    /// Installed dependencies of a formula.
    pub async fn installed_dependencies(&self, name: &str) -> Result<Vec<String>> {
        let text = self.query(&["deps", name, "--installed"]).await?;
        Ok(parse::parse_name_listing(&text))
    }

    /// `brew doctor` report. Always executed fresh.
    ///
    /// doctor exits non-zero when it finds problems; that report is
    /// returned as a normal result.
    pub async fn doctor(&self) -> Result<String> {
        self.validate_installation().await?;
        match self.executor.run_fresh(&["doctor"], DEFAULT_TIMEOUT).await {
            Ok(output) => Ok(output.combined()),
            Err(BrewError::Execution { output, .. }) => Ok(output),
            Err(err) => Err(err),
        }
    }

    /// What `brew cleanup` would remove.
    pub async fn cleanup_estimate(&self) -> Result<CleanupEstimate> {
        self.validate_installation().await?;
        let output = self
            .executor
            .run(&["cleanup", "--dry-run"], CLEANUP_DRY_RUN_TIMEOUT)
            .await?;
        let details = output.combined();
        let bytes = parse_cleanup_estimate(&details);
        Ok(CleanupEstimate {
            bytes,
            size: format_size(bytes),
            details,
        })
    }

    /// Remove old versions and stale downloads.
    pub async fn cleanup(&self) -> Result<String> {
        self.validate_installation().await?;
        let output = self.executor.run(&["cleanup"], CLEANUP_TIMEOUT).await?;
        self.executor.clear_cache();
        Ok(output.combined())
    }

    /// Write a Brewfile describing the installation to `path`.
    pub async fn export_brewfile(&self, path: &Path) -> Result<()> {
        self.validate_installation().await?;
        let file = format!("--file={}", path.display());
        self.executor
            .run(&["bundle", "dump", file.as_str(), "--force"], BUNDLE_TIMEOUT)
            .await?;
        Ok(())
    }

    /// Refresh brew's package database, at most once per throttle interval.
    ///
    /// A successful update invalidates the command cache and marks the
    /// formulae and casks it announced as known.
    pub async fn update_database(&self) -> Result<UpdateOutcome> {
        self.validate_installation().await?;

        let updated = self
            .throttle
            .run(|| async {
                let output = self.executor.run(&["update"], UPDATE_TIMEOUT).await?;
                Ok::<_, BrewError>(parse_update_summary(&output.combined()))
            })
            .await?;

        let Some(new_entities) = updated else {
            return Ok(UpdateOutcome::Skipped);
        };

        self.executor.clear_cache();
        self.known.seed(&new_entities);

        let formulae = new_entities.formulae.len().to_string();
        let casks = new_entities.casks.len().to_string();
        self.sink.emit(
            events::DATABASE_UPDATED,
            &self.messages.format(
                "update.newEntities",
                &[("formulae", formulae.as_str()), ("casks", casks.as_str())],
            ),
        );

        Ok(UpdateOutcome::Updated { new_entities })
    }

    /// Formulae and casks that appeared in the catalog since the last check.
    ///
    /// The first call only records the current catalog and reports nothing.
    pub async fn new_entities(&self) -> Result<Catalog> {
        self.validate_installation().await?;
        let (formulae, casks) = tokio::try_join!(
            self.executor.run(&["formulae"], DEFAULT_TIMEOUT),
            self.executor.run(&["casks"], DEFAULT_TIMEOUT),
        )?;

        let current = Catalog {
            formulae: parse::parse_name_listing(&formulae.stdout),
            casks: parse::parse_name_listing(&casks.stdout),
        };
        Ok(self.known.diff_against_known(&current))
    }

    /// Whether `name` is a cask.
    ///
    /// Installed casks are authoritative; otherwise the known-entity
    /// baseline decides.
    pub async fn is_cask(&self, name: &str) -> bool {
        match self.installed_casks().await {
            Ok(casks) if casks.iter().any(|c| c.name == name) => true,
            // Not installed as a cask: only trust an unambiguous baseline entry.
            Ok(_) => {
                self.known.contains(EntityKind::Cask, name)
                    && !self.known.contains(EntityKind::Formula, name)
            }
            Err(err) => {
                tracing::debug!("Cask listing unavailable ({}), using baseline", err);
                self.known.kind_of(name) == Some(EntityKind::Cask)
            }
        }
    }

    async fn cask_names(&self) -> HashSet<String> {
        match self.installed_casks().await {
            Ok(casks) => casks.into_iter().map(|c| c.name).collect(),
            Err(err) => {
                tracing::warn!("Could not list installed casks: {}", err);
                HashSet::new()
            }
        }
    }

    async fn precondition(
        &self,
        op: Operation,
        key: &str,
        params: &[(&str, &str)],
    ) -> Option<ActionOutcome> {
        match self.validate_installation().await {
            Ok(()) => None,
            Err(err) => Some(self.actions.reject(op, key, params, &err.to_string())),
        }
    }

    pub async fn install(&self, name: &str) -> ActionOutcome {
        if let Some(rejected) = self
            .precondition(Operation::Install, "install", &[("name", name)])
            .await
        {
            return rejected;
        }
        self.actions.install(name).await
    }

    pub async fn uninstall(&self, name: &str) -> ActionOutcome {
        if let Some(rejected) = self
            .precondition(Operation::Uninstall, "uninstall", &[("name", name)])
            .await
        {
            return rejected;
        }
        self.actions.uninstall(name).await
    }

    /// Upgrade one package; cask app conflicts are retried with `--force`.
    pub async fn upgrade(&self, name: &str, force: bool) -> ActionOutcome {
        if let Some(rejected) = self
            .precondition(Operation::Upgrade, "upgrade", &[("name", name)])
            .await
        {
            return rejected;
        }
        let is_cask = self.is_cask(name).await;
        self.actions.upgrade(name, force, is_cask).await
    }

    pub async fn upgrade_selected(&self, names: &[String]) -> ActionOutcome {
        let joined = names.join(", ");
        if let Some(rejected) = self
            .precondition(Operation::Upgrade, "upgradeSelected", &[("names", joined.as_str())])
            .await
        {
            return rejected;
        }
        let casks = self.cask_names().await;
        self.actions
            .upgrade_selected(names, |name| casks.contains(name))
            .await
    }

    pub async fn upgrade_all(&self) -> ActionOutcome {
        if let Some(rejected) = self.precondition(Operation::Upgrade, "upgradeAll", &[]).await {
            return rejected;
        }
        let casks = self.cask_names().await;
        self.actions.upgrade_all(|name| casks.contains(name)).await
    }

    pub async fn tap(&self, name: &str) -> ActionOutcome {
        if let Some(rejected) = self
            .precondition(Operation::Tap, "tap", &[("name", name)])
            .await
        {
            return rejected;
        }
        self.actions.tap(name).await
    }

    pub async fn untap(&self, name: &str) -> ActionOutcome {
        if let Some(rejected) = self
            .precondition(Operation::Untap, "untap", &[("name", name)])
            .await
        {
            return rejected;
        }
        self.actions.untap(name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingSink, ScriptedRunner};

    fn manager(scripted: ScriptedRunner) -> (PackageManager, Arc<ScriptedRunner>, Arc<RecordingSink>) {
        let scripted = Arc::new(scripted);
        let sink = Arc::new(RecordingSink::default());
        let pm = PackageManager::with_parts(
            Config::with_brew_path("/bin/sh"),
            scripted.clone(),
            sink.clone(),
            Arc::new(EnglishMessages::new()),
            Arc::new(TracingLog),
        );
        (pm, scripted, sink)
    }

    fn healthy() -> ScriptedRunner {
        ScriptedRunner::new().respond("--version", "Homebrew 4.4.2\n")
    }

    #[tokio::test]
    async fn test_installed_formulae_end_to_end() {
        let (pm, _, _) = manager(healthy().respond("list --formula --versions", "git 2.40.0\nwget 1.21\nfoo\n"));
        let installed = pm.installed_formulae().await.unwrap();
        assert_eq!(
            installed,
            vec![
                InstalledEntry::new("git", "2.40.0"),
                InstalledEntry::new("wget", "1.21"),
                InstalledEntry::new("foo", "Unknown"),
            ]
        );
    }

    #[tokio::test]
    async fn test_queries_are_gated_by_validation() {
        let (pm, scripted, _) = manager(ScriptedRunner::new().fail("--version", "broken", 1));
        let err = pm.leaves().await.unwrap_err();
        assert!(err.is_validation());
        assert_eq!(scripted.call_count("leaves"), 0);
    }

    #[tokio::test]
    async fn test_outdated_uses_configured_mode() {
        let scripted = Arc::new(healthy().respond(
            "outdated --json=v2 --greedy",
            r#"{"formulae":[],"casks":[{"name":"slack","installed_versions":["4.0"],"current_version":"4.1"}]}"#,
        ));
        let mut config = Config::with_brew_path("/bin/sh");
        config.outdated_mode = crate::config::OutdatedMode::Greedy;
        let pm = PackageManager::with_parts(
            config,
            scripted.clone(),
            Arc::new(RecordingSink::default()),
            Arc::new(EnglishMessages::new()),
            Arc::new(TracingLog),
        );

        let outdated = pm.outdated().await.unwrap();
        assert_eq!(outdated.len(), 1);
        assert_eq!(outdated[0].kind, EntityKind::Cask);
    }

    #[tokio::test]
    async fn test_doctor_returns_report_on_warnings() {
        let (pm, scripted, _) = manager(healthy().fail("doctor", "Warning: Unbrewed dylibs were found", 1));
        let report = pm.doctor().await.unwrap();
        assert!(report.contains("Unbrewed dylibs"));
        pm.doctor().await.unwrap();
        assert_eq!(scripted.call_count("doctor"), 2);
    }

    #[tokio::test]
    async fn test_cleanup_estimate() {
        let (pm, _, _) = manager(healthy().respond(
            "cleanup --dry-run",
            "Would remove: /opt/homebrew/Cellar/wget/1.21.3 (91 files, 4.2MB)\n==> This operation would free approximately 4.2MB of disk space.\n",
        ));
        let estimate = pm.cleanup_estimate().await.unwrap();
        assert_eq!(estimate.size, "4.2 MB");
        assert!(estimate.details.contains("Would remove"));
    }

    #[tokio::test]
    async fn test_export_brewfile_arguments() {
        let (pm, scripted, _) = manager(healthy().respond("bundle dump --file=/tmp/Brewfile --force", ""));
        pm.export_brewfile(Path::new("/tmp/Brewfile")).await.unwrap();
        assert_eq!(scripted.call_count("bundle dump --file=/tmp/Brewfile --force"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_database_is_throttled_and_clears_cache() {
        let (pm, scripted, sink) = manager(
            healthy()
                .respond("leaves", "wget\n")
                .respond("update", "==> New Formulae\nzizmor\n==> New Casks\nghostty\n"),
        );

        pm.leaves().await.unwrap();
        let first = pm.update_database().await.unwrap();
        assert_eq!(
            first,
            UpdateOutcome::Updated {
                new_entities: Catalog {
                    formulae: vec!["zizmor".into()],
                    casks: vec!["ghostty".into()],
                }
            }
        );
        assert_eq!(pm.update_database().await.unwrap(), UpdateOutcome::Skipped);
        assert_eq!(scripted.call_count("update"), 1);

        pm.leaves().await.unwrap();
        assert_eq!(scripted.call_count("leaves"), 2);
        assert_eq!(
            sink.payloads(events::DATABASE_UPDATED),
            vec!["1 new formulae, 1 new casks"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_updates_run_once() {
        let (pm, scripted, sink) = manager(
            healthy()
                .respond("update", "Already up-to-date.\n")
                .with_delay(std::time::Duration::from_secs(5)),
        );

        let (a, b) = tokio::join!(pm.update_database(), pm.update_database());
        let outcomes = [a.unwrap(), b.unwrap()];

        assert_eq!(scripted.call_count("update"), 1);
        assert_eq!(
            outcomes
                .iter()
                .filter(|o| matches!(o, UpdateOutcome::Updated { .. }))
                .count(),
            1
        );
        assert_eq!(
            outcomes
                .iter()
                .filter(|o| **o == UpdateOutcome::Skipped)
                .count(),
            1
        );
        assert_eq!(sink.payloads(events::DATABASE_UPDATED).len(), 1);
    }

    #[tokio::test]
    async fn test_new_entities_first_run_then_diff() {
        let (pm, _, _) = manager(
            healthy()
                .respond("formulae", "a\nb\n")
                .respond("casks", "firefox\n"),
        );
        assert!(pm.new_entities().await.unwrap().is_empty());
        assert_eq!(pm.known().len(), 3);
    }

    #[tokio::test]
    async fn test_upgrade_classifies_installed_cask() {
        let conflict = "Error: It seems there is already an App at '/Applications/Slack.app'.";
        let (pm, scripted, _) = manager(
            healthy()
                .respond("list --cask --versions", "slack 4.41.97\n")
                .fail("upgrade slack", conflict, 1)
                .respond("upgrade --force slack", ""),
        );

        let outcome = pm.upgrade("slack", false).await;
        assert!(outcome.is_success());
        assert_eq!(scripted.call_count("upgrade --force slack"), 1);
    }

    #[tokio::test]
    async fn test_upgrade_formula_with_conflict_not_retried() {
        let conflict = "Error: It seems there is already an App at '/Applications/Foo.app'.";
        let (pm, scripted, _) = manager(
            healthy()
                .respond("list --cask --versions", "slack 4.41.97\n")
                .fail("upgrade foo", conflict, 1),
        );

        assert!(!pm.upgrade("foo", false).await.is_success());
        assert_eq!(scripted.call_count("upgrade --force foo"), 0);
    }

    #[tokio::test]
    async fn test_mutation_without_brew_is_rejected_with_events() {
        let scripted = Arc::new(ScriptedRunner::new());
        let sink = Arc::new(RecordingSink::default());
        let pm = PackageManager::with_parts(
            Config::with_brew_path("/nonexistent/bin/brew"),
            scripted.clone(),
            sink.clone(),
            Arc::new(EnglishMessages::new()),
            Arc::new(TracingLog),
        );

        let outcome = pm.install("wget").await;
        assert!(!outcome.is_success());
        assert!(scripted.calls().is_empty());
        assert_eq!(sink.payloads(events::INSTALL_COMPLETE).len(), 1);
    }

    #[tokio::test]
    async fn test_successful_install_invalidates_cache() {
        let (pm, scripted, _) = manager(
            healthy()
                .respond("list --formula --versions", "git 2.40.0\n")
                .respond("install wget", "==> Pouring wget\n"),
        );

        pm.installed_formulae().await.unwrap();
        assert!(pm.install("wget").await.is_success());
        pm.installed_formulae().await.unwrap();
        assert_eq!(scripted.call_count("list --formula --versions"), 2);
    }
}
