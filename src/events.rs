//! Event sink and message formatting capabilities consumed by the backend.
//!
//! The UI layer subscribes to named events. Mutating operations publish a
//! stream of `*Progress` events followed by exactly one `*Complete` event.
//! There is no ordering guarantee across the stdout and stderr of one
//! command, or across commands.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::mpsc;

pub const INSTALL_PROGRESS: &str = "packageInstallProgress";
pub const INSTALL_COMPLETE: &str = "packageInstallComplete";
pub const UNINSTALL_PROGRESS: &str = "packageUninstallProgress";
pub const UNINSTALL_COMPLETE: &str = "packageUninstallComplete";
pub const UPGRADE_PROGRESS: &str = "packageUpgradeProgress";
pub const UPGRADE_COMPLETE: &str = "packageUpgradeComplete";
pub const TAP_PROGRESS: &str = "repositoryTapProgress";
pub const TAP_COMPLETE: &str = "repositoryTapComplete";
pub const UNTAP_PROGRESS: &str = "repositoryUntapProgress";
pub const UNTAP_COMPLETE: &str = "repositoryUntapComplete";
pub const DATABASE_UPDATED: &str = "databaseUpdated";
pub const SELF_UPDATED: &str = "selfUpdated";

/// Destination for backend events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &str, payload: &str);
}

/// A single emitted event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    pub payload: String,
}

/// Forwards events over an unbounded channel.
///
/// Unbounded so that emitting never waits on a slow consumer. Events sent
/// after the receiver is dropped are discarded.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Event>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &str, payload: &str) {
        let _ = self.tx.send(Event {
            name: event.to_string(),
            payload: payload.to_string(),
        });
    }
}

/// Sink that drops everything.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &str, _payload: &str) {}
}

/// Localized message lookup: `(key, params) -> text`.
pub trait Messages: Send + Sync {
    fn format(&self, key: &str, params: &[(&str, &str)]) -> String;
}

/// Built-in English catalog used when no i18n collaborator is supplied.
pub struct EnglishMessages {
    templates: HashMap<&'static str, &'static str>,
}

impl EnglishMessages {
    pub fn new() -> Self {
        let templates = HashMap::from([
            ("install.start", "🔄 Installing {name}..."),
            ("install.success", "✅ Installed {name}"),
            ("install.failed", "❌ Failed to install {name}: {error}"),
            ("uninstall.start", "🔄 Uninstalling {name}..."),
            ("uninstall.success", "✅ Uninstalled {name}"),
            ("uninstall.failed", "❌ Failed to uninstall {name}: {error}"),
            ("upgrade.start", "🔄 Upgrading {name}..."),
            ("upgrade.success", "✅ Upgraded {name}"),
            ("upgrade.failed", "❌ Failed to upgrade {name}: {error}"),
            (
                "upgrade.retryForce",
                "⚠️ {name} conflicts with an existing app, retrying with --force...",
            ),
            ("upgradeAll.start", "🔄 Upgrading all outdated packages..."),
            ("upgradeAll.success", "✅ All packages upgraded"),
            ("upgradeAll.failed", "❌ Upgrade failed: {error}"),
            ("upgradeSelected.start", "🔄 Upgrading {names}..."),
            ("upgradeSelected.success", "✅ Upgraded {names}"),
            ("upgradeSelected.failed", "❌ Failed to upgrade {names}: {error}"),
            (
                "upgrade.retrySummary",
                "Retried {total} conflicting casks with --force: {succeeded} succeeded, {failed} failed",
            ),
            ("tap.start", "🔄 Tapping {name}..."),
            ("tap.success", "✅ Tapped {name}"),
            ("tap.failed", "❌ Failed to tap {name}: {error}"),
            ("untap.start", "🔄 Removing tap {name}..."),
            ("untap.success", "✅ Removed tap {name}"),
            ("untap.failed", "❌ Failed to remove tap {name}: {error}"),
            ("update.newEntities", "{formulae} new formulae, {casks} new casks"),
            ("self.updated", "{name} was updated, restart to use the new version"),
        ]);
        Self { templates }
    }
}

impl Default for EnglishMessages {
    fn default() -> Self {
        Self::new()
    }
}

impl Messages for EnglishMessages {
    fn format(&self, key: &str, params: &[(&str, &str)]) -> String {
        let Some(template) = self.templates.get(key) else {
            return key.to_string();
        };
        let mut text = template.to_string();
        for (name, value) in params {
            text = text.replace(&format!("{{{}}}", name), value);
        }
        text
    }
}
