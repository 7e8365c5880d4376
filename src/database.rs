//! Throttled `brew update` and parsing of its summary.

use crate::error::Result;
use crate::known::Catalog;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Minimum spacing between two update attempts.
pub const UPDATE_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Result of a database update request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum UpdateOutcome {
    /// An attempt happened less than [`UPDATE_INTERVAL`] ago
    Skipped,
    Updated { new_entities: Catalog },
}

/// Serializes update attempts and spaces them at least one interval apart.
///
/// The lock is held for the whole update, so concurrent requests queue up
/// behind the running one and then see a fresh timestamp. The timestamp is
/// recorded before the update runs and kept even if it fails.
pub struct UpdateThrottle {
    last_attempt: Mutex<Option<Instant>>,
    interval: Duration,
}

impl UpdateThrottle {
    pub fn new() -> Self {
        Self::with_interval(UPDATE_INTERVAL)
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            last_attempt: Mutex::new(None),
            interval,
        }
    }

    /// Run `update` unless the previous attempt is too recent.
    ///
    /// Returns `Ok(None)` when the call was throttled.
    pub async fn run<T, F, Fut>(&self, update: F) -> Result<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last = self.last_attempt.lock().await;
        if let Some(at) = *last {
            if at.elapsed() < self.interval {
                tracing::debug!(
                    "Skipping update, last attempt {}s ago",
                    at.elapsed().as_secs()
                );
                return Ok(None);
            }
        }

        *last = Some(Instant::now());
        update().await.map(Some)
    }
}

impl Default for UpdateThrottle {
    fn default() -> Self {
        Self::new()
    }
}

/// New formulae and casks announced by `brew update`.
///
/// brew prints `==> New Formulae` and `==> New Casks` sections listing one
/// entry per line (`name` or `name: description`), or several names per
/// line in column mode.
pub fn parse_update_summary(output: &str) -> Catalog {
    #[derive(Clone, Copy)]
    enum Section {
        Formulae,
        Casks,
        Other,
    }

    let mut catalog = Catalog::default();
    let mut section = Section::Other;

    for line in output.lines() {
        let line = line.trim();
        if let Some(header) = line.strip_prefix("==>") {
            section = match header.trim() {
                "New Formulae" => Section::Formulae,
                "New Casks" => Section::Casks,
                _ => Section::Other,
            };
            continue;
        }
        if line.is_empty() {
            continue;
        }

        let names: Vec<String> = match line.split_once(": ") {
            Some((name, _)) => vec![name.trim().to_string()],
            None => line.split_whitespace().map(String::from).collect(),
        };
        match section {
            Section::Formulae => catalog.formulae.extend(names),
            Section::Casks => catalog.casks.extend(names),
            Section::Other => {}
        }
    }

    catalog
}
