//! Tracking which formulae and casks have already been seen.
//!
//! The baseline only remembers the previous full listing. Each diff reports
//! what appeared since then and replaces the baseline with the new listing.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

/// The two kinds of installable entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Formula,
    Cask,
}

impl EntityKind {
    /// Namespaced identifier, e.g. `cask:firefox`.
    pub fn key(self, name: &str) -> String {
        match self {
            EntityKind::Formula => format!("formula:{}", name),
            EntityKind::Cask => format!("cask:{}", name),
        }
    }
}

/// Names of formulae and casks, either a full listing or a set of additions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    pub formulae: Vec<String>,
    pub casks: Vec<String>,
}

impl Catalog {
    pub fn is_empty(&self) -> bool {
        self.formulae.is_empty() && self.casks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.formulae.len() + self.casks.len()
    }

    fn keys(&self) -> impl Iterator<Item = String> + '_ {
        self.formulae
            .iter()
            .map(|n| EntityKind::Formula.key(n))
            .chain(self.casks.iter().map(|n| EntityKind::Cask.key(n)))
    }
}

#[derive(Default)]
struct Baseline {
    keys: HashSet<String>,
    /// Set once a full listing has been adopted
    listed: bool,
}

/// Baseline of known entity identifiers shared across the session.
#[derive(Default)]
pub struct KnownEntities {
    baseline: Mutex<Baseline>,
}

impl KnownEntities {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Baseline> {
        // Poisoning is ignored, the set is always consistent.
        self.baseline.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Report entries in `current` that were not in the previous listing.
    ///
    /// The first listing is adopted as the baseline and reports nothing.
    pub fn diff_against_known(&self, current: &Catalog) -> Catalog {
        let mut baseline = self.lock();

        if !baseline.listed {
            baseline.keys.extend(current.keys());
            baseline.listed = true;
            tracing::debug!("Adopted baseline of {} entities", baseline.keys.len());
            return Catalog::default();
        }

        let added = Catalog {
            formulae: unseen(&baseline.keys, &current.formulae, EntityKind::Formula),
            casks: unseen(&baseline.keys, &current.casks, EntityKind::Cask),
        };
        baseline.keys = current.keys().collect();

        if !added.is_empty() {
            tracing::info!(
                "{} new formulae, {} new casks",
                added.formulae.len(),
                added.casks.len()
            );
        }
        added
    }

    /// Mark entries as known without a full listing.
    pub fn seed(&self, entries: &Catalog) {
        self.lock().keys.extend(entries.keys());
    }

    pub fn contains(&self, kind: EntityKind, name: &str) -> bool {
        self.lock().keys.contains(&kind.key(name))
    }

    /// Kind of a known entity, preferring cask when a name is both.
    pub fn kind_of(&self, name: &str) -> Option<EntityKind> {
        let baseline = self.lock();
        if baseline.keys.contains(&EntityKind::Cask.key(name)) {
            Some(EntityKind::Cask)
        } else if baseline.keys.contains(&EntityKind::Formula.key(name)) {
            Some(EntityKind::Formula)
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.lock().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().keys.is_empty()
    }
}

fn unseen(known: &HashSet<String>, names: &[String], kind: EntityKind) -> Vec<String> {
    let mut emitted = HashSet::new();
    names
        .iter()
        .filter(|name| !known.contains(&kind.key(name)) && emitted.insert(name.to_string()))
        .cloned()
        .collect()
}
