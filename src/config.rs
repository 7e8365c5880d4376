//! Session configuration: where brew lives and how it is invoked.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Package name brewdeck itself is distributed under.
pub const DEFAULT_SELF_PACKAGE: &str = "brewdeck";

/// Homebrew's install prefix on Apple silicon.
#[cfg(target_arch = "aarch64")]
const DEFAULT_PREFIX: &str = "/opt/homebrew";
#[cfg(not(target_arch = "aarch64"))]
const DEFAULT_PREFIX: &str = "/usr/local";

/// How aggressively `brew outdated` reports casks that update themselves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum OutdatedMode {
    #[default]
    None,
    Greedy,
    GreedyAutoUpdates,
}

impl OutdatedMode {
    /// Extra flag passed to `brew outdated`, if any.
    pub fn flag(self) -> Option<&'static str> {
        match self {
            OutdatedMode::None => None,
            OutdatedMode::Greedy => Some("--greedy"),
            OutdatedMode::GreedyAutoUpdates => Some("--greedy-auto-updates"),
        }
    }
}

impl fmt::Display for OutdatedMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OutdatedMode::None => "none",
            OutdatedMode::Greedy => "greedy",
            OutdatedMode::GreedyAutoUpdates => "greedy-auto-updates",
        };
        f.write_str(s)
    }
}

impl FromStr for OutdatedMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "none" => Ok(OutdatedMode::None),
            "greedy" => Ok(OutdatedMode::Greedy),
            "greedy-auto-updates" => Ok(OutdatedMode::GreedyAutoUpdates),
            other => Err(format!("unknown outdated mode '{}'", other)),
        }
    }
}

/// Everything the backend needs to know about the brew installation.
#[derive(Debug, Clone)]
pub struct Config {
    /// Absolute path to the brew executable
    pub brew_path: PathBuf,
    /// Environment overlay applied to every invocation
    pub env: Vec<(String, String)>,
    pub outdated_mode: OutdatedMode,
    /// Free-text flags appended (space-split) to outdated queries
    pub outdated_flags: String,
    /// Package name used for self-update detection
    pub self_package: String,
}

impl Config {
    /// Locate brew under `HOMEBREW_PREFIX`, or the standard prefix for this
    /// architecture when it is unset.
    pub fn detect() -> Self {
        let prefix = std::env::var_os("HOMEBREW_PREFIX")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PREFIX));
        Self::with_brew_path(prefix.join("bin/brew"))
    }

    pub fn with_brew_path(brew_path: impl Into<PathBuf>) -> Self {
        Self {
            brew_path: brew_path.into(),
            env: default_env(),
            outdated_mode: OutdatedMode::None,
            outdated_flags: String::new(),
            self_package: DEFAULT_SELF_PACKAGE.to_string(),
        }
    }

    /// Add or replace environment entries in the overlay.
    pub fn merge_env(&mut self, entries: Vec<(String, String)>) {
        for (key, value) in entries {
            match self.env.iter_mut().find(|(k, _)| *k == key) {
                Some(existing) => existing.1 = value,
                None => self.env.push((key, value)),
            }
        }
    }

    /// Arguments for `brew outdated` honoring the mode and custom flags.
    pub fn outdated_args(&self) -> Vec<String> {
        let mut args = vec!["outdated".to_string(), "--json=v2".to_string()];
        if let Some(flag) = self.outdated_mode.flag() {
            args.push(flag.to_string());
        }
        args.extend(self.outdated_flags.split_whitespace().map(String::from));
        args
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::detect()
    }
}

fn default_env() -> Vec<(String, String)> {
    vec![
        ("HOMEBREW_NO_AUTO_UPDATE".to_string(), "1".to_string()),
        ("HOMEBREW_NO_ENV_HINTS".to_string(), "1".to_string()),
    ]
}

/// Parse `KEY=VALUE` entries. Entries without `=` or with an empty key are skipped.
pub fn parse_env_overlay<S: AsRef<str>>(entries: &[S]) -> Vec<(String, String)> {
    entries
        .iter()
        .filter_map(|entry| {
            let entry = entry.as_ref();
            match entry.split_once('=') {
                Some((key, value)) if !key.trim().is_empty() => {
                    Some((key.trim().to_string(), value.to_string()))
                }
                _ => {
                    tracing::warn!("Ignoring malformed environment entry: {}", entry);
                    None
                }
            }
        })
        .collect()
}
