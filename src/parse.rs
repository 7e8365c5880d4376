//! Parsers for brew's listing, JSON and size output.

use crate::error::Result;
use crate::extract::parse_json;
use crate::known::EntityKind;
use serde::{Deserialize, Serialize};

/// Version shown when a listing line carries no version.
pub const UNKNOWN_VERSION: &str = "Unknown";

/// An installed formula or cask with its version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledEntry {
    pub name: String,
    pub version: String,
}

impl InstalledEntry {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Parse `brew list --versions` output.
///
/// Each line is `<name> <version>...`; when several versions are installed
/// the last (newest) one is kept.
pub fn parse_versions_listing(text: &str) -> Vec<InstalledEntry> {
    text.lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let name = parts.next()?;
            let version = parts.last().unwrap_or(UNKNOWN_VERSION);
            Some(InstalledEntry::new(name, version))
        })
        .collect()
}

/// Parse one-name-per-line output (`leaves`, `tap`, `formulae`, `casks`).
pub fn parse_name_listing(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("==>"))
        .map(String::from)
        .collect()
}

/// A package with a newer version available
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutdatedEntry {
    pub name: String,
    pub kind: EntityKind,
    pub installed: String,
    pub latest: String,
    pub pinned: bool,
    /// Diagnostics brew printed about this package
    #[serde(default)]
    pub warnings: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl Default for OneOrMany {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

impl OneOrMany {
    fn newest(&self) -> Option<&str> {
        match self {
            OneOrMany::One(v) => Some(v.as_str()),
            OneOrMany::Many(vs) => vs.last().map(String::as_str),
        }
    }
}

#[derive(Deserialize)]
struct OutdatedDoc {
    #[serde(default)]
    formulae: Vec<OutdatedItem>,
    #[serde(default)]
    casks: Vec<OutdatedItem>,
}

#[derive(Deserialize)]
struct OutdatedItem {
    name: String,
    #[serde(default)]
    installed_versions: OneOrMany,
    #[serde(default)]
    current_version: Option<String>,
    #[serde(default)]
    pinned: bool,
}

impl OutdatedItem {
    fn into_entry(self, kind: EntityKind) -> OutdatedEntry {
        OutdatedEntry {
            installed: self
                .installed_versions
                .newest()
                .unwrap_or(UNKNOWN_VERSION)
                .to_string(),
            latest: self
                .current_version
                .unwrap_or_else(|| UNKNOWN_VERSION.to_string()),
            name: self.name,
            kind,
            pinned: self.pinned,
            warnings: None,
        }
    }
}

/// Parse `brew outdated --json=v2`, tolerating leading warnings.
///
/// Returns the entries and the warning text that preceded the JSON. Warnings
/// that name a package are also attached to its entry.
pub fn parse_outdated(raw: &str) -> Result<(Vec<OutdatedEntry>, String)> {
    let (doc, warnings): (OutdatedDoc, String) = parse_json(raw)?;
    let warning_map = crate::extract::parse_warnings(&warnings);
    let mut entries: Vec<OutdatedEntry> = doc
        .formulae
        .into_iter()
        .map(|item| item.into_entry(EntityKind::Formula))
        .chain(
            doc.casks
                .into_iter()
                .map(|item| item.into_entry(EntityKind::Cask)),
        )
        .collect();

    for entry in &mut entries {
        entry.warnings = warning_map.get(&entry.name).cloned();
    }
    Ok((entries, warnings))
}

/// Normalized package details from `brew info --json=v2`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub name: String,
    pub kind: EntityKind,
    pub description: Option<String>,
    pub homepage: Option<String>,
    pub version: Option<String>,
    /// Installed version, if any
    pub installed: Option<String>,
    pub dependencies: Vec<String>,
    /// Diagnostics brew printed about this package
    #[serde(default)]
    pub warnings: Option<String>,
}

#[derive(Deserialize)]
struct InfoDoc {
    #[serde(default)]
    formulae: Vec<FormulaInfo>,
    #[serde(default)]
    casks: Vec<CaskInfo>,
}

#[derive(Deserialize)]
struct FormulaInfo {
    name: String,
    #[serde(default)]
    desc: Option<String>,
    #[serde(default)]
    homepage: Option<String>,
    #[serde(default)]
    versions: FormulaVersions,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    installed: Vec<InstalledKeg>,
}

#[derive(Deserialize, Default)]
struct FormulaVersions {
    #[serde(default)]
    stable: Option<String>,
}

#[derive(Deserialize)]
struct InstalledKeg {
    version: String,
}

#[derive(Deserialize)]
struct CaskInfo {
    token: String,
    #[serde(default)]
    desc: Option<String>,
    #[serde(default)]
    homepage: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    installed: Option<String>,
    #[serde(default)]
    depends_on: serde_json::Value,
}

impl From<FormulaInfo> for PackageInfo {
    fn from(f: FormulaInfo) -> Self {
        PackageInfo {
            installed: f.installed.last().map(|k| k.version.clone()),
            name: f.name,
            kind: EntityKind::Formula,
            description: f.desc,
            homepage: f.homepage,
            version: f.versions.stable,
            dependencies: f.dependencies,
            warnings: None,
        }
    }
}

impl From<CaskInfo> for PackageInfo {
    fn from(c: CaskInfo) -> Self {
        // depends_on: {"formula": [...], "cask": [...], "macos": {...}}
        let dependencies = ["formula", "cask"]
            .iter()
            .filter_map(|key| c.depends_on.get(key)?.as_array())
            .flatten()
            .filter_map(|v| v.as_str().map(String::from))
            .collect();

        PackageInfo {
            name: c.token,
            kind: EntityKind::Cask,
            description: c.desc,
            homepage: c.homepage,
            version: c.version,
            installed: c.installed,
            dependencies,
            warnings: None,
        }
    }
}

/// Parse `brew info --json=v2 [--cask] <names...>`.
///
/// Warning text preceding the JSON is attached to the package it names.
pub fn parse_info(raw: &str) -> Result<Vec<PackageInfo>> {
    let (doc, warnings): (InfoDoc, String) = parse_json(raw)?;
    let warning_map = crate::extract::parse_warnings(&warnings);

    let mut infos: Vec<PackageInfo> = doc
        .formulae
        .into_iter()
        .map(PackageInfo::from)
        .chain(doc.casks.into_iter().map(PackageInfo::from))
        .collect();

    for info in &mut infos {
        info.warnings = warning_map.get(&info.name).cloned();
    }
    Ok(infos)
}

const UNITS: [(&str, u64); 4] = [
    ("TB", 1 << 40),
    ("GB", 1 << 30),
    ("MB", 1 << 20),
    ("KB", 1 << 10),
];

/// Parse a size such as `1.2GB`, `345.6MB` or `100B` into bytes.
pub fn parse_size(text: &str) -> Option<u64> {
    let text = text.trim();
    for (unit, factor) in UNITS {
        if let Some(number) = text.strip_suffix(unit) {
            let value: f64 = number.trim().parse().ok()?;
            return Some((value * factor as f64).round() as u64);
        }
    }
    text.strip_suffix('B')?.trim().parse().ok()
}

/// Bytes reclaimable according to `brew cleanup --dry-run`.
///
/// brew prints `This operation would free approximately 1.2GB of disk space.`
/// when there is something to remove and nothing otherwise, which counts as 0.
pub fn parse_cleanup_estimate(text: &str) -> u64 {
    const MARKER: &str = "free approximately ";
    text.lines()
        .find_map(|line| {
            let rest = &line[line.find(MARKER)? + MARKER.len()..];
            parse_size(rest.split_whitespace().next()?)
        })
        .unwrap_or(0)
}

/// Human-readable size, e.g. `1.2 GB`.
pub fn format_size(bytes: u64) -> String {
    for (unit, factor) in UNITS {
        if bytes >= factor {
            return format!("{:.1} {}", bytes as f64 / factor as f64, unit);
        }
    }
    format!("{} B", bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_versions_listing() {
        assert_eq!(
            parse_versions_listing("git 2.40.0\nwget 1.21"),
            vec![
                InstalledEntry::new("git", "2.40.0"),
                InstalledEntry::new("wget", "1.21")
            ]
        );
    }

    #[test]
    fn test_parse_versions_listing_edge_cases() {
        assert_eq!(
            parse_versions_listing("foo\n\n  \npython@3.12 3.12.1 3.12.2\n"),
            vec![
                InstalledEntry::new("foo", "Unknown"),
                InstalledEntry::new("python@3.12", "3.12.2")
            ]
        );
    }

    #[test]
    fn test_parse_name_listing() {
        assert_eq!(
            parse_name_listing("homebrew/core\n\n  homebrew/cask  \n==> Header\n"),
            vec!["homebrew/core", "homebrew/cask"]
        );
    }

    #[test]
    fn test_parse_outdated() {
        let raw = r#"Warning: some tap is deprecated
{
  "formulae": [
    {"name": "wget", "installed_versions": ["1.21.3"], "current_version": "1.21.4", "pinned": false, "pinned_version": null},
    {"name": "node", "installed_versions": ["20.1.0", "20.2.0"], "current_version": "21.0.0", "pinned": true, "pinned_version": "20.2.0"}
  ],
  "casks": [
    {"name": "firefox", "installed_versions": "118.0", "current_version": "119.0"}
  ]
}"#;
        let (entries, warnings) = parse_outdated(raw).unwrap();
        assert_eq!(warnings, "Warning: some tap is deprecated");
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].installed, "20.2.0");
        assert!(entries[1].pinned);
        assert_eq!(
            entries[2],
            OutdatedEntry {
                name: "firefox".into(),
                kind: EntityKind::Cask,
                installed: "118.0".into(),
                latest: "119.0".into(),
                pinned: false,
                warnings: None,
            }
        );
    }

    #[test]
    fn test_parse_outdated_empty() {
        let (entries, _) = parse_outdated(r#"{"formulae":[],"casks":[]}"#).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_parse_info_formula_and_cask() {
        let raw = r#"{
  "formulae": [{
    "name": "wget", "full_name": "wget", "desc": "Internet file retriever",
    "homepage": "https://www.gnu.org/software/wget/",
    "versions": {"stable": "1.21.4", "head": null, "bottle": true},
    "dependencies": ["libidn2", "openssl@3"],
    "installed": [{"version": "1.21.3"}]
  }],
  "casks": [{
    "token": "firefox", "name": ["Mozilla Firefox"], "desc": "Web browser",
    "homepage": "https://www.mozilla.org/firefox/", "version": "119.0",
    "installed": null, "depends_on": {"macos": {">=": ["10.15"]}}
  }]
}"#;
        let infos = parse_info(raw).unwrap();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].kind, EntityKind::Formula);
        assert_eq!(infos[0].version.as_deref(), Some("1.21.4"));
        assert_eq!(infos[0].installed.as_deref(), Some("1.21.3"));
        assert_eq!(infos[0].dependencies, vec!["libidn2", "openssl@3"]);
        assert_eq!(infos[1].kind, EntityKind::Cask);
        assert!(infos[1].installed.is_none());
        assert!(infos[1].dependencies.is_empty());
    }

    #[test]
    fn test_parse_info_attaches_warnings() {
        let raw = "Warning: deprecated in /x/Taps/a/homebrew-b/Formula/tool.rb:3\n\
                   {\"formulae\":[{\"name\":\"tool\"}],\"casks\":[]}";
        let infos = parse_info(raw).unwrap();
        assert_eq!(
            infos[0].warnings.as_deref(),
            Some("Warning: deprecated in /x/Taps/a/homebrew-b/Formula/tool.rb:3")
        );
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("100B"), Some(100));
        assert_eq!(parse_size("2KB"), Some(2048));
        assert_eq!(parse_size("1.5GB"), Some(1_610_612_736));
        assert_eq!(parse_size("lots"), None);
    }

    #[test]
    fn test_parse_cleanup_estimate() {
        let text = "Would remove: /opt/homebrew/Cellar/wget/1.21.3 (91 files, 4.2MB)\n\
                    ==> This operation would free approximately 12.5MB of disk space.";
        assert_eq!(parse_cleanup_estimate(text), 13_107_200);
        assert_eq!(parse_cleanup_estimate(""), 0);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(13_107_200), "12.5 MB");
        assert_eq!(format_size(1 << 30), "1.0 GB");
    }
}
