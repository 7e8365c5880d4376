//! Separating brew's free-text diagnostics from the JSON it prints.
//!
//! brew may print deprecation notices or tap warnings before the JSON
//! document on stdout. [`extract_json`] splits the two, and
//! [`parse_warnings`] attributes the diagnostic text to the formula or cask
//! whose definition file it mentions.

use crate::error::{BrewError, Result};
use std::collections::HashMap;

/// JSON payload plus whatever text preceded it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted<'a> {
    pub json: &'a str,
    /// Text before the payload, trimmed; empty when the payload starts at offset 0
    pub warnings: &'a str,
}

/// Split `raw` at the first `{` or `[`.
pub fn extract_json(raw: &str) -> Result<Extracted<'_>> {
    let start = raw.find(['{', '[']).ok_or(BrewError::NoPayload)?;
    Ok(Extracted {
        json: &raw[start..],
        warnings: raw[..start].trim(),
    })
}

/// Extract the payload and deserialize it.
pub fn parse_json<T: serde::de::DeserializeOwned>(raw: &str) -> Result<(T, String)> {
    let extracted = extract_json(raw)?;
    let value = serde_json::from_str(extracted.json)?;
    Ok((value, extracted.warnings.to_string()))
}

/// Name of the formula or cask whose definition file a line mentions.
///
/// Recognizes `.../Formula/<name>.rb` and `.../Casks/<name>.rb`, including
/// sharded layouts (`Casks/f/firefox.rb`) and a trailing `:<line>` suffix.
pub fn entity_from_line(line: &str) -> Option<String> {
    let idx = line
        .find("/Formula/")
        .map(|i| i + "/Formula/".len())
        .or_else(|| line.find("/Casks/").map(|i| i + "/Casks/".len()))?;

    let rest = &line[idx..];
    let end = rest.find(".rb")?;
    let path = &rest[..end];
    let name = path.rsplit('/').next().unwrap_or(path);
    let name = name.split(':').next().unwrap_or(name).trim();

    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Associate diagnostic text with the entity it is about.
///
/// Once a line naming an entity definition is seen, that line and every
/// following line are accumulated. A later entity line changes the key but
/// does not start a new block, so diagnostics for several entities in one
/// invocation end up merged under the last entity named. Lines before the
/// first entity line are dropped. See [`parse_warnings_by_entity`] for the
/// segmented form.
pub fn parse_warnings(text: &str) -> HashMap<String, String> {
    let mut current: Option<String> = None;
    let mut block = String::new();

    for line in text.lines() {
        if let Some(name) = entity_from_line(line) {
            current = Some(name);
        }
        if current.is_some() {
            block.push_str(line);
            block.push('\n');
        }
    }

    let mut warnings = HashMap::new();
    if let Some(name) = current {
        warnings.insert(name, block.trim().to_string());
    }
    warnings
}

/// Ordered `(entity, block)` pairs, one block per entity line.
pub fn parse_warnings_by_entity(text: &str) -> Vec<(String, String)> {
    let mut blocks: Vec<(String, String)> = Vec::new();

    for line in text.lines() {
        if let Some(name) = entity_from_line(line) {
            blocks.push((name, String::new()));
        }
        if let Some((_, block)) = blocks.last_mut() {
            block.push_str(line);
            block.push('\n');
        }
    }

    for (_, block) in &mut blocks {
        *block = block.trim().to_string();
    }
    blocks
}
