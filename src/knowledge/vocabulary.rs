//! Controlled vocabularies resolving legend labels to lithology and age.

use crate::error::{GeoMapError, Result};
use crate::meta::unknown;
use regex::Regex;
use serde::Deserialize;
use std::path::Path;
use std::sync::OnceLock;

const SEPARATORS: [&str; 10] = [",", "、", "-", " and ", "和", "及", "或", "\n", "/", "("];
const NOISE: [&str; 5] = ["脉", "?", ")", "member", "."];
const TRUNCATE_AT: [&str; 4] = ["夹", "（", "。", ":"];
const SKIP_PAST: [&str; 3] = ["的", "色", "—"];

fn separator_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let alternation = SEPARATORS
            .iter()
            .map(|s| regex::escape(s))
            .collect::<Vec<_>>()
            .join("|");
        Regex::new(&alternation).expect("Invalid regex pattern")
    })
}

#[derive(Deserialize)]
struct VocabularyRecord {
    rock_name: String,
    rock_value: String,
}

/// Ordered name -> value vocabulary (rock type or rock age)
#[derive(Debug, Clone, Default)]
pub struct RockVocabulary {
    entries: Vec<(String, String)>,
}

impl RockVocabulary {
    /// Load a JSON list of `{"rock_name", "rock_value"}` records
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            GeoMapError::Knowledge(format!("Failed to read vocabulary {}: {}", path.display(), e))
        })?;
        let records: Vec<VocabularyRecord> = serde_json::from_str(&text)?;
        log::debug!("Loaded {} vocabulary entries from {}", records.len(), path.display());
        Ok(Self::from_entries(
            records.into_iter().map(|r| (r.rock_name, r.rock_value)),
        ))
    }

    /// Names and values are lower-cased. A repeated name keeps its first
    /// position and takes the later value.
    pub fn from_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut out: Vec<(String, String)> = Vec::new();
        for (name, value) in entries {
            let name = name.as_ref().to_lowercase();
            let value = value.as_ref().to_lowercase();
            match out.iter_mut().find(|(n, _)| *n == name) {
                Some(slot) => slot.1 = value,
                None => out.push((name, value)),
            }
        }
        Self { entries: out }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Value for a legend label, or `unknown`.
    ///
    /// The label is split into candidate names; a vocabulary entry matches a
    /// candidate when either contains the other. The last matching entry in
    /// vocabulary order wins.
    pub fn lookup(&self, label: Option<&str>) -> String {
        let Some(label) = label else {
            return unknown();
        };
        let names = split_label(label);

        let mut found = None;
        for (rock_name, value) in &self.entries {
            if names
                .iter()
                .any(|n| n.contains(rock_name.as_str()) || rock_name.contains(n.as_str()))
            {
                found = Some(value);
            }
        }
        found.cloned().unwrap_or_else(unknown)
    }
}

/// Split a label into cleaned candidate rock names
pub fn split_label(label: &str) -> Vec<String> {
    let lowered = label.trim().to_lowercase();
    separator_pattern()
        .split(&lowered)
        .map(|part| clean_name(part.trim().trim_matches(')')))
        .filter(|name| !name.is_empty())
        .collect()
}

fn clean_name(name: &str) -> String {
    let mut name = name.to_string();
    for noise in NOISE {
        name = name.replace(noise, "").trim().to_string();
    }
    for marker in TRUNCATE_AT {
        if let Some(pos) = name.find(marker) {
            name = name[..pos].trim().to_string();
        }
    }
    for marker in SKIP_PAST {
        if let Some(pos) = name.find(marker) {
            name = name[pos + marker.len()..].trim().to_string();
        }
    }
    name.trim().to_string()
}

/// Lithology and stratigraphic age resolved for one legend label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegendKnowledge {
    pub rock_type: String,
    pub rock_age: String,
}

/// Pair of vocabularies used during digitization
#[derive(Debug, Clone, Default)]
pub struct LegendVocabulary {
    pub rock_type: RockVocabulary,
    pub rock_age: RockVocabulary,
}

impl LegendVocabulary {
    pub fn load(rock_type: &Path, rock_age: &Path) -> Result<Self> {
        Ok(Self {
            rock_type: RockVocabulary::load(rock_type)?,
            rock_age: RockVocabulary::load(rock_age)?,
        })
    }

    pub fn resolve(&self, label: Option<&str>) -> LegendKnowledge {
        LegendKnowledge {
            rock_type: self.rock_type.lookup(label),
            rock_age: self.rock_age.lookup(label),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn rock_types() -> RockVocabulary {
        RockVocabulary::from_entries([
            ("Granite", "Igneous"),
            ("Sandstone", "Sedimentary"),
            ("Schist", "Metamorphic"),
            ("花岗岩", "岩浆岩"),
        ])
    }

    #[test]
    fn test_split_label() {
        assert_eq!(
            split_label("Sandstone and Shale (Member)"),
            vec!["sandstone".to_string(), "shale".to_string()]
        );
        assert_eq!(split_label("灰白色花岗岩夹片麻岩"), vec!["花岗岩".to_string()]);
        assert!(split_label(" - ").is_empty());
    }

    #[test]
    fn test_lookup_containment_both_ways() {
        let vocab = rock_types();
        assert_eq!(vocab.lookup(Some("Biotite granite")), "igneous");
        assert_eq!(vocab.lookup(Some("schist")), "metamorphic");
        assert_eq!(vocab.lookup(Some("灰白色花岗岩")), "岩浆岩");
        assert_eq!(vocab.lookup(Some("Alluvium")), "unknown");
        assert_eq!(vocab.lookup(None), "unknown");
    }

    #[test]
    fn test_last_match_wins() {
        let vocab = rock_types();
        // matches both sandstone and granite; granite comes first in the vocabulary
        assert_eq!(vocab.lookup(Some("granite, sandstone")), "sedimentary");
    }

    #[test]
    fn test_duplicate_names_keep_position() {
        let vocab = RockVocabulary::from_entries([("a", "1"), ("b", "2"), ("A", "3")]);
        assert_eq!(vocab.len(), 2);
        assert_eq!(vocab.entries[0], ("a".to_string(), "3".to_string()));
    }

    #[test]
    fn test_load_vocabulary_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("k2_rock_age.json");
        std::fs::write(
            &path,
            r#"[{"rock_name": "Granite", "rock_value": "Cretaceous"}]"#,
        )
        .unwrap();
        let vocab = RockVocabulary::load(&path).unwrap();
        assert_eq!(vocab.lookup(Some("Porphyritic granite")), "cretaceous");
        assert!(RockVocabulary::load(&dir.path().join("missing.json")).is_err());
    }
}
