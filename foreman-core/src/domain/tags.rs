//! Task-selection tag vocabulary

use std::collections::BTreeSet;

/// Tags the automation playbooks understand out of the box
pub const DEFAULT_TAGS: &[&str] = &[
    "powerup",
    "lldp",
    "rackslot",
    "assettag",
    "update",
    "reboot",
    "xml",
    "idrac",
    "diagnostics",
    "disablelld",
    "tsr",
    "cleanup",
    "shutdown",
    "postlogs",
    "firmware",
    "dhcp",
];

/// Fixed set of accepted task-selection tags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagVocabulary {
    tags: BTreeSet<String>,
}

impl TagVocabulary {
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(String::as_str)
    }

    /// Normalizes `raw` and checks every tag against the vocabulary.
    ///
    /// On failure returns the offending tags, in input order.
    pub fn validate<S: AsRef<str>>(&self, raw: &[S]) -> Result<Vec<String>, Vec<String>> {
        let tags = normalize_tags(raw);
        let unknown: Vec<String> = tags
            .iter()
            .filter(|tag| !self.contains(tag))
            .cloned()
            .collect();

        if unknown.is_empty() {
            Ok(tags)
        } else {
            Err(unknown)
        }
    }

    /// Comma separated listing for error messages
    pub fn describe(&self) -> String {
        self.iter().collect::<Vec<_>>().join(", ")
    }
}

impl Default for TagVocabulary {
    fn default() -> Self {
        Self::new(DEFAULT_TAGS.iter().copied())
    }
}

/// Trims tags, splits comma separated entries and drops empties.
pub fn normalize_tags<S: AsRef<str>>(raw: &[S]) -> Vec<String> {
    raw.iter()
        .flat_map(|entry| entry.as_ref().split(','))
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_tags() {
        let raw = vec![" powerup ", "", "lldp,reboot", " , "];
        assert_eq!(normalize_tags(&raw), vec!["powerup", "lldp", "reboot"]);
    }

    #[test]
    fn test_validate_accepts_known_tags() {
        let vocabulary = TagVocabulary::default();
        let tags = vocabulary.validate(&["tsr", "firmware"]).unwrap();
        assert_eq!(tags, vec!["tsr", "firmware"]);
    }

    #[test]
    fn test_validate_reports_unknown_tags() {
        let vocabulary = TagVocabulary::default();
        let err = vocabulary.validate(&["tsr", "format_disk", "nuke"]).unwrap_err();
        assert_eq!(err, vec!["format_disk", "nuke"]);
    }

    #[test]
    fn test_empty_tags_are_valid() {
        let vocabulary = TagVocabulary::default();
        assert!(vocabulary.validate::<&str>(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_custom_vocabulary() {
        let vocabulary = TagVocabulary::new(["alpha", "beta"]);
        assert!(vocabulary.contains("alpha"));
        assert!(!vocabulary.contains("powerup"));
        assert_eq!(vocabulary.describe(), "alpha, beta");
    }
}
