//! Hand-curated expert rules.
//!
//! Each rule pairs a pattern with a tag and a display action. Patterns come
//! in three kinds: an exact string, a substring, or a regular expression.
//! The exact rules live in a map for O(1) lookup; substring rules share one
//! Aho-Corasick automaton; regex rules are tried one by one.

use crate::types::{Action, Tag};
use crate::Error;
use aho_corasick::AhoCorasick;
use log::debug;
use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

/// Metadata shared by every rule kind.
#[derive(Debug, Clone)]
pub struct RuleInfo {
    pub tag: Tag,
    pub action: Action,
    pub note: String,
    pub description: String,
    pub authors: Vec<String>,
    pub references: Vec<String>,
}

/// One parsed rule, carrying only what its kind needs.
#[derive(Debug, Clone)]
pub enum ExpertRule {
    Exact { value: String, info: RuleInfo },
    Substring { value: String, info: RuleInfo },
    Regex { pattern: Box<Regex>, info: RuleInfo },
}

#[derive(Debug, Deserialize)]
struct RawRule {
    #[serde(rename = "type")]
    kind: String,
    value: String,
    tag: String,
    action: Action,
    #[serde(default)]
    note: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    authors: Vec<String>,
    #[serde(default)]
    references: Vec<String>,
}

impl ExpertRule {
    fn parse(line: &str) -> Result<Self, Error> {
        let raw: RawRule =
            serde_json::from_str(line).map_err(|e| Error::Database(e.to_string()))?;
        let info = RuleInfo {
            tag: raw.tag,
            action: raw.action,
            note: raw.note,
            description: raw.description,
            authors: raw.authors,
            references: raw.references,
        };
        match raw.kind.as_str() {
            "string" => Ok(ExpertRule::Exact {
                value: raw.value,
                info,
            }),
            "substring" => Ok(ExpertRule::Substring {
                value: raw.value,
                info,
            }),
            "regex" => {
                let pattern = Regex::new(&raw.value)
                    .map_err(|e| Error::Database(format!("bad rule regex: {e}")))?;
                Ok(ExpertRule::Regex {
                    pattern: Box::new(pattern),
                    info,
                })
            }
            other => Err(Error::Database(format!("unexpected rule type: {other}"))),
        }
    }
}

/// Expert rule database for one rule file.
#[derive(Debug, Default)]
pub struct ExpertStringDatabase {
    string_rules: HashMap<String, RuleInfo>,
    substring_rules: Vec<(String, RuleInfo)>,
    substring_index: Option<AhoCorasick>,
    regex_rules: Vec<(Box<Regex>, RuleInfo)>,
}

impl ExpertStringDatabase {
    pub fn from_rules(rules: Vec<ExpertRule>) -> Result<Self, Error> {
        let mut db = Self::default();
        for rule in rules {
            match rule {
                ExpertRule::Exact { value, info } => {
                    if db.string_rules.insert(value, info).is_some() {
                        debug!("duplicate exact rule value, keeping the later one");
                    }
                }
                ExpertRule::Substring { value, info } => {
                    db.substring_rules.push((value, info));
                }
                ExpertRule::Regex { pattern, info } => {
                    db.regex_rules.push((pattern, info));
                }
            }
        }
        if !db.substring_rules.is_empty() {
            let automaton = AhoCorasick::new(db.substring_rules.iter().map(|(v, _)| v))
                .map_err(|e| Error::Database(format!("bad substring rule set: {e}")))?;
            db.substring_index = Some(automaton);
        }
        Ok(db)
    }

    pub fn from_lines(text: &str) -> Result<Self, Error> {
        let rules = text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(ExpertRule::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_rules(rules)
    }

    pub fn from_file(path: &Path) -> Result<Self, Error> {
        Self::from_lines(&std::fs::read_to_string(path)?)
    }

    pub fn len(&self) -> usize {
        self.string_rules.len() + self.substring_rules.len() + self.regex_rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tags of every rule matching `s`. A string may match several rules.
    pub fn query(&self, s: &str) -> BTreeSet<Tag> {
        let mut tags = BTreeSet::new();

        if let Some(info) = self.string_rules.get(s) {
            tags.insert(info.tag.clone());
        }

        if let Some(index) = &self.substring_index {
            for m in index.find_overlapping_iter(s) {
                tags.insert(self.substring_rules[m.pattern().as_usize()].1.tag.clone());
            }
        }

        for (pattern, info) in &self.regex_rules {
            if pattern.is_match(s) {
                tags.insert(info.tag.clone());
            }
        }

        tags
    }

    /// `(tag, action)` for every rule, for building the display rule table.
    pub fn tag_actions(&self) -> impl Iterator<Item = (&Tag, Action)> {
        self.string_rules
            .values()
            .chain(self.substring_rules.iter().map(|(_, i)| i))
            .chain(self.regex_rules.iter().map(|(_, i)| i))
            .map(|info| (&info.tag, info.action))
    }
}
