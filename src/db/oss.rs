//! Open-source library fingerprint databases.
//!
//! Each database maps string content to the library it was harvested from
//! (zlib, openssl, a CRT build, ...). A hit tags the string with the
//! library's name, which tells the analyst the string is statically linked
//! baggage rather than the author's own code.

use crate::types::Tag;
use crate::Error;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

/// Provenance metadata for one fingerprinted string.
#[derive(Debug, Clone, Deserialize)]
pub struct LibraryString {
    pub library_name: String,
    #[serde(default)]
    pub library_version: String,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub function_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LibraryRecord {
    string: String,
    #[serde(flatten)]
    meta: LibraryString,
}

/// Fingerprint database for one library.
#[derive(Debug, Default)]
pub struct OpenSourceStringDatabase {
    metadata_by_string: HashMap<String, LibraryString>,
}

impl OpenSourceStringDatabase {
    pub fn from_lines(text: &str) -> Result<Self, Error> {
        let mut metadata_by_string = HashMap::new();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            let record: LibraryRecord =
                serde_json::from_str(line).map_err(|e| Error::Database(e.to_string()))?;
            metadata_by_string.insert(record.string, record.meta);
        }
        Ok(Self { metadata_by_string })
    }

    pub fn from_file(path: &Path) -> Result<Self, Error> {
        Self::from_lines(&std::fs::read_to_string(path)?)
    }

    pub fn query(&self, s: &str) -> Option<&LibraryString> {
        self.metadata_by_string.get(s)
    }

    /// The tag a hit in this database produces, e.g. `#zlib`.
    pub fn tag_for(meta: &LibraryString) -> Tag {
        format!("#{}", meta.library_name)
    }

    /// Every distinct library tag this database can produce. Usually one.
    pub fn library_tags(&self) -> BTreeSet<Tag> {
        self.metadata_by_string
            .values()
            .map(Self::tag_for)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.metadata_by_string.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metadata_by_string.is_empty()
    }
}
