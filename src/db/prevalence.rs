//! Global string prevalence databases.
//!
//! Two storage shapes for the same question, "has the world seen this string
//! a lot": a dense map from string to observation count, and a sparse set of
//! string-content hashes for corpora too large to ship as text.

use crate::Error;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::Path;

#[derive(Debug, Deserialize)]
struct PrevalenceRecord {
    string: String,
    #[serde(default)]
    global_count: u64,
}

/// Dense prevalence map: string content to observation count.
#[derive(Debug, Default)]
pub struct StringGlobalPrevalenceDatabase {
    counts: HashMap<String, u64>,
}

impl StringGlobalPrevalenceDatabase {
    pub fn from_lines(text: &str) -> Result<Self, Error> {
        let mut counts = HashMap::new();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            let record: PrevalenceRecord =
                serde_json::from_str(line).map_err(|e| Error::Database(e.to_string()))?;
            counts.insert(record.string, record.global_count);
        }
        Ok(Self { counts })
    }

    pub fn from_file(path: &Path) -> Result<Self, Error> {
        Self::from_lines(&std::fs::read_to_string(path)?)
    }

    /// Merge another database in. Presence is what matters downstream, so
    /// merging takes the union of keys without summing counts.
    pub fn update(&mut self, other: Self) {
        for (string, count) in other.counts {
            self.counts.entry(string).or_insert(count);
        }
    }

    pub fn query(&self, s: &str) -> bool {
        self.counts.contains_key(s)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

/// Sparse prevalence set: the first eight bytes of the SHA-256 of each
/// string's content.
#[derive(Debug, Default)]
pub struct StringHashDatabase {
    hashes: HashSet<[u8; 8]>,
}

impl StringHashDatabase {
    pub fn from_bytes(data: &[u8]) -> Result<Self, Error> {
        if data.len() % 8 != 0 {
            return Err(Error::Database(format!(
                "hash database length {} is not a multiple of 8",
                data.len()
            )));
        }
        let hashes = data
            .chunks_exact(8)
            .map(|c| {
                let mut h = [0u8; 8];
                h.copy_from_slice(c);
                h
            })
            .collect();
        Ok(Self { hashes })
    }

    pub fn from_file(path: &Path) -> Result<Self, Error> {
        Self::from_bytes(&std::fs::read(path)?)
    }

    pub fn contains(&self, s: &str) -> bool {
        let digest = Sha256::digest(s.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        self.hashes.contains(&prefix)
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prevalence_query() {
        let db = StringGlobalPrevalenceDatabase::from_lines(
            r#"{"string": "Program Files", "global_count": 40000}
{"string": "mscoree.dll", "global_count": 31000}"#,
        )
        .unwrap();
        assert_eq!(db.len(), 2);
        assert!(db.query("Program Files"));
        assert!(!db.query("definitely-unique-string"));
    }

    #[test]
    fn test_prevalence_update_unions_keys() {
        let mut a = StringGlobalPrevalenceDatabase::from_lines(
            r#"{"string": "alpha", "global_count": 1}"#,
        )
        .unwrap();
        let b = StringGlobalPrevalenceDatabase::from_lines(
            r#"{"string": "alpha", "global_count": 7}
{"string": "beta", "global_count": 2}"#,
        )
        .unwrap();
        a.update(b);
        assert_eq!(a.len(), 2);
        assert!(a.query("alpha"));
        assert!(a.query("beta"));
    }

    #[test]
    fn test_prevalence_rejects_bad_record() {
        assert!(StringGlobalPrevalenceDatabase::from_lines("not json").is_err());
    }

    #[test]
    fn test_hash_database_membership() {
        let digest = Sha256::digest(b"GetProcAddress");
        let db = StringHashDatabase::from_bytes(&digest[..8]).unwrap();
        assert_eq!(db.len(), 1);
        assert!(db.contains("GetProcAddress"));
        assert!(!db.contains("GetProcAddres"));
    }

    #[test]
    fn test_hash_database_rejects_ragged_input() {
        assert!(StringHashDatabase::from_bytes(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_hash_database_empty() {
        let db = StringHashDatabase::from_bytes(&[]).unwrap();
        assert!(db.is_empty());
        assert!(!db.contains("anything"));
    }
}
