//! Knowledge bases the tagging engine queries.
//!
//! Every database is loaded once at start-up and is read-only afterwards,
//! so a caller analyzing many files may share one [`Databases`] across
//! threads without any synchronization.
//!
//! No database is load-bearing for correctness. A missing or unreadable
//! database costs tag richness, not results, so the directory loader warns
//! and degrades instead of failing the run.

pub mod expert;
pub mod oss;
pub mod prevalence;
pub mod winapi;

pub use expert::ExpertStringDatabase;
pub use oss::OpenSourceStringDatabase;
pub use prevalence::{StringGlobalPrevalenceDatabase, StringHashDatabase};
pub use winapi::WindowsApiStringDatabase;

use crate::types::Tag;
use log::{debug, warn};
use std::collections::BTreeSet;
use std::path::Path;

/// All loaded knowledge bases, passed by reference into the tagging engine.
#[derive(Debug, Default)]
pub struct Databases {
    pub expert: Vec<ExpertStringDatabase>,
    pub prevalence: Option<StringGlobalPrevalenceDatabase>,
    pub hashes: Vec<StringHashDatabase>,
    pub libraries: Vec<OpenSourceStringDatabase>,
    pub winapi: Option<WindowsApiStringDatabase>,
}

impl Databases {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load every database found under `dir`.
    ///
    /// Expected layout: `expert/*.jsonl`, `gp/*.jsonl` and `gp/*.bin`,
    /// `oss/*.jsonl`, `winapi/`. Anything missing or unparsable is skipped
    /// with a warning.
    pub fn load_dir(dir: &Path) -> Self {
        let mut dbs = Self::default();

        for path in jsonl_files(&dir.join("expert")) {
            match ExpertStringDatabase::from_file(&path) {
                Ok(db) => dbs.expert.push(db),
                Err(e) => warn!("skipping expert database {}: {}", path.display(), e),
            }
        }

        for path in jsonl_files(&dir.join("gp")) {
            match StringGlobalPrevalenceDatabase::from_file(&path) {
                Ok(db) => match dbs.prevalence.as_mut() {
                    Some(merged) => merged.update(db),
                    None => dbs.prevalence = Some(db),
                },
                Err(e) => warn!("skipping prevalence database {}: {}", path.display(), e),
            }
        }
        for path in files_with_extension(&dir.join("gp"), "bin") {
            match StringHashDatabase::from_file(&path) {
                Ok(db) => dbs.hashes.push(db),
                Err(e) => warn!("skipping hash database {}: {}", path.display(), e),
            }
        }

        for path in jsonl_files(&dir.join("oss")) {
            match OpenSourceStringDatabase::from_file(&path) {
                Ok(db) => dbs.libraries.push(db),
                Err(e) => warn!("skipping library database {}: {}", path.display(), e),
            }
        }

        let winapi_dir = dir.join("winapi");
        if winapi_dir.is_dir() {
            match WindowsApiStringDatabase::from_dir(&winapi_dir) {
                Ok(db) => dbs.winapi = Some(db),
                Err(e) => warn!("skipping winapi database: {}", e),
            }
        } else {
            debug!("no winapi database under {}", dir.display());
        }

        dbs
    }

    /// Every distinct library tag across the loaded fingerprint databases.
    pub fn library_tags(&self) -> BTreeSet<Tag> {
        self.libraries
            .iter()
            .flat_map(OpenSourceStringDatabase::library_tags)
            .collect()
    }
}

fn jsonl_files(dir: &Path) -> Vec<std::path::PathBuf> {
    files_with_extension(dir, "jsonl")
}

fn files_with_extension(dir: &Path, ext: &str) -> Vec<std::path::PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        debug!("no database directory at {}", dir.display());
        return Vec::new();
    };
    let mut files: Vec<_> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|e| e == ext))
        .collect();
    files.sort();
    files
}
