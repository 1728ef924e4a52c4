//! Windows API name tables.
//!
//! Two sets: module names (queried case-insensitively, the loader is not
//! case sensitive either) and exported API names (queried case-sensitively,
//! `GetProcAddress` is not `getprocaddress`).

use crate::Error;
use log::debug;
use std::collections::HashSet;
use std::path::Path;

/// DLL and API name sets.
#[derive(Debug, Default)]
pub struct WindowsApiStringDatabase {
    dll_names: HashSet<String>,
    api_names: HashSet<String>,
}

impl WindowsApiStringDatabase {
    /// Load from a directory holding `dlls.txt` and an `apis/` subdirectory
    /// with one name list per originating DLL. Missing pieces load as empty.
    pub fn from_dir(dir: &Path) -> Result<Self, Error> {
        let mut db = Self::default();

        let dlls = dir.join("dlls.txt");
        if dlls.is_file() {
            for line in std::fs::read_to_string(&dlls)?.lines() {
                let name = line.trim();
                if !name.is_empty() {
                    db.dll_names.insert(name.to_lowercase());
                }
            }
        } else {
            debug!("no dll name list at {}", dlls.display());
        }

        let apis = dir.join("apis");
        if apis.is_dir() {
            let mut files: Vec<_> = std::fs::read_dir(&apis)?
                .filter_map(Result::ok)
                .map(|e| e.path())
                .filter(|p| p.extension().is_some_and(|e| e == "txt"))
                .collect();
            files.sort();
            for file in files {
                for line in std::fs::read_to_string(&file)?.lines() {
                    let name = line.trim();
                    if !name.is_empty() {
                        db.api_names.insert(name.to_string());
                    }
                }
            }
        } else {
            debug!("no api name lists under {}", apis.display());
        }

        Ok(db)
    }

    /// Case-insensitive module name lookup.
    pub fn has_dll_name(&self, s: &str) -> bool {
        self.dll_names.contains(&s.to_lowercase())
    }

    /// Case-sensitive API name lookup.
    pub fn has_api_name(&self, s: &str) -> bool {
        self.api_names.contains(s)
    }

    pub fn len(&self) -> usize {
        self.dll_names.len() + self.api_names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dll_names.is_empty() && self.api_names.is_empty()
    }

    /// Build a database from in-memory name lists.
    pub fn from_names(dlls: &[&str], apis: &[&str]) -> Self {
        Self {
            dll_names: dlls.iter().map(|s| s.to_lowercase()).collect(),
            api_names: apis.iter().map(|s| s.to_string()).collect(),
        }
    }
}
