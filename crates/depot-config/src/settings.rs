use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Server settings.
///
/// Every field is optional so a partial TOML file (or an empty one) is
/// valid; the accessor methods apply the defaults. The field names mirror
/// the knobs the serving layer historically exposed.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Settings {
    /// Whether pushing a package that already exists on disk replaces it.
    /// Default: true
    pub allow_overwrite_on_push: Option<bool>,

    /// If true, removing a package hides it from listings instead of
    /// deleting the archive.
    /// Default: false
    pub enable_delisting: Option<bool>,

    /// If true, supported framework targets are extracted into the derived
    /// metadata so the query layer can filter on them.
    /// Default: false
    pub enable_framework_filtering: Option<bool>,

    /// If true, content hashing is skipped entirely.
    /// Default: false
    pub ignore_hash: Option<bool>,

    /// Restricts scanning to these immediate subdirectories of the root.
    /// Default: none (scan the whole root)
    pub project_dirs: Option<Vec<String>>,

    /// Regex applied to each archive's root-relative path; non-matching
    /// files are ignored.
    /// Default: none
    pub file_filter: Option<String>,

    /// Maximum number of worker threads for parallel discovery and hashing.
    /// Default: 4
    pub worker_threads: Option<usize>,

    /// Number of consecutive rebuilds a file may fail to open transiently
    /// before it is dropped with a warning.
    /// Default: none (retry forever)
    pub transient_retry_limit: Option<u32>,

    /// Location of the metadata database.
    /// Default: <root>/.depot/cache.db
    pub store_path: Option<String>,
}

impl Settings {
    /// Loads settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    pub fn allow_overwrite_on_push(&self) -> bool {
        self.allow_overwrite_on_push.unwrap_or(true)
    }

    pub fn enable_delisting(&self) -> bool {
        self.enable_delisting.unwrap_or(false)
    }

    pub fn enable_framework_filtering(&self) -> bool {
        self.enable_framework_filtering.unwrap_or(false)
    }

    pub fn ignore_hash(&self) -> bool {
        self.ignore_hash.unwrap_or(false)
    }

    pub fn project_dirs(&self) -> Option<&[String]> {
        self.project_dirs.as_deref()
    }

    pub fn file_filter(&self) -> Option<&str> {
        self.file_filter.as_deref()
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads.unwrap_or(4)
    }

    pub fn transient_retry_limit(&self) -> Option<u32> {
        self.transient_retry_limit
    }

    pub fn store_path(&self) -> Option<&str> {
        self.store_path.as_deref()
    }
}
