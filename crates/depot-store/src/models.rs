use chrono::{DateTime, Utc};
use depot_package::PackageManifest;
use serde::{Deserialize, Serialize};

/// Attributes computed by the cache rather than read from the archive.
///
/// Size and hash start at their unset sentinels and are filled in by the
/// builder's hashing pass; the latest-version flags are recomputed on
/// every rebuild and never trusted from a stored row.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct DerivedMetadata {
    /// Path relative to the package root.
    pub path: String,
    /// Absolute path on disk.
    pub full_path: String,
    pub created: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    /// Content size in bytes; zero or negative means "not yet computed".
    pub size: i64,
    /// Hex blake3 digest of the archive, once computed.
    pub hash: Option<String>,
    /// Framework targets, duplicated from the manifest for query
    /// convenience when framework filtering is enabled.
    pub frameworks: Vec<String>,
    pub is_latest_version: bool,
    pub is_absolute_latest_version: bool,
}

impl DerivedMetadata {
    pub fn new(
        path: String,
        full_path: String,
        created: DateTime<Utc>,
        last_updated: DateTime<Utc>,
        frameworks: Vec<String>,
    ) -> Self {
        Self {
            path,
            full_path,
            created,
            last_updated,
            size: -1,
            hash: None,
            frameworks,
            is_latest_version: false,
            is_absolute_latest_version: false,
        }
    }

    /// Whether the hash and size fields hold computed values. A size of
    /// zero or less is the sentinel for "not yet computed", never a valid
    /// measurement.
    pub fn has_hash(&self) -> bool {
        self.size > 0
    }
}

/// One persisted row: the parsed manifest plus the derived metadata for a
/// single archive file, keyed by file name.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct StoredPackage {
    pub manifest: PackageManifest,
    pub derived: DerivedMetadata,
}
