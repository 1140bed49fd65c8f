use chrono::{DateTime, Utc};
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};

use crate::error::{PackageError, Result};

/// File extension of depot package archives.
pub const ARCHIVE_EXTENSION: &str = "dpk";

/// A dependency on another package, constrained by a version requirement.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Dependency {
    pub id: String,
    pub req: VersionReq,
}

/// A group of dependencies that applies to one target framework, or to
/// every framework when `target_framework` is unset.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct DependencyGroup {
    #[serde(default)]
    pub target_framework: Option<String>,
    #[serde(default)]
    pub entries: Vec<Dependency>,
}

/// The metadata a package archive declares about itself.
///
/// Parsed from the archive's embedded manifest by the reader; immutable
/// once created and replaced wholesale when the archive is re-parsed.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct PackageManifest {
    pub id: String,
    pub version: Version,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub release_notes: Option<String>,
    #[serde(default)]
    pub project_url: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<DependencyGroup>,
    /// Framework targets this package supports.
    #[serde(default)]
    pub frameworks: Vec<String>,
    /// Whether the package shows up in listings. Hidden (delisted)
    /// archives keep their files on disk but flip this off.
    #[serde(default = "default_listed")]
    pub listed: bool,
    #[serde(default)]
    pub published: Option<DateTime<Utc>>,
}

fn default_listed() -> bool {
    true
}

impl PackageManifest {
    /// Whether this is a release version (no pre-release label).
    pub fn is_release(&self) -> bool {
        self.version.pre.is_empty()
    }

    /// The package id in the form used for grouping and comparison.
    /// Package ids are case-insensitive.
    pub fn id_key(&self) -> String {
        self.id.to_lowercase()
    }

    /// Validates fields that end up in filesystem paths.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() || self.id.contains(['/', '\\']) || self.id.contains("..") {
            return Err(PackageError::InvalidId(self.id.clone()));
        }
        Ok(())
    }
}

/// The canonical archive file name for a package identity.
pub fn package_file_name(id: &str, version: &Version) -> String {
    format!("{id}.{version}.{ARCHIVE_EXTENSION}")
}
