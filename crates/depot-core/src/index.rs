use std::{collections::BTreeMap, sync::Arc};

use depot_package::PackageManifest;
use depot_store::DerivedMetadata;
use semver::Version;

/// One indexed archive: the parsed manifest plus the metadata derived for
/// it, keyed by the archive's file name.
#[derive(Clone, Debug)]
pub struct IndexEntry {
    pub file_name: String,
    pub manifest: Arc<PackageManifest>,
    pub derived: DerivedMetadata,
}

/// The product of one full rebuild.
///
/// Immutable once published; the cache manager swaps whole indexes in and
/// out rather than patching entries in place.
#[derive(Debug, Default)]
pub struct PackageIndex {
    entries: BTreeMap<String, IndexEntry>,
}

impl PackageIndex {
    pub(crate) fn new(entries: Vec<IndexEntry>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|entry| (entry.file_name.clone(), entry))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, file_name: &str) -> Option<&IndexEntry> {
        self.entries.get(file_name)
    }

    /// All entries, in file-name order.
    pub fn all(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.values()
    }

    /// Every version of a package id. Ids compare case-insensitively.
    pub fn find_by_id(&self, id: &str) -> Vec<&IndexEntry> {
        let mut entries: Vec<&IndexEntry> = self
            .entries
            .values()
            .filter(|entry| entry.manifest.id.eq_ignore_ascii_case(id))
            .collect();
        entries.sort_by(|a, b| a.manifest.version.cmp(&b.manifest.version));
        entries
    }

    pub fn find_by_id_and_version(&self, id: &str, version: &Version) -> Option<&IndexEntry> {
        self.entries.values().find(|entry| {
            entry.manifest.id.eq_ignore_ascii_case(id) && entry.manifest.version == *version
        })
    }
}
