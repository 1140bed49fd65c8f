//! Full index rebuild: one pass from directory contents plus the metadata
//! store to a complete, consistent [`PackageIndex`].
//!
//! The pass is ordered for crash-safety and consistency:
//!
//! 1. snapshot the candidate file list before any parallel work starts;
//! 2. reuse persisted rows for files the store already knows (fast path);
//! 3. parse the rest in a bounded worker pool;
//! 4. hash whatever still lacks a digest, persisting each file as soon as
//!    its hash lands so a crash loses only unhashed files;
//! 5. compute the latest-version flags over the complete set;
//! 6. purge store rows whose files are gone from disk.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Instant,
};

use depot_config::Settings;
use depot_store::{DerivedMetadata, PackageStore, StoredPackage};
use depot_utils::{fs::FileSystemProvider, hash::hash_reader};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::{
    error::Result,
    index::{IndexEntry, PackageIndex},
};
use depot_package::{read_package, ARCHIVE_EXTENSION};

pub(crate) struct IndexBuilder<F> {
    fs: Arc<F>,
    store: PackageStore,
    settings: Settings,
    /// Consecutive recoverable-open failures per candidate path, carried
    /// across rebuilds so `transient_retry_limit` can give up on files
    /// that never become readable.
    transient_failures: Mutex<HashMap<PathBuf, u32>>,
}

impl<F: FileSystemProvider + Send + Sync> IndexBuilder<F> {
    pub(crate) fn new(fs: Arc<F>, store: PackageStore, settings: Settings) -> Self {
        Self {
            fs,
            store,
            settings,
            transient_failures: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn build(&self) -> Result<PackageIndex> {
        let started = Instant::now();
        let candidates = self.enumerate()?;
        debug!(
            files = candidates.len(),
            elapsed = ?started.elapsed(),
            "enumerated package folder"
        );

        let loading = Instant::now();
        let mut cached = self.store.get_all()?;
        debug!(
            rows = cached.len(),
            elapsed = ?loading.elapsed(),
            "loaded metadata store"
        );

        let mut entries = Vec::with_capacity(candidates.len());
        let mut discover = Vec::new();
        for path in &candidates {
            let file_name = file_name_of(path);
            match cached.remove(&file_name) {
                Some(row) => entries.push(self.entry_from_row(path, file_name, row)),
                None => discover.push(path.clone()),
            }
        }

        let pool = ThreadPoolBuilder::new()
            .num_threads(self.settings.worker_threads())
            .build()?;

        let discovering = Instant::now();
        let discovered: Vec<Result<Option<IndexEntry>>> =
            pool.install(|| discover.par_iter().map(|path| self.discover(path)).collect());
        for result in discovered {
            if let Some(entry) = result? {
                entries.push(entry);
            }
        }
        debug!(
            files = discover.len(),
            elapsed = ?discovering.elapsed(),
            "parsed packages missing from the store"
        );

        if !self.settings.ignore_hash() {
            let hashing = Instant::now();
            pool.install(|| {
                entries
                    .par_iter_mut()
                    .filter(|entry| !entry.derived.has_hash())
                    .try_for_each(|entry| self.hash_entry(entry))
            })?;
            debug!(elapsed = ?hashing.elapsed(), "computed missing hashes");
        }

        assign_latest_flags(&mut entries);

        if !cached.is_empty() {
            let stale: Vec<String> = cached.into_keys().collect();
            debug!(rows = stale.len(), "purging store rows for deleted files");
            self.store.delete_many(&stale)?;
        }

        self.prune_transient_failures(&candidates);

        info!(
            packages = entries.len(),
            elapsed = ?started.elapsed(),
            "package index rebuilt"
        );
        Ok(PackageIndex::new(entries))
    }

    /// Candidate archives, materialized up front so concurrent filesystem
    /// mutations cannot tear the enumeration out from under the parallel
    /// passes.
    fn enumerate(&self) -> Result<Vec<PathBuf>> {
        let files = self
            .fs
            .list_files(ARCHIVE_EXTENSION, self.settings.project_dirs())?;
        let Some(pattern) = self.settings.file_filter() else {
            return Ok(files);
        };
        let regex = Regex::new(pattern)?;
        Ok(files
            .into_iter()
            .filter(|path| match self.fs.relative(path) {
                Ok(rel) => regex.is_match(&rel.to_string_lossy()),
                Err(_) => true,
            })
            .collect())
    }

    /// Fast path: rebuilds an entry from a persisted row without touching
    /// the archive.
    ///
    /// Location fields are refreshed from the candidate path, the listed
    /// flag is re-derived from the filesystem (a stored row does not learn
    /// about delisting), and the frameworks column follows the current
    /// filtering setting.
    fn entry_from_row(&self, path: &Path, file_name: String, row: StoredPackage) -> IndexEntry {
        let StoredPackage {
            mut manifest,
            mut derived,
        } = row;
        if self.settings.enable_delisting() {
            manifest.listed = !self.fs.is_hidden(path);
        }
        if let Ok(rel) = self.fs.relative(path) {
            derived.path = rel.to_string_lossy().into_owned();
        }
        derived.full_path = path.to_string_lossy().into_owned();
        derived.frameworks = if self.settings.enable_framework_filtering() {
            manifest.frameworks.clone()
        } else {
            Vec::new()
        };
        IndexEntry {
            file_name,
            manifest: Arc::new(manifest),
            derived,
        }
    }

    /// Opens one archive and derives its metadata.
    ///
    /// Returns `Ok(None)` when the file is transiently unreadable (it is
    /// retried on the next rebuild) and an error only for fatal format
    /// problems, which abort the whole build.
    fn discover(&self, path: &Path) -> Result<Option<IndexEntry>> {
        if self.retries_exhausted(path) {
            return Ok(None);
        }
        let mut manifest = match read_package(path) {
            Ok(manifest) => manifest,
            Err(err) if err.is_recoverable() => {
                self.note_transient_failure(path, &err);
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        self.clear_transient_failures(path);

        if self.settings.enable_delisting() {
            manifest.listed = !self.fs.is_hidden(path);
        }
        let stat = match self.fs.stat(path) {
            Ok(stat) => stat,
            Err(err) => {
                // The file disappeared between parse and stat; treat it
                // like any other transient miss.
                debug!(path = %path.display(), error = %err, "package vanished mid-discovery");
                return Ok(None);
            }
        };
        let frameworks = if self.settings.enable_framework_filtering() {
            manifest.frameworks.clone()
        } else {
            Vec::new()
        };
        let relative = self
            .fs
            .relative(path)
            .map(|rel| rel.to_string_lossy().into_owned())
            .unwrap_or_else(|_| file_name_of(path));
        let derived = DerivedMetadata::new(
            relative,
            path.to_string_lossy().into_owned(),
            stat.created.into(),
            stat.modified.into(),
            frameworks,
        );

        let file_name = file_name_of(path);
        let manifest = Arc::new(manifest);
        self.store.upsert(&file_name, &manifest, &derived)?;
        Ok(Some(IndexEntry {
            file_name,
            manifest,
            derived,
        }))
    }

    /// Streams the archive once, recording size and digest, and persists
    /// the row immediately so a crash mid-pass loses only unhashed files.
    fn hash_entry(&self, entry: &mut IndexEntry) -> Result<()> {
        let file = match self.fs.open_file(&entry.derived.full_path) {
            Ok(file) => file,
            Err(err) => {
                // Busy or deleted; stays at the unset sentinel and is
                // hashed on a later pass.
                debug!(path = %entry.derived.full_path, error = %err, "skipping hash this pass");
                return Ok(());
            }
        };
        match hash_reader(file) {
            Ok((len, digest)) => {
                entry.derived.size = len as i64;
                entry.derived.hash = Some(digest);
                self.store
                    .upsert(&entry.file_name, &entry.manifest, &entry.derived)?;
                Ok(())
            }
            Err(err) => {
                debug!(path = %entry.derived.full_path, error = %err, "skipping hash this pass");
                Ok(())
            }
        }
    }

    fn retries_exhausted(&self, path: &Path) -> bool {
        let Some(limit) = self.settings.transient_retry_limit() else {
            return false;
        };
        self.transient_failures
            .lock()
            .map(|counts| counts.get(path).is_some_and(|count| *count > limit))
            .unwrap_or(false)
    }

    fn note_transient_failure(&self, path: &Path, err: &depot_package::PackageError) {
        let Ok(mut counts) = self.transient_failures.lock() else {
            return;
        };
        let count = counts.entry(path.to_path_buf()).or_insert(0);
        *count += 1;
        match self.settings.transient_retry_limit() {
            Some(limit) if *count > limit => {
                warn!(
                    path = %path.display(),
                    attempts = *count,
                    "package failed to open repeatedly; dropping it from future rebuilds"
                );
            }
            _ => {
                debug!(path = %path.display(), error = %err, "package busy; retrying next rebuild");
            }
        }
    }

    fn clear_transient_failures(&self, path: &Path) {
        if let Ok(mut counts) = self.transient_failures.lock() {
            counts.remove(path);
        }
    }

    /// Forgets failure counts for files that are no longer on disk.
    fn prune_transient_failures(&self, candidates: &[PathBuf]) {
        if let Ok(mut counts) = self.transient_failures.lock() {
            counts.retain(|path, _| candidates.contains(path));
        }
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Flags the highest version per package id as the absolute latest, and
/// the highest release version as the latest. Runs only after the whole
/// set is known; ids group case-insensitively.
///
/// Exact duplicate versions for one id are a data-integrity condition;
/// the later entry wins and the collision is logged.
fn assign_latest_flags(entries: &mut [IndexEntry]) {
    for entry in entries.iter_mut() {
        entry.derived.is_latest_version = false;
        entry.derived.is_absolute_latest_version = false;
    }

    let mut absolute: HashMap<String, usize> = HashMap::new();
    let mut release: HashMap<String, usize> = HashMap::new();
    for index in 0..entries.len() {
        let key = entries[index].manifest.id_key();
        update_best(&mut absolute, &key, index, entries);
        if entries[index].manifest.is_release() {
            update_best(&mut release, &key, index, entries);
        }
    }

    for &index in absolute.values() {
        entries[index].derived.is_absolute_latest_version = true;
    }
    for &index in release.values() {
        entries[index].derived.is_latest_version = true;
    }
}

fn update_best(best: &mut HashMap<String, usize>, key: &str, index: usize, entries: &[IndexEntry]) {
    match best.get(key) {
        Some(&current) => {
            let current_version = &entries[current].manifest.version;
            let candidate = &entries[index].manifest.version;
            if candidate == current_version {
                warn!(
                    id = %entries[index].manifest.id,
                    version = %candidate,
                    "duplicate package version on disk; keeping the later file"
                );
            }
            if candidate >= current_version {
                best.insert(key.to_string(), index);
            }
        }
        None => {
            best.insert(key.to_string(), index);
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use depot_package::PackageManifest;

    use super::*;

    fn entry(id: &str, version: &str, file_name: &str) -> IndexEntry {
        let manifest: PackageManifest = serde_json::from_str(&format!(
            r#"{{"id": "{id}", "version": "{version}"}}"#
        ))
        .unwrap();
        let derived = DerivedMetadata::new(
            file_name.to_string(),
            format!("/packages/{file_name}"),
            Utc::now(),
            Utc::now(),
            Vec::new(),
        );
        IndexEntry {
            file_name: file_name.to_string(),
            manifest: Arc::new(manifest),
            derived,
        }
    }

    fn flags(entries: &[IndexEntry], file_name: &str) -> (bool, bool) {
        let entry = entries
            .iter()
            .find(|entry| entry.file_name == file_name)
            .unwrap();
        (
            entry.derived.is_latest_version,
            entry.derived.is_absolute_latest_version,
        )
    }

    #[test]
    fn test_release_beats_nothing_prerelease_beats_release_for_absolute() {
        let mut entries = vec![
            entry("Foo", "1.0.0", "Foo.1.0.0.dpk"),
            entry("Foo", "2.0.0-beta", "Foo.2.0.0-beta.dpk"),
        ];
        assign_latest_flags(&mut entries);
        assert_eq!(flags(&entries, "Foo.1.0.0.dpk"), (true, false));
        assert_eq!(flags(&entries, "Foo.2.0.0-beta.dpk"), (false, true));
    }

    #[test]
    fn test_prerelease_only_id_has_no_latest() {
        let mut entries = vec![
            entry("Bar", "0.1.0-alpha", "Bar.0.1.0-alpha.dpk"),
            entry("Bar", "0.2.0-alpha", "Bar.0.2.0-alpha.dpk"),
        ];
        assign_latest_flags(&mut entries);
        assert_eq!(flags(&entries, "Bar.0.1.0-alpha.dpk"), (false, false));
        assert_eq!(flags(&entries, "Bar.0.2.0-alpha.dpk"), (false, true));
        assert!(entries.iter().all(|e| !e.derived.is_latest_version));
    }

    #[test]
    fn test_ids_group_case_insensitively() {
        let mut entries = vec![
            entry("foo", "1.0.0", "foo.1.0.0.dpk"),
            entry("FOO", "2.0.0", "FOO.2.0.0.dpk"),
        ];
        assign_latest_flags(&mut entries);
        assert_eq!(flags(&entries, "foo.1.0.0.dpk"), (false, false));
        assert_eq!(flags(&entries, "FOO.2.0.0.dpk"), (true, true));
    }

    #[test]
    fn test_at_most_one_flag_per_id() {
        let mut entries = vec![
            entry("A", "1.0.0", "A.1.dpk"),
            entry("A", "2.0.0", "A.2.dpk"),
            entry("A", "3.0.0-rc.1", "A.3.dpk"),
            entry("B", "0.9.0", "B.1.dpk"),
        ];
        assign_latest_flags(&mut entries);
        let latest = entries.iter().filter(|e| e.derived.is_latest_version).count();
        let absolute = entries
            .iter()
            .filter(|e| e.derived.is_absolute_latest_version)
            .count();
        // One per id.
        assert_eq!(latest, 2);
        assert_eq!(absolute, 2);
        assert_eq!(flags(&entries, "A.2.dpk"), (true, false));
        assert_eq!(flags(&entries, "A.3.dpk"), (false, true));
        assert_eq!(flags(&entries, "B.1.dpk"), (true, true));
    }

    #[test]
    fn test_duplicate_versions_last_write_wins() {
        let mut entries = vec![
            entry("Dup", "1.0.0", "first.dpk"),
            entry("Dup", "1.0.0", "second.dpk"),
        ];
        assign_latest_flags(&mut entries);
        assert_eq!(flags(&entries, "first.dpk"), (false, false));
        assert_eq!(flags(&entries, "second.dpk"), (true, true));
    }

    #[test]
    fn test_flags_are_reset_before_assignment() {
        let mut entries = vec![entry("Foo", "1.0.0", "old.dpk"), {
            let mut stale = entry("Foo", "2.0.0", "new.dpk");
            stale.derived.is_latest_version = true;
            stale.derived.is_absolute_latest_version = true;
            stale
        }];
        // Stale flags from a cached row must not survive when a newer
        // version exists elsewhere.
        entries.push(entry("Foo", "3.0.0", "newest.dpk"));
        assign_latest_flags(&mut entries);
        assert_eq!(flags(&entries, "new.dpk"), (false, false));
        assert_eq!(flags(&entries, "newest.dpk"), (true, true));
    }
}
