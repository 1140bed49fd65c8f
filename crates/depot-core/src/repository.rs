//! The public face of the package folder: a lazily built, self-invalidating
//! index over a directory of package archives.

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use depot_config::Settings;
use depot_package::{package_file_name, read_manifest_bytes};
use depot_store::PackageStore;
use depot_utils::fs::{FileSystemProvider, StandardFileSystemProvider};
use semver::Version;
use tracing::{debug, warn};

use crate::{
    builder::IndexBuilder,
    cache::{CacheCell, Claim},
    error::{CoreError, Result},
    index::{IndexEntry, PackageIndex},
    watcher::{watch_root, WatchGuard},
};

/// Default location of the metadata store, relative to the package root.
const DEFAULT_STORE_PATH: &str = ".depot/cache.db";

enum WatchState {
    Detached,
    Attached(#[allow(dead_code)] WatchGuard),
    Failed,
}

/// A folder of package archives served as a consistent, queryable index.
///
/// The first reader after startup (or after any invalidation) pays for a
/// full rebuild; concurrent readers share that one rebuild. Pushing or
/// removing a package mutates the folder under the cache's coordination
/// lock and invalidates the index, and a filesystem watch catches changes
/// made by external writers.
pub struct ServerRepository {
    fs: Arc<StandardFileSystemProvider>,
    store: PackageStore,
    settings: Settings,
    cell: Arc<CacheCell>,
    builder: IndexBuilder<StandardFileSystemProvider>,
    watch: Mutex<WatchState>,
    rebuilds: AtomicU64,
}

impl ServerRepository {
    /// Opens the repository over `root`, provisioning the metadata store
    /// at its configured (or default) location.
    pub fn new<P: AsRef<Path>>(root: P, settings: Settings) -> Result<Self> {
        let root = root.as_ref();
        let store_path = match settings.store_path() {
            Some(path) => {
                let path = PathBuf::from(path);
                if path.is_absolute() {
                    path
                } else {
                    root.join(path)
                }
            }
            None => root.join(DEFAULT_STORE_PATH),
        };
        let store = PackageStore::open(store_path)?;
        Self::with_store(root, store, settings)
    }

    /// Opens the repository with an injected metadata store.
    pub fn with_store<P: AsRef<Path>>(
        root: P,
        store: PackageStore,
        settings: Settings,
    ) -> Result<Self> {
        let fs = Arc::new(StandardFileSystemProvider::new(root)?);
        let builder = IndexBuilder::new(fs.clone(), store.clone(), settings.clone());
        Ok(Self {
            fs,
            store,
            settings,
            cell: Arc::new(CacheCell::new()),
            builder,
            watch: Mutex::new(WatchState::Detached),
            rebuilds: AtomicU64::new(0),
        })
    }

    /// The folder this repository serves.
    pub fn root(&self) -> &Path {
        self.fs.root()
    }

    /// Returns the current index, building it if absent.
    ///
    /// Guarantees at most one concurrent rebuild: callers that arrive
    /// while a rebuild is in flight wait for and receive that rebuild's
    /// result. A failed rebuild surfaces its error to the caller that ran
    /// it; the next caller retries.
    pub fn index(&self) -> Result<Arc<PackageIndex>> {
        match self.cell.claim()? {
            Claim::Ready(index) => Ok(index),
            Claim::Build => {
                self.attach_watcher();
                self.rebuilds.fetch_add(1, Ordering::Relaxed);
                match self.build_with_repair() {
                    Ok(index) => {
                        let index = Arc::new(index);
                        self.cell.publish(index.clone())?;
                        Ok(index)
                    }
                    Err(err) => {
                        self.cell.abandon()?;
                        Err(err)
                    }
                }
            }
        }
    }

    /// Discards the current index; the next [`index`](Self::index) call
    /// rebuilds. Idempotent and non-blocking.
    pub fn invalidate(&self) {
        debug!("package index invalidated");
        self.cell.invalidate();
    }

    /// Adds an uploaded archive to the folder.
    ///
    /// The archive is named `<id>.<version>.dpk` from its own manifest.
    /// Fails with [`CoreError::AlreadyExists`] when the target file exists
    /// and overwriting is disallowed; in that case the folder and the
    /// cache are left untouched.
    ///
    /// Returns the file name given to the archive.
    pub fn add_package(&self, bytes: &[u8]) -> Result<String> {
        let manifest = read_manifest_bytes(bytes)?;
        let file_name = package_file_name(&manifest.id, &manifest.version);
        debug!(file = %file_name, "adding package");
        let allow_overwrite = self.settings.allow_overwrite_on_push();
        self.cell.mutate(false, || {
            if self.fs.file_exists(&file_name) && !allow_overwrite {
                return Err(CoreError::AlreadyExists {
                    file_name: file_name.clone(),
                });
            }
            self.fs.add_file(&file_name, bytes)?;
            Ok(file_name.clone())
        })
    }

    /// Removes (or, with delisting enabled, hides) a package.
    ///
    /// Returns `false` when no such package is indexed. The cache is
    /// invalidated even when the underlying filesystem operation fails
    /// partway, so the next rebuild re-derives truth from disk.
    pub fn remove_package(&self, id: &str, version: &Version) -> Result<bool> {
        let index = self.index()?;
        let Some(entry) = index.find_by_id_and_version(id, version) else {
            return Ok(false);
        };
        let relative = entry.derived.path.clone();
        let delist = self.settings.enable_delisting();
        debug!(file = %relative, delist, "removing package");
        self.cell.mutate(true, || {
            if delist {
                // Keep the archive and its computed hash; just hide it.
                self.fs.set_hidden(&relative, true)?;
            } else {
                self.fs.delete_file(&relative)?;
            }
            Ok(true)
        })
    }

    /// The full materialized view, for query layers on top.
    pub fn all_packages(&self) -> Result<Vec<IndexEntry>> {
        Ok(self.index()?.all().cloned().collect())
    }

    /// Every indexed version of a package id (case-insensitive).
    pub fn find_by_id(&self, id: &str) -> Result<Vec<IndexEntry>> {
        Ok(self
            .index()?
            .find_by_id(id)
            .into_iter()
            .cloned()
            .collect())
    }

    /// One exact package, or `None`. A lookup miss is not an error.
    pub fn find_by_id_and_version(
        &self,
        id: &str,
        version: &Version,
    ) -> Result<Option<IndexEntry>> {
        Ok(self.index()?.find_by_id_and_version(id, version).cloned())
    }

    /// Number of rebuilds executed so far.
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds.load(Ordering::Relaxed)
    }

    /// Runs the builder, repairing the store and retrying once if the
    /// store itself failed. A second store failure is fatal.
    fn build_with_repair(&self) -> Result<PackageIndex> {
        match self.builder.build() {
            Err(CoreError::Store(err)) => {
                warn!(error = %err, "metadata store failed; repairing and retrying the rebuild");
                self.store.repair()?;
                self.builder.build()
            }
            result => result,
        }
    }

    /// Attaches the filesystem watch the first time an index is built.
    /// The watch stays attached for the repository's lifetime; a failed
    /// attach is logged and not retried.
    fn attach_watcher(&self) {
        let Ok(mut watch) = self.watch.lock() else {
            return;
        };
        if matches!(*watch, WatchState::Detached) {
            match watch_root(self.fs.root(), self.cell.clone()) {
                Ok(guard) => *watch = WatchState::Attached(guard),
                Err(err) => {
                    warn!(error = %err, "could not watch the package folder; external changes need an explicit invalidate");
                    *watch = WatchState::Failed;
                }
            }
        }
    }
}

impl std::fmt::Debug for ServerRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerRepository")
            .field("root", &self.fs.root())
            .field("rebuilds", &self.rebuilds)
            .finish_non_exhaustive()
    }
}
