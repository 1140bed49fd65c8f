use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex},
};

use depot_package::PackageManifest;
use rusqlite::{params, Connection};
use tracing::debug;

use crate::{
    error::{Result, StoreError},
    models::{DerivedMetadata, StoredPackage},
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS packages (
    file_name TEXT PRIMARY KEY,
    manifest  TEXT NOT NULL,
    derived   TEXT NOT NULL
);
";

/// Persisted metadata store, keyed by archive file name.
///
/// The store is a cache, not the source of truth: the archives on disk
/// are. Rows let repeated rebuilds skip re-parsing and re-hashing
/// unchanged files; a corrupted store is dropped and recreated via
/// [`PackageStore::repair`] and repopulated by the next rebuild.
///
/// Clones share one connection, so hashing workers can upsert
/// concurrently; statement execution is serialized behind the lock.
#[derive(Clone)]
pub struct PackageStore {
    conn: Arc<Mutex<Connection>>,
}

impl PackageStore {
    /// Opens (and provisions, if missing) the store at the given path.
    ///
    /// Parent directories and the database file are created on first use,
    /// the schema is applied, and the journal is switched to WAL for
    /// concurrent-writer friendliness.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| StoreError::IoError {
                action: format!("creating store directory `{}`", parent.display()),
                source: err,
            })?;
        }
        let conn = Connection::open(path)?;
        let _: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory store. Useful for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Loads every persisted row.
    ///
    /// A row that fails to decode counts as corruption and surfaces as an
    /// error; the caller repairs the store rather than serving half a
    /// cache.
    pub fn get_all(&self) -> Result<HashMap<String, StoredPackage>> {
        let conn = self.conn.lock()?;
        let mut stmt = conn.prepare("SELECT file_name, manifest, derived FROM packages")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut packages = HashMap::new();
        for row in rows {
            let (file_name, manifest, derived) = row?;
            let manifest: PackageManifest = serde_json::from_str(&manifest)?;
            let derived: DerivedMetadata = serde_json::from_str(&derived)?;
            packages.insert(file_name, StoredPackage { manifest, derived });
        }
        Ok(packages)
    }

    /// Inserts or replaces the row for one archive file.
    pub fn upsert(
        &self,
        file_name: &str,
        manifest: &PackageManifest,
        derived: &DerivedMetadata,
    ) -> Result<()> {
        let manifest = serde_json::to_string(manifest)?;
        let derived = serde_json::to_string(derived)?;
        let conn = self.conn.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO packages (file_name, manifest, derived) VALUES (?1, ?2, ?3)",
            params![file_name, manifest, derived],
        )?;
        Ok(())
    }

    /// Deletes the rows for the given file names in one transaction.
    pub fn delete_many<S: AsRef<str>>(&self, file_names: &[S]) -> Result<()> {
        if file_names.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("DELETE FROM packages WHERE file_name = ?1")?;
            for file_name in file_names {
                stmt.execute(params![file_name.as_ref()])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Drops and recreates the schema.
    ///
    /// Recovery path for corruption or schema drift; every cached row is
    /// lost and the next rebuild repopulates the store from disk.
    pub fn repair(&self) -> Result<()> {
        debug!("repairing metadata store");
        let conn = self.conn.lock()?;
        conn.execute_batch("DROP TABLE IF EXISTS packages;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }
}

impl std::fmt::Debug for PackageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageStore").finish_non_exhaustive()
    }
}
