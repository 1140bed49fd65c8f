//! Persisted metadata store for the depot package server.
//!
//! The store keeps one row per archive file: the parsed manifest plus the
//! derived metadata the cache computed for it. It exists so repeated
//! rebuilds do not re-parse or re-hash unchanged files. The package folder
//! stays the source of truth; the store is self-provisioning and
//! self-repairing, so a damaged database costs one rebuild, not an outage.

pub mod error;
pub mod models;
pub mod store;

pub use error::{Result, StoreError};
pub use models::{DerivedMetadata, StoredPackage};
pub use store::PackageStore;
