//! Package cache and index for the depot package server.
//!
//! This crate owns the part of the server with real coordination in it:
//! the in-memory index over a folder of package archives, the single-flight
//! rebuild that produces it, the persisted metadata store reconciliation,
//! and the filesystem watch that invalidates the index when external
//! writers touch the folder.
//!
//! The entry point is [`ServerRepository`]. Query and transport layers sit
//! on top of it; archive parsing and hashing live in the leaf crates.

mod builder;
mod cache;
pub mod error;
pub mod index;
mod repository;
mod watcher;

pub use error::{CoreError, Result};
pub use index::{IndexEntry, PackageIndex};
pub use repository::ServerRepository;

pub use depot_config::Settings;
pub use depot_package::{PackageManifest, ARCHIVE_EXTENSION};
pub use depot_store::{DerivedMetadata, PackageStore};
