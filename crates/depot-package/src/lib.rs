//! Package model and archive reader for the depot package server.
//!
//! A depot package is a zip archive with a `manifest.json` entry declaring
//! its identity, version, dependencies, and supported framework targets.
//! This crate owns the manifest model and the reader that extracts it; the
//! cache layers in `depot-core` never touch archive internals themselves.

pub mod error;
pub mod manifest;
pub mod reader;

pub use error::{PackageError, Result};
pub use manifest::{
    package_file_name, Dependency, DependencyGroup, PackageManifest, ARCHIVE_EXTENSION,
};
pub use reader::{read_manifest_bytes, read_package, MANIFEST_NAME};
