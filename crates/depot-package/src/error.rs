//! Error types for the package crate.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Errors that can occur while reading package archives.
///
/// The cache treats these in two classes: [`PackageError::RecoverableOpen`]
/// means the file could not be read right now (typically because an
/// external writer still holds it) and the file should be retried on the
/// next rebuild; every other variant is a fatal format error that must be
/// surfaced, since silently dropping a package would corrupt the
/// latest-version computation.
#[derive(Error, Diagnostic, Debug)]
pub enum PackageError {
    #[error("Could not open package `{}`: {source}", .path.display())]
    #[diagnostic(
        code(depot_package::recoverable_open),
        help("The file may still be uploading; it is retried on the next rebuild")
    )]
    RecoverableOpen {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Package `{}` is not a valid archive: {reason}", .path.display())]
    #[diagnostic(code(depot_package::invalid_archive))]
    InvalidArchive { path: PathBuf, reason: String },

    #[error("Package `{}` does not contain a `{}` entry", .path.display(), crate::reader::MANIFEST_NAME)]
    #[diagnostic(
        code(depot_package::missing_manifest),
        help("Every package archive must carry a manifest at its root")
    )]
    MissingManifest { path: PathBuf },

    #[error("Invalid manifest in `{}`: {source}", .path.display())]
    #[diagnostic(code(depot_package::invalid_manifest))]
    InvalidManifest {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid package id `{0}`")]
    #[diagnostic(
        code(depot_package::invalid_id),
        help("Package ids must be non-empty and free of path separators")
    )]
    InvalidId(String),
}

impl PackageError {
    /// Whether the error is a transient open failure that should be
    /// retried on the next rebuild instead of surfaced.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PackageError::RecoverableOpen { .. })
    }
}

/// A specialized Result type for package operations.
pub type Result<T> = std::result::Result<T, PackageError>;
