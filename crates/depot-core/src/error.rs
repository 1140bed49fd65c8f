//! Error types for depot-core.

use depot_package::PackageError;
use depot_store::StoreError;
use depot_utils::error::FileSystemError;
use miette::Diagnostic;
use thiserror::Error;

/// Core error type for the package cache.
#[derive(Error, Diagnostic, Debug)]
pub enum CoreError {
    #[error("Package `{file_name}` already exists")]
    #[diagnostic(
        code(depot_core::already_exists),
        help("Enable `allow_overwrite_on_push` to replace existing archives")
    )]
    AlreadyExists { file_name: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Package(#[from] PackageError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(code(depot_core::filesystem))]
    FileSystem(#[from] FileSystemError),

    #[error("Invalid file filter pattern: {0}")]
    #[diagnostic(
        code(depot_core::file_filter),
        help("Check the `file_filter` regex in your settings")
    )]
    FilterPattern(#[from] regex::Error),

    #[error("Failed to start worker pool: {0}")]
    #[diagnostic(code(depot_core::worker_pool))]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Failed to watch package folder: {0}")]
    #[diagnostic(code(depot_core::watch))]
    Watch(#[from] notify::Error),

    #[error("Thread lock poison error")]
    #[diagnostic(
        code(depot_core::poison),
        help("This is an internal error, please report it")
    )]
    PoisonError,
}

impl<T> From<std::sync::PoisonError<T>> for CoreError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Self::PoisonError
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
