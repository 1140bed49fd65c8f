use miette::Diagnostic;
use thiserror::Error;

/// Errors from the metadata store.
///
/// Any of these makes the store unusable for the current rebuild; the
/// builder responds by repairing the store once and retrying before
/// giving up.
#[derive(Error, Diagnostic, Debug)]
pub enum StoreError {
    #[error("Database operation failed: {0}")]
    #[diagnostic(
        code(depot_store::database),
        help("The metadata store is repaired and rebuilt automatically on the next pass")
    )]
    Sqlite(#[from] rusqlite::Error),

    #[error("Stored metadata could not be decoded: {0}")]
    #[diagnostic(
        code(depot_store::corrupt_row),
        help("The metadata store is repaired and rebuilt automatically on the next pass")
    )]
    CorruptRow(#[from] serde_json::Error),

    #[error("Error while {action}: {source}")]
    #[diagnostic(code(depot_store::io))]
    IoError {
        action: String,
        source: std::io::Error,
    },

    #[error("Thread lock poison error")]
    #[diagnostic(
        code(depot_store::poison),
        help("This is an internal error, please report it")
    )]
    PoisonError,
}

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Self::PoisonError
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
