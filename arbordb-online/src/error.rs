use arbordb_catalog::{ChangeLevel, TableID};
use semistr::SemiStr;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("Empty change sets")]
    EmptyChangeSets,
    #[error("Mixed change levels")]
    MixedChangeLevels,
    #[error("Duplicate change set for table {0:?}")]
    DuplicateChangeSet(TableID),
    #[error("Operation requires a different change level, found {0:?}")]
    UnexpectedChangeLevel(ChangeLevel),
    #[error("Index '{0}' not found after resolution")]
    IndexNotFound(SemiStr),
    #[error("Dropped new column: {0}")]
    DroppedNewColumn(SemiStr),
    #[error("Column '{0}' has no position in the old table")]
    ProjectionColumnNotFound(SemiStr),
    #[error("No transform for table {0:?}")]
    TransformNotFound(TableID),
    #[error("{0}")]
    Storage(#[from] arbordb_storage::error::Error),
    #[error("{0}")]
    Expr(#[from] arbordb_expr::error::Error),
    #[error("{0}")]
    DataType(#[from] arbordb_datatype::error::Error),
    #[error("{0}")]
    Catalog(#[from] arbordb_catalog::error::Error),
}

impl Error {
    /// Whether the scan driver may recover from this error by
    /// rebinding to the last committed hKey.
    #[inline]
    pub fn is_rollback_class(&self) -> bool {
        matches!(self, Error::Storage(e) if e.is_rollback_class())
    }
}

/// Listener callbacks cross the store boundary with storage errors;
/// engine-only failures are wrapped, store failures pass through.
impl From<Error> for arbordb_storage::error::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Storage(e) => e,
            other => arbordb_storage::error::Error::OnlineDdl(other.to_string()),
        }
    }
}
