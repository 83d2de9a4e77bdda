use semistr::SemiStr;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("invalid state")]
    InvalidState,
    #[error("row not found")]
    RowNotFound,
    #[error("table not exists")]
    TableNotExists,
    #[error("index not exists")]
    IndexNotExists,
    #[error("no open transaction for session")]
    NoOpenTransaction,
    #[error("write conflict")]
    WriteConflict,
    #[error("transaction conflict, retry")]
    TxnConflict,
    #[error("DML during online DDL is not allowed by config")]
    NotAllowedByConfig,
    #[error("column '{column}' of table '{table}' must not be null")]
    NotNullViolation { table: SemiStr, column: SemiStr },
    #[error("online DDL failure: {0}")]
    OnlineDdl(String),
    #[error("{0}")]
    DataType(#[from] arbordb_datatype::error::Error),
    #[error("{0}")]
    Catalog(#[from] arbordb_catalog::error::Error),
    #[error("{0}")]
    Expr(#[from] arbordb_expr::error::Error),
}

impl Error {
    /// Rollback-class errors are recoverable at the scan-driver level
    /// by rebinding to the last committed hKey; everything else
    /// propagates.
    #[inline]
    pub fn is_rollback_class(&self) -> bool {
        matches!(self, Error::WriteConflict | Error::TxnConflict)
    }
}
