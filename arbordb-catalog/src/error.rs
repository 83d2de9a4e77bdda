use semistr::SemiStr;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("Table '{0}' already exists")]
    TableAlreadyExists(SemiStr),
    #[error("Table not exists")]
    TableNotExists,
    #[error("Column name '{0}' is not unique")]
    ColumnNameNotUnique(SemiStr),
    #[error("Column '{0}' not exists")]
    ColumnNotExists(SemiStr),
    #[error("Primary key column '{0}' not exists")]
    PrimaryKeyColumnNotExists(SemiStr),
    #[error("Join does not cover parent hkey column at position {0}")]
    HKeyUnderivable(usize),
    #[error("Tables of group index span multiple groups")]
    GroupIndexSpansGroups,
    #[error("Group index has no columns")]
    GroupIndexEmpty,
    #[error("Sequence not exists")]
    SequenceNotExists,
}
