use arbordb_datatype::PreciseType;
use semistr::SemiStr;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("No cast from {0:?} to {1:?}")]
    CastNotFound(PreciseType, PreciseType),
    #[error("Scalar function '{0}' not found")]
    ScalarNotFound(SemiStr),
    #[error("Sequence not exists")]
    SequenceNotExists,
    #[error("Numeric value out of range")]
    NumericOutOfRange,
    #[error("{0}")]
    DataType(#[from] arbordb_datatype::error::Error),
}
