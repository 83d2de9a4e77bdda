use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("Invalid format")]
    InvalidFormat,
    #[error("Value out of range")]
    ValueOutOfRange,
    #[error("String too long for type of length {0}")]
    StringTooLong(u16),
    #[error("Invalid datetime literal")]
    InvalidDatetime,
    #[error("Null value in key position")]
    NullInKey,
}
