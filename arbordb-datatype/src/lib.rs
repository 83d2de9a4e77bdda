pub mod error;
pub mod konst;
pub mod memcmp;

pub use konst::{Const, ValidF64};

use crate::error::{Error, Result};
use std::sync::Arc;
use time::macros::format_description;

pub use time::PrimitiveDateTime as Datetime;
pub use time::{Date, Time};

/// PreciseType describes the storage type of a column value.
/// Nullability is a column property, not a type property, so two
/// columns differing only in nullability share the same PreciseType.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PreciseType {
    /// Only constant null has null type.
    Null,
    Bool,
    /// Integer type: byte width and unsigned flag.
    Int(u8, bool),
    Float(u8),
    /// Datetime with fractional second precision.
    Datetime(u8),
    /// Note: Char and Varchar length is character count, not bytes.
    Char(u16),
    Varchar(u16),
}

impl PreciseType {
    #[inline]
    pub fn null() -> Self {
        PreciseType::Null
    }

    #[inline]
    pub fn bool() -> Self {
        PreciseType::Bool
    }

    #[inline]
    pub fn int(bytes: u8, unsigned: bool) -> Self {
        PreciseType::Int(bytes, unsigned)
    }

    #[inline]
    pub fn i32() -> Self {
        PreciseType::Int(4, false)
    }

    #[inline]
    pub fn u32() -> Self {
        PreciseType::Int(4, true)
    }

    #[inline]
    pub fn i64() -> Self {
        PreciseType::Int(8, false)
    }

    #[inline]
    pub fn u64() -> Self {
        PreciseType::Int(8, true)
    }

    #[inline]
    pub fn f64() -> Self {
        PreciseType::Float(8)
    }

    #[inline]
    pub fn datetime(frac: u8) -> Self {
        PreciseType::Datetime(frac)
    }

    #[inline]
    pub fn char(len: u16) -> Self {
        PreciseType::Char(len)
    }

    #[inline]
    pub fn varchar(max_len: u16) -> Self {
        PreciseType::Varchar(max_len)
    }

    #[inline]
    pub fn is_int(&self) -> bool {
        matches!(self, PreciseType::Int(..))
    }

    #[inline]
    pub fn is_string(&self) -> bool {
        matches!(self, PreciseType::Char(_) | PreciseType::Varchar(_))
    }

    /// Signed integer range of given byte width.
    #[inline]
    fn int_range(bytes: u8) -> (i64, i64) {
        match bytes {
            1 => (i8::MIN as i64, i8::MAX as i64),
            2 => (i16::MIN as i64, i16::MAX as i64),
            4 => (i32::MIN as i64, i32::MAX as i64),
            _ => (i64::MIN, i64::MAX),
        }
    }

    #[inline]
    fn uint_max(bytes: u8) -> u64 {
        match bytes {
            1 => u8::MAX as u64,
            2 => u16::MAX as u64,
            4 => u32::MAX as u64,
            _ => u64::MAX,
        }
    }

    /// Checks that a constant value lies within the domain of this type.
    /// Null is accepted here; nullability is enforced by the caller.
    pub fn check_domain(&self, value: &Const) -> Result<()> {
        match (self, value) {
            (_, Const::Null) => Ok(()),
            (PreciseType::Bool, Const::Bool(_)) => Ok(()),
            (PreciseType::Int(bytes, false), Const::I64(i)) => {
                let (min, max) = Self::int_range(*bytes);
                if *i < min || *i > max {
                    return Err(Error::ValueOutOfRange);
                }
                Ok(())
            }
            (PreciseType::Int(bytes, true), Const::U64(u)) => {
                if *u > Self::uint_max(*bytes) {
                    return Err(Error::ValueOutOfRange);
                }
                Ok(())
            }
            (PreciseType::Float(_), Const::F64(_)) => Ok(()),
            (PreciseType::Datetime(_), Const::Datetime(_)) => Ok(()),
            (PreciseType::Char(len), Const::Str(s))
            | (PreciseType::Varchar(len), Const::Str(s)) => {
                if s.chars().count() > *len as usize {
                    return Err(Error::StringTooLong(*len));
                }
                Ok(())
            }
            (PreciseType::Varchar(_), Const::Bytes(_)) => Ok(()),
            _ => Err(Error::InvalidFormat),
        }
    }

    /// Parses a literal string into a typed constant of this type.
    /// Used for column default literals in schema evolution.
    pub fn const_from_str(&self, s: &str) -> Result<Const> {
        let value = match self {
            PreciseType::Null => Const::Null,
            PreciseType::Bool => match s {
                "true" | "TRUE" | "1" => Const::Bool(true),
                "false" | "FALSE" | "0" => Const::Bool(false),
                _ => return Err(Error::InvalidFormat),
            },
            PreciseType::Int(_, false) => {
                Const::I64(s.parse::<i64>().map_err(|_| Error::InvalidFormat)?)
            }
            PreciseType::Int(_, true) => {
                Const::U64(s.parse::<u64>().map_err(|_| Error::InvalidFormat)?)
            }
            PreciseType::Float(_) => {
                let f = s.parse::<f64>().map_err(|_| Error::InvalidFormat)?;
                Const::F64(ValidF64::new(f).ok_or(Error::InvalidFormat)?)
            }
            PreciseType::Datetime(_) => {
                let fd = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
                let ts = Datetime::parse(s, fd).map_err(|_| Error::InvalidDatetime)?;
                Const::Datetime(ts)
            }
            PreciseType::Char(_) | PreciseType::Varchar(_) => Const::Str(Arc::from(s)),
        };
        self.check_domain(&value)?;
        Ok(value)
    }
}
