use crate::Datetime;
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Const is the owned runtime value of a single field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Const {
    Null,
    Bool(bool),
    I64(i64),
    U64(u64),
    F64(ValidF64),
    Str(Arc<str>),
    Bytes(Arc<[u8]>),
    Datetime(Datetime),
}

impl Const {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Const::Null)
    }

    #[inline]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Const::I64(i) => Some(*i),
            _ => None,
        }
    }

    #[inline]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Const::U64(u) => Some(*u),
            _ => None,
        }
    }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Const::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i64> for Const {
    #[inline]
    fn from(value: i64) -> Self {
        Const::I64(value)
    }
}

impl From<u64> for Const {
    #[inline]
    fn from(value: u64) -> Self {
        Const::U64(value)
    }
}

impl From<bool> for Const {
    #[inline]
    fn from(value: bool) -> Self {
        Const::Bool(value)
    }
}

impl From<&str> for Const {
    #[inline]
    fn from(value: &str) -> Self {
        Const::Str(Arc::from(value))
    }
}

/// ValidF64 is a finite, non-NaN f64, so equality and ordering are total.
#[derive(Debug, Clone, Copy)]
pub struct ValidF64(f64);

impl ValidF64 {
    /// Returns None for NaN and infinite input.
    #[inline]
    pub fn new(value: f64) -> Option<Self> {
        if value.is_finite() {
            Some(ValidF64(value))
        } else {
            None
        }
    }

    #[inline]
    pub fn value(&self) -> f64 {
        self.0
    }
}

impl PartialEq for ValidF64 {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for ValidF64 {}

impl PartialOrd for ValidF64 {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ValidF64 {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        // total because both sides are finite
        self.0.partial_cmp(&other.0).unwrap()
    }
}

impl Hash for ValidF64 {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state)
    }
}
