//! Cast resolution between type classes. A cast is looked up by the
//! (source class, target class) pair and receives the concrete target
//! type at evaluation time, so one entry covers e.g. all integer
//! widths.

use crate::error::{Error, Result};
use arbordb_datatype::{Const, PreciseType, ValidF64};
use std::collections::HashMap;
use std::sync::Arc;
use time::macros::format_description;

/// The coarse class of a precise type, the granularity at which casts
/// are registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeClass {
    Bool,
    Int,
    Uint,
    Float,
    Datetime,
    String,
}

impl TypeClass {
    #[inline]
    pub fn of(pty: PreciseType) -> Option<TypeClass> {
        match pty {
            PreciseType::Null => None,
            PreciseType::Bool => Some(TypeClass::Bool),
            PreciseType::Int(_, false) => Some(TypeClass::Int),
            PreciseType::Int(_, true) => Some(TypeClass::Uint),
            PreciseType::Float(_) => Some(TypeClass::Float),
            PreciseType::Datetime(_) => Some(TypeClass::Datetime),
            PreciseType::Char(_) | PreciseType::Varchar(_) => Some(TypeClass::String),
        }
    }
}

/// Converts a non-null value into the target type's domain.
pub type CastFn = fn(&Const, PreciseType) -> Result<Const>;

#[derive(Default)]
pub struct CastRegistry {
    casts: HashMap<(TypeClass, TypeClass), CastFn>,
}

impl CastRegistry {
    pub fn with_builtins() -> Self {
        let mut reg = CastRegistry::default();
        reg.register(TypeClass::Int, TypeClass::Int, cast_int_to_int);
        reg.register(TypeClass::Uint, TypeClass::Uint, cast_uint_to_uint);
        reg.register(TypeClass::Int, TypeClass::Uint, cast_int_to_uint);
        reg.register(TypeClass::Uint, TypeClass::Int, cast_uint_to_int);
        reg.register(TypeClass::Int, TypeClass::Float, cast_num_to_float);
        reg.register(TypeClass::Uint, TypeClass::Float, cast_num_to_float);
        reg.register(TypeClass::Float, TypeClass::Int, cast_float_to_int);
        reg.register(TypeClass::Bool, TypeClass::Int, cast_bool_to_int);
        reg.register(TypeClass::Int, TypeClass::Bool, cast_int_to_bool);
        reg.register(TypeClass::Int, TypeClass::String, cast_any_to_string);
        reg.register(TypeClass::Uint, TypeClass::String, cast_any_to_string);
        reg.register(TypeClass::Float, TypeClass::String, cast_any_to_string);
        reg.register(TypeClass::Datetime, TypeClass::String, cast_any_to_string);
        reg.register(TypeClass::String, TypeClass::Int, cast_string_via_parse);
        reg.register(TypeClass::String, TypeClass::Uint, cast_string_via_parse);
        reg.register(TypeClass::String, TypeClass::Float, cast_string_via_parse);
        reg.register(TypeClass::String, TypeClass::Datetime, cast_string_via_parse);
        reg.register(TypeClass::String, TypeClass::String, cast_string_to_string);
        reg
    }

    #[inline]
    pub fn register(&mut self, from: TypeClass, to: TypeClass, func: CastFn) {
        self.casts.insert((from, to), func);
    }

    /// Resolves a cast between two concrete types. Failure is a fatal
    /// schema-incompatibility for the caller.
    pub fn resolve(&self, from: PreciseType, to: PreciseType) -> Result<CastFn> {
        let key = match (TypeClass::of(from), TypeClass::of(to)) {
            (Some(f), Some(t)) => (f, t),
            _ => return Err(Error::CastNotFound(from, to)),
        };
        self.casts
            .get(&key)
            .copied()
            .ok_or(Error::CastNotFound(from, to))
    }
}

fn cast_int_to_int(value: &Const, target: PreciseType) -> Result<Const> {
    target.check_domain(value).map_err(|_| Error::NumericOutOfRange)?;
    Ok(value.clone())
}

fn cast_uint_to_uint(value: &Const, target: PreciseType) -> Result<Const> {
    target.check_domain(value).map_err(|_| Error::NumericOutOfRange)?;
    Ok(value.clone())
}

fn cast_int_to_uint(value: &Const, target: PreciseType) -> Result<Const> {
    match value {
        Const::I64(i) if *i >= 0 => {
            let v = Const::U64(*i as u64);
            target.check_domain(&v).map_err(|_| Error::NumericOutOfRange)?;
            Ok(v)
        }
        _ => Err(Error::NumericOutOfRange),
    }
}

fn cast_uint_to_int(value: &Const, target: PreciseType) -> Result<Const> {
    match value {
        Const::U64(u) if *u <= i64::MAX as u64 => {
            let v = Const::I64(*u as i64);
            target.check_domain(&v).map_err(|_| Error::NumericOutOfRange)?;
            Ok(v)
        }
        _ => Err(Error::NumericOutOfRange),
    }
}

fn cast_num_to_float(value: &Const, _target: PreciseType) -> Result<Const> {
    let f = match value {
        Const::I64(i) => *i as f64,
        Const::U64(u) => *u as f64,
        _ => return Err(Error::NumericOutOfRange),
    };
    ValidF64::new(f)
        .map(Const::F64)
        .ok_or(Error::NumericOutOfRange)
}

fn cast_float_to_int(value: &Const, target: PreciseType) -> Result<Const> {
    match value {
        Const::F64(f) => {
            let t = f.value().trunc();
            if t < i64::MIN as f64 || t > i64::MAX as f64 {
                return Err(Error::NumericOutOfRange);
            }
            let v = Const::I64(t as i64);
            target.check_domain(&v).map_err(|_| Error::NumericOutOfRange)?;
            Ok(v)
        }
        _ => Err(Error::NumericOutOfRange),
    }
}

fn cast_bool_to_int(value: &Const, _target: PreciseType) -> Result<Const> {
    match value {
        Const::Bool(b) => Ok(Const::I64(*b as i64)),
        _ => Err(Error::NumericOutOfRange),
    }
}

fn cast_int_to_bool(value: &Const, _target: PreciseType) -> Result<Const> {
    match value {
        Const::I64(i) => Ok(Const::Bool(*i != 0)),
        _ => Err(Error::NumericOutOfRange),
    }
}

fn cast_any_to_string(value: &Const, target: PreciseType) -> Result<Const> {
    let s = match value {
        Const::I64(i) => i.to_string(),
        Const::U64(u) => u.to_string(),
        Const::F64(f) => f.value().to_string(),
        Const::Datetime(ts) => {
            let fd = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
            ts.format(fd)
                .map_err(|_| arbordb_datatype::error::Error::InvalidDatetime)?
        }
        _ => return Err(Error::NumericOutOfRange),
    };
    let v = Const::Str(Arc::from(s.as_str()));
    target.check_domain(&v)?;
    Ok(v)
}

fn cast_string_via_parse(value: &Const, target: PreciseType) -> Result<Const> {
    match value {
        Const::Str(s) => Ok(target.const_from_str(s.trim())?),
        _ => Err(Error::NumericOutOfRange),
    }
}

fn cast_string_to_string(value: &Const, target: PreciseType) -> Result<Const> {
    target.check_domain(value)?;
    Ok(value.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_int_widening() {
        let reg = CastRegistry::with_builtins();
        let cast = reg.resolve(PreciseType::i32(), PreciseType::i64()).unwrap();
        assert_eq!(
            cast(&Const::I64(i32::MAX as i64), PreciseType::i64()).unwrap(),
            Const::I64(2147483647)
        );
    }

    #[test]
    fn test_narrowing_out_of_range() {
        let reg = CastRegistry::with_builtins();
        let cast = reg.resolve(PreciseType::i64(), PreciseType::i32()).unwrap();
        assert!(cast(&Const::I64(1 << 40), PreciseType::i32()).is_err());
    }

    #[test]
    fn test_unresolvable_cast() {
        let reg = CastRegistry::with_builtins();
        assert!(reg
            .resolve(PreciseType::datetime(0), PreciseType::bool())
            .is_err());
        assert!(reg.resolve(PreciseType::Null, PreciseType::i64()).is_err());
    }

    #[test]
    fn test_string_round_trips() {
        let reg = CastRegistry::with_builtins();
        let to_s = reg
            .resolve(PreciseType::i64(), PreciseType::varchar(20))
            .unwrap();
        assert_eq!(
            to_s(&Const::I64(-7), PreciseType::varchar(20)).unwrap(),
            Const::Str(Arc::from("-7"))
        );
        let from_s = reg
            .resolve(PreciseType::varchar(20), PreciseType::i64())
            .unwrap();
        assert_eq!(
            from_s(&Const::Str(Arc::from(" 42 ")), PreciseType::i64()).unwrap(),
            Const::I64(42)
        );
    }
}
