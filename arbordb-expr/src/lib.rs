pub mod cast;
pub mod error;
pub mod func;

pub use cast::{CastFn, CastRegistry, TypeClass};
pub use func::{ScalarFn, ScalarRegistry};

use crate::error::Result;
use arbordb_catalog::SequenceID;
use arbordb_datatype::{Const, Datetime, PreciseType};

/// Anything that can produce field values by position: store rows,
/// overlay rows, projected rows.
pub trait FieldSource {
    fn field(&self, idx: usize) -> Const;
}

/// Environment a prepared expression evaluates in. Sequence access
/// goes through here so next-value expressions advance durably, and
/// the clock goes through here so defaults are deterministic in tests.
pub trait EvalContext {
    fn sequence_next(&self, seq: SequenceID) -> Result<i64>;

    fn now(&self) -> Datetime;
}

/// Resolves casts and scalar overloads. One registry is shared by all
/// sessions; both sub-registries are immutable after construction.
pub struct TypesRegistry {
    pub casts: CastRegistry,
    pub scalars: ScalarRegistry,
}

impl Default for TypesRegistry {
    #[inline]
    fn default() -> Self {
        TypesRegistry {
            casts: CastRegistry::with_builtins(),
            scalars: ScalarRegistry::with_builtins(),
        }
    }
}

/// A compiled scalar expression over a source row. These are built
/// once per schema change and evaluated once per migrated row.
#[derive(Debug, Clone)]
pub enum PreparedExpr {
    /// Pass-through of a source field.
    Field { idx: usize, pty: PreciseType },
    /// A typed constant.
    Literal { value: Const, pty: PreciseType },
    /// Cast of an inner expression to a new type. Null passes through
    /// without invoking the cast.
    Cast {
        input: Box<PreparedExpr>,
        func: CastFn,
        pty: PreciseType,
    },
    /// Next value of an identity generator.
    SequenceNext { seq: SequenceID, pty: PreciseType },
    /// Niladic or n-ary scalar call.
    Scalar {
        func: ScalarFn,
        args: Vec<PreparedExpr>,
        pty: PreciseType,
    },
}

impl PreparedExpr {
    #[inline]
    pub fn field(idx: usize, pty: PreciseType) -> Self {
        PreparedExpr::Field { idx, pty }
    }

    #[inline]
    pub fn literal(value: Const, pty: PreciseType) -> Self {
        PreparedExpr::Literal { value, pty }
    }

    #[inline]
    pub fn null_literal(pty: PreciseType) -> Self {
        PreparedExpr::Literal {
            value: Const::Null,
            pty,
        }
    }

    #[inline]
    pub fn cast(input: PreparedExpr, func: CastFn, pty: PreciseType) -> Self {
        PreparedExpr::Cast {
            input: Box::new(input),
            func,
            pty,
        }
    }

    #[inline]
    pub fn sequence_next(seq: SequenceID, pty: PreciseType) -> Self {
        PreparedExpr::SequenceNext { seq, pty }
    }

    #[inline]
    pub fn scalar(func: ScalarFn, args: Vec<PreparedExpr>, pty: PreciseType) -> Self {
        PreparedExpr::Scalar { func, args, pty }
    }

    /// Declared result type.
    #[inline]
    pub fn pty(&self) -> PreciseType {
        match self {
            PreparedExpr::Field { pty, .. }
            | PreparedExpr::Literal { pty, .. }
            | PreparedExpr::Cast { pty, .. }
            | PreparedExpr::SequenceNext { pty, .. }
            | PreparedExpr::Scalar { pty, .. } => *pty,
        }
    }

    pub fn eval(&self, ctx: &dyn EvalContext, source: &dyn FieldSource) -> Result<Const> {
        match self {
            PreparedExpr::Field { idx, .. } => Ok(source.field(*idx)),
            PreparedExpr::Literal { value, .. } => Ok(value.clone()),
            PreparedExpr::Cast { input, func, pty } => {
                let v = input.eval(ctx, source)?;
                if v.is_null() {
                    return Ok(Const::Null);
                }
                func(&v, *pty)
            }
            PreparedExpr::SequenceNext { seq, .. } => Ok(Const::I64(ctx.sequence_next(*seq)?)),
            PreparedExpr::Scalar { func, args, .. } => {
                let mut vals = Vec::with_capacity(args.len());
                for a in args {
                    vals.push(a.eval(ctx, source)?);
                }
                (func.eval)(ctx, &vals)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use arbordb_catalog::IdGen;
    use std::cell::Cell;
    use time::macros::datetime;

    /// Deterministic context for unit tests.
    pub(crate) struct FixedContext {
        next: Cell<i64>,
    }

    impl Default for FixedContext {
        fn default() -> Self {
            FixedContext { next: Cell::new(1) }
        }
    }

    impl EvalContext for FixedContext {
        fn sequence_next(&self, _seq: SequenceID) -> Result<i64> {
            let v = self.next.get();
            self.next.set(v + 1);
            Ok(v)
        }

        fn now(&self) -> Datetime {
            datetime!(2024-03-01 12:00:00)
        }
    }

    struct Fields(Vec<Const>);

    impl FieldSource for Fields {
        fn field(&self, idx: usize) -> Const {
            self.0[idx].clone()
        }
    }

    #[test]
    fn test_field_and_cast_eval() {
        let reg = TypesRegistry::default();
        let cast = reg
            .casts
            .resolve(PreciseType::i32(), PreciseType::i64())
            .unwrap();
        let expr = PreparedExpr::cast(
            PreparedExpr::field(0, PreciseType::i32()),
            cast,
            PreciseType::i64(),
        );
        let row = Fields(vec![Const::I64(2147483647)]);
        let ctx = FixedContext::default();
        assert_eq!(expr.eval(&ctx, &row).unwrap(), Const::I64(2147483647));
    }

    #[test]
    fn test_cast_null_passthrough() {
        let reg = TypesRegistry::default();
        let cast = reg
            .casts
            .resolve(PreciseType::varchar(8), PreciseType::i64())
            .unwrap();
        let expr = PreparedExpr::cast(
            PreparedExpr::field(0, PreciseType::varchar(8)),
            cast,
            PreciseType::i64(),
        );
        let row = Fields(vec![Const::Null]);
        let ctx = FixedContext::default();
        assert_eq!(expr.eval(&ctx, &row).unwrap(), Const::Null);
    }

    #[test]
    fn test_sequence_advances_per_eval() {
        let mut ids = IdGen::new();
        // sequence ids come from the shared generator in real use
        let seq = {
            let mut b = arbordb_catalog::AisBuilder::new(1, &mut ids);
            b.sequence(arbordb_catalog::SequenceSpec::new("s", 1, 1))
        };
        let expr = PreparedExpr::sequence_next(seq, PreciseType::i64());
        let row = Fields(vec![]);
        let ctx = FixedContext::default();
        assert_eq!(expr.eval(&ctx, &row).unwrap(), Const::I64(1));
        assert_eq!(expr.eval(&ctx, &row).unwrap(), Const::I64(2));
    }
}
