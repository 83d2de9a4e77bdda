//! Niladic scalar functions usable as column defaults,
//! e.g. `CURRENT_TIMESTAMP`.

use crate::error::{Error, Result};
use crate::EvalContext;
use arbordb_datatype::{Const, PreciseType};
use semistr::SemiStr;
use std::collections::HashMap;

pub type ScalarEvalFn = fn(&dyn EvalContext, &[Const]) -> Result<Const>;

/// A resolved scalar overload: fixed result type plus evaluator.
#[derive(Clone)]
pub struct ScalarFn {
    pub name: SemiStr,
    pub ret: PreciseType,
    pub eval: ScalarEvalFn,
}

impl std::fmt::Debug for ScalarFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScalarFn")
            .field("name", &self.name)
            .field("ret", &self.ret)
            .finish()
    }
}

#[derive(Default)]
pub struct ScalarRegistry {
    funcs: HashMap<SemiStr, ScalarFn>,
}

impl ScalarRegistry {
    pub fn with_builtins() -> Self {
        let mut reg = ScalarRegistry::default();
        reg.register(ScalarFn {
            name: SemiStr::new("current_timestamp"),
            ret: PreciseType::datetime(0),
            eval: |ctx, _args| Ok(Const::Datetime(ctx.now())),
        });
        reg.register(ScalarFn {
            name: SemiStr::new("current_date"),
            ret: PreciseType::datetime(0),
            eval: |ctx, _args| {
                let now = ctx.now();
                Ok(Const::Datetime(now.replace_time(time::Time::MIDNIGHT)))
            },
        });
        reg
    }

    #[inline]
    pub fn register(&mut self, func: ScalarFn) {
        self.funcs.insert(func.name.clone(), func);
    }

    /// Resolves an overload by name and argument types. Only niladic
    /// overloads exist today, so the argument list must be empty.
    pub fn resolve(&self, name: &str, args: &[PreciseType]) -> Result<&ScalarFn> {
        if !args.is_empty() {
            return Err(Error::ScalarNotFound(SemiStr::new(name)));
        }
        self.funcs
            .get(name)
            .ok_or_else(|| Error::ScalarNotFound(SemiStr::new(name)))
    }
}
