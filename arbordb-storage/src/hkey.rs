//! hKeys: the lexicographically ordered byte keys that place a row
//! within its group. A row's hKey concatenates (ordinal, primary key
//! values) per ancestor segment, each value in memory-comparable
//! format, so byte order equals group order and a parent's hKey is a
//! strict prefix of its descendants' hKeys.

use crate::error::Result;
use arbordb_catalog::Table;
use arbordb_datatype::memcmp;
use arbordb_expr::FieldSource;
use smallvec::SmallVec;
use std::fmt;

#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HKey(SmallVec<[u8; 24]>);

impl HKey {
    #[inline]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        HKey(SmallVec::from_slice(bytes))
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[inline]
    pub fn starts_with(&self, prefix: &HKey) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Builds the hKey of a row of `table` from the row's own fields,
    /// using the table's precomputed segments. Fails on null key
    /// fields.
    pub fn for_table_row(table: &Table, source: &dyn FieldSource) -> Result<HKey> {
        let mut buf = Vec::with_capacity(24);
        for seg in &table.hkey_segments {
            memcmp::attach_ordinal(&mut buf, seg.ordinal);
            for &col in &seg.source_cols {
                memcmp::attach_key_const(&mut buf, &source.field(col))?;
            }
        }
        Ok(HKey(SmallVec::from_vec(buf)))
    }

    /// The hKey of the row's ancestor at the given depth (0 = group
    /// root), derived from the same fields.
    pub fn for_ancestor(table: &Table, source: &dyn FieldSource, depth: u8) -> Result<HKey> {
        let mut buf = Vec::with_capacity(24);
        for seg in table.hkey_segments.iter().take(depth as usize + 1) {
            memcmp::attach_ordinal(&mut buf, seg.ordinal);
            for &col in &seg.source_cols {
                memcmp::attach_key_const(&mut buf, &source.field(col))?;
            }
        }
        Ok(HKey(SmallVec::from_vec(buf)))
    }
}

impl fmt::Debug for HKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HKey(")?;
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbordb_catalog::{AisBuilder, ColumnSpec, IdGen, TableSpec};
    use arbordb_datatype::{Const, PreciseType};

    struct Fields(Vec<Const>);

    impl FieldSource for Fields {
        fn field(&self, idx: usize) -> Const {
            self.0[idx].clone()
        }
    }

    #[test]
    fn test_parent_prefix_of_child() {
        let mut ids = IdGen::new();
        let mut b = AisBuilder::new(1, &mut ids);
        let parent = b
            .table(
                TableSpec::new("p")
                    .column(ColumnSpec::new("a", PreciseType::i64()).not_null())
                    .pk(&["a"]),
            )
            .unwrap();
        let child = b
            .table(
                TableSpec::new("c")
                    .column(ColumnSpec::new("x", PreciseType::i64()).not_null())
                    .column(ColumnSpec::new("pa", PreciseType::i64()).not_null())
                    .pk(&["x"])
                    .child_of(parent, &[("pa", "a")]),
            )
            .unwrap();
        let ais = b.finish();
        let pk = HKey::for_table_row(
            ais.table(parent).unwrap(),
            &Fields(vec![Const::I64(7)]),
        )
        .unwrap();
        let ck = HKey::for_table_row(
            ais.table(child).unwrap(),
            &Fields(vec![Const::I64(3), Const::I64(7)]),
        )
        .unwrap();
        assert!(ck.starts_with(&pk));
        assert!(pk < ck);
        // ancestor hkey derived from the child's own fields matches
        let anc = HKey::for_ancestor(
            ais.table(child).unwrap(),
            &Fields(vec![Const::I64(3), Const::I64(7)]),
            0,
        )
        .unwrap();
        assert_eq!(anc, pk);
    }

    #[test]
    fn test_order_follows_pk() {
        let mut ids = IdGen::new();
        let mut b = AisBuilder::new(1, &mut ids);
        let t = b
            .table(
                TableSpec::new("t")
                    .column(ColumnSpec::new("a", PreciseType::i64()).not_null())
                    .pk(&["a"]),
            )
            .unwrap();
        let ais = b.finish();
        let table = ais.table(t).unwrap();
        let mut keys: Vec<_> = [-5i64, 0, 3, 100]
            .iter()
            .map(|v| HKey::for_table_row(table, &Fields(vec![Const::I64(*v)])).unwrap())
            .collect();
        let sorted = keys.clone();
        keys.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn test_null_key_rejected() {
        let mut ids = IdGen::new();
        let mut b = AisBuilder::new(1, &mut ids);
        let t = b
            .table(
                TableSpec::new("t")
                    .column(ColumnSpec::new("a", PreciseType::i64()))
                    .pk(&["a"]),
            )
            .unwrap();
        let ais = b.finish();
        let res = HKey::for_table_row(ais.table(t).unwrap(), &Fields(vec![Const::Null]));
        assert!(res.is_err());
    }
}
