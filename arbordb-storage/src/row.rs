//! Row representations. The scan and hook paths treat a row as the
//! capability set {row_type, hkey, field(i)}; the concrete layouts are
//! a tagged variant rather than an inheritance chain.

use crate::hkey::HKey;
use crate::rowtype::RowType;
use arbordb_datatype::Const;
use arbordb_expr::FieldSource;

#[derive(Debug, Clone)]
pub enum Row {
    /// A stored row materialized from the group space.
    Store(StoreRow),
    /// A re-typed view over a backing row; fields and hKey identity
    /// are the backing row's.
    Overlay(OverlayRow),
    /// A row computed by a schema-evolution projection, carrying a
    /// fresh hKey derived from the new primary key.
    Projected(ProjectedRow),
    /// A flattened branch row emitted by a group-index build plan.
    Flattened(FlattenedRow),
}

impl Row {
    #[inline]
    pub fn row_type(&self) -> &RowType {
        match self {
            Row::Store(r) => &r.row_type,
            Row::Overlay(r) => &r.row_type,
            Row::Projected(r) => &r.row_type,
            Row::Flattened(r) => &r.row_type,
        }
    }

    #[inline]
    pub fn hkey(&self) -> &HKey {
        match self {
            Row::Store(r) => &r.hkey,
            Row::Overlay(r) => r.base.hkey(),
            Row::Projected(r) => &r.hkey,
            Row::Flattened(r) => &r.hkey,
        }
    }

    /// Materializes all fields in position order.
    pub fn to_fields(&self) -> Vec<Const> {
        (0..self.row_type().field_count())
            .map(|i| self.field(i))
            .collect()
    }
}

impl FieldSource for Row {
    #[inline]
    fn field(&self, idx: usize) -> Const {
        match self {
            Row::Store(r) => r.fields[idx].clone(),
            Row::Overlay(r) => r.base.field(idx),
            Row::Projected(r) => r.fields[idx].clone(),
            Row::Flattened(r) => r.fields[idx].clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreRow {
    pub row_type: RowType,
    pub hkey: HKey,
    pub fields: Vec<Const>,
}

impl StoreRow {
    #[inline]
    pub fn new(row_type: RowType, hkey: HKey, fields: Vec<Const>) -> Self {
        StoreRow {
            row_type,
            hkey,
            fields,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OverlayRow {
    pub row_type: RowType,
    pub base: Box<Row>,
}

impl OverlayRow {
    #[inline]
    pub fn new(base: Row, row_type: RowType) -> Self {
        OverlayRow {
            row_type,
            base: Box::new(base),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProjectedRow {
    pub row_type: RowType,
    pub hkey: HKey,
    pub fields: Vec<Const>,
}

impl ProjectedRow {
    #[inline]
    pub fn new(row_type: RowType, hkey: HKey, fields: Vec<Const>) -> Self {
        ProjectedRow {
            row_type,
            hkey,
            fields,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FlattenedRow {
    pub row_type: RowType,
    /// hKey of the leaf row the branch was flattened around.
    pub hkey: HKey,
    pub fields: Vec<Const>,
}

impl FlattenedRow {
    #[inline]
    pub fn new(row_type: RowType, hkey: HKey, fields: Vec<Const>) -> Self {
        FlattenedRow {
            row_type,
            hkey,
            fields,
        }
    }
}
