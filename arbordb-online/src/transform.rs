//! Per-table transforms: how to maintain and populate the new
//! instance of a table while the old one is still live. Built once per
//! (old schema, new schema) pair and memoized on the old snapshot.

use crate::checker::{check_row_constraints, TableRowChecker};
use crate::classify;
use crate::error::{Error, Result};
use crate::tracker::HKeySaver;
use arbordb_catalog::{
    Ais, ChangeKind, ChangeLevel, ChangeSet, Column, GroupIndex, Table, TableID, TableIndex,
};
use arbordb_datatype::Const;
use arbordb_expr::{EvalContext, FieldSource, PreparedExpr, TypesRegistry};
use arbordb_storage::hkey::HKey;
use arbordb_storage::row::{OverlayRow, ProjectedRow, Row};
use arbordb_storage::rowtype::{RowType, SchemaRowTypes};
use arbordb_storage::store::OnlineState;
use std::collections::HashMap;
use std::sync::Arc;

/// A row type plus one scalar expression per new column, computing the
/// post-image fields from a pre-image row.
pub struct ProjectedRowType {
    pub row_type: RowType,
    pub exprs: Vec<PreparedExpr>,
}

/// How to maintain/populate the new instance of one table.
pub struct TableTransform {
    pub change_level: ChangeLevel,
    /// Target for concurrently handled DML.
    pub hkey_saver: HKeySaver,
    /// New row type for the table.
    pub row_type: RowType,
    /// Present iff rows need projecting into a new shape.
    pub projected_row_type: Option<ProjectedRowType>,
    /// Present iff rows only need verifying.
    pub row_checker: Option<TableRowChecker>,
    /// Table indexes to build (possibly empty).
    pub table_indexes: Vec<TableIndex>,
    /// Group indexes to build; only populated on the transform of the
    /// index's leaf-most table.
    pub group_indexes: Vec<GroupIndex>,
}

/// Table id -> transform, for every table under online change.
#[derive(Default)]
pub struct TransformCache {
    map: HashMap<TableID, Arc<TableTransform>>,
}

impl TransformCache {
    #[inline]
    pub fn get(&self, table: TableID) -> Option<&Arc<TableTransform>> {
        self.map.get(&table)
    }
}

/// Cache-slot value memoized on the old AIS: either the transforms or
/// the build failure, replayed to every caller.
pub(crate) struct CachedTransforms(pub Result<Arc<TransformCache>>);

pub(crate) fn build_transform_cache(
    states: &[OnlineState],
    old_ais: &Arc<Ais>,
    registry: &TypesRegistry,
) -> Result<Arc<TransformCache>> {
    let mut cache = TransformCache::default();
    for state in states {
        let level = classify::common_change_level(&state.change_sets)?;
        let row_types = SchemaRowTypes::of(&state.ais);
        for cs in &state.change_sets {
            let row_type = row_types
                .table_row_type(cs.table_id)
                .cloned()
                .ok_or(arbordb_storage::error::Error::TableNotExists)?;
            let transform =
                build_table_transform(cs, level, old_ais, &state.ais, row_type, registry)?;
            let prev = cache.map.insert(cs.table_id, Arc::new(transform));
            debug_assert!(prev.is_none());
        }
    }
    Ok(Arc::new(cache))
}

fn build_table_transform(
    change_set: &ChangeSet,
    change_level: ChangeLevel,
    old_ais: &Ais,
    new_ais: &Ais,
    row_type: RowType,
    registry: &TypesRegistry,
) -> Result<TableTransform> {
    let new_table = row_type
        .table
        .clone()
        .ok_or(arbordb_storage::error::Error::TableNotExists)?;
    let table_indexes = find_table_indexes_to_build(change_set, &new_table)?;
    let group_indexes = find_group_indexes_to_build(change_set, &new_table, new_ais)?;
    let mut row_checker = None;
    let mut projected_row_type = None;
    match change_level {
        ChangeLevel::MetadataNotNull => {
            row_checker = Some(TableRowChecker::new(new_table.clone()));
        }
        ChangeLevel::Table | ChangeLevel::Group => {
            let old_table = old_ais
                .table(new_table.id)
                .ok_or(arbordb_storage::error::Error::TableNotExists)?;
            // Hidden PK changes are not part of the change list, so
            // the field count (including hidden PK) decides as well.
            if !change_set.column_changes.is_empty()
                || row_type.field_count() != old_table.field_count()
            {
                projected_row_type = Some(build_projected_row_type(
                    change_set,
                    old_table,
                    row_type.clone(),
                    registry,
                )?);
            }
        }
        ChangeLevel::Index => {}
    }
    Ok(TableTransform {
        change_level,
        hkey_saver: HKeySaver::new(change_set.table_id),
        row_type,
        projected_row_type,
        row_checker,
        table_indexes,
        group_indexes,
    })
}

/// All ADD or MODIFY table indexes from the change-set, resolved
/// against the new table.
fn find_table_indexes_to_build(
    change_set: &ChangeSet,
    new_table: &Table,
) -> Result<Vec<TableIndex>> {
    let mut indexes = vec![];
    for ic in &change_set.index_changes {
        if ic.index_kind != arbordb_catalog::IndexKind::Table {
            continue;
        }
        if matches!(ic.kind, ChangeKind::Add | ChangeKind::Modify) {
            let name = ic
                .new_name
                .as_ref()
                .ok_or_else(|| Error::IndexNotFound(semistr::SemiStr::new("")))?;
            let index = new_table
                .index(name)
                .filter(|i| !i.full_text)
                .ok_or_else(|| Error::IndexNotFound(name.clone()))?;
            indexes.push(index.clone());
        }
    }
    Ok(indexes)
}

/// All ADD or MODIFY group indexes from the change-set for which the
/// new table is the leaf-most participant. Non-leaf participants do
/// not carry the index, which keeps every index built and maintained
/// exactly once.
fn find_group_indexes_to_build(
    change_set: &ChangeSet,
    new_table: &Table,
    new_ais: &Ais,
) -> Result<Vec<GroupIndex>> {
    let mut indexes = vec![];
    for ic in &change_set.index_changes {
        if ic.index_kind != arbordb_catalog::IndexKind::Group {
            continue;
        }
        if matches!(ic.kind, ChangeKind::Add | ChangeKind::Modify) {
            let name = ic
                .new_name
                .as_ref()
                .ok_or_else(|| Error::IndexNotFound(semistr::SemiStr::new("")))?;
            let group = new_ais
                .group(new_table.group)
                .ok_or(arbordb_storage::error::Error::TableNotExists)?;
            let index = group
                .index(name)
                .ok_or_else(|| Error::IndexNotFound(name.clone()))?;
            if index.leafmost == new_table.id {
                indexes.push(index.clone());
            }
        }
    }
    Ok(indexes)
}

/// Finds the new column's position in the old table, or None when the
/// column has no old-side source and its value must be synthesized.
fn find_old_position(
    change_set: &ChangeSet,
    old_table: &Table,
    new_column: &Column,
) -> Result<Option<usize>> {
    for change in &change_set.column_changes {
        let names_new_column = change
            .new_name
            .as_ref()
            .map(|n| *n == new_column.name)
            .unwrap_or(false);
        if !names_new_column {
            continue;
        }
        return match change.kind {
            ChangeKind::Add => Ok(None),
            ChangeKind::Modify => {
                let old_name = change
                    .old_name
                    .as_ref()
                    .ok_or_else(|| Error::ProjectionColumnNotFound(new_column.name.clone()))?;
                let (pos, _) = old_table
                    .column(old_name)
                    .ok_or_else(|| Error::ProjectionColumnNotFound(new_column.name.clone()))?;
                Ok(Some(pos))
            }
            ChangeKind::Drop => Err(Error::DroppedNewColumn(new_column.name.clone())),
        };
    }
    match old_table.column(&new_column.name) {
        Some((pos, _)) => Ok(Some(pos)),
        None if new_column.is_hidden_pk() => Ok(None),
        // not in the change list, so it must be an original column
        None => Err(Error::ProjectionColumnNotFound(new_column.name.clone())),
    }
}

fn build_projected_row_type(
    change_set: &ChangeSet,
    old_table: &Table,
    row_type: RowType,
    registry: &TypesRegistry,
) -> Result<ProjectedRowType> {
    let new_table = row_type
        .table
        .clone()
        .ok_or(arbordb_storage::error::Error::TableNotExists)?;
    let mut exprs = Vec::with_capacity(new_table.columns.len());
    for new_col in &new_table.columns {
        match find_old_position(change_set, old_table, new_col)? {
            None => exprs.push(build_column_default(new_col, registry)?),
            Some(old_pos) => {
                let old_col = &old_table.columns[old_pos];
                let mut expr = PreparedExpr::field(old_pos, old_col.pty);
                // nullability lives on the column, so differing types
                // here are real representation changes
                if old_col.pty != new_col.pty {
                    let cast = registry.casts.resolve(old_col.pty, new_col.pty)?;
                    expr = PreparedExpr::cast(expr, cast, new_col.pty);
                }
                exprs.push(expr);
            }
        }
    }
    Ok(ProjectedRowType { row_type, exprs })
}

/// Synthesizes the value expression of a new column lacking an
/// old-side source: identity generator, default function, default
/// literal, or typed null.
fn build_column_default(column: &Column, registry: &TypesRegistry) -> Result<PreparedExpr> {
    if let Some(seq) = column.identity {
        return Ok(PreparedExpr::sequence_next(seq, column.pty));
    }
    if let Some(func_name) = &column.default_fn {
        let overload = registry.scalars.resolve(func_name, &[])?;
        let ret = overload.ret;
        let mut expr = PreparedExpr::scalar(overload.clone(), vec![], ret);
        if ret != column.pty {
            let cast = registry.casts.resolve(ret, column.pty)?;
            expr = PreparedExpr::cast(expr, cast, column.pty);
        }
        return Ok(expr);
    }
    if let Some(literal) = &column.default_value {
        let value = column.pty.const_from_str(literal)?;
        return Ok(PreparedExpr::literal(value, column.pty));
    }
    Ok(PreparedExpr::null_literal(column.pty))
}

/// Applies a transform to one pre-image row. Without a projection the
/// result is an overlay that re-types the same fields and keeps the
/// pre-image hKey; with one, every expression is evaluated once,
/// constraints are verified, and a fresh hKey is derived from the new
/// primary key.
pub fn transform_row(
    ctx: &dyn EvalContext,
    transform: &TableTransform,
    orig_row: &Row,
) -> Result<Row> {
    let projected = match &transform.projected_row_type {
        None => {
            return Ok(Row::Overlay(OverlayRow::new(
                orig_row.clone(),
                transform.row_type.clone(),
            )))
        }
        Some(p) => p,
    };
    let mut fields = Vec::with_capacity(projected.exprs.len());
    for expr in &projected.exprs {
        fields.push(expr.eval(ctx, orig_row)?);
    }
    let new_table = projected
        .row_type
        .table
        .as_ref()
        .ok_or(arbordb_storage::error::Error::TableNotExists)?;
    check_row_constraints(new_table, &FieldSlice(&fields))?;
    let hkey = HKey::for_table_row(new_table, &FieldSlice(&fields))?;
    Ok(Row::Projected(ProjectedRow::new(
        projected.row_type.clone(),
        hkey,
        fields,
    )))
}

struct FieldSlice<'a>(&'a [Const]);

impl<'a> FieldSource for FieldSlice<'a> {
    #[inline]
    fn field(&self, idx: usize) -> Const {
        self.0[idx].clone()
    }
}
