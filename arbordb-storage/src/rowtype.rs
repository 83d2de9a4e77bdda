//! Row types describe the shape of rows flowing through scans and
//! transforms. Table-backed row types are cached per AIS snapshot so
//! the same `Arc<Table>` is shared by every row of a scan.

use arbordb_catalog::{Ais, GroupIndex, Table, TableID};
use arbordb_datatype::PreciseType;
use std::collections::HashMap;
use std::sync::Arc;

/// Identity of a row type within one schema version. Table row types
/// use the table id; flattened group-index row types are tagged so
/// they never collide with a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowTypeId(u64);

const GI_TAG: u64 = 1 << 32;

impl RowTypeId {
    #[inline]
    pub fn of_table(table: TableID) -> Self {
        RowTypeId(table.value() as u64)
    }

    #[inline]
    pub fn of_group_index(index: &GroupIndex) -> Self {
        RowTypeId(GI_TAG | index.id.value() as u64)
    }
}

#[derive(Debug, Clone)]
pub struct RowType {
    pub id: RowTypeId,
    /// Backing table; `None` for synthetic rows such as flattened
    /// group-index rows.
    pub table: Option<Arc<Table>>,
    pub fields: Arc<[PreciseType]>,
}

impl RowType {
    pub fn for_table(table: &Table) -> RowType {
        RowType {
            id: RowTypeId::of_table(table.id),
            table: Some(Arc::new(table.clone())),
            fields: table.field_types().into(),
        }
    }

    pub fn for_group_index(index: &GroupIndex, ais: &Ais) -> RowType {
        let fields: Vec<PreciseType> = index
            .columns
            .iter()
            .map(|(tid, pos)| {
                ais.table(*tid)
                    .map(|t| t.columns[*pos].pty)
                    .unwrap_or(PreciseType::Null)
            })
            .collect();
        RowType {
            id: RowTypeId::of_group_index(index),
            table: None,
            fields: fields.into(),
        }
    }

    #[inline]
    pub fn has_table(&self) -> bool {
        self.table.is_some()
    }

    #[inline]
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    #[inline]
    pub fn table_id(&self) -> Option<TableID> {
        self.table.as_ref().map(|t| t.id)
    }
}

/// Per-AIS cache of table row types, attached to the snapshot's cache
/// slot so it lives exactly as long as the schema version.
pub struct SchemaRowTypes {
    types: HashMap<TableID, RowType>,
}

impl SchemaRowTypes {
    /// Fetches (building on first use) the row-type cache of a
    /// snapshot.
    pub fn of(ais: &Arc<Ais>) -> Arc<SchemaRowTypes> {
        ais.cached_value(|ais| {
            let types = ais
                .tables()
                .map(|t| (t.id, RowType::for_table(t)))
                .collect();
            SchemaRowTypes { types }
        })
    }

    #[inline]
    pub fn table_row_type(&self, table: TableID) -> Option<&RowType> {
        self.types.get(&table)
    }
}
