//! Row constraint verification against a post-change table.

use crate::error::Result;
use arbordb_catalog::Table;
use arbordb_datatype::Const;
use arbordb_expr::FieldSource;
use arbordb_storage::error::Error as StorageError;
use arbordb_storage::row::Row;
use std::sync::Arc;

/// Verifies NOT-NULL and value-domain constraints of rows against the
/// new table definition. Attached to a transform only for
/// metadata-level changes; the row transformer uses the same check on
/// projected rows.
pub struct TableRowChecker {
    table: Arc<Table>,
}

impl TableRowChecker {
    #[inline]
    pub fn new(table: Arc<Table>) -> Self {
        TableRowChecker { table }
    }

    #[inline]
    pub fn check_constraints(&self, row: &Row) -> Result<()> {
        check_row_constraints(&self.table, row)
    }
}

/// NOT-NULL and domain check of a row shaped like `table`.
pub fn check_row_constraints(table: &Table, row: &dyn FieldSource) -> Result<()> {
    for (pos, col) in table.columns.iter().enumerate() {
        let value = row.field(pos);
        if value.is_null() {
            if !col.nullable {
                return Err(StorageError::NotNullViolation {
                    table: table.name.clone(),
                    column: col.name.clone(),
                }
                .into());
            }
            continue;
        }
        col.pty.check_domain(&value)?;
    }
    Ok(())
}
