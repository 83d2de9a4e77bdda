//! Background scan driver: drives a cursor over a group-scan plan to
//! completion with periodic commits, skipping rows the writer path
//! already handled, and recovering from rollback-class errors by
//! rebinding the leaf scan to the last committed hKey.

use crate::error::Result;
use crate::tracker::HKeyChecker;
use arbordb_storage::hkey::HKey;
use arbordb_storage::row::Row;
use arbordb_storage::rowtype::RowTypeId;
use arbordb_storage::store::{ScanPlan, SchemaManager, Session, StoreAdapter, TransactionService};
use std::collections::HashMap;

pub(crate) fn run_plan(
    session: &Session,
    schema_manager: &dyn SchemaManager,
    txn_service: &dyn TransactionService,
    adapter: &dyn StoreAdapter,
    plan: ScanPlan,
    handler: &mut dyn FnMut(&Row) -> Result<()>,
) -> Result<()> {
    log::debug!("running online plan: {:?}", plan);
    // Operator row types are not known up front, so checkers are
    // created per row type as rows surface.
    let mut checkers: HashMap<RowTypeId, HKeyChecker> = HashMap::new();
    let mut cursor = adapter.open_cursor(plan)?;
    let mut last_committed: Option<HKey> = None;
    let mut done = false;
    while !done {
        let row = cursor.next()?;
        let mut did_commit = false;
        let mut did_rollback = false;
        match row {
            Some(row) => {
                let checker = checkers
                    .entry(row.row_type().id)
                    .or_insert_with(|| HKeyChecker::for_row_type(row.row_type()));
                let result: Result<bool> = (|| {
                    if checker.contains(schema_manager, session, row.hkey()) {
                        log::trace!("skipped row: {:?}", row.hkey());
                    } else {
                        handler(&row)?;
                    }
                    Ok(txn_service.periodically_commit(session)?)
                })();
                match result {
                    Ok(committed) => did_commit = committed,
                    Err(e) if e.is_rollback_class() => did_rollback = true,
                    Err(e) => return Err(e),
                }
                if did_commit {
                    last_committed = Some(row.hkey().clone());
                }
            }
            None => {
                // cursor exhausted; the final commit may demand a
                // retry of the tail
                did_rollback = txn_service.commit_or_retry_transaction(session)?;
                did_commit = !did_rollback;
                done = did_commit;
                if did_commit {
                    txn_service.begin_transaction(session);
                }
            }
        }
        if did_commit {
            log::debug!("committed up to row: {:?}", last_committed);
            checkers.clear();
        } else if did_rollback {
            log::debug!("rolling back to row: {:?}", last_committed);
            checkers.clear();
            txn_service.rollback_transaction_if_open(session);
            txn_service.begin_transaction(session);
            cursor.rebind(last_committed.as_ref());
        }
    }
    Ok(())
}
