//! Traits through which the online engine consumes the store, the
//! transaction service, and the schema manager. Implementations live
//! behind these seams; `crate::mem::MemEngine` provides all of them
//! in memory for tests.

use crate::error::Result;
use crate::hkey::HKey;
use crate::row::Row;
use arbordb_catalog::{Ais, ChangeSet, GroupID, GroupIndex, Table, TableID, TableIndex};
use arbordb_expr::EvalContext;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// A lightweight per-caller handle. Transactions and online state are
/// keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Session(u64);

impl Session {
    #[inline]
    pub fn new(id: u64) -> Self {
        Session(id)
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Diagnostics attached to one query/operation. Warnings collect
/// non-fatal observations, e.g. a concurrent delete racing a row the
/// scanner had not promoted yet.
#[derive(Default)]
pub struct QueryContext {
    warnings: Mutex<Vec<String>>,
}

impl QueryContext {
    #[inline]
    pub fn warn(&self, msg: String) {
        self.warnings.lock().push(msg);
    }

    #[inline]
    pub fn take_warnings(&self) -> Vec<String> {
        std::mem::take(&mut self.warnings.lock())
    }
}

/// One online schema-change session as held by the schema manager.
#[derive(Clone)]
pub struct OnlineState {
    pub change_sets: Vec<ChangeSet>,
    pub ais: Arc<Ais>,
}

pub trait TransactionService: Send + Sync {
    fn begin_transaction(&self, session: &Session);

    fn commit_transaction(&self, session: &Session) -> Result<()>;

    fn rollback_transaction_if_open(&self, session: &Session);

    /// Commits and immediately begins a fresh transaction when the
    /// service decides the current batch is large enough. Returns true
    /// iff a commit was taken at this call.
    fn periodically_commit(&self, session: &Session) -> Result<bool>;

    /// Final commit of a scan. Returns true when the commit was rolled
    /// back and the caller must retry the tail of its work.
    fn commit_or_retry_transaction(&self, session: &Session) -> Result<bool>;
}

pub trait SchemaManager: Send + Sync {
    /// Current (pre-change) schema snapshot.
    fn ais(&self, session: &Session) -> Arc<Ais>;

    /// Post-change schema snapshot of the online session.
    fn online_ais(&self, session: &Session) -> Arc<Ais>;

    fn online_change_sets(&self, session: &Session) -> Vec<ChangeSet>;

    /// All online sessions' states; the transform cache is built over
    /// the union.
    fn online_states(&self, session: &Session) -> Vec<OnlineState>;

    fn is_online_active(&self, session: &Session, table: TableID) -> bool;

    /// Records an hKey handled by the writer path. Duplicate saves of
    /// the same key are idempotent (set semantics): one logical update
    /// fires the hook twice.
    fn add_online_handled_hkey(&self, session: &Session, table: TableID, hkey: &HKey);

    /// Ordered stream of handled hKeys >= start. The iterator is only
    /// valid within the reading transaction and must be discarded at
    /// every commit or rollback.
    fn online_handled_hkey_iter(
        &self,
        session: &Session,
        table: TableID,
        start: &HKey,
    ) -> Box<dyn Iterator<Item = HKey> + Send>;
}

/// A scan plan driven by the online engine. Every plan terminates in a
/// group scan, which is the rebindable leaf.
#[derive(Debug, Clone)]
pub enum ScanPlan {
    GroupScan {
        group: GroupID,
    },
    /// Group scan keeping only rows of the given tables.
    FilteredGroupScan {
        group: GroupID,
        row_types: HashSet<TableID>,
    },
    /// Emits one flattened branch row per row of the index's leaf-most
    /// table, fields in index column order.
    GroupIndexBuild {
        index: GroupIndex,
    },
}

/// Cursor over a scan plan. Rows come out in strictly ascending hKey
/// order within the group.
pub trait Cursor {
    fn next(&mut self) -> Result<Option<Row>>;

    /// Repositions the leaf scan strictly after `hkey`, or to the
    /// start when `None`. The next emitted row is the first row
    /// greater than the bind point.
    fn rebind(&mut self, hkey: Option<&HKey>);
}

pub trait Store: Send + Sync {
    fn create_adapter(&self, session: &Session, ais: Arc<Ais>) -> Box<dyn StoreAdapter>;
}

/// Session-bound store handle. Mutations join the session's open
/// transaction.
pub trait StoreAdapter: EvalContext {
    fn ais(&self) -> &Arc<Ais>;

    /// The adapter as the evaluation environment of projection
    /// expressions (sequence access, clock).
    fn eval_context(&self) -> &dyn EvalContext;

    fn open_cursor(&self, plan: ScanPlan) -> Result<Box<dyn Cursor>>;

    /// Writes a row plus entries for the given index sets.
    fn write_row(
        &self,
        row: &Row,
        table_indexes: &[TableIndex],
        group_indexes: &[GroupIndex],
    ) -> Result<()>;

    /// Deletes a row and its index entries. With `cascade`, deletes
    /// the row's descendants in the group as well. Fails with
    /// `Error::RowNotFound` when the row is absent.
    fn delete_row(&self, row: &Row, cascade: bool) -> Result<()>;

    fn write_index_row(&self, index: &TableIndex, row: &Row) -> Result<()>;

    fn delete_index_row(&self, index: &TableIndex, row: &Row) -> Result<()>;

    /// Writes the group-index entry for a flattened branch row.
    fn write_group_index_entry(&self, index: &GroupIndex, row: &Row) -> Result<()>;

    /// Group-index maintenance for a table row mutation. Entries are
    /// keyed off the leaf-most table; mutations of other participants
    /// are ignored here.
    fn write_group_index_rows(&self, table: &Table, row: &Row, indexes: &[GroupIndex])
        -> Result<()>;

    fn delete_group_index_rows(
        &self,
        table: &Table,
        row: &Row,
        indexes: &[GroupIndex],
    ) -> Result<()>;
}

/// Per-row DML listener fired by the store. The online engine
/// registers itself to observe concurrent writes during a change.
pub trait RowListener: Send + Sync {
    fn on_insert_post(&self, session: &Session, table: &Table, hkey: &HKey, row: &Row)
        -> Result<()>;

    fn on_update_pre(
        &self,
        session: &Session,
        table: &Table,
        hkey: &HKey,
        old_row: &Row,
        new_row: &Row,
    ) -> Result<()>;

    fn on_update_post(
        &self,
        session: &Session,
        table: &Table,
        hkey: &HKey,
        old_row: &Row,
        new_row: &Row,
    ) -> Result<()>;

    fn on_delete_pre(&self, session: &Session, table: &Table, hkey: &HKey, row: &Row)
        -> Result<()>;
}
