//! In-memory implementation of the store, transaction service and
//! schema manager. Group and index spaces are ordered maps; mutations
//! buffer in a per-session transaction and apply atomically at
//! commit, which gives the tracker its append-committed-then-visible
//! rule. Cursors re-seek the committed base past the last emitted key,
//! so they observe concurrently committed inserts ahead of the
//! frontier and emit strictly ascending hKeys.

use crate::error::{Error, Result};
use crate::hkey::HKey;
use crate::row::{FlattenedRow, Row, StoreRow};
use crate::rowtype::{RowType, SchemaRowTypes};
use crate::store::{
    Cursor, OnlineState, RowListener, ScanPlan, Session, SchemaManager, Store, StoreAdapter,
    TransactionService,
};
use arbordb_catalog::{
    Ais, ChangeSet, GroupID, GroupIndex, IndexID, SequenceID, Table, TableID, TableIndex,
};
use arbordb_datatype::{memcmp, Const, Datetime};
use arbordb_expr::{error::Error as ExprError, EvalContext, FieldSource};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::ops::Bound::{Excluded, Included, Unbounded};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use time::macros::datetime;

#[derive(Debug, Clone)]
struct StoredRow {
    table: TableID,
    fields: Vec<Const>,
}

enum WriteOp {
    PutRow {
        group: GroupID,
        hkey: HKey,
        row: StoredRow,
    },
    DeleteRow {
        group: GroupID,
        hkey: HKey,
    },
    PutIndex {
        index: IndexID,
        key: Vec<u8>,
        hkey: HKey,
    },
    DeleteIndex {
        index: IndexID,
        key: Vec<u8>,
    },
    SaveHKey {
        table: TableID,
        hkey: HKey,
    },
}

#[derive(Default)]
struct TxnState {
    ops: Vec<WriteOp>,
    rows_since_commit: usize,
}

struct OnlineInner {
    change_sets: Vec<ChangeSet>,
    ais: Arc<Ais>,
    handled: HashMap<TableID, BTreeSet<HKey>>,
}

struct EngineInner {
    ais: Arc<Ais>,
    online: Option<OnlineInner>,
    groups: HashMap<GroupID, BTreeMap<HKey, StoredRow>>,
    indexes: HashMap<IndexID, BTreeMap<Vec<u8>, HKey>>,
    sequences: HashMap<SequenceID, i64>,
    txns: HashMap<u64, TxnState>,
}

pub struct MemEngine {
    self_ref: Weak<MemEngine>,
    inner: RwLock<EngineInner>,
    listeners: RwLock<Vec<Arc<dyn RowListener>>>,
    /// Rows per transaction before `periodically_commit` takes a
    /// commit. Zero disables periodic commits.
    commit_period: AtomicUsize,
    /// Remaining forced retries for `commit_or_retry_transaction`.
    retry_final_commits: AtomicUsize,
    now: Mutex<Datetime>,
}

impl MemEngine {
    pub fn new(ais: Arc<Ais>) -> Arc<MemEngine> {
        Arc::new_cyclic(|w| MemEngine {
            self_ref: w.clone(),
            inner: RwLock::new(EngineInner {
                ais,
                online: None,
                groups: HashMap::new(),
                indexes: HashMap::new(),
                sequences: HashMap::new(),
                txns: HashMap::new(),
            }),
            listeners: RwLock::new(vec![]),
            commit_period: AtomicUsize::new(0),
            retry_final_commits: AtomicUsize::new(0),
            now: Mutex::new(datetime!(2024-01-01 00:00:00)),
        })
    }

    #[inline]
    fn strong(&self) -> Arc<MemEngine> {
        self.self_ref.upgrade().expect("engine alive")
    }

    #[inline]
    pub fn register_listener(&self, listener: Arc<dyn RowListener>) {
        self.listeners.write().push(listener);
    }

    #[inline]
    pub fn set_commit_period(&self, rows: usize) {
        self.commit_period.store(rows, Ordering::Release);
    }

    /// Forces the next `times` final commits to report a retry.
    #[inline]
    pub fn force_retry_final_commit(&self, times: usize) {
        self.retry_final_commits.store(times, Ordering::Release);
    }

    #[inline]
    pub fn set_now(&self, now: Datetime) {
        *self.now.lock() = now;
    }

    /// Publishes an online change: the change-sets and the post-change
    /// schema coexist with the current one until promoted.
    pub fn set_online(&self, change_sets: Vec<ChangeSet>, ais: Arc<Ais>) {
        let mut inner = self.inner.write();
        inner.online = Some(OnlineInner {
            change_sets,
            ais,
            handled: HashMap::new(),
        });
    }

    /// Promotes the online schema to current and drops the session
    /// state, completing the DDL.
    pub fn promote_online(&self) {
        let mut inner = self.inner.write();
        if let Some(online) = inner.online.take() {
            inner.ais = online.ais;
        }
    }

    //
    // Test-facing observers over committed state.
    //

    pub fn committed_group_rows(&self, group: GroupID) -> Vec<(HKey, TableID, Vec<Const>)> {
        let inner = self.inner.read();
        inner
            .groups
            .get(&group)
            .map(|space| {
                space
                    .iter()
                    .map(|(k, r)| (k.clone(), r.table, r.fields.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn committed_row(&self, group: GroupID, hkey: &HKey) -> Option<(TableID, Vec<Const>)> {
        let inner = self.inner.read();
        inner
            .groups
            .get(&group)
            .and_then(|space| space.get(hkey))
            .map(|r| (r.table, r.fields.clone()))
    }

    pub fn committed_index_entries(&self, index: IndexID) -> Vec<(Vec<u8>, HKey)> {
        let inner = self.inner.read();
        inner
            .indexes
            .get(&index)
            .map(|space| space.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    pub fn handled_hkeys(&self, table: TableID) -> Vec<HKey> {
        let inner = self.inner.read();
        inner
            .online
            .as_ref()
            .and_then(|o| o.handled.get(&table))
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    //
    // Writer-side DML. Each call buffers into the session's open
    // transaction and fires registered row listeners, like the
    // production store would around its tree operations.
    //

    pub fn insert_row(
        &self,
        session: &Session,
        table_id: TableID,
        mut fields: Vec<Const>,
    ) -> Result<HKey> {
        let (table, row_type) = self.live_table(table_id)?;
        if table.has_hidden_pk() && fields.len() + 1 == table.field_count() {
            let seq = table.columns.last().and_then(|c| c.identity);
            let seq = seq.ok_or(Error::InvalidState)?;
            fields.push(Const::I64(self.sequence_next_val(seq)?));
        }
        let hkey = HKey::for_table_row(&table, &Fields(&fields))?;
        {
            let mut inner = self.inner.write();
            let group = table.group;
            let txn = open_txn(&mut inner, session)?;
            txn.ops.push(WriteOp::PutRow {
                group,
                hkey: hkey.clone(),
                row: StoredRow {
                    table: table_id,
                    fields: fields.clone(),
                },
            });
            for index in &table.indexes {
                txn.ops.push(WriteOp::PutIndex {
                    index: index.id,
                    key: index_entry_key(index, &fields, &hkey),
                    hkey: hkey.clone(),
                });
            }
        }
        let row = Row::Store(StoreRow::new(row_type, hkey.clone(), fields));
        for listener in self.listeners.read().iter().cloned().collect::<Vec<_>>() {
            listener.on_insert_post(session, &table, &hkey, &row)?;
        }
        Ok(hkey)
    }

    pub fn update_row(
        &self,
        session: &Session,
        table_id: TableID,
        hkey: &HKey,
        new_fields: Vec<Const>,
    ) -> Result<()> {
        let (table, row_type) = self.live_table(table_id)?;
        let old_fields = {
            let inner = self.inner.read();
            read_row_tx(&inner, session, table.group, hkey)
                .ok_or(Error::RowNotFound)?
                .fields
        };
        let new_hkey = HKey::for_table_row(&table, &Fields(&new_fields))?;
        if new_hkey != *hkey {
            // primary key updates arrive as delete + insert
            return Err(Error::InvalidState);
        }
        let old_row = Row::Store(StoreRow::new(row_type.clone(), hkey.clone(), old_fields.clone()));
        let new_row = Row::Store(StoreRow::new(row_type, hkey.clone(), new_fields.clone()));
        let listeners: Vec<_> = self.listeners.read().iter().cloned().collect();
        for listener in &listeners {
            listener.on_update_pre(session, &table, hkey, &old_row, &new_row)?;
        }
        {
            let mut inner = self.inner.write();
            let group = table.group;
            let txn = open_txn(&mut inner, session)?;
            for index in &table.indexes {
                txn.ops.push(WriteOp::DeleteIndex {
                    index: index.id,
                    key: index_entry_key(index, &old_fields, hkey),
                });
            }
            txn.ops.push(WriteOp::PutRow {
                group,
                hkey: hkey.clone(),
                row: StoredRow {
                    table: table_id,
                    fields: new_fields.clone(),
                },
            });
            for index in &table.indexes {
                txn.ops.push(WriteOp::PutIndex {
                    index: index.id,
                    key: index_entry_key(index, &new_fields, hkey),
                    hkey: hkey.clone(),
                });
            }
        }
        for listener in &listeners {
            listener.on_update_post(session, &table, hkey, &old_row, &new_row)?;
        }
        Ok(())
    }

    pub fn delete_row_dml(&self, session: &Session, table_id: TableID, hkey: &HKey) -> Result<()> {
        let (table, row_type) = self.live_table(table_id)?;
        let old_fields = {
            let inner = self.inner.read();
            read_row_tx(&inner, session, table.group, hkey)
                .ok_or(Error::RowNotFound)?
                .fields
        };
        let old_row = Row::Store(StoreRow::new(row_type, hkey.clone(), old_fields.clone()));
        for listener in self.listeners.read().iter().cloned().collect::<Vec<_>>() {
            listener.on_delete_pre(session, &table, hkey, &old_row)?;
        }
        let mut inner = self.inner.write();
        let group = table.group;
        let txn = open_txn(&mut inner, session)?;
        txn.ops.push(WriteOp::DeleteRow {
            group,
            hkey: hkey.clone(),
        });
        for index in &table.indexes {
            txn.ops.push(WriteOp::DeleteIndex {
                index: index.id,
                key: index_entry_key(index, &old_fields, hkey),
            });
        }
        Ok(())
    }

    //
    // Internal
    //

    fn live_table(&self, table_id: TableID) -> Result<(Arc<Table>, RowType)> {
        let ais = self.inner.read().ais.clone();
        let row_types = SchemaRowTypes::of(&ais);
        let row_type = row_types
            .table_row_type(table_id)
            .cloned()
            .ok_or(Error::TableNotExists)?;
        let table = row_type.table.clone().ok_or(Error::TableNotExists)?;
        Ok((table, row_type))
    }

    fn sequence_next_val(&self, seq: SequenceID) -> Result<i64> {
        let mut inner = self.inner.write();
        let def = inner
            .ais
            .sequence(seq)
            .or_else(|| inner.online.as_ref().and_then(|o| o.ais.sequence(seq)))
            .cloned()
            .ok_or(Error::Expr(ExprError::SequenceNotExists))?;
        let entry = inner.sequences.entry(seq).or_insert(def.start);
        let value = *entry;
        *entry += def.increment;
        Ok(value)
    }
}

struct Fields<'a>(&'a [Const]);

impl<'a> FieldSource for Fields<'a> {
    #[inline]
    fn field(&self, idx: usize) -> Const {
        self.0[idx].clone()
    }
}

fn open_txn<'a>(inner: &'a mut EngineInner, session: &Session) -> Result<&'a mut TxnState> {
    inner
        .txns
        .get_mut(&session.id())
        .ok_or(Error::NoOpenTransaction)
}

/// Reads a row through the session's uncommitted buffer, falling back
/// to the committed base.
fn read_row_tx(
    inner: &EngineInner,
    session: &Session,
    group: GroupID,
    hkey: &HKey,
) -> Option<StoredRow> {
    if let Some(txn) = inner.txns.get(&session.id()) {
        for op in txn.ops.iter().rev() {
            match op {
                WriteOp::PutRow {
                    group: g,
                    hkey: k,
                    row,
                } if *g == group && k == hkey => return Some(row.clone()),
                WriteOp::DeleteRow { group: g, hkey: k } if *g == group && k == hkey => {
                    return None
                }
                _ => {}
            }
        }
    }
    inner.groups.get(&group).and_then(|s| s.get(hkey)).cloned()
}

fn index_entry_key(index: &TableIndex, fields: &[Const], hkey: &HKey) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    for &col in &index.columns {
        memcmp::attach_const(&mut key, &fields[col]);
    }
    key.extend(hkey.as_bytes());
    key
}

fn gi_entry_key(values: &[Const], leaf_hkey: &HKey) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    for v in values {
        memcmp::attach_const(&mut key, v);
    }
    key.extend(leaf_hkey.as_bytes());
    key
}

/// Resolves group-index column values for a leaf row: own columns read
/// directly, ancestor columns through the ancestor row addressed by
/// the hKey prefix.
fn compose_gi_values(
    inner: &EngineInner,
    session: Option<&Session>,
    ais: &Ais,
    index: &GroupIndex,
    leaf: &Table,
    leaf_fields: &[Const],
) -> Result<Vec<Const>> {
    let mut values = Vec::with_capacity(index.columns.len());
    for (tid, pos) in &index.columns {
        if *tid == leaf.id {
            values.push(leaf_fields[*pos].clone());
            continue;
        }
        let anc_table = ais.table(*tid).ok_or(Error::TableNotExists)?;
        let anc_hkey = HKey::for_ancestor(leaf, &Fields(leaf_fields), anc_table.depth)?;
        let anc = match session {
            Some(s) => read_row_tx(inner, s, leaf.group, &anc_hkey),
            None => inner
                .groups
                .get(&leaf.group)
                .and_then(|space| space.get(&anc_hkey))
                .cloned(),
        };
        match anc {
            Some(row) => values.push(row.fields[*pos].clone()),
            None => values.push(Const::Null),
        }
    }
    Ok(values)
}

fn apply_ops(inner: &mut EngineInner, ops: Vec<WriteOp>) {
    for op in ops {
        match op {
            WriteOp::PutRow { group, hkey, row } => {
                inner.groups.entry(group).or_default().insert(hkey, row);
            }
            WriteOp::DeleteRow { group, hkey } => {
                if let Some(space) = inner.groups.get_mut(&group) {
                    space.remove(&hkey);
                }
            }
            WriteOp::PutIndex { index, key, hkey } => {
                inner.indexes.entry(index).or_default().insert(key, hkey);
            }
            WriteOp::DeleteIndex { index, key } => {
                if let Some(space) = inner.indexes.get_mut(&index) {
                    space.remove(&key);
                }
            }
            WriteOp::SaveHKey { table, hkey } => {
                if let Some(online) = inner.online.as_mut() {
                    online.handled.entry(table).or_default().insert(hkey);
                }
            }
        }
    }
}

//
// TransactionService
//

impl TransactionService for MemEngine {
    fn begin_transaction(&self, session: &Session) {
        let mut inner = self.inner.write();
        inner.txns.insert(session.id(), TxnState::default());
    }

    fn commit_transaction(&self, session: &Session) -> Result<()> {
        let mut inner = self.inner.write();
        let txn = inner
            .txns
            .remove(&session.id())
            .ok_or(Error::NoOpenTransaction)?;
        log::trace!("commit session {}: {} ops", session.id(), txn.ops.len());
        apply_ops(&mut inner, txn.ops);
        Ok(())
    }

    fn rollback_transaction_if_open(&self, session: &Session) {
        let mut inner = self.inner.write();
        inner.txns.remove(&session.id());
    }

    fn periodically_commit(&self, session: &Session) -> Result<bool> {
        let period = self.commit_period.load(Ordering::Acquire);
        let mut inner = self.inner.write();
        let txn = inner
            .txns
            .get_mut(&session.id())
            .ok_or(Error::NoOpenTransaction)?;
        txn.rows_since_commit += 1;
        if period == 0 || txn.rows_since_commit < period {
            return Ok(false);
        }
        let ops = std::mem::take(&mut txn.ops);
        txn.rows_since_commit = 0;
        apply_ops(&mut inner, ops);
        Ok(true)
    }

    fn commit_or_retry_transaction(&self, session: &Session) -> Result<bool> {
        let pending = self.retry_final_commits.load(Ordering::Acquire);
        if pending > 0 {
            self.retry_final_commits.store(pending - 1, Ordering::Release);
            let mut inner = self.inner.write();
            inner.txns.remove(&session.id());
            return Ok(true);
        }
        self.commit_transaction(session)?;
        Ok(false)
    }
}

//
// SchemaManager
//

impl SchemaManager for MemEngine {
    fn ais(&self, _session: &Session) -> Arc<Ais> {
        self.inner.read().ais.clone()
    }

    fn online_ais(&self, _session: &Session) -> Arc<Ais> {
        self.inner
            .read()
            .online
            .as_ref()
            .map(|o| o.ais.clone())
            .expect("online change in progress")
    }

    fn online_change_sets(&self, _session: &Session) -> Vec<ChangeSet> {
        self.inner
            .read()
            .online
            .as_ref()
            .map(|o| o.change_sets.clone())
            .unwrap_or_default()
    }

    fn online_states(&self, _session: &Session) -> Vec<OnlineState> {
        self.inner
            .read()
            .online
            .as_ref()
            .map(|o| {
                vec![OnlineState {
                    change_sets: o.change_sets.clone(),
                    ais: o.ais.clone(),
                }]
            })
            .unwrap_or_default()
    }

    fn is_online_active(&self, _session: &Session, table: TableID) -> bool {
        self.inner
            .read()
            .online
            .as_ref()
            .map(|o| o.change_sets.iter().any(|cs| cs.table_id == table))
            .unwrap_or(false)
    }

    fn add_online_handled_hkey(&self, session: &Session, table: TableID, hkey: &HKey) {
        let mut inner = self.inner.write();
        if let Some(txn) = inner.txns.get_mut(&session.id()) {
            txn.ops.push(WriteOp::SaveHKey {
                table,
                hkey: hkey.clone(),
            });
        } else if let Some(online) = inner.online.as_mut() {
            online
                .handled
                .entry(table)
                .or_default()
                .insert(hkey.clone());
        }
    }

    fn online_handled_hkey_iter(
        &self,
        _session: &Session,
        table: TableID,
        start: &HKey,
    ) -> Box<dyn Iterator<Item = HKey> + Send> {
        Box::new(HandledIter {
            engine: self.strong(),
            table,
            start: start.clone(),
            last: None,
        })
    }
}

/// Live iterator over the committed handled-hKey set. Reads the base
/// on every step, so entries committed by writers after the iterator
/// was opened still surface once the walk reaches them.
struct HandledIter {
    engine: Arc<MemEngine>,
    table: TableID,
    start: HKey,
    last: Option<HKey>,
}

impl Iterator for HandledIter {
    type Item = HKey;

    fn next(&mut self) -> Option<HKey> {
        let inner = self.engine.inner.read();
        let set = inner.online.as_ref()?.handled.get(&self.table)?;
        let range = match &self.last {
            None => (Included(self.start.clone()), Unbounded),
            Some(l) => (Excluded(l.clone()), Unbounded),
        };
        let next = set.range(range).next().cloned()?;
        self.last = Some(next.clone());
        Some(next)
    }
}

//
// Store / StoreAdapter
//

impl Store for MemEngine {
    fn create_adapter(&self, session: &Session, ais: Arc<Ais>) -> Box<dyn StoreAdapter> {
        Box::new(MemAdapter {
            engine: self.strong(),
            session: *session,
            ais,
        })
    }
}

pub struct MemAdapter {
    engine: Arc<MemEngine>,
    session: Session,
    ais: Arc<Ais>,
}

impl EvalContext for MemAdapter {
    fn sequence_next(&self, seq: SequenceID) -> arbordb_expr::error::Result<i64> {
        self.engine
            .sequence_next_val(seq)
            .map_err(|_| ExprError::SequenceNotExists)
    }

    fn now(&self) -> Datetime {
        *self.engine.now.lock()
    }
}

impl MemAdapter {
    fn row_table(&self, row: &Row) -> Result<Arc<Table>> {
        row.row_type()
            .table
            .clone()
            .ok_or(Error::InvalidState)
    }
}

impl StoreAdapter for MemAdapter {
    fn ais(&self) -> &Arc<Ais> {
        &self.ais
    }

    fn eval_context(&self) -> &dyn EvalContext {
        self
    }

    fn open_cursor(&self, plan: ScanPlan) -> Result<Box<dyn Cursor>> {
        let mode = match plan {
            ScanPlan::GroupScan { group } => CursorMode::Group {
                group,
                filter: None,
            },
            ScanPlan::FilteredGroupScan { group, row_types } => CursorMode::Group {
                group,
                filter: Some(row_types),
            },
            ScanPlan::GroupIndexBuild { index } => {
                let leaf = self
                    .ais
                    .table(index.leafmost)
                    .cloned()
                    .map(Arc::new)
                    .ok_or(Error::TableNotExists)?;
                let row_type = RowType::for_group_index(&index, &self.ais);
                CursorMode::GiBuild {
                    index,
                    row_type,
                    leaf,
                }
            }
        };
        Ok(Box::new(MemCursor {
            engine: self.engine.clone(),
            ais: self.ais.clone(),
            row_types: SchemaRowTypes::of(&self.ais),
            mode,
            last: None,
        }))
    }

    fn write_row(
        &self,
        row: &Row,
        table_indexes: &[TableIndex],
        group_indexes: &[GroupIndex],
    ) -> Result<()> {
        let table = self.row_table(row)?;
        let fields = row.to_fields();
        let hkey = row.hkey().clone();
        let mut inner = self.engine.inner.write();
        let mut ops = vec![WriteOp::PutRow {
            group: table.group,
            hkey: hkey.clone(),
            row: StoredRow {
                table: table.id,
                fields: fields.clone(),
            },
        }];
        for index in table_indexes {
            ops.push(WriteOp::PutIndex {
                index: index.id,
                key: index_entry_key(index, &fields, &hkey),
                hkey: hkey.clone(),
            });
        }
        for gi in group_indexes {
            if gi.leafmost != table.id {
                continue;
            }
            let values =
                compose_gi_values(&inner, Some(&self.session), &self.ais, gi, &table, &fields)?;
            ops.push(WriteOp::PutIndex {
                index: gi.id,
                key: gi_entry_key(&values, &hkey),
                hkey: hkey.clone(),
            });
        }
        let txn = open_txn(&mut inner, &self.session)?;
        txn.ops.extend(ops);
        drop(inner);
        // engine-issued writes fire the listener like any other write;
        // the online hook's identity guard filters them out
        for listener in self
            .engine
            .listeners
            .read()
            .iter()
            .cloned()
            .collect::<Vec<_>>()
        {
            listener.on_insert_post(&self.session, &table, &hkey, row)?;
        }
        Ok(())
    }

    fn delete_row(&self, row: &Row, cascade: bool) -> Result<()> {
        let table = self.row_table(row)?;
        let hkey = row.hkey().clone();
        let mut inner = self.engine.inner.write();
        let stored =
            read_row_tx(&inner, &self.session, table.group, &hkey).ok_or(Error::RowNotFound)?;
        let mut ops = vec![WriteOp::DeleteRow {
            group: table.group,
            hkey: hkey.clone(),
        }];
        for index in &table.indexes {
            ops.push(WriteOp::DeleteIndex {
                index: index.id,
                key: index_entry_key(index, &stored.fields, &hkey),
            });
        }
        for gi in self
            .ais
            .group(table.group)
            .map(|g| g.indexes.as_slice())
            .unwrap_or_default()
        {
            if gi.leafmost != table.id {
                continue;
            }
            let values = compose_gi_values(
                &inner,
                Some(&self.session),
                &self.ais,
                gi,
                &table,
                &stored.fields,
            )?;
            ops.push(WriteOp::DeleteIndex {
                index: gi.id,
                key: gi_entry_key(&values, &hkey),
            });
        }
        if cascade {
            let descendants: Vec<HKey> = inner
                .groups
                .get(&table.group)
                .map(|space| {
                    space
                        .range((Excluded(hkey.clone()), Unbounded))
                        .take_while(|(k, _)| k.starts_with(&hkey))
                        .map(|(k, _)| k.clone())
                        .collect()
                })
                .unwrap_or_default();
            for k in descendants {
                ops.push(WriteOp::DeleteRow {
                    group: table.group,
                    hkey: k,
                });
            }
        }
        let txn = open_txn(&mut inner, &self.session)?;
        txn.ops.extend(ops);
        drop(inner);
        for listener in self
            .engine
            .listeners
            .read()
            .iter()
            .cloned()
            .collect::<Vec<_>>()
        {
            listener.on_delete_pre(&self.session, &table, &hkey, row)?;
        }
        Ok(())
    }

    fn write_index_row(&self, index: &TableIndex, row: &Row) -> Result<()> {
        let fields = row.to_fields();
        let hkey = row.hkey().clone();
        let mut inner = self.engine.inner.write();
        let key = index_entry_key(index, &fields, &hkey);
        let txn = open_txn(&mut inner, &self.session)?;
        txn.ops.push(WriteOp::PutIndex {
            index: index.id,
            key,
            hkey,
        });
        Ok(())
    }

    fn delete_index_row(&self, index: &TableIndex, row: &Row) -> Result<()> {
        let fields = row.to_fields();
        let hkey = row.hkey();
        let mut inner = self.engine.inner.write();
        let key = index_entry_key(index, &fields, hkey);
        let txn = open_txn(&mut inner, &self.session)?;
        txn.ops.push(WriteOp::DeleteIndex {
            index: index.id,
            key,
        });
        Ok(())
    }

    fn write_group_index_entry(&self, index: &GroupIndex, row: &Row) -> Result<()> {
        let values = row.to_fields();
        let hkey = row.hkey().clone();
        let mut inner = self.engine.inner.write();
        let key = gi_entry_key(&values, &hkey);
        let txn = open_txn(&mut inner, &self.session)?;
        txn.ops.push(WriteOp::PutIndex {
            index: index.id,
            key,
            hkey,
        });
        Ok(())
    }

    fn write_group_index_rows(
        &self,
        table: &Table,
        row: &Row,
        indexes: &[GroupIndex],
    ) -> Result<()> {
        let fields = row.to_fields();
        let hkey = row.hkey().clone();
        let mut inner = self.engine.inner.write();
        let mut ops = vec![];
        for gi in indexes {
            if gi.leafmost != table.id {
                continue;
            }
            let values =
                compose_gi_values(&inner, Some(&self.session), &self.ais, gi, table, &fields)?;
            ops.push(WriteOp::PutIndex {
                index: gi.id,
                key: gi_entry_key(&values, &hkey),
                hkey: hkey.clone(),
            });
        }
        let txn = open_txn(&mut inner, &self.session)?;
        txn.ops.extend(ops);
        Ok(())
    }

    fn delete_group_index_rows(
        &self,
        table: &Table,
        row: &Row,
        indexes: &[GroupIndex],
    ) -> Result<()> {
        let fields = row.to_fields();
        let hkey = row.hkey().clone();
        let mut inner = self.engine.inner.write();
        let mut ops = vec![];
        for gi in indexes {
            if gi.leafmost != table.id {
                continue;
            }
            let values =
                compose_gi_values(&inner, Some(&self.session), &self.ais, gi, table, &fields)?;
            ops.push(WriteOp::DeleteIndex {
                index: gi.id,
                key: gi_entry_key(&values, &hkey),
            });
        }
        let txn = open_txn(&mut inner, &self.session)?;
        txn.ops.extend(ops);
        Ok(())
    }
}

enum CursorMode {
    Group {
        group: GroupID,
        filter: Option<HashSet<TableID>>,
    },
    GiBuild {
        index: GroupIndex,
        row_type: RowType,
        leaf: Arc<Table>,
    },
}

/// Cursor over the committed base. Every `next` re-seeks past the last
/// emitted key, so commits taken mid-scan neither invalidate the
/// cursor nor break hKey ordering.
pub struct MemCursor {
    engine: Arc<MemEngine>,
    ais: Arc<Ais>,
    row_types: Arc<SchemaRowTypes>,
    mode: CursorMode,
    last: Option<HKey>,
}

impl Cursor for MemCursor {
    fn next(&mut self) -> Result<Option<Row>> {
        let inner = self.engine.inner.read();
        let (group, filter): (GroupID, Option<&HashSet<TableID>>) = match &self.mode {
            CursorMode::Group { group, filter } => (*group, filter.as_ref()),
            CursorMode::GiBuild { index, .. } => (index.group, None),
        };
        let space = match inner.groups.get(&group) {
            Some(space) => space,
            None => return Ok(None),
        };
        let range = match &self.last {
            None => (Unbounded, Unbounded),
            Some(l) => (Excluded(l.clone()), Unbounded),
        };
        for (hkey, stored) in space.range(range) {
            match &self.mode {
                CursorMode::Group { .. } => {
                    if let Some(filter) = filter {
                        if !filter.contains(&stored.table) {
                            continue;
                        }
                    }
                    let row_type = self
                        .row_types
                        .table_row_type(stored.table)
                        .cloned()
                        .ok_or(Error::TableNotExists)?;
                    self.last = Some(hkey.clone());
                    return Ok(Some(Row::Store(StoreRow::new(
                        row_type,
                        hkey.clone(),
                        stored.fields.clone(),
                    ))));
                }
                CursorMode::GiBuild {
                    index,
                    row_type,
                    leaf,
                } => {
                    if stored.table != leaf.id {
                        continue;
                    }
                    let values =
                        compose_gi_values(&inner, None, &self.ais, index, leaf, &stored.fields)?;
                    self.last = Some(hkey.clone());
                    return Ok(Some(Row::Flattened(FlattenedRow::new(
                        row_type.clone(),
                        hkey.clone(),
                        values,
                    ))));
                }
            }
        }
        Ok(None)
    }

    fn rebind(&mut self, hkey: Option<&HKey>) {
        self.last = hkey.cloned();
    }
}
