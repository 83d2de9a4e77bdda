//! Scanner/writer hand-off over the schema manager's persistent hKey
//! set. Savers record hKeys the writer path handled; checkers let the
//! scanner skip them. A checker walks its iterator forward only and is
//! thrown away whenever its transaction closes.

use arbordb_catalog::TableID;
use arbordb_storage::hkey::HKey;
use arbordb_storage::rowtype::RowType;
use arbordb_storage::store::{SchemaManager, Session};
use std::cmp::Ordering;

/// Records concurrently handled rows. Safe for concurrent writer
/// callers; duplicate saves of one hKey are idempotent.
#[derive(Debug, Clone, Copy)]
pub struct HKeySaver {
    table: TableID,
}

impl HKeySaver {
    #[inline]
    pub fn new(table: TableID) -> Self {
        HKeySaver { table }
    }

    #[inline]
    pub fn save(&self, sm: &dyn SchemaManager, session: &Session, hkey: &HKey) {
        sm.add_online_handled_hkey(session, self.table, hkey);
    }
}

/// Checks whether the writer path already handled an hKey. Must only
/// be queried with ascending hKeys within one transaction.
pub enum HKeyChecker {
    Table(TableChecker),
    /// Rows without a backing table are never tracked.
    False,
}

impl HKeyChecker {
    pub fn for_row_type(row_type: &RowType) -> HKeyChecker {
        match row_type.table_id() {
            Some(table) => HKeyChecker::Table(TableChecker::new(table)),
            None => HKeyChecker::False,
        }
    }

    #[inline]
    pub fn contains(&mut self, sm: &dyn SchemaManager, session: &Session, hkey: &HKey) -> bool {
        match self {
            HKeyChecker::Table(c) => c.contains(sm, session, hkey),
            HKeyChecker::False => false,
        }
    }
}

pub struct TableChecker {
    table: TableID,
    iter: Option<Box<dyn Iterator<Item = HKey> + Send>>,
    last: Option<HKey>,
}

impl TableChecker {
    #[inline]
    fn new(table: TableID) -> Self {
        TableChecker {
            table,
            iter: None,
            last: None,
        }
    }

    fn contains(&mut self, sm: &dyn SchemaManager, session: &Session, hkey: &HKey) -> bool {
        if self.iter.is_none() {
            let mut iter = sm.online_handled_hkey_iter(session, self.table, hkey);
            self.last = iter.next();
            self.iter = Some(iter);
        }
        let Some(iter) = self.iter.as_mut() else {
            return false;
        };
        if self.last.is_none() {
            // saves may have committed since the walk drained; the
            // iterator is live, so probe once more
            self.last = iter.next();
        }
        // Scan until we reach, or go past, hkey. Past means no skip.
        loop {
            let ord = match &self.last {
                None => return false,
                Some(last) => last.cmp(hkey),
            };
            match ord {
                Ordering::Equal => return true,
                Ordering::Greater => return false,
                Ordering::Less => self.last = iter.next(),
            }
        }
    }
}
