pub mod builder;
pub mod change;
pub mod error;

pub use builder::{
    AisBuilder, ColumnSpec, GroupIndexSpec, IdGen, JoinSpec, SequenceSpec, TableIndexSpec,
    TableSpec,
};
pub use change::{ChangeKind, ChangeLevel, ChangeSet, ColumnChange, IndexChange, IndexKind};

use arbordb_datatype::PreciseType;
use bitflags::bitflags;
use indexmap::IndexMap;
use parking_lot::Mutex;
use semistr::SemiStr;
use smallvec::SmallVec;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

/// Name of the hidden primary key column appended to tables declared
/// without one.
pub const HIDDEN_PK_NAME: &str = "__row_id";

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectID<T> {
    id: u32,
    _marker: PhantomData<T>,
}

impl<T> fmt::Debug for ObjectID<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectID").field("id", &self.id).finish()
    }
}

impl<T> ObjectID<T> {
    /// Required to create object ids only within the catalog module.
    pub(crate) fn new(id: u32) -> Self {
        ObjectID {
            id,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn value(&self) -> u32 {
        self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct T;
pub type TableID = ObjectID<T>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct G;
pub type GroupID = ObjectID<G>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct I;
pub type IndexID = ObjectID<I>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Q;
pub type SequenceID = ObjectID<Q>;

bitflags! {
    pub struct ColumnAttr: u8 {
        const PK = 0x01;     // primary key
        const HIDDEN = 0x02; // auto-generated hidden column
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: SemiStr,
    pub pty: PreciseType,
    pub nullable: bool,
    pub attr: ColumnAttr,
    /// Default literal string, parsed through the type on demand.
    pub default_value: Option<SemiStr>,
    /// Default niladic function name, e.g. `current_timestamp`.
    pub default_fn: Option<SemiStr>,
    /// Identity generator backing this column.
    pub identity: Option<SequenceID>,
}

impl Column {
    #[inline]
    pub fn is_hidden_pk(&self) -> bool {
        self.attr.contains(ColumnAttr::HIDDEN | ColumnAttr::PK)
    }
}

/// One ancestor segment of a table's hKey: the ancestor's ordinal and
/// the positions of *this* table's columns that supply the segment
/// values. Precomputed by the builder so key construction never needs
/// to chase parent rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HKeySegment {
    pub ordinal: u16,
    pub source_cols: SmallVec<[usize; 4]>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub id: TableID,
    pub name: SemiStr,
    pub group: GroupID,
    pub parent: Option<TableID>,
    /// Position of this table within its group's hKey ordering.
    pub ordinal: u16,
    /// Distance from the group root.
    pub depth: u8,
    /// Schema version this table object belongs to. Two AIS instances
    /// holding the same table id still compare unequal here, which is
    /// what the online engine's identity guard relies on.
    pub version: u64,
    /// All columns, hidden primary key last when present.
    pub columns: Vec<Column>,
    /// Positions of primary key columns.
    pub pk: SmallVec<[usize; 4]>,
    pub indexes: Vec<TableIndex>,
    pub hkey_segments: Vec<HKeySegment>,
}

impl Table {
    #[inline]
    pub fn column(&self, name: &str) -> Option<(usize, &Column)> {
        self.columns
            .iter()
            .enumerate()
            .find(|(_, c)| c.name == name)
    }

    /// Field count including the hidden primary key.
    #[inline]
    pub fn field_count(&self) -> usize {
        self.columns.len()
    }

    #[inline]
    pub fn index(&self, name: &str) -> Option<&TableIndex> {
        self.indexes.iter().find(|i| i.name == name)
    }

    #[inline]
    pub fn has_hidden_pk(&self) -> bool {
        self.columns.last().map(Column::is_hidden_pk).unwrap_or(false)
    }

    #[inline]
    pub fn field_types(&self) -> Vec<PreciseType> {
        self.columns.iter().map(|c| c.pty).collect()
    }
}

#[derive(Debug, Clone)]
pub struct TableIndex {
    pub id: IndexID,
    pub name: SemiStr,
    pub table: TableID,
    pub columns: Vec<usize>,
    pub unique: bool,
    pub full_text: bool,
}

impl PartialEq for TableIndex {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TableIndex {}

impl Hash for TableIndex {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

#[derive(Debug, Clone)]
pub struct GroupIndex {
    pub id: IndexID,
    pub name: SemiStr,
    pub group: GroupID,
    /// Indexed columns in declaration order, each bound to a
    /// participating table of the group.
    pub columns: Vec<(TableID, usize)>,
    /// Deepest participating table. Entries exist once per row of this
    /// table; maintenance and builds are driven from it.
    pub leafmost: TableID,
}

impl PartialEq for GroupIndex {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for GroupIndex {}

impl Hash for GroupIndex {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

/// A resolved index of either kind. Identity (equality, hashing)
/// follows the underlying index id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IndexRef {
    Table(TableIndex),
    Group(GroupIndex),
}

impl IndexRef {
    #[inline]
    pub fn id(&self) -> IndexID {
        match self {
            IndexRef::Table(i) => i.id,
            IndexRef::Group(i) => i.id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub id: GroupID,
    pub name: SemiStr,
    pub root: TableID,
    /// Member tables in ordinal order, root first.
    pub tables: Vec<TableID>,
    pub indexes: Vec<GroupIndex>,
}

impl Group {
    #[inline]
    pub fn index(&self, name: &str) -> Option<&GroupIndex> {
        self.indexes.iter().find(|i| i.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequence {
    pub id: SequenceID,
    pub name: SemiStr,
    pub start: i64,
    pub increment: i64,
}

/// Ais is the immutable catalog snapshot of one schema version.
/// Cyclic references (table -> group -> tables) are modelled with ids
/// into the arena maps; the snapshot is always fully constructed before
/// anything observes it.
pub struct Ais {
    pub version: u64,
    tables: IndexMap<TableID, Table>,
    groups: IndexMap<GroupID, Group>,
    sequences: IndexMap<SequenceID, Sequence>,
    cache: Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl fmt::Debug for Ais {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ais")
            .field("version", &self.version)
            .field("tables", &self.tables.len())
            .field("groups", &self.groups.len())
            .finish()
    }
}

impl Ais {
    #[inline]
    pub fn table(&self, id: TableID) -> Option<&Table> {
        self.tables.get(&id)
    }

    #[inline]
    pub fn table_by_name(&self, name: &str) -> Option<&Table> {
        self.tables.values().find(|t| t.name == name)
    }

    #[inline]
    pub fn group(&self, id: GroupID) -> Option<&Group> {
        self.groups.get(&id)
    }

    #[inline]
    pub fn sequence(&self, id: SequenceID) -> Option<&Sequence> {
        self.sequences.get(&id)
    }

    #[inline]
    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    #[inline]
    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    #[inline]
    pub fn sequences(&self) -> impl Iterator<Item = &Sequence> {
        self.sequences.values()
    }

    /// Group of the given table. The table must belong to this snapshot.
    #[inline]
    pub fn group_of(&self, table: TableID) -> Option<&Group> {
        self.table(table).and_then(|t| self.group(t.group))
    }

    /// Fetches or builds a value cached for the lifetime of this
    /// snapshot, keyed by type. The builder runs outside the slot lock;
    /// a racing build is discarded in favor of the first one inserted.
    pub fn cached_value<V, F>(self: &Arc<Self>, build: F) -> Arc<V>
    where
        V: Any + Send + Sync,
        F: FnOnce(&Arc<Ais>) -> V,
    {
        let key = TypeId::of::<V>();
        if let Some(v) = self.cache.lock().get(&key) {
            return downcast_slot(v);
        }
        let built: Arc<dyn Any + Send + Sync> = Arc::new(build(self));
        let mut cache = self.cache.lock();
        let v = cache.entry(key).or_insert(built);
        downcast_slot(v)
    }
}

#[inline]
fn downcast_slot<V: Any + Send + Sync>(slot: &Arc<dyn Any + Send + Sync>) -> Arc<V> {
    match Arc::clone(slot).downcast::<V>() {
        Ok(v) => v,
        // slots are keyed by TypeId, so the stored type always matches
        Err(_) => unreachable!("cache slot type mismatch"),
    }
}
