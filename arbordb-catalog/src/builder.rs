//! Construction of immutable AIS snapshots. The builder assigns group
//! ordinals, appends hidden primary keys, and precomputes per-table
//! hKey segments by rewriting parent segments through the child join.

use crate::error::{Error, Result};
use crate::{
    Ais, Column, ColumnAttr, Group, GroupID, GroupIndex, HKeySegment, IndexID, Sequence,
    SequenceID, Table, TableID, TableIndex, HIDDEN_PK_NAME,
};
use arbordb_datatype::PreciseType;
use indexmap::IndexMap;
use parking_lot::Mutex;
use semistr::SemiStr;
use smallvec::SmallVec;
use std::collections::HashMap;

/// Allocator for object ids. Shared across schema versions so storage
/// namespaces never collide between an old and a new snapshot.
#[derive(Debug, Default)]
pub struct IdGen {
    table: u32,
    group: u32,
    index: u32,
    sequence: u32,
}

impl IdGen {
    #[inline]
    pub fn new() -> Self {
        IdGen::default()
    }

    #[inline]
    pub fn next_table(&mut self) -> TableID {
        self.table += 1;
        TableID::new(self.table)
    }

    #[inline]
    pub fn next_group(&mut self) -> GroupID {
        self.group += 1;
        GroupID::new(self.group)
    }

    #[inline]
    pub fn next_index(&mut self) -> IndexID {
        self.index += 1;
        IndexID::new(self.index)
    }

    #[inline]
    pub fn next_sequence(&mut self) -> SequenceID {
        self.sequence += 1;
        SequenceID::new(self.sequence)
    }
}

#[derive(Debug, Clone)]
pub struct ColumnSpec {
    name: SemiStr,
    pty: PreciseType,
    nullable: bool,
    default_value: Option<SemiStr>,
    default_fn: Option<SemiStr>,
    identity: Option<SequenceID>,
}

impl ColumnSpec {
    #[inline]
    pub fn new(name: &str, pty: PreciseType) -> Self {
        ColumnSpec {
            name: SemiStr::new(name),
            pty,
            nullable: true,
            default_value: None,
            default_fn: None,
            identity: None,
        }
    }

    #[inline]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    #[inline]
    pub fn default_value(mut self, literal: &str) -> Self {
        self.default_value = Some(SemiStr::new(literal));
        self
    }

    #[inline]
    pub fn default_fn(mut self, name: &str) -> Self {
        self.default_fn = Some(SemiStr::new(name));
        self
    }

    #[inline]
    pub fn identity(mut self, seq: SequenceID) -> Self {
        self.identity = Some(seq);
        self
    }
}

#[derive(Debug, Clone)]
pub struct TableIndexSpec {
    name: SemiStr,
    columns: Vec<SemiStr>,
    unique: bool,
    full_text: bool,
    id: Option<IndexID>,
}

impl TableIndexSpec {
    #[inline]
    pub fn new(name: &str, columns: &[&str]) -> Self {
        TableIndexSpec {
            name: SemiStr::new(name),
            columns: columns.iter().map(|c| SemiStr::new(c)).collect(),
            unique: false,
            full_text: false,
            id: None,
        }
    }

    #[inline]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    #[inline]
    pub fn full_text(mut self) -> Self {
        self.full_text = true;
        self
    }

    /// Pins the index id, preserving the index storage space across
    /// schema versions.
    #[inline]
    pub fn with_id(mut self, id: IndexID) -> Self {
        self.id = Some(id);
        self
    }
}

#[derive(Debug, Clone)]
pub struct JoinSpec {
    parent: TableID,
    /// (child column, parent column) pairs.
    columns: Vec<(SemiStr, SemiStr)>,
}

#[derive(Debug, Clone)]
pub struct TableSpec {
    name: SemiStr,
    id: Option<TableID>,
    columns: Vec<ColumnSpec>,
    pk: Vec<SemiStr>,
    join: Option<JoinSpec>,
    pin_group: Option<GroupID>,
    indexes: Vec<TableIndexSpec>,
}

impl TableSpec {
    #[inline]
    pub fn new(name: &str) -> Self {
        TableSpec {
            name: SemiStr::new(name),
            id: None,
            columns: vec![],
            pk: vec![],
            join: None,
            pin_group: None,
            indexes: vec![],
        }
    }

    /// Pins the table id. Used when evolving a schema so the new
    /// snapshot keeps the old ids.
    #[inline]
    pub fn with_id(mut self, id: TableID) -> Self {
        self.id = Some(id);
        self
    }

    #[inline]
    pub fn column(mut self, spec: ColumnSpec) -> Self {
        self.columns.push(spec);
        self
    }

    #[inline]
    pub fn pk(mut self, columns: &[&str]) -> Self {
        self.pk = columns.iter().map(|c| SemiStr::new(c)).collect();
        self
    }

    /// Declares this table a child of `parent`, joined on
    /// (child column, parent column) pairs covering the parent key.
    #[inline]
    pub fn child_of(mut self, parent: TableID, join: &[(&str, &str)]) -> Self {
        self.join = Some(JoinSpec {
            parent,
            columns: join
                .iter()
                .map(|(c, p)| (SemiStr::new(c), SemiStr::new(p)))
                .collect(),
        });
        self
    }

    /// Pins the group id, keeping the group storage space of a prior
    /// schema version. Only meaningful on root tables.
    #[inline]
    pub fn pin_group(mut self, group: GroupID) -> Self {
        self.pin_group = Some(group);
        self
    }

    #[inline]
    pub fn index(mut self, spec: TableIndexSpec) -> Self {
        self.indexes.push(spec);
        self
    }
}

#[derive(Debug, Clone)]
pub struct SequenceSpec {
    name: SemiStr,
    start: i64,
    increment: i64,
    id: Option<SequenceID>,
}

impl SequenceSpec {
    #[inline]
    pub fn new(name: &str, start: i64, increment: i64) -> Self {
        SequenceSpec {
            name: SemiStr::new(name),
            start,
            increment,
            id: None,
        }
    }

    #[inline]
    pub fn with_id(mut self, id: SequenceID) -> Self {
        self.id = Some(id);
        self
    }
}

#[derive(Debug, Clone)]
pub struct GroupIndexSpec {
    name: SemiStr,
    /// (table, column name) in declaration order.
    columns: Vec<(TableID, SemiStr)>,
    id: Option<IndexID>,
}

impl GroupIndexSpec {
    #[inline]
    pub fn new(name: &str, columns: &[(TableID, &str)]) -> Self {
        GroupIndexSpec {
            name: SemiStr::new(name),
            columns: columns
                .iter()
                .map(|(t, c)| (*t, SemiStr::new(c)))
                .collect(),
            id: None,
        }
    }

    #[inline]
    pub fn with_id(mut self, id: IndexID) -> Self {
        self.id = Some(id);
        self
    }
}

pub struct AisBuilder<'a> {
    version: u64,
    ids: &'a mut IdGen,
    tables: IndexMap<TableID, Table>,
    groups: IndexMap<GroupID, Group>,
    sequences: IndexMap<SequenceID, Sequence>,
}

impl<'a> AisBuilder<'a> {
    #[inline]
    pub fn new(version: u64, ids: &'a mut IdGen) -> Self {
        AisBuilder {
            version,
            ids,
            tables: IndexMap::new(),
            groups: IndexMap::new(),
            sequences: IndexMap::new(),
        }
    }

    pub fn sequence(&mut self, spec: SequenceSpec) -> SequenceID {
        let id = spec.id.unwrap_or_else(|| self.ids.next_sequence());
        self.sequences.insert(
            id,
            Sequence {
                id,
                name: spec.name,
                start: spec.start,
                increment: spec.increment,
            },
        );
        id
    }

    pub fn table(&mut self, spec: TableSpec) -> Result<TableID> {
        if self.tables.values().any(|t| t.name == spec.name) {
            return Err(Error::TableAlreadyExists(spec.name));
        }
        let id = spec.id.unwrap_or_else(|| self.ids.next_table());
        let mut columns = Vec::with_capacity(spec.columns.len() + 1);
        for cs in &spec.columns {
            if columns.iter().any(|c: &Column| c.name == cs.name) {
                return Err(Error::ColumnNameNotUnique(cs.name.clone()));
            }
            columns.push(Column {
                name: cs.name.clone(),
                pty: cs.pty,
                nullable: cs.nullable,
                attr: ColumnAttr::empty(),
                default_value: cs.default_value.clone(),
                default_fn: cs.default_fn.clone(),
                identity: cs.identity,
            });
        }
        // resolve or synthesize the primary key
        let mut pk: SmallVec<[usize; 4]> = SmallVec::new();
        if spec.pk.is_empty() {
            let seq = self.sequence(SequenceSpec::new(
                &format!("{}_{}", spec.name, HIDDEN_PK_NAME),
                1,
                1,
            ));
            columns.push(Column {
                name: SemiStr::new(HIDDEN_PK_NAME),
                pty: PreciseType::i64(),
                nullable: false,
                attr: ColumnAttr::PK | ColumnAttr::HIDDEN,
                default_value: None,
                default_fn: None,
                identity: Some(seq),
            });
            pk.push(columns.len() - 1);
        } else {
            for name in &spec.pk {
                let pos = columns
                    .iter()
                    .position(|c| &c.name == name)
                    .ok_or_else(|| Error::PrimaryKeyColumnNotExists(name.clone()))?;
                columns[pos].attr |= ColumnAttr::PK;
                pk.push(pos);
            }
        }

        let (group, parent, ordinal, depth, mut hkey_segments) = match &spec.join {
            Some(join) => {
                let parent = self
                    .tables
                    .get(&join.parent)
                    .ok_or(Error::TableNotExists)?;
                // parent column position -> child column position
                let mut join_map = HashMap::new();
                for (child_name, parent_name) in &join.columns {
                    let (ppos, _) = parent
                        .column(parent_name)
                        .ok_or_else(|| Error::ColumnNotExists(parent_name.clone()))?;
                    let cpos = columns
                        .iter()
                        .position(|c| &c.name == child_name)
                        .ok_or_else(|| Error::ColumnNotExists(child_name.clone()))?;
                    join_map.insert(ppos, cpos);
                }
                let mut segments = Vec::with_capacity(parent.hkey_segments.len() + 1);
                for seg in &parent.hkey_segments {
                    let mut source_cols = SmallVec::new();
                    for &p in &seg.source_cols {
                        let c = join_map.get(&p).ok_or(Error::HKeyUnderivable(p))?;
                        source_cols.push(*c);
                    }
                    segments.push(HKeySegment {
                        ordinal: seg.ordinal,
                        source_cols,
                    });
                }
                let group = self.groups.get_mut(&parent.group).expect("parent group");
                let ordinal = group.tables.len() as u16 + 1;
                (parent.group, Some(join.parent), ordinal, parent.depth + 1, segments)
            }
            None => {
                let gid = spec.pin_group.unwrap_or_else(|| self.ids.next_group());
                if self.groups.contains_key(&gid) {
                    return Err(Error::TableAlreadyExists(spec.name));
                }
                self.groups.insert(
                    gid,
                    Group {
                        id: gid,
                        name: spec.name.clone(),
                        root: id,
                        tables: vec![],
                        indexes: vec![],
                    },
                );
                (gid, None, 1, 0, vec![])
            }
        };
        hkey_segments.push(HKeySegment {
            ordinal,
            source_cols: pk.clone(),
        });

        let mut indexes = Vec::with_capacity(spec.indexes.len());
        for is in &spec.indexes {
            let mut cols = Vec::with_capacity(is.columns.len());
            for name in &is.columns {
                let pos = columns
                    .iter()
                    .position(|c| &c.name == name)
                    .ok_or_else(|| Error::ColumnNotExists(name.clone()))?;
                cols.push(pos);
            }
            indexes.push(TableIndex {
                id: is.id.unwrap_or_else(|| self.ids.next_index()),
                name: is.name.clone(),
                table: id,
                columns: cols,
                unique: is.unique,
                full_text: is.full_text,
            });
        }

        self.groups.get_mut(&group).expect("group").tables.push(id);
        self.tables.insert(
            id,
            Table {
                id,
                name: spec.name,
                group,
                parent,
                ordinal,
                depth,
                version: self.version,
                columns,
                pk,
                indexes,
                hkey_segments,
            },
        );
        Ok(id)
    }

    pub fn group_index(&mut self, spec: GroupIndexSpec) -> Result<IndexID> {
        if spec.columns.is_empty() {
            return Err(Error::GroupIndexEmpty);
        }
        let mut group = None;
        let mut leafmost: Option<(u8, TableID)> = None;
        let mut columns = Vec::with_capacity(spec.columns.len());
        for (tid, name) in &spec.columns {
            let table = self.tables.get(tid).ok_or(Error::TableNotExists)?;
            match group {
                None => group = Some(table.group),
                Some(g) if g != table.group => return Err(Error::GroupIndexSpansGroups),
                _ => {}
            }
            if leafmost.map(|(d, _)| table.depth > d).unwrap_or(true) {
                leafmost = Some((table.depth, table.id));
            }
            let (pos, _) = table
                .column(name)
                .ok_or_else(|| Error::ColumnNotExists(name.clone()))?;
            columns.push((*tid, pos));
        }
        let group = group.expect("non-empty columns");
        let id = spec.id.unwrap_or_else(|| self.ids.next_index());
        let gi = GroupIndex {
            id,
            name: spec.name,
            group,
            columns,
            leafmost: leafmost.expect("non-empty columns").1,
        };
        self.groups
            .get_mut(&group)
            .expect("group")
            .indexes
            .push(gi);
        Ok(id)
    }

    pub fn finish(self) -> Ais {
        Ais {
            version: self.version,
            tables: self.tables,
            groups: self.groups,
            sequences: self.sequences,
            cache: Mutex::new(HashMap::new()),
        }
    }
}
