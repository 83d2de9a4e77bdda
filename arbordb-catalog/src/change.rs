use crate::TableID;
use semistr::SemiStr;

/// Coarse classification of a schema change, totally ordered by
/// migration cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChangeLevel {
    /// Only nullability tightens; existing rows are verified, nothing
    /// is rewritten.
    MetadataNotNull,
    /// Indexes are added or dropped; rows keep their shape.
    Index,
    /// Row shape changes within the same group.
    Table,
    /// Row shape and/or parent-child grouping changes.
    Group,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Add,
    Drop,
    Modify,
}

/// A single per-column alteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnChange {
    pub kind: ChangeKind,
    pub old_name: Option<SemiStr>,
    pub new_name: Option<SemiStr>,
}

impl ColumnChange {
    #[inline]
    pub fn add(new_name: &str) -> Self {
        ColumnChange {
            kind: ChangeKind::Add,
            old_name: None,
            new_name: Some(SemiStr::new(new_name)),
        }
    }

    #[inline]
    pub fn drop(old_name: &str) -> Self {
        ColumnChange {
            kind: ChangeKind::Drop,
            old_name: Some(SemiStr::new(old_name)),
            new_name: None,
        }
    }

    #[inline]
    pub fn modify(old_name: &str, new_name: &str) -> Self {
        ColumnChange {
            kind: ChangeKind::Modify,
            old_name: Some(SemiStr::new(old_name)),
            new_name: Some(SemiStr::new(new_name)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    Table,
    Group,
    FullText,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexChange {
    pub kind: ChangeKind,
    pub index_kind: IndexKind,
    pub old_name: Option<SemiStr>,
    pub new_name: Option<SemiStr>,
}

impl IndexChange {
    #[inline]
    pub fn add(index_kind: IndexKind, new_name: &str) -> Self {
        IndexChange {
            kind: ChangeKind::Add,
            index_kind,
            old_name: None,
            new_name: Some(SemiStr::new(new_name)),
        }
    }

    #[inline]
    pub fn drop(index_kind: IndexKind, old_name: &str) -> Self {
        IndexChange {
            kind: ChangeKind::Drop,
            index_kind,
            old_name: Some(SemiStr::new(old_name)),
            new_name: None,
        }
    }

    #[inline]
    pub fn modify(index_kind: IndexKind, old_name: &str, new_name: &str) -> Self {
        IndexChange {
            kind: ChangeKind::Modify,
            index_kind,
            old_name: Some(SemiStr::new(old_name)),
            new_name: Some(SemiStr::new(new_name)),
        }
    }
}

/// All changes applied to one table within an online session.
/// Every change-set presented together must carry the same level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    pub table_id: TableID,
    pub level: ChangeLevel,
    pub column_changes: Vec<ColumnChange>,
    pub index_changes: Vec<IndexChange>,
}

impl ChangeSet {
    #[inline]
    pub fn new(table_id: TableID, level: ChangeLevel) -> Self {
        ChangeSet {
            table_id,
            level,
            column_changes: vec![],
            index_changes: vec![],
        }
    }

    #[inline]
    pub fn with_column(mut self, change: ColumnChange) -> Self {
        self.column_changes.push(change);
        self
    }

    #[inline]
    pub fn with_index(mut self, change: IndexChange) -> Self {
        self.index_changes.push(change);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_level_order() {
        assert!(ChangeLevel::MetadataNotNull < ChangeLevel::Index);
        assert!(ChangeLevel::Index < ChangeLevel::Table);
        assert!(ChangeLevel::Table < ChangeLevel::Group);
    }
}
