//! Change-set classification: reduce a session's change-sets to one
//! change level and resolve the indexes a change needs built.

use crate::error::{Error, Result};
use arbordb_catalog::{Ais, ChangeKind, ChangeLevel, ChangeSet, IndexKind, IndexRef};
use semistr::SemiStr;
use std::collections::HashSet;

/// Reduces the change-sets to their shared level. Fails closed on
/// empty input, level disagreement, and a table id appearing twice.
pub fn common_change_level(change_sets: &[ChangeSet]) -> Result<ChangeLevel> {
    let mut level = None;
    let mut seen = HashSet::new();
    for cs in change_sets {
        if !seen.insert(cs.table_id) {
            return Err(Error::DuplicateChangeSet(cs.table_id));
        }
        match level {
            None => level = Some(cs.level),
            Some(l) if l != cs.level => return Err(Error::MixedChangeLevels),
            Some(_) => {}
        }
    }
    level.ok_or(Error::EmptyChangeSets)
}

/// Resolves every ADD or MODIFY index referenced by the change-sets
/// against the new schema. A group index spanning several changed
/// tables resolves to one entry (set semantics on index identity).
pub fn find_indexes_to_build(change_sets: &[ChangeSet], ais: &Ais) -> Result<HashSet<IndexRef>> {
    let mut indexes = HashSet::new();
    for cs in change_sets {
        let table = ais
            .table(cs.table_id)
            .ok_or(arbordb_storage::error::Error::TableNotExists)?;
        for ic in &cs.index_changes {
            if !matches!(ic.kind, ChangeKind::Add | ChangeKind::Modify) {
                continue;
            }
            let name = ic
                .new_name
                .as_ref()
                .ok_or_else(|| Error::IndexNotFound(SemiStr::new("")))?;
            let resolved = match ic.index_kind {
                IndexKind::Table => table
                    .index(name)
                    .filter(|i| !i.full_text)
                    .map(|i| IndexRef::Table(i.clone())),
                IndexKind::FullText => table
                    .index(name)
                    .filter(|i| i.full_text)
                    .map(|i| IndexRef::Table(i.clone())),
                IndexKind::Group => ais
                    .group_of(table.id)
                    .and_then(|g| g.index(name))
                    .map(|i| IndexRef::Group(i.clone())),
            };
            let index = resolved.ok_or_else(|| Error::IndexNotFound(name.clone()))?;
            indexes.insert(index);
        }
    }
    Ok(indexes)
}
