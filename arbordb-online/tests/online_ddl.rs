//! End-to-end scenarios for the online schema change engine over the
//! in-memory engine: scanner and writer racing over the same rows,
//! level-specific maintenance, and failure paths.

use arbordb_catalog::{
    Ais, AisBuilder, ChangeLevel, ChangeSet, ColumnChange, ColumnSpec, GroupIndexSpec, IdGen,
    IndexChange, IndexKind, TableID, TableIndexSpec, TableSpec,
};
use arbordb_datatype::{Const, PreciseType};
use arbordb_expr::TypesRegistry;
use arbordb_online::error::Error;
use arbordb_online::OnlineChangeEngine;
use arbordb_storage::error::Error as StorageError;
use arbordb_storage::hkey::HKey;
use arbordb_storage::mem::MemEngine;
use arbordb_storage::store::{SchemaManager, Session, Store, TransactionService};
use std::sync::Arc;

fn online_engine(mem: &Arc<MemEngine>, with_concurrent_dml: bool) -> Arc<OnlineChangeEngine> {
    let engine = Arc::new(OnlineChangeEngine::new(
        mem.clone() as Arc<dyn TransactionService>,
        mem.clone() as Arc<dyn SchemaManager>,
        mem.clone() as Arc<dyn Store>,
        Arc::new(TypesRegistry::default()),
        with_concurrent_dml,
    ));
    mem.register_listener(engine.clone());
    engine
}

fn seed_rows(mem: &MemEngine, table: TableID, rows: Vec<Vec<Const>>) -> Vec<HKey> {
    let session = Session::new(1000);
    mem.begin_transaction(&session);
    let keys = rows
        .into_iter()
        .map(|fields| mem.insert_row(&session, table, fields).unwrap())
        .collect();
    mem.commit_transaction(&session).unwrap();
    keys
}

#[test]
fn test_alter_adds_column_with_default_literal() {
    let mut ids = IdGen::new();
    let (old_ais, t) = {
        let mut b = AisBuilder::new(1, &mut ids);
        let t = b
            .table(
                TableSpec::new("orders")
                    .column(ColumnSpec::new("id", PreciseType::i64()).not_null())
                    .pk(&["id"]),
            )
            .unwrap();
        (Arc::new(b.finish()), t)
    };
    let new_ais = {
        let mut b = AisBuilder::new(2, &mut ids);
        b.table(
            TableSpec::new("orders")
                .with_id(t)
                .column(ColumnSpec::new("id", PreciseType::i64()).not_null())
                .column(ColumnSpec::new("c", PreciseType::varchar(8)).default_value("x"))
                .pk(&["id"]),
        )
        .unwrap();
        Arc::new(b.finish())
    };
    let mem = MemEngine::new(old_ais.clone());
    seed_rows(
        &mem,
        t,
        vec![
            vec![Const::I64(1)],
            vec![Const::I64(2)],
            vec![Const::I64(3)],
        ],
    );
    mem.set_online(
        vec![ChangeSet::new(t, ChangeLevel::Table).with_column(ColumnChange::add("c"))],
        new_ais.clone(),
    );
    let online = online_engine(&mem, true);

    let session = Session::new(1);
    online.alter_table(&session, None).unwrap();

    let new_group = new_ais.table(t).unwrap().group;
    let rows = mem.committed_group_rows(new_group);
    assert_eq!(rows.len(), 3);
    for (i, (_, table, fields)) in rows.iter().enumerate() {
        assert_eq!(*table, t);
        assert_eq!(fields[0], Const::I64(i as i64 + 1));
        assert_eq!(fields[1], Const::from("x"));
    }
}

#[test]
fn test_alter_widens_int_column() {
    let mut ids = IdGen::new();
    let (old_ais, t) = {
        let mut b = AisBuilder::new(1, &mut ids);
        let t = b
            .table(
                TableSpec::new("t")
                    .column(ColumnSpec::new("a", PreciseType::i32()).not_null())
                    .pk(&["a"]),
            )
            .unwrap();
        (Arc::new(b.finish()), t)
    };
    let new_ais = {
        let mut b = AisBuilder::new(2, &mut ids);
        b.table(
            TableSpec::new("t")
                .with_id(t)
                .column(ColumnSpec::new("a", PreciseType::i64()).not_null())
                .pk(&["a"]),
        )
        .unwrap();
        Arc::new(b.finish())
    };
    let mem = MemEngine::new(old_ais);
    seed_rows(&mem, t, vec![vec![Const::I64(2147483647)]]);
    mem.set_online(
        vec![ChangeSet::new(t, ChangeLevel::Table).with_column(ColumnChange::modify("a", "a"))],
        new_ais.clone(),
    );
    let online = online_engine(&mem, true);
    online.alter_table(&Session::new(1), None).unwrap();

    let rows = mem.committed_group_rows(new_ais.table(t).unwrap().group);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].2, vec![Const::I64(2147483647)]);
}

/// Parent/child group whose new schema adds a `tag` column to the
/// parent and leaves the child's shape untouched.
fn parent_child_alter_fixture() -> (Arc<Ais>, Arc<Ais>, TableID, TableID) {
    let mut ids = IdGen::new();
    let (old_ais, parent, child) = {
        let mut b = AisBuilder::new(1, &mut ids);
        let parent = b
            .table(
                TableSpec::new("p")
                    .column(ColumnSpec::new("a", PreciseType::i64()).not_null())
                    .column(ColumnSpec::new("v", PreciseType::varchar(8)))
                    .pk(&["a"]),
            )
            .unwrap();
        let child = b
            .table(
                TableSpec::new("c")
                    .column(ColumnSpec::new("x", PreciseType::i64()).not_null())
                    .column(ColumnSpec::new("pa", PreciseType::i64()).not_null())
                    .column(ColumnSpec::new("w", PreciseType::varchar(8)))
                    .pk(&["x"])
                    .child_of(parent, &[("pa", "a")]),
            )
            .unwrap();
        (Arc::new(b.finish()), parent, child)
    };
    let new_ais = {
        let mut b = AisBuilder::new(2, &mut ids);
        let p = b
            .table(
                TableSpec::new("p")
                    .with_id(parent)
                    .column(ColumnSpec::new("a", PreciseType::i64()).not_null())
                    .column(ColumnSpec::new("v", PreciseType::varchar(8)))
                    .column(ColumnSpec::new("tag", PreciseType::varchar(8)).default_value("x"))
                    .pk(&["a"]),
            )
            .unwrap();
        b.table(
            TableSpec::new("c")
                .with_id(child)
                .column(ColumnSpec::new("x", PreciseType::i64()).not_null())
                .column(ColumnSpec::new("pa", PreciseType::i64()).not_null())
                .column(ColumnSpec::new("w", PreciseType::varchar(8)))
                .pk(&["x"])
                .child_of(p, &[("pa", "a")]),
        )
        .unwrap();
        Arc::new(b.finish())
    };
    (old_ais, new_ais, parent, child)
}

#[test]
fn test_alter_multi_table_group_rewrites_untouched_sibling() {
    let (old_ais, new_ais, parent, child) = parent_child_alter_fixture();
    let mem = MemEngine::new(old_ais);
    seed_rows(
        &mem,
        parent,
        vec![
            vec![Const::I64(1), Const::from("pv1")],
            vec![Const::I64(2), Const::from("pv2")],
        ],
    );
    seed_rows(
        &mem,
        child,
        vec![
            vec![Const::I64(10), Const::I64(1), Const::from("cw1")],
            vec![Const::I64(11), Const::I64(2), Const::from("cw2")],
        ],
    );
    mem.set_online(
        vec![
            ChangeSet::new(parent, ChangeLevel::Table).with_column(ColumnChange::add("tag")),
            // untouched group members still carry a change-set; their
            // rows rewrite as overlays
            ChangeSet::new(child, ChangeLevel::Table),
        ],
        new_ais.clone(),
    );
    let online = online_engine(&mem, true);
    online.alter_table(&Session::new(1), None).unwrap();

    let new_group = new_ais.table(parent).unwrap().group;
    let rows = mem.committed_group_rows(new_group);
    assert_eq!(rows.len(), 4);
    // group order interleaves parents with their children
    assert_eq!(rows[0].1, parent);
    assert_eq!(
        rows[0].2,
        vec![Const::I64(1), Const::from("pv1"), Const::from("x")]
    );
    assert_eq!(rows[1].1, child);
    assert_eq!(
        rows[1].2,
        vec![Const::I64(10), Const::I64(1), Const::from("cw1")]
    );
    assert_eq!(rows[2].1, parent);
    assert_eq!(
        rows[2].2,
        vec![Const::I64(2), Const::from("pv2"), Const::from("x")]
    );
    assert_eq!(rows[3].1, child);
    assert_eq!(
        rows[3].2,
        vec![Const::I64(11), Const::I64(2), Const::from("cw2")]
    );
}

#[test]
fn test_alter_requires_change_set_for_every_group_member() {
    let (old_ais, new_ais, parent, child) = parent_child_alter_fixture();
    let old_group = old_ais.table(parent).unwrap().group;
    let mem = MemEngine::new(old_ais);
    seed_rows(&mem, parent, vec![vec![Const::I64(1), Const::from("pv")]]);
    seed_rows(
        &mem,
        child,
        vec![vec![Const::I64(10), Const::I64(1), Const::from("cw")]],
    );
    // the sibling's change-set is missing, so the full group scan hits
    // a row with no transform
    mem.set_online(
        vec![ChangeSet::new(parent, ChangeLevel::Table).with_column(ColumnChange::add("tag"))],
        new_ais.clone(),
    );
    let online = online_engine(&mem, true);

    match online.alter_table(&Session::new(1), None) {
        Err(Error::TransformNotFound(t)) => assert_eq!(t, child),
        other => panic!("unexpected {:?}", other),
    }
    // the scan transaction rolled back: no partial new-schema state
    // escaped and the old group is untouched
    let new_group = new_ais.table(parent).unwrap().group;
    assert!(mem.committed_group_rows(new_group).is_empty());
    assert_eq!(mem.committed_group_rows(old_group).len(), 2);
}

#[test]
fn test_check_constraints_flags_null_row() {
    let mut ids = IdGen::new();
    let (old_ais, t, group) = {
        let mut b = AisBuilder::new(1, &mut ids);
        let t = b
            .table(
                TableSpec::new("t")
                    .column(ColumnSpec::new("a", PreciseType::i64()).not_null())
                    .column(ColumnSpec::new("b", PreciseType::varchar(8)))
                    .pk(&["a"]),
            )
            .unwrap();
        let ais = Arc::new(b.finish());
        let group = ais.table(t).unwrap().group;
        (ais, t, group)
    };
    let new_ais = {
        let mut b = AisBuilder::new(2, &mut ids);
        b.table(
            TableSpec::new("t")
                .with_id(t)
                .pin_group(group)
                .column(ColumnSpec::new("a", PreciseType::i64()).not_null())
                .column(ColumnSpec::new("b", PreciseType::varchar(8)).not_null())
                .pk(&["a"]),
        )
        .unwrap();
        Arc::new(b.finish())
    };
    let mem = MemEngine::new(old_ais);
    seed_rows(
        &mem,
        t,
        vec![
            vec![Const::I64(1), Const::from("x")],
            vec![Const::I64(2), Const::from("y")],
            vec![Const::I64(3), Const::Null],
        ],
    );
    let before = mem.committed_group_rows(group);
    mem.set_online(
        vec![
            ChangeSet::new(t, ChangeLevel::MetadataNotNull)
                .with_column(ColumnChange::modify("b", "b")),
        ],
        new_ais,
    );
    let online = online_engine(&mem, true);

    match online.check_table_constraints(&Session::new(1), None) {
        Err(Error::Storage(StorageError::NotNullViolation { column, .. })) => {
            assert_eq!(column, "b");
        }
        other => panic!("unexpected {:?}", other),
    }
    // read-only: nothing mutated
    assert_eq!(mem.committed_group_rows(group), before);
}

#[test]
fn test_check_constraints_passes_clean_table() {
    let mut ids = IdGen::new();
    let (old_ais, t, group) = {
        let mut b = AisBuilder::new(1, &mut ids);
        let t = b
            .table(
                TableSpec::new("t")
                    .column(ColumnSpec::new("a", PreciseType::i64()).not_null())
                    .column(ColumnSpec::new("b", PreciseType::varchar(8)))
                    .pk(&["a"]),
            )
            .unwrap();
        let ais = Arc::new(b.finish());
        let group = ais.table(t).unwrap().group;
        (ais, t, group)
    };
    let new_ais = {
        let mut b = AisBuilder::new(2, &mut ids);
        b.table(
            TableSpec::new("t")
                .with_id(t)
                .pin_group(group)
                .column(ColumnSpec::new("a", PreciseType::i64()).not_null())
                .column(ColumnSpec::new("b", PreciseType::varchar(8)).not_null())
                .pk(&["a"]),
        )
        .unwrap();
        Arc::new(b.finish())
    };
    let mem = MemEngine::new(old_ais);
    seed_rows(
        &mem,
        t,
        vec![
            vec![Const::I64(1), Const::from("x")],
            vec![Const::I64(2), Const::from("y")],
        ],
    );
    let before = mem.committed_group_rows(group);
    mem.set_online(
        vec![
            ChangeSet::new(t, ChangeLevel::MetadataNotNull)
                .with_column(ColumnChange::modify("b", "b")),
        ],
        new_ais,
    );
    let online = online_engine(&mem, true);
    online
        .check_table_constraints(&Session::new(1), None)
        .unwrap();
    assert_eq!(mem.committed_group_rows(group), before);
}

#[test]
fn test_index_build_skips_concurrently_inserted_row() {
    let mut ids = IdGen::new();
    let (old_ais, t, group) = {
        let mut b = AisBuilder::new(1, &mut ids);
        let t = b
            .table(
                TableSpec::new("t")
                    .column(ColumnSpec::new("a", PreciseType::i64()).not_null())
                    .column(ColumnSpec::new("c", PreciseType::i64()))
                    .pk(&["a"]),
            )
            .unwrap();
        let ais = Arc::new(b.finish());
        let group = ais.table(t).unwrap().group;
        (ais, t, group)
    };
    let new_ais = {
        let mut b = AisBuilder::new(2, &mut ids);
        b.table(
            TableSpec::new("t")
                .with_id(t)
                .pin_group(group)
                .column(ColumnSpec::new("a", PreciseType::i64()).not_null())
                .column(ColumnSpec::new("c", PreciseType::i64()))
                .pk(&["a"])
                .index(TableIndexSpec::new("idx_c", &["c"])),
        )
        .unwrap();
        Arc::new(b.finish())
    };
    let idx = new_ais.table(t).unwrap().index("idx_c").unwrap().id;
    let mem = MemEngine::new(old_ais);
    seed_rows(
        &mem,
        t,
        vec![
            vec![Const::I64(1), Const::I64(10)],
            vec![Const::I64(2), Const::I64(20)],
        ],
    );
    mem.set_online(
        vec![ChangeSet::new(t, ChangeLevel::Index)
            .with_index(IndexChange::add(IndexKind::Table, "idx_c"))],
        new_ais,
    );
    let online = online_engine(&mem, true);

    // writer lands a row before the scanner reaches it; the hook
    // maintains the new index and records the hKey
    let writer = Session::new(2);
    mem.begin_transaction(&writer);
    mem.insert_row(&writer, t, vec![Const::I64(3), Const::I64(30)])
        .unwrap();
    mem.commit_transaction(&writer).unwrap();
    assert_eq!(mem.handled_hkeys(t).len(), 1);
    assert_eq!(mem.committed_index_entries(idx).len(), 1);

    online.build_indexes(&Session::new(1), None).unwrap();

    // exactly {10, 20, 30}, each at most once
    let entries = mem.committed_index_entries(idx);
    assert_eq!(entries.len(), 3);
    let keys: std::collections::HashSet<_> = entries.iter().map(|(k, _)| k.clone()).collect();
    assert_eq!(keys.len(), 3);

    // a delete after the build is mirrored into the new index
    let gone = entries[0].1.clone();
    mem.begin_transaction(&writer);
    mem.delete_row_dml(&writer, t, &gone).unwrap();
    mem.commit_transaction(&writer).unwrap();
    assert_eq!(mem.committed_index_entries(idx).len(), 2);
}

#[test]
fn test_index_build_with_writer_thread() {
    let mut ids = IdGen::new();
    let (old_ais, t, group) = {
        let mut b = AisBuilder::new(1, &mut ids);
        let t = b
            .table(
                TableSpec::new("t")
                    .column(ColumnSpec::new("a", PreciseType::i64()).not_null())
                    .column(ColumnSpec::new("c", PreciseType::i64()))
                    .pk(&["a"]),
            )
            .unwrap();
        let ais = Arc::new(b.finish());
        let group = ais.table(t).unwrap().group;
        (ais, t, group)
    };
    let new_ais = {
        let mut b = AisBuilder::new(2, &mut ids);
        b.table(
            TableSpec::new("t")
                .with_id(t)
                .pin_group(group)
                .column(ColumnSpec::new("a", PreciseType::i64()).not_null())
                .column(ColumnSpec::new("c", PreciseType::i64()))
                .pk(&["a"])
                .index(TableIndexSpec::new("idx_c", &["c"])),
        )
        .unwrap();
        Arc::new(b.finish())
    };
    let idx = new_ais.table(t).unwrap().index("idx_c").unwrap().id;
    let mem = MemEngine::new(old_ais);
    let seeded: Vec<Vec<Const>> = (1..=50)
        .map(|v| vec![Const::I64(v), Const::I64(v * 10)])
        .collect();
    seed_rows(&mem, t, seeded);
    mem.set_commit_period(7);
    mem.set_online(
        vec![ChangeSet::new(t, ChangeLevel::Index)
            .with_index(IndexChange::add(IndexKind::Table, "idx_c"))],
        new_ais,
    );
    let online = online_engine(&mem, true);

    let writer_mem = mem.clone();
    let writer = std::thread::spawn(move || {
        let session = Session::new(2);
        for v in 51..=60i64 {
            writer_mem.begin_transaction(&session);
            writer_mem
                .insert_row(&session, t, vec![Const::I64(v), Const::I64(v * 10)])
                .unwrap();
            writer_mem.commit_transaction(&session).unwrap();
        }
    });
    online.build_indexes(&Session::new(1), None).unwrap();
    writer.join().unwrap();

    // whatever the interleaving, the index holds exactly one entry per
    // row across scanner and writer paths
    let entries = mem.committed_index_entries(idx);
    assert_eq!(entries.len(), 60);
}

#[test]
fn test_group_index_build_flattens_branch() {
    let mut ids = IdGen::new();
    let (old_ais, parent, child, group) = {
        let mut b = AisBuilder::new(1, &mut ids);
        let parent = b
            .table(
                TableSpec::new("p")
                    .column(ColumnSpec::new("a", PreciseType::i64()).not_null())
                    .column(ColumnSpec::new("v", PreciseType::varchar(8)))
                    .pk(&["a"]),
            )
            .unwrap();
        let child = b
            .table(
                TableSpec::new("c")
                    .column(ColumnSpec::new("x", PreciseType::i64()).not_null())
                    .column(ColumnSpec::new("pa", PreciseType::i64()).not_null())
                    .column(ColumnSpec::new("w", PreciseType::varchar(8)))
                    .pk(&["x"])
                    .child_of(parent, &[("pa", "a")]),
            )
            .unwrap();
        let ais = Arc::new(b.finish());
        let group = ais.table(parent).unwrap().group;
        (ais, parent, child, group)
    };
    let new_ais = {
        let mut b = AisBuilder::new(2, &mut ids);
        let p = b
            .table(
                TableSpec::new("p")
                    .with_id(parent)
                    .pin_group(group)
                    .column(ColumnSpec::new("a", PreciseType::i64()).not_null())
                    .column(ColumnSpec::new("v", PreciseType::varchar(8)))
                    .pk(&["a"]),
            )
            .unwrap();
        let c = b
            .table(
                TableSpec::new("c")
                    .with_id(child)
                    .column(ColumnSpec::new("x", PreciseType::i64()).not_null())
                    .column(ColumnSpec::new("pa", PreciseType::i64()).not_null())
                    .column(ColumnSpec::new("w", PreciseType::varchar(8)))
                    .pk(&["x"])
                    .child_of(p, &[("pa", "a")]),
            )
            .unwrap();
        b.group_index(GroupIndexSpec::new("gi_vw", &[(p, "v"), (c, "w")]))
            .unwrap();
        Arc::new(b.finish())
    };
    let gi = new_ais
        .group_of(parent)
        .unwrap()
        .index("gi_vw")
        .unwrap()
        .id;
    let mem = MemEngine::new(old_ais);
    seed_rows(&mem, parent, vec![vec![Const::I64(1), Const::from("pv")]]);
    seed_rows(
        &mem,
        child,
        vec![vec![Const::I64(10), Const::I64(1), Const::from("cw")]],
    );
    mem.set_online(
        vec![
            ChangeSet::new(parent, ChangeLevel::Index)
                .with_index(IndexChange::add(IndexKind::Group, "gi_vw")),
            ChangeSet::new(child, ChangeLevel::Index)
                .with_index(IndexChange::add(IndexKind::Group, "gi_vw")),
        ],
        new_ais,
    );
    let online = online_engine(&mem, true);

    // a branch row arriving concurrently is maintained by the hook
    let writer = Session::new(2);
    mem.begin_transaction(&writer);
    mem.insert_row(
        &writer,
        child,
        vec![Const::I64(11), Const::I64(1), Const::from("cw2")],
    )
    .unwrap();
    mem.commit_transaction(&writer).unwrap();
    assert_eq!(mem.committed_index_entries(gi).len(), 1);

    online.build_indexes(&Session::new(1), None).unwrap();
    // one entry per child row, composed with the parent's value
    assert_eq!(mem.committed_index_entries(gi).len(), 2);
}

#[test]
fn test_writer_promotion_then_scanner_skip() {
    let mut ids = IdGen::new();
    let (old_ais, t) = {
        let mut b = AisBuilder::new(1, &mut ids);
        let t = b
            .table(
                TableSpec::new("t")
                    .column(ColumnSpec::new("a", PreciseType::i64()).not_null())
                    .column(ColumnSpec::new("b", PreciseType::varchar(8)))
                    .pk(&["a"]),
            )
            .unwrap();
        (Arc::new(b.finish()), t)
    };
    let new_ais = {
        let mut b = AisBuilder::new(2, &mut ids);
        b.table(
            TableSpec::new("t")
                .with_id(t)
                .column(ColumnSpec::new("a", PreciseType::i64()).not_null())
                .column(ColumnSpec::new("b", PreciseType::varchar(8)))
                .column(ColumnSpec::new("c", PreciseType::varchar(8)).default_value("x"))
                .pk(&["a"]),
        )
        .unwrap();
        Arc::new(b.finish())
    };
    let mem = MemEngine::new(old_ais);
    let keys = seed_rows(
        &mem,
        t,
        vec![
            vec![Const::I64(1), Const::from("old1")],
            vec![Const::I64(2), Const::from("old2")],
        ],
    );
    mem.set_online(
        vec![ChangeSet::new(t, ChangeLevel::Table).with_column(ColumnChange::add("c"))],
        new_ais.clone(),
    );
    let online = online_engine(&mem, true);
    let new_group = new_ais.table(t).unwrap().group;

    // writer updates row 1 before the scanner starts: the hook
    // projects it into the new space (the delete of the not yet
    // promoted pre-image is non-fatal) and records the hKey
    let writer = Session::new(2);
    mem.begin_transaction(&writer);
    mem.update_row(&writer, t, &keys[0], vec![Const::I64(1), Const::from("upd")])
        .unwrap();
    mem.commit_transaction(&writer).unwrap();
    assert_eq!(mem.handled_hkeys(t).len(), 1);
    assert_eq!(mem.committed_group_rows(new_group).len(), 1);

    online.alter_table(&Session::new(1), None).unwrap();

    // exactly one materialization of each row; the writer's image won
    let rows = mem.committed_group_rows(new_group);
    assert_eq!(rows.len(), 2);
    assert_eq!(
        rows[0].2,
        vec![Const::I64(1), Const::from("upd"), Const::from("x")]
    );
    assert_eq!(
        rows[1].2,
        vec![Const::I64(2), Const::from("old2"), Const::from("x")]
    );

    // a write after the scanner passed finds the post-transform row
    // and applies to it directly
    mem.begin_transaction(&writer);
    mem.update_row(&writer, t, &keys[1], vec![Const::I64(2), Const::from("upd2")])
        .unwrap();
    mem.commit_transaction(&writer).unwrap();
    let rows = mem.committed_group_rows(new_group);
    assert_eq!(rows.len(), 2);
    assert_eq!(
        rows[1].2,
        vec![Const::I64(2), Const::from("upd2"), Const::from("x")]
    );
}

#[test]
fn test_concurrent_dml_disallowed_by_config() {
    let mut ids = IdGen::new();
    let (old_ais, t, group) = {
        let mut b = AisBuilder::new(1, &mut ids);
        let t = b
            .table(
                TableSpec::new("t")
                    .column(ColumnSpec::new("a", PreciseType::i64()).not_null())
                    .pk(&["a"]),
            )
            .unwrap();
        let ais = Arc::new(b.finish());
        let group = ais.table(t).unwrap().group;
        (ais, t, group)
    };
    let new_ais = {
        let mut b = AisBuilder::new(2, &mut ids);
        b.table(
            TableSpec::new("t")
                .with_id(t)
                .pin_group(group)
                .column(ColumnSpec::new("a", PreciseType::i64()).not_null())
                .pk(&["a"])
                .index(TableIndexSpec::new("idx_a", &["a"])),
        )
        .unwrap();
        Arc::new(b.finish())
    };
    let mem = MemEngine::new(old_ais);
    mem.set_online(
        vec![ChangeSet::new(t, ChangeLevel::Index)
            .with_index(IndexChange::add(IndexKind::Table, "idx_a"))],
        new_ais,
    );
    let _online = online_engine(&mem, false);

    let writer = Session::new(2);
    mem.begin_transaction(&writer);
    match mem.insert_row(&writer, t, vec![Const::I64(1)]) {
        Err(StorageError::NotAllowedByConfig) => {}
        other => panic!("unexpected {:?}", other),
    }
    mem.rollback_transaction_if_open(&writer);
}

#[test]
fn test_mixed_levels_fail_with_no_side_effects() {
    let mut ids = IdGen::new();
    let mut b = AisBuilder::new(1, &mut ids);
    let t1 = b
        .table(
            TableSpec::new("a")
                .column(ColumnSpec::new("x", PreciseType::i64()).not_null())
                .pk(&["x"]),
        )
        .unwrap();
    let t2 = b
        .table(
            TableSpec::new("b")
                .column(ColumnSpec::new("y", PreciseType::i64()).not_null())
                .pk(&["y"]),
        )
        .unwrap();
    let old_ais = Arc::new(b.finish());
    let g1 = old_ais.table(t1).unwrap().group;
    let mem = MemEngine::new(old_ais.clone());
    seed_rows(&mem, t1, vec![vec![Const::I64(1)]]);
    let before = mem.committed_group_rows(g1);
    mem.set_online(
        vec![
            ChangeSet::new(t1, ChangeLevel::Index),
            ChangeSet::new(t2, ChangeLevel::Table),
        ],
        old_ais.clone(),
    );
    let online = online_engine(&mem, true);

    assert!(matches!(
        online.build_indexes(&Session::new(1), None),
        Err(Error::MixedChangeLevels)
    ));
    assert_eq!(mem.committed_group_rows(g1), before);
}

#[test]
fn test_empty_change_sets_are_a_noop() {
    let mut ids = IdGen::new();
    let mut b = AisBuilder::new(1, &mut ids);
    let t = b
        .table(
            TableSpec::new("t")
                .column(ColumnSpec::new("a", PreciseType::i64()).not_null())
                .pk(&["a"]),
        )
        .unwrap();
    let old_ais = Arc::new(b.finish());
    let group = old_ais.table(t).unwrap().group;
    let mem = MemEngine::new(old_ais);
    seed_rows(&mem, t, vec![vec![Const::I64(1)]]);
    let before = mem.committed_group_rows(group);
    let online = online_engine(&mem, true);

    assert!(matches!(
        online.build_indexes(&Session::new(1), None),
        Err(Error::EmptyChangeSets)
    ));
    assert!(matches!(
        online.alter_table(&Session::new(1), None),
        Err(Error::EmptyChangeSets)
    ));
    assert_eq!(mem.committed_group_rows(group), before);
}
