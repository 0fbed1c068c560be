//! Lifecycle integration tests: open modes, flush round-trips, writer
//! exclusion, resize gating, and wipe.

mod common;

use chainstate_core::ChainstateError;
use chainstate_engine::{Database, OpenMode};
use common::{account_id, gadget_id, Account, Gadget};
use tempfile::TempDir;

fn open_rw(dir: &TempDir) -> Database {
    Database::open(dir.path().join("db"), OpenMode::ReadWrite, 0).unwrap()
}

#[test]
fn flush_and_reopen_round_trips_objects_and_next_ids() {
    let dir = TempDir::new().unwrap();
    {
        let db = open_rw(&dir);
        db.register_type::<Account>().unwrap();
        db.create(|a: &mut Account| {
            a.name = "alice".to_string();
            a.balance = 10;
        })
        .unwrap();
        let b = db
            .create(|a: &mut Account| {
                a.name = "bob".to_string();
                a.balance = 20;
            })
            .unwrap();
        // Remove bob so the allocator is ahead of the live objects.
        db.remove::<Account>(b.id).unwrap();
        db.close().unwrap();
    }

    let db = open_rw(&dir);
    db.register_type::<Account>().unwrap();
    assert_eq!(db.get::<Account>(account_id(0)).unwrap().name, "alice");
    assert!(db.find::<Account>(account_id(1)).unwrap().is_none());
    // Identifier allocation continues past the removed object.
    assert_eq!(db.next_id::<Account>().unwrap(), account_id(2));
    let c = db
        .create(|a: &mut Account| {
            a.name = "carol".to_string();
        })
        .unwrap();
    assert_eq!(c.id, account_id(2));
}

#[test]
fn flush_drops_stale_records_of_removed_objects() {
    let dir = TempDir::new().unwrap();
    {
        let db = open_rw(&dir);
        db.register_type::<Account>().unwrap();
        let a = db
            .create(|acct: &mut Account| {
                acct.name = "alice".to_string();
            })
            .unwrap();
        db.flush().unwrap();
        db.remove::<Account>(a.id).unwrap();
        db.close().unwrap();
    }
    let db = open_rw(&dir);
    db.register_type::<Account>().unwrap();
    assert!(db.find::<Account>(account_id(0)).unwrap().is_none());
}

#[test]
fn partitions_of_unregistered_types_survive_a_flush() {
    let dir = TempDir::new().unwrap();
    {
        let db = open_rw(&dir);
        db.register_type::<Account>().unwrap();
        db.register_type::<Gadget>().unwrap();
        db.create(|a: &mut Account| {
            a.name = "alice".to_string();
        })
        .unwrap();
        db.create(|g: &mut Gadget| {
            g.label = "widget".to_string();
        })
        .unwrap();
        db.close().unwrap();
    }
    {
        // Reopen with only one of the two types registered.
        let db = open_rw(&dir);
        db.register_type::<Account>().unwrap();
        db.close().unwrap();
    }
    let db = open_rw(&dir);
    db.register_type::<Gadget>().unwrap();
    assert_eq!(db.get::<Gadget>(gadget_id(0)).unwrap().label, "widget");
}

#[test]
fn second_writer_in_the_same_process_is_rejected() {
    let dir = TempDir::new().unwrap();
    let db = open_rw(&dir);
    let err = Database::open(dir.path().join("db"), OpenMode::ReadWrite, 0).unwrap_err();
    assert!(matches!(err, ChainstateError::OpenFailed { .. }));
    drop(db);
    // Released on drop: the directory can be reopened.
    let db = Database::open(dir.path().join("db"), OpenMode::ReadWrite, 0).unwrap();
    db.close().unwrap();
}

#[test]
fn read_only_mode_rejects_mutation() {
    let dir = TempDir::new().unwrap();
    {
        let db = open_rw(&dir);
        db.register_type::<Account>().unwrap();
        db.create(|a: &mut Account| {
            a.name = "alice".to_string();
            a.balance = 10;
        })
        .unwrap();
        db.close().unwrap();
    }

    let db = Database::open(dir.path().join("db"), OpenMode::ReadOnly, 0).unwrap();
    db.register_type::<Account>().unwrap();
    assert_eq!(db.get::<Account>(account_id(0)).unwrap().balance, 10);

    assert!(matches!(
        db.create(|a: &mut Account| {
            a.name = "mallory".to_string();
        }),
        Err(ChainstateError::ReadOnly)
    ));
    assert!(matches!(
        db.start_session().map(|_| ()),
        Err(ChainstateError::ReadOnly)
    ));
    assert!(matches!(db.set_revision(1), Err(ChainstateError::ReadOnly)));
    // Closing a read-only handle never writes.
    db.close().unwrap();
}

#[test]
fn read_only_open_requires_an_existing_directory() {
    let dir = TempDir::new().unwrap();
    let err = Database::open(dir.path().join("missing"), OpenMode::ReadOnly, 0).unwrap_err();
    assert!(matches!(err, ChainstateError::OpenFailed { .. }));
}

#[test]
fn resize_is_blocked_while_sessions_are_open() {
    let dir = TempDir::new().unwrap();
    let db = open_rw(&dir);
    db.register_type::<Account>().unwrap();

    {
        let _session = db.start_session().unwrap();
        assert!(matches!(
            db.resize(1 << 16),
            Err(ChainstateError::ResizeBlocked)
        ));
    }
    db.resize(1 << 16).unwrap();

    let len = std::fs::metadata(dir.path().join("db").join("shared_memory.bin"))
        .unwrap()
        .len();
    assert!(len >= 1 << 16, "heap not grown: {len}");
}

#[test]
fn resize_preserves_live_objects() {
    let dir = TempDir::new().unwrap();
    let db = open_rw(&dir);
    db.register_type::<Account>().unwrap();
    let a = db
        .create(|acct: &mut Account| {
            acct.name = "alice".to_string();
            acct.balance = 42;
        })
        .unwrap();
    db.resize(1 << 16).unwrap();
    assert_eq!(db.get::<Account>(a.id).unwrap().balance, 42);
}

#[test]
fn wipe_deletes_the_backing_files() {
    let dir = TempDir::new().unwrap();
    let data_dir = dir.path().join("db");
    {
        let db = Database::open(&data_dir, OpenMode::ReadWrite, 0).unwrap();
        db.register_type::<Account>().unwrap();
        db.create(|a: &mut Account| {
            a.name = "alice".to_string();
        })
        .unwrap();
        db.close().unwrap();
    }
    Database::wipe(&data_dir).unwrap();
    assert!(!data_dir.join("shared_memory.bin").exists());
    assert!(!data_dir.join("shared_memory.meta").exists());

    // A fresh open starts from nothing.
    let db = Database::open(&data_dir, OpenMode::ReadWrite, 0).unwrap();
    db.register_type::<Account>().unwrap();
    assert_eq!(db.next_id::<Account>().unwrap(), account_id(0));
}

#[test]
fn ephemeral_databases_leave_no_trace() {
    let db = Database::open_ephemeral();
    db.register_type::<Account>().unwrap();
    db.create(|a: &mut Account| {
        a.name = "alice".to_string();
    })
    .unwrap();
    db.flush().unwrap();
    // Resize has no backing file to act on.
    assert!(db.resize(1 << 16).is_err());
}

#[test]
fn meta_record_is_written_for_writers() {
    let dir = TempDir::new().unwrap();
    let db = open_rw(&dir);
    let meta = chainstate_storage::read_meta(&dir.path().join("db"))
        .unwrap()
        .expect("meta record missing");
    assert_eq!(meta.read_retries, 5);
    assert_eq!(meta.write_retries, 10_000);
    db.close().unwrap();
}
