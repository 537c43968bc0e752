//! Concurrency tests for per-thread database contexts.
//!
//! These tests verify that worker threads resolve their own registered
//! contexts, that unregistered threads are handled according to the
//! configured affinity policy, and that many workers can register, write,
//! and deregister concurrently without deadlocks or orphaned entries.

use std::sync::{Arc, Barrier};

use keel_db::{
    bundled_resources, Context, ContextHandle, DatabaseOptions, DbError, ProgramDatabase,
};
use keel_types::{AppPaths, ThreadAffinity};

fn program_db(dir: &tempfile::TempDir, affinity: ThreadAffinity) -> Arc<ProgramDatabase> {
    let paths = AppPaths::new(
        dir.path().join("user"),
        dir.path().join("exe"),
        dir.path().join("tmp"),
    );
    let db = ProgramDatabase::new(
        paths,
        Arc::new(bundled_resources()),
        DatabaseOptions {
            affinity,
            ..Default::default()
        },
    );
    db.init().expect("init should succeed");
    Arc::new(db)
}

#[test]
fn fallback_lifecycle_from_worker_thread() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let db = program_db(&dir, ThreadAffinity::FallbackToMain);

    let worker_db = Arc::clone(&db);
    std::thread::spawn(move || {
        let db = worker_db;
        let main = db.registry().main().clone();

        // Before registration the main context is handed out.
        let resolved = db.global().expect("fallback resolves");
        assert!(resolved.ptr_eq(&main));

        let own = db.thread_context().expect("thread context should open");
        let resolved = db.global().expect("registered thread resolves");
        assert!(resolved.ptr_eq(own.handle()));
        assert!(!resolved.ptr_eq(&main));
        drop(resolved);

        // After the context is destroyed the fallback applies again.
        drop(own);
        let resolved = db.global().expect("fallback resolves");
        assert!(resolved.ptr_eq(&main));
    })
    .join()
    .expect("worker should not panic");
}

#[test]
fn strict_lifecycle_from_worker_thread() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let db = program_db(&dir, ThreadAffinity::Strict);

    let worker_db = Arc::clone(&db);
    std::thread::spawn(move || {
        let db = worker_db;
        assert!(matches!(db.global(), Err(DbError::NoThreadContext { .. })));
        assert!(matches!(
            db.exec("DELETE FROM archive_file"),
            Err(DbError::NoThreadContext { .. })
        ));

        let own = ContextHandle::new(
            Context::with_path(db.program_database_path(), db.settings())
                .expect("context should open"),
        );
        db.registry().register_thread_context(&own);
        assert!(db.global().expect("registered").ptr_eq(&own));

        assert_eq!(db.registry().deregister_thread_contexts(), 1);
        assert!(matches!(db.global(), Err(DbError::NoThreadContext { .. })));
    })
    .join()
    .expect("worker should not panic");
}

#[test]
fn concurrent_workers_write_through_own_contexts() {
    const WORKERS: usize = 8;
    const ROWS_PER_WORKER: usize = 25;

    let dir = tempfile::tempdir().expect("should create temp dir");
    let db = program_db(&dir, ThreadAffinity::Strict);
    let barrier = Arc::new(Barrier::new(WORKERS));

    let handles: Vec<_> = (0..WORKERS)
        .map(|worker| {
            let db = Arc::clone(&db);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                let own = db.thread_context().expect("thread context should open");
                barrier.wait();

                let handle = db.global().expect("registered thread resolves");
                assert!(handle.ptr_eq(own.handle()));
                assert!(handle.is_for_this_thread());

                let mut ctx = handle.lock().expect("own context lock");
                for row in 0..ROWS_PER_WORKER {
                    let tx = ctx.begin_transaction(true).expect("begin should succeed");
                    tx.connection()
                        .execute(
                            "INSERT INTO archive_file (path, size, hash, format_id) VALUES (?1, ?2, 'h', 'wad')",
                            keel_db::rusqlite::params![format!("w{worker}/r{row}.wad"), row as i64],
                        )
                        .expect("insert should succeed");
                    tx.commit().expect("commit should succeed");
                }

                let mut count = ctx
                    .cache_query(
                        "count_for_worker",
                        "SELECT COUNT(*) FROM archive_file WHERE path LIKE ?1",
                        false,
                    )
                    .expect("prepare should succeed")
                    .expect("context is open");
                let n: i64 = count
                    .query_row([format!("w{worker}/%")], |row| row.get(0))
                    .expect("count should succeed");
                assert_eq!(n as usize, ROWS_PER_WORKER);
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("worker should not panic");
    }

    assert!(db.registry().is_empty(), "every worker deregistered on exit");

    let main = db.global().expect("main thread resolves");
    let ctx = main.lock().expect("main context lock");
    let total: i64 = ctx
        .connection_ro()
        .expect("main context is open")
        .query_row("SELECT COUNT(*) FROM archive_file", [], |row| row.get(0))
        .expect("count should succeed");
    assert_eq!(total as usize, WORKERS * ROWS_PER_WORKER);
}

#[test]
fn concurrent_register_deregister_no_orphans() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let db = program_db(&dir, ThreadAffinity::Strict);

    std::thread::scope(|s| {
        for _ in 0..16 {
            let db = &db;
            s.spawn(move || {
                for _ in 0..10 {
                    let own = ContextHandle::new(Context::new(db.settings()));
                    db.registry().register_thread_context(&own);
                    assert!(db.global().expect("registered").ptr_eq(&own));
                    assert_eq!(db.registry().deregister_thread_contexts(), 1);
                }
            });
        }
    });

    assert!(db.registry().is_empty());
}
