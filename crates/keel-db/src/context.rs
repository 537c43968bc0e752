//! Per-thread database contexts.
//!
//! A [`Context`] keeps a [`ConnectionPair`] open for the thread that created
//! it, since opening connections is expensive, together with that thread's
//! cache of prepared statements. The connections and statements are only
//! meant to be used from the owning thread; [`Context::is_for_this_thread`]
//! lets lookups route each thread to its own context.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::ThreadId;

use rusqlite::{CachedStatement, Connection};

use crate::connection::{ConnectionKind, ConnectionPair, DbRuntimeSettings};
use crate::error::DbError;
use crate::statements::StatementCache;
use crate::transaction::Transaction;

/// A thread's connection pair and statement cache.
#[derive(Debug)]
pub struct Context {
    settings: DbRuntimeSettings,
    connections: Option<ConnectionPair>,
    statements: StatementCache,
    owner: ThreadId,
}

impl Context {
    /// Creates a closed context owned by the calling thread.
    pub fn new(settings: DbRuntimeSettings) -> Self {
        Self {
            settings,
            connections: None,
            statements: StatementCache::new(),
            owner: std::thread::current().id(),
        }
    }

    /// Creates a context owned by the calling thread and opens `path`.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Open` if either connection cannot be opened.
    pub fn with_path(path: impl AsRef<Path>, settings: DbRuntimeSettings) -> Result<Self, DbError> {
        let mut context = Self::new(settings);
        context.open(path)?;
        Ok(context)
    }

    /// Returns `true` if the calling thread created this context.
    pub fn is_for_this_thread(&self) -> bool {
        self.owner == std::thread::current().id()
    }

    /// Returns the thread that created this context.
    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    /// Returns `true` if the connection pair is open.
    pub fn is_open(&self) -> bool {
        self.connections.is_some()
    }

    /// Returns the open database file, or `None` when closed.
    pub fn file_path(&self) -> Option<&Path> {
        self.connections.as_ref().map(ConnectionPair::path)
    }

    /// Returns the read-only connection, if open.
    pub fn connection_ro(&self) -> Option<&Connection> {
        self.connections.as_ref().map(ConnectionPair::read_only)
    }

    /// Returns the read-write connection, if open.
    pub fn connection_rw(&self) -> Option<&Connection> {
        self.connections.as_ref().map(ConnectionPair::read_write)
    }

    /// Returns the settings connections are opened with.
    pub fn settings(&self) -> DbRuntimeSettings {
        self.settings
    }

    /// Number of queries in the statement cache.
    pub fn cached_query_count(&self) -> usize {
        self.statements.len()
    }

    /// Opens connections to the database file at `path`, closing any
    /// existing connections first.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Close` if the existing connections could not be
    /// closed; the context is then left as it was. Returns `DbError::Open`
    /// if the new connections could not be opened; the context is then
    /// closed.
    pub fn open(&mut self, path: impl AsRef<Path>) -> Result<(), DbError> {
        self.close()?;

        let path = path.as_ref();
        let pair = ConnectionPair::open(path, self.settings).map_err(|source| {
            tracing::error!(path = %path.display(), error = %source, "failed to open database connections");
            DbError::Open {
                path: path.to_path_buf(),
                source,
            }
        })?;

        tracing::debug!(path = %path.display(), "opened database connections");
        self.connections = Some(pair);
        Ok(())
    }

    /// Closes the context's connections, dropping its cached statements
    /// before the connections they were prepared on.
    ///
    /// Closing an already closed context succeeds.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Close` if the engine refused to release a
    /// connection. Both connections and the statement cache are then left
    /// in place.
    pub fn close(&mut self) -> Result<(), DbError> {
        let Some(pair) = self.connections.take() else {
            return Ok(());
        };

        let path = pair.path().to_path_buf();
        match pair.close() {
            Ok(()) => {
                self.statements.clear();
                tracing::debug!(path = %path.display(), "closed database connections");
                Ok(())
            }
            Err(failure) => {
                tracing::error!(
                    path = %path.display(),
                    error = %failure.source,
                    "error closing connections for database"
                );
                if failure.pair.is_none() {
                    self.statements.clear();
                }
                self.connections = failure.pair;
                Err(DbError::Close {
                    path,
                    source: failure.source,
                })
            }
        }
    }

    /// Returns the cached statement `id`, reset for reuse, or `None` if no
    /// statement is cached under `id`.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Sqlite` if the engine fails to hand the statement
    /// back out.
    pub fn cached_query(&self, id: &str) -> Result<Option<CachedStatement<'_>>, DbError> {
        let Some(pair) = &self.connections else {
            return Ok(None);
        };
        Ok(self.statements.checkout(pair, id)?)
    }

    /// Returns the cached statement `id`, or prepares `sql` and caches it
    /// under `id` if there is none.
    ///
    /// New statements are prepared on the read-write connection when
    /// `for_writes` is set and on the read-only connection otherwise.
    /// Returns `None` if the context is closed.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Sqlite` if `sql` fails to prepare.
    pub fn cache_query(
        &mut self,
        id: &str,
        sql: &str,
        for_writes: bool,
    ) -> Result<Option<CachedStatement<'_>>, DbError> {
        let Some(pair) = &self.connections else {
            return Ok(None);
        };
        let statement =
            self.statements
                .checkout_or_insert(pair, id, sql, ConnectionKind::for_writes(for_writes))?;
        Ok(Some(statement))
    }

    /// Executes `sql` on the read-write connection and returns the number of
    /// rows it changed. A closed context changes nothing and returns 0.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Sqlite` if the statement fails.
    pub fn exec(&self, sql: &str) -> Result<u64, DbError> {
        let Some(conn) = self.connection_rw() else {
            return Ok(0);
        };
        exec_on(conn, sql)
    }

    /// Returns `true` if `table_name` has a row whose `id_col` equals `id`.
    ///
    /// `id_col` must be an integer column; the table and column names are
    /// interpolated into the query as given.
    ///
    /// # Errors
    ///
    /// Returns `DbError::NotOpen` on a closed context and `DbError::Sqlite`
    /// if the query fails.
    pub fn row_id_exists(&self, table_name: &str, id: i64, id_col: &str) -> Result<bool, DbError> {
        let conn = self.connection_ro().ok_or(DbError::NotOpen)?;
        let query = format!("SELECT EXISTS(SELECT 1 FROM {table_name} WHERE {id_col} = {id})");
        let exists: i64 = conn.query_row(&query, [], |row| row.get(0))?;
        Ok(exists > 0)
    }

    /// Begins a transaction on the read-write connection (or the read-only
    /// one when `for_writes` is unset), joining any transaction already
    /// running there.
    ///
    /// # Errors
    ///
    /// Returns `DbError::NotOpen` on a closed context and `DbError::Sqlite`
    /// if `BEGIN` fails.
    pub fn begin_transaction(&self, for_writes: bool) -> Result<Transaction<'_>, DbError> {
        let pair = self.connections.as_ref().ok_or(DbError::NotOpen)?;
        let mut transaction = Transaction::new(pair.get(ConnectionKind::for_writes(for_writes)));
        transaction.begin_if_no_active_transaction()?;
        Ok(transaction)
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        // Failures are already logged by close().
        let _ = self.close();
    }
}

/// Executes `sql` on `conn` and returns the number of rows changed by its
/// last statement.
pub(crate) fn exec_on(conn: &Connection, sql: &str) -> Result<u64, DbError> {
    conn.execute_batch(sql)?;
    Ok(conn.changes())
}

/// A [`Context`] shared between its owning thread and the registry.
///
/// The mutex is only there so the handle can be stored in the process-wide
/// registry; in normal use only the owning thread ever locks it.
#[derive(Debug, Clone)]
pub struct ContextHandle {
    owner: ThreadId,
    inner: Arc<Mutex<Context>>,
}

impl ContextHandle {
    /// Wraps `context` for sharing.
    pub fn new(context: Context) -> Self {
        Self {
            owner: context.owner(),
            inner: Arc::new(Mutex::new(context)),
        }
    }

    /// Locks the context.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Poisoned` if a thread panicked while holding it.
    pub fn lock(&self) -> Result<MutexGuard<'_, Context>, DbError> {
        self.inner.lock().map_err(|_| DbError::Poisoned)
    }

    /// Returns the thread that created the context.
    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    /// Returns `true` if the calling thread created the context.
    pub fn is_for_this_thread(&self) -> bool {
        self.owner == std::thread::current().id()
    }

    /// Returns `true` if both handles refer to the same context.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn downgrade(&self) -> std::sync::Weak<Mutex<Context>> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn from_parts(owner: ThreadId, inner: Arc<Mutex<Context>>) -> Self {
        Self { owner, inner }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::is_transaction_active;
    use std::path::PathBuf;

    fn seeded_path(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("context.sqlite");
        let conn = Connection::open(&path).expect("should create db file");
        conn.execute_batch(
            "CREATE TABLE archive_file (id INTEGER PRIMARY KEY, path TEXT NOT NULL);",
        )
        .expect("should create table");
        path
    }

    #[test]
    fn open_and_close_move_both_connections_together() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = seeded_path(&dir);

        let mut ctx = Context::new(DbRuntimeSettings::default());
        assert!(!ctx.is_open());
        assert!(ctx.file_path().is_none());

        ctx.open(&path).expect("open should succeed");
        assert!(ctx.connection_ro().is_some());
        assert!(ctx.connection_rw().is_some());
        assert_eq!(ctx.file_path(), Some(path.as_path()));

        ctx.cache_query("count", "SELECT COUNT(*) FROM archive_file", false)
            .expect("prepare should succeed")
            .expect("context is open");
        assert_eq!(ctx.cached_query_count(), 1);

        ctx.close().expect("close should succeed");
        assert!(ctx.connection_ro().is_none());
        assert!(ctx.connection_rw().is_none());
        assert!(ctx.file_path().is_none());
        assert_eq!(ctx.cached_query_count(), 0);
    }

    #[test]
    fn failed_close_leaves_context_untouched() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = seeded_path(&dir);
        let mut ctx = Context::with_path(&path, DbRuntimeSettings::default())
            .expect("open should succeed");
        ctx.cache_query("count", "SELECT COUNT(*) FROM archive_file", false)
            .expect("prepare should succeed");

        // An unfinalized statement makes the engine refuse to close.
        std::mem::forget(
            ctx.connection_ro()
                .expect("context is open")
                .prepare("SELECT 1")
                .expect("should prepare"),
        );

        let err = ctx.close().expect_err("close should be refused");
        assert!(matches!(err, DbError::Close { .. }));
        assert_eq!(err.kind(), crate::error::ErrorKind::OpenClose);
        assert!(ctx.is_open());
        assert!(ctx.connection_ro().is_some());
        assert!(ctx.connection_rw().is_some());
        assert_eq!(ctx.file_path(), Some(path.as_path()));
        assert_eq!(ctx.cached_query_count(), 1);

        let mut count = ctx
            .cached_query("count")
            .expect("lookup should succeed")
            .expect("id is still cached");
        let rows: i64 = count.query_row([], |row| row.get(0)).expect("should step");
        assert_eq!(rows, 0);
        drop(count);

        // The leaked statement pins the handle for the rest of the process.
        std::mem::forget(ctx);
    }

    #[test]
    fn close_on_closed_context_succeeds() {
        let mut ctx = Context::new(DbRuntimeSettings::default());
        ctx.close().expect("closing a closed context is a no-op");
        ctx.close().expect("and stays a no-op");
    }

    #[test]
    fn reopen_switches_files() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let first = seeded_path(&dir);
        let second = dir.path().join("second.sqlite");
        Connection::open(&second)
            .and_then(|c| c.execute_batch("CREATE TABLE other (id INTEGER PRIMARY KEY);"))
            .expect("should create second db");

        let mut ctx = Context::with_path(&first, DbRuntimeSettings::default())
            .expect("open should succeed");
        ctx.cache_query("q", "SELECT 1", false)
            .expect("prepare should succeed");

        ctx.open(&second).expect("reopen should succeed");
        assert_eq!(ctx.file_path(), Some(second.as_path()));
        assert_eq!(ctx.cached_query_count(), 0, "reopen drops the old cache");
    }

    #[test]
    fn open_missing_file_fails_closed() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let mut ctx = Context::new(DbRuntimeSettings::default());

        let err = ctx
            .open(dir.path().join("missing.sqlite"))
            .expect_err("missing file should not open");
        assert!(matches!(err, DbError::Open { .. }));
        assert!(!ctx.is_open());
    }

    #[test]
    fn cache_query_hit_returns_first_statement() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = seeded_path(&dir);
        let mut ctx = Context::with_path(&path, DbRuntimeSettings::default())
            .expect("open should succeed");

        {
            let mut stmt = ctx
                .cache_query("greeting", "SELECT 'first'", false)
                .expect("prepare should succeed")
                .expect("context is open");
            let value: String = stmt.query_row([], |row| row.get(0)).expect("should step");
            assert_eq!(value, "first");
        }

        let mut stmt = ctx
            .cache_query("greeting", "SELECT 'second'", false)
            .expect("hit should succeed")
            .expect("context is open");
        let value: String = stmt.query_row([], |row| row.get(0)).expect("should step");
        assert_eq!(value, "first", "a cache hit ignores the new sql");
        assert_eq!(
            stmt.get_status(rusqlite::StatementStatus::Run),
            2,
            "the hit reused the compiled statement"
        );
    }

    #[test]
    fn cached_query_does_not_create() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = seeded_path(&dir);
        let ctx = Context::with_path(&path, DbRuntimeSettings::default())
            .expect("open should succeed");

        assert!(ctx.cached_query("nothing").expect("lookup should succeed").is_none());
        assert_eq!(ctx.cached_query_count(), 0);
    }

    #[test]
    fn cached_write_statement_uses_write_handle() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = seeded_path(&dir);
        let mut ctx = Context::with_path(&path, DbRuntimeSettings::default())
            .expect("open should succeed");

        for name in ["a.wad", "b.pk3"] {
            let mut stmt = ctx
                .cache_query("insert", "INSERT INTO archive_file (path) VALUES (?1)", true)
                .expect("prepare should succeed")
                .expect("context is open");
            stmt.execute([name]).expect("insert should succeed");
        }

        let mut stmt = ctx
            .cached_query("insert")
            .expect("lookup should succeed")
            .expect("insert should be cached");
        stmt.execute(["c.zip"]).expect("reuse should succeed");
        drop(stmt);

        let count: i64 = ctx
            .connection_ro()
            .expect("context is open")
            .query_row("SELECT COUNT(*) FROM archive_file", [], |row| row.get(0))
            .expect("should count");
        assert_eq!(count, 3);
    }

    #[test]
    fn closed_context_is_inert() {
        let mut ctx = Context::new(DbRuntimeSettings::default());

        assert_eq!(ctx.exec("DELETE FROM anything").expect("exec is a no-op"), 0);
        assert_eq!(ctx.exec("not even sql").expect("exec is a no-op"), 0);
        assert!(ctx
            .cache_query("q", "SELECT 1", false)
            .expect("closed context reports no statement")
            .is_none());
        assert!(matches!(ctx.begin_transaction(true), Err(DbError::NotOpen)));
        assert!(matches!(
            ctx.row_id_exists("archive_file", 1, "id"),
            Err(DbError::NotOpen)
        ));
    }

    #[test]
    fn exec_returns_changed_rows() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = seeded_path(&dir);
        let ctx = Context::with_path(&path, DbRuntimeSettings::default())
            .expect("open should succeed");

        let inserted = ctx
            .exec("INSERT INTO archive_file (path) VALUES ('a'), ('b'), ('c')")
            .expect("insert should succeed");
        assert_eq!(inserted, 3);

        let deleted = ctx
            .exec("DELETE FROM archive_file WHERE path != 'a'")
            .expect("delete should succeed");
        assert_eq!(deleted, 2);

        let err = ctx
            .exec("INSERT INTO nowhere VALUES (1)")
            .expect_err("engine errors propagate");
        assert!(matches!(err, DbError::Sqlite(_)));
    }

    #[test]
    fn row_id_exists_sees_new_rows() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = seeded_path(&dir);
        let ctx = Context::with_path(&path, DbRuntimeSettings::default())
            .expect("open should succeed");

        assert!(!ctx.row_id_exists("archive_file", 42, "id").expect("query should succeed"));
        ctx.exec("INSERT INTO archive_file (id, path) VALUES (42, 'doom2.wad')")
            .expect("insert should succeed");
        assert!(ctx.row_id_exists("archive_file", 42, "id").expect("query should succeed"));
    }

    #[test]
    fn begin_transaction_tracks_autocommit() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = seeded_path(&dir);
        let ctx = Context::with_path(&path, DbRuntimeSettings::default())
            .expect("open should succeed");
        let rw = ctx.connection_rw().expect("context is open");

        let tx = ctx.begin_transaction(true).expect("begin should succeed");
        assert!(is_transaction_active(rw));
        tx.commit().expect("commit should succeed");
        assert!(!is_transaction_active(rw));

        let tx = ctx.begin_transaction(true).expect("begin should succeed");
        assert!(is_transaction_active(rw));
        tx.rollback().expect("rollback should succeed");
        assert!(!is_transaction_active(rw));
    }

    #[test]
    fn nested_begin_transaction_joins_outer() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = seeded_path(&dir);
        let ctx = Context::with_path(&path, DbRuntimeSettings::default())
            .expect("open should succeed");

        let mut outer = ctx.begin_transaction(true).expect("outer begin");
        outer.set_rollback_on_drop(true);
        {
            let inner = ctx.begin_transaction(true).expect("inner joins");
            assert!(!inner.is_active());
            ctx.exec("INSERT INTO archive_file (path) VALUES ('x')")
                .expect("insert should succeed");
        }
        assert!(is_transaction_active(ctx.connection_rw().expect("open")));
        drop(outer);

        assert!(!ctx.row_id_exists("archive_file", 1, "id").expect("query should succeed"));
    }

    #[test]
    fn handle_reports_owner() {
        let handle = ContextHandle::new(Context::new(DbRuntimeSettings::default()));
        assert!(handle.is_for_this_thread());
        assert_eq!(handle.owner(), std::thread::current().id());
        assert!(handle.ptr_eq(&handle.clone()));

        let other = ContextHandle::new(Context::new(DbRuntimeSettings::default()));
        assert!(!handle.ptr_eq(&other));

        std::thread::scope(|s| {
            s.spawn(|| assert!(!handle.is_for_this_thread()));
        });
    }
}
