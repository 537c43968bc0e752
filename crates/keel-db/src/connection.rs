//! Connection pair creation and configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags};

/// Runtime tunables for SQLite connection behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbRuntimeSettings {
    /// Busy timeout for SQLite connections, in milliseconds.
    pub busy_timeout_ms: u64,

    /// Number of prepared statements each connection keeps for reuse.
    pub statement_cache_capacity: usize,

    /// Whether the read-write connection switches the file to WAL mode.
    pub wal: bool,
}

impl Default for DbRuntimeSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            statement_cache_capacity: 64,
            wal: true,
        }
    }
}

/// Which handle of a [`ConnectionPair`] a statement runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionKind {
    /// The read-only handle.
    ReadOnly,
    /// The read-write handle.
    ReadWrite,
}

impl ConnectionKind {
    /// Picks the read-write handle when `writes` is set.
    pub fn for_writes(writes: bool) -> Self {
        if writes {
            Self::ReadWrite
        } else {
            Self::ReadOnly
        }
    }
}

/// Two live handles to one database file, opened and closed together.
#[derive(Debug)]
pub struct ConnectionPair {
    path: PathBuf,
    settings: DbRuntimeSettings,
    read_only: Connection,
    read_write: Connection,
}

/// Returned by [`ConnectionPair::close`] when a handle refused to close.
#[derive(Debug)]
pub struct PairCloseError {
    /// The pair, still fully open, or `None` if it could not be restored.
    pub pair: Option<ConnectionPair>,
    /// The error that stopped the close.
    pub source: rusqlite::Error,
}

impl ConnectionPair {
    /// Opens a read-only and a read-write handle to the existing file at
    /// `path`.
    ///
    /// The read-write handle is opened first so that WAL side files exist
    /// before the read-only handle attaches. The file is not created.
    ///
    /// # Errors
    ///
    /// Returns the SQLite error of whichever handle failed to open; a handle
    /// that did open is closed again.
    pub fn open(path: &Path, settings: DbRuntimeSettings) -> rusqlite::Result<Self> {
        let read_write = open_connection(path, OpenFlags::SQLITE_OPEN_READ_WRITE, settings)?;
        configure_writer(&read_write, settings)?;
        let read_only = open_connection(path, OpenFlags::SQLITE_OPEN_READ_ONLY, settings)?;

        Ok(Self {
            path: path.to_path_buf(),
            settings,
            read_only,
            read_write,
        })
    }

    /// Returns the database file both handles point at.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the settings both handles were opened with.
    pub fn settings(&self) -> DbRuntimeSettings {
        self.settings
    }

    /// Returns the read-only handle.
    pub fn read_only(&self) -> &Connection {
        &self.read_only
    }

    /// Returns the read-write handle.
    pub fn read_write(&self) -> &Connection {
        &self.read_write
    }

    /// Returns the handle for `kind`.
    pub fn get(&self, kind: ConnectionKind) -> &Connection {
        match kind {
            ConnectionKind::ReadOnly => &self.read_only,
            ConnectionKind::ReadWrite => &self.read_write,
        }
    }

    /// Releases every prepared statement held by either handle.
    pub fn flush_statements(&self) {
        self.read_only.flush_prepared_statement_cache();
        self.read_write.flush_prepared_statement_cache();
    }

    /// Closes both handles.
    ///
    /// The read-only handle closes first. If it refuses, nothing has been
    /// released and the pair comes back intact. If the read-write handle then
    /// refuses, the read-only handle is reopened so the pair is still whole;
    /// only when that reopen also fails is the pair lost.
    ///
    /// # Errors
    ///
    /// Returns [`PairCloseError`] carrying the pair (if still usable) and the
    /// SQLite error.
    pub fn close(self) -> Result<(), PairCloseError> {
        self.flush_statements();

        let Self {
            path,
            settings,
            read_only,
            read_write,
        } = self;

        if let Err((read_only, source)) = read_only.close() {
            return Err(PairCloseError {
                pair: Some(Self {
                    path,
                    settings,
                    read_only,
                    read_write,
                }),
                source,
            });
        }

        if let Err((read_write, source)) = read_write.close() {
            let pair = match open_connection(&path, OpenFlags::SQLITE_OPEN_READ_ONLY, settings) {
                Ok(read_only) => Some(Self {
                    path,
                    settings,
                    read_only,
                    read_write,
                }),
                Err(reopen) => {
                    tracing::error!(
                        path = %path.display(),
                        error = %reopen,
                        "failed to reopen read-only connection after a failed close"
                    );
                    None
                }
            };
            return Err(PairCloseError { pair, source });
        }

        Ok(())
    }
}

/// Opens a single handle to `path` with `access` flags plus the defaults
/// every keel connection uses.
pub(crate) fn open_connection(
    path: &Path,
    access: OpenFlags,
    settings: DbRuntimeSettings,
) -> rusqlite::Result<Connection> {
    let flags = access | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = Connection::open_with_flags(path, flags)?;
    conn.busy_timeout(Duration::from_millis(settings.busy_timeout_ms))?;
    conn.set_prepared_statement_cache_capacity(settings.statement_cache_capacity);
    Ok(conn)
}

/// Applies the pragmas only a writable handle may set.
pub(crate) fn configure_writer(conn: &Connection, settings: DbRuntimeSettings) -> rusqlite::Result<()> {
    if settings.wal {
        // In-memory databases report "memory", which is acceptable.
        let journal_mode: String =
            conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
        if journal_mode != "wal" && journal_mode != "memory" {
            return Err(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                Some(format!(
                    "failed to set WAL journal mode, got: {}",
                    journal_mode
                )),
            ));
        }
    }
    conn.execute_batch("PRAGMA foreign_keys = ON;")
}
