//! Error types for the database layer.

use std::path::PathBuf;
use std::thread::ThreadId;

use thiserror::Error;

use crate::schema::SchemaError;
use crate::template::TemplateError;

/// Broad classification of a [`DbError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Acquiring or releasing a connection pair failed.
    OpenClose,
    /// Creating tables from the bundled definitions failed.
    SchemaBootstrap,
    /// A statement failed inside the engine (bad SQL, constraint, type).
    Query,
    /// The layer was used in a way it does not support (closed context,
    /// unregistered thread, poisoned context lock).
    Misuse,
    /// A filesystem operation failed.
    Io,
}

/// Errors produced by the database layer.
#[derive(Debug, Error)]
pub enum DbError {
    /// Opening a connection to the database file failed.
    #[error("failed to open database {}: {source}", path.display())]
    Open {
        /// The database file being opened.
        path: PathBuf,
        /// The underlying SQLite error.
        source: rusqlite::Error,
    },

    /// Releasing the connections of a context failed.
    #[error("failed to close connections for database {}: {source}", path.display())]
    Close {
        /// The database file the connections point at.
        path: PathBuf,
        /// The underlying SQLite error.
        source: rusqlite::Error,
    },

    /// The context has no open connections.
    #[error("database context is not open")]
    NotOpen,

    /// A non-main thread asked for its context without registering one.
    #[error("no database context registered for thread {thread:?}")]
    NoThreadContext {
        /// The requesting thread.
        thread: ThreadId,
    },

    /// A thread panicked while holding a context lock.
    #[error("database context lock poisoned")]
    Poisoned,

    /// Schema bootstrap failed.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// The template database could not be provisioned.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// An engine error passed through unchanged.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A filesystem error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DbError {
    /// Returns the classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Open { .. } | Self::Close { .. } => ErrorKind::OpenClose,
            Self::Schema(_) => ErrorKind::SchemaBootstrap,
            Self::Sqlite(_) => ErrorKind::Query,
            Self::NotOpen | Self::NoThreadContext { .. } | Self::Poisoned => ErrorKind::Misuse,
            Self::Template(_) | Self::Io(_) => ErrorKind::Io,
        }
    }
}
