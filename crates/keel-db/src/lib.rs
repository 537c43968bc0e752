//! Thread-aware access layer for the keel program database.
//!
//! Provides per-thread SQLite connection contexts, prepared-statement
//! caching, scoped transactions, and schema bootstrap from bundled table
//! definitions.
//!
//! # Design decisions
//!
//! - **One context per thread**: each thread that touches the database owns
//!   a read-only and a read-write connection plus its own statement cache.
//!   SQLite connections and statements are not meant to be shared between
//!   threads, so the [`ContextRegistry`] routes every thread to its own
//!   [`Context`] instead of funnelling all access through one handle.
//! - **Strict thread affinity by default**: a worker thread that never
//!   registered a context gets an error from [`ContextRegistry::global`]
//!   rather than the main thread's context.
//! - **Create-missing-tables bootstrap**: every table is defined by a
//!   `<table>.sql` script in a [`ResourceBundle`]; bootstrap runs the scripts
//!   of tables the database lacks. There is no up/down migration runner.
//! - **Scoped transactions**: a [`Transaction`] begins or joins a transaction
//!   and, if it began one, resolves it exactly once.

mod connection;
mod context;
mod database;
mod error;
mod registry;
mod resources;
mod schema;
mod statements;
mod template;
mod transaction;

pub use connection::{ConnectionKind, ConnectionPair, DbRuntimeSettings, PairCloseError};
pub use context::{Context, ContextHandle};
pub use database::{DatabaseOptions, ProgramDatabase};
pub use error::{DbError, ErrorKind};
pub use registry::{ContextRegistry, ThreadContext};
pub use resources::{
    bundled_resources, table_definition_path, DirectoryBundle, EmbeddedBundle, ResourceBundle,
    ResourceEntry,
};
pub use schema::{
    create_database, create_missing_tables, table_exists, table_version, SchemaError,
    TableVersion, TABLE_VERSIONS,
};
pub use statements::{CachedQuery, StatementCache};
pub use template::{TemplateError, TemplateProvisioner};
pub use transaction::{is_transaction_active, Transaction, TransactionState};

/// Re-exported so callers can name statement and connection types without a
/// direct `rusqlite` dependency.
pub use rusqlite;
