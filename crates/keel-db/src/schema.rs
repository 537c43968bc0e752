//! Schema bootstrap from bundled table definitions.
//!
//! Every table in the program database is defined by one `<table>.sql`
//! script in the resource bundle's `database/tables` directory. Bootstrap
//! runs each script whose table is missing from the database. There is no
//! version diffing: a table that exists is left alone.

use std::path::Path;

use keel_types::TABLE_DEFINITIONS_DIR;
use rusqlite::{Connection, OpenFlags};
use thiserror::Error;

use crate::connection::{open_connection, DbRuntimeSettings};
use crate::error::DbError;
use crate::resources::ResourceBundle;

/// Required schema version of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableVersion {
    /// Table name.
    pub table: &'static str,
    /// Schema version the program expects.
    pub version: u32,
}

/// Schema versions of the bundled tables. Recorded for future migrations;
/// bootstrap currently only checks that each table exists.
pub const TABLE_VERSIONS: &[TableVersion] = &[TableVersion {
    table: "archive_file",
    version: 1,
}];

/// Returns the required version of `table`, if it is a known table.
pub fn table_version(table: &str) -> Option<u32> {
    TABLE_VERSIONS
        .iter()
        .find(|entry| entry.table == table)
        .map(|entry| entry.version)
}

/// Errors that can occur during schema bootstrap.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The resource bundle has no table definition directory.
    #[error("no table definitions found in resource directory '{dir}'")]
    MissingDefinitions {
        /// The directory that was looked up.
        dir: String,
    },

    /// A table definition script is not valid UTF-8.
    #[error("table definition for '{table}' is not valid UTF-8")]
    InvalidScript {
        /// The table whose script is unreadable.
        table: String,
    },

    /// Executing a table definition failed.
    #[error("failed to create database table '{table}': {source}")]
    CreateTable {
        /// The table that could not be created.
        table: String,
        /// The underlying SQLite error.
        source: rusqlite::Error,
    },

    /// Failed to query which tables exist.
    #[error("failed to check existing tables: {0}")]
    StateQuery(rusqlite::Error),

    /// The resource bundle could not be read.
    #[error("failed to read table definitions: {0}")]
    Resource(#[from] std::io::Error),
}

/// Returns `true` if `conn` has a table named `table`.
pub fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        [table],
        |row| row.get(0),
    )
}

/// Creates every table defined in `bundle` that `conn` does not have yet.
///
/// Scripts run in the bundle's listing order, so each must stand on its own.
/// Entries that are not `.sql` files are ignored.
///
/// Returns the number of tables created.
///
/// # Errors
///
/// Returns `SchemaError` if the definitions cannot be listed or a script
/// fails. Tables created earlier in the same pass are kept.
pub fn create_missing_tables(
    conn: &Connection,
    bundle: &dyn ResourceBundle,
) -> Result<usize, SchemaError> {
    let entries = bundle
        .dir_entries(TABLE_DEFINITIONS_DIR)?
        .ok_or_else(|| SchemaError::MissingDefinitions {
            dir: TABLE_DEFINITIONS_DIR.to_string(),
        })?;

    let mut created = 0;

    for entry in &entries {
        if entry.extension() != Some("sql") {
            tracing::debug!(name = %entry.name, "skipping non-sql resource");
            continue;
        }

        let table = entry.stem();
        if table_exists(conn, table).map_err(SchemaError::StateQuery)? {
            tracing::debug!(table, "table already exists, skipping");
            continue;
        }

        let sql = std::str::from_utf8(&entry.data).map_err(|_| SchemaError::InvalidScript {
            table: table.to_string(),
        })?;

        conn.execute_batch(sql)
            .map_err(|e| SchemaError::CreateTable {
                table: table.to_string(),
                source: e,
            })?;

        tracing::info!(table, "created database table");
        created += 1;
    }

    Ok(created)
}

/// Creates the database file at `path` if needed and bootstraps its schema.
///
/// The connection used is closed before returning; contexts open their own.
///
/// Returns the number of tables created.
///
/// # Errors
///
/// Returns `DbError::Open` if the file cannot be created or opened and
/// `DbError::Schema` if bootstrap fails.
pub fn create_database(
    path: &Path,
    bundle: &dyn ResourceBundle,
    settings: DbRuntimeSettings,
) -> Result<usize, DbError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let conn = open_connection(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        settings,
    )
    .map_err(|source| DbError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(create_missing_tables(&conn, bundle)?)
}
