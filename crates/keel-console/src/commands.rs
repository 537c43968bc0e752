//! Text commands for inspecting the program database by hand.
//!
//! Every command runs against the calling thread's resolved context. Output
//! is returned as lines so the caller decides where it goes. Engine errors
//! stop the command, are logged, and produce no output.

use keel_db::rusqlite::Connection;
use keel_db::{table_definition_path, table_exists, DbError, ProgramDatabase, Transaction};

const DB_USAGE: &str = "Usage: db <tables|rowcount|reset|template> [tablename]";

/// Runs one console line and returns the lines it printed.
///
/// Blank lines produce nothing. Anything other than a `db` command is
/// reported as unknown.
pub fn run_command(db: &ProgramDatabase, line: &str) -> Vec<String> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Vec::new();
    };
    let args: Vec<&str> = words.collect();

    match command {
        "db" => match db_command(db, &args) {
            Ok(output) => output,
            Err(e) => {
                tracing::error!(error = %e, command = line.trim(), "database command failed");
                Vec::new()
            }
        },
        other => vec![format!("Unknown command '{other}'")],
    }
}

/// Dispatches the arguments of a `db` command.
///
/// # Errors
///
/// Returns the context lookup error or the engine error of the first
/// failing statement.
pub fn db_command(db: &ProgramDatabase, args: &[&str]) -> Result<Vec<String>, DbError> {
    match args.first().copied() {
        Some("tables") => list_tables(db),
        Some("rowcount") => match args.get(1) {
            Some(table) => row_count(db, table),
            None => Ok(vec![
                "No table name given. Usage: db rowcount <tablename>".to_string(),
            ]),
        },
        Some("reset") => match args.get(1) {
            Some(table) => reset_table(db, table),
            None => Ok(vec!["No table name given. Usage: db reset <tablename>".to_string()]),
        },
        Some("template") => Ok(vec![db.template_db_path()?.display().to_string()]),
        Some(other) => Ok(vec![format!("Unknown db command '{other}'"), DB_USAGE.to_string()]),
        None => Ok(vec![DB_USAGE.to_string()]),
    }
}

fn list_tables(db: &ProgramDatabase) -> Result<Vec<String>, DbError> {
    let handle = db.global()?;
    let context = handle.lock()?;
    let Some(conn) = context.connection_ro() else {
        return Ok(Vec::new());
    };

    let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}

fn row_count(db: &ProgramDatabase, table: &str) -> Result<Vec<String>, DbError> {
    let handle = db.global()?;
    let context = handle.lock()?;
    let Some(conn) = context.connection_ro() else {
        return Ok(Vec::new());
    };

    if !table_exists(conn, table)? {
        return Ok(vec!["No such table".to_string()]);
    }

    let count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {}", quote_identifier(table)),
        [],
        |row| row.get(0),
    )?;
    Ok(vec![format!("{count} rows")])
}

fn reset_table(db: &ProgramDatabase, table: &str) -> Result<Vec<String>, DbError> {
    let Some(entry) = db.bundle().entry_at_path(&table_definition_path(table))? else {
        return Ok(vec![format!("Can't find table sql script for {table}")]);
    };
    let script = String::from_utf8_lossy(&entry.data);

    let handle = db.global()?;
    let context = handle.lock()?;
    let Some(conn) = context.connection_rw() else {
        return Ok(Vec::new());
    };

    recreate(conn, table, &script)?;
    tracing::info!(table, "table reset to bundled definition");
    Ok(vec![format!("Table {table} recreated and reset to default")])
}

/// Drops and recreates `table` inside one transaction, so a broken script
/// leaves the old table in place.
fn recreate(conn: &Connection, table: &str, script: &str) -> Result<(), DbError> {
    let mut tx = Transaction::new(conn);
    tx.begin_if_no_active_transaction()?;
    tx.set_rollback_on_drop(true);

    conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_identifier(table)))?;
    conn.execute_batch(script)?;
    tx.commit()
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
