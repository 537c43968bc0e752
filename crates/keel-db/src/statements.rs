//! Prepared statements cached under caller-chosen identifiers.
//!
//! The identifier is the cache key, not the SQL text: once an identifier has
//! been bound to a query, later lookups reuse that query even if a different
//! SQL string is supplied. The compiled statements live in each
//! connection's own statement cache, which resets a statement and clears its
//! bindings whenever it is handed back, so a hit never recompiles.
//!
//! Each identifier gets its own compiled statement, even when two
//! identifiers share SQL text, and registering an identifier grows the
//! connection's cache so registered statements are never evicted. The
//! configured capacity is left for ad-hoc `prepare_cached` calls.

use std::collections::HashMap;

use rusqlite::{CachedStatement, Connection};

use crate::connection::{ConnectionKind, ConnectionPair};

/// A query registered under an identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedQuery {
    /// The SQL the identifier was first registered with.
    pub sql: String,
    /// The handle the query runs against.
    pub kind: ConnectionKind,
    // `sql` tagged with a per-identifier comment; the connection cache key.
    key: String,
}

/// Identifier → query map for one context.
#[derive(Debug, Default)]
pub struct StatementCache {
    queries: HashMap<String, CachedQuery>,
    // Total registrations, used to tag keys. Never reused while the
    // connections that cached the tagged statements are open.
    registered: usize,
}

impl StatementCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the query registered under `id`.
    pub fn get(&self, id: &str) -> Option<&CachedQuery> {
        self.queries.get(id)
    }

    /// Number of registered identifiers.
    pub fn len(&self) -> usize {
        self.queries.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    /// Forgets every registered identifier.
    ///
    /// Call only together with flushing or closing the connections the
    /// statements were prepared on.
    pub fn clear(&mut self) {
        self.queries.clear();
        self.registered = 0;
    }

    /// Checks out the statement registered under `id` from `pair`.
    ///
    /// Returns `Ok(None)` if `id` is unknown.
    pub fn checkout<'conn>(
        &self,
        pair: &'conn ConnectionPair,
        id: &str,
    ) -> rusqlite::Result<Option<CachedStatement<'conn>>> {
        match self.queries.get(id) {
            Some(query) => prepare(pair.get(query.kind), &query.key).map(Some),
            None => Ok(None),
        }
    }

    /// Checks out the statement registered under `id`, registering `sql`
    /// against the `kind` handle first if `id` is unknown.
    ///
    /// The identifier is only registered once the statement compiled.
    pub fn checkout_or_insert<'conn>(
        &mut self,
        pair: &'conn ConnectionPair,
        id: &str,
        sql: &str,
        kind: ConnectionKind,
    ) -> rusqlite::Result<CachedStatement<'conn>> {
        if let Some(query) = self.queries.get(id) {
            return prepare(pair.get(query.kind), &query.key);
        }

        let conn = pair.get(kind);
        let key = format!("-- keel query {}\n{sql}", self.registered);
        let reserved = self.queries.values().filter(|q| q.kind == kind).count() + 1;
        conn.set_prepared_statement_cache_capacity(
            pair.settings().statement_cache_capacity + reserved,
        );

        let statement = prepare(conn, &key)?;
        self.registered += 1;
        self.queries.insert(
            id.to_string(),
            CachedQuery {
                sql: sql.to_string(),
                kind,
                key,
            },
        );
        Ok(statement)
    }
}

fn prepare<'conn>(conn: &'conn Connection, sql: &str) -> rusqlite::Result<CachedStatement<'conn>> {
    conn.prepare_cached(sql)
}
