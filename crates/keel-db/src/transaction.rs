//! Scoped transactions over a single connection.
//!
//! A [`Transaction`] either starts a transaction on its connection or joins
//! one that is already running. Only a transaction that actually issued
//! `BEGIN` resolves it: on drop it commits, or rolls back if it was marked
//! for rollback or the thread is unwinding from a panic. A transaction that
//! joined an outer one leaves resolution to the outermost opener.

use rusqlite::Connection;

use crate::error::DbError;

/// Lifecycle of a [`Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// `BEGIN` has not been issued by this handle.
    NotStarted,
    /// `BEGIN` was issued and the transaction is unresolved.
    Active,
    /// `COMMIT` was issued.
    Committed,
    /// `ROLLBACK` was issued.
    RolledBack,
}

/// Returns `true` if a transaction is open on `connection`.
///
/// SQLite reports this through its autocommit flag, which is off while a
/// transaction is running.
pub fn is_transaction_active(connection: &Connection) -> bool {
    !connection.is_autocommit()
}

/// A transaction guard bound to one connection.
#[must_use = "dropping a started transaction commits it immediately"]
#[derive(Debug)]
pub struct Transaction<'conn> {
    connection: &'conn Connection,
    state: TransactionState,
    rollback_on_drop: bool,
}

impl<'conn> Transaction<'conn> {
    /// Creates a guard for `connection` without beginning anything.
    pub fn new(connection: &'conn Connection) -> Self {
        Self {
            connection,
            state: TransactionState::NotStarted,
            rollback_on_drop: false,
        }
    }

    /// Issues `BEGIN` on the connection.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Sqlite` if the engine rejects the statement, for
    /// example because a transaction is already open.
    pub fn begin(&mut self) -> Result<(), DbError> {
        self.connection.execute_batch("BEGIN")?;
        self.state = TransactionState::Active;
        Ok(())
    }

    /// Begins a transaction unless one is already open on the connection.
    ///
    /// Returns `true` if this call issued `BEGIN`.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Sqlite` if `BEGIN` fails.
    pub fn begin_if_no_active_transaction(&mut self) -> Result<bool, DbError> {
        if is_transaction_active(self.connection) {
            return Ok(false);
        }
        self.begin()?;
        Ok(true)
    }

    /// Returns the connection this guard is bound to.
    pub fn connection(&self) -> &'conn Connection {
        self.connection
    }

    /// Returns the current state.
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Returns `true` if this guard owns an unresolved transaction.
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Chooses how an unresolved transaction is settled on drop.
    pub fn set_rollback_on_drop(&mut self, rollback: bool) {
        self.rollback_on_drop = rollback;
    }

    /// Commits the transaction if this guard started it.
    ///
    /// A `COMMIT` the engine refuses but leaves the transaction open on (a
    /// deferred constraint, a busy database) is followed by a `ROLLBACK`, so
    /// the connection never keeps an orphaned transaction that later guards
    /// would silently join.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Sqlite` with the `COMMIT` error if it fails; the
    /// work done in the transaction is then rolled back.
    pub fn commit(mut self) -> Result<(), DbError> {
        self.resolve(TransactionState::Committed)
    }

    /// Rolls the transaction back if this guard started it.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Sqlite` if `ROLLBACK` fails.
    pub fn rollback(mut self) -> Result<(), DbError> {
        self.resolve(TransactionState::RolledBack)
    }

    fn resolve(&mut self, outcome: TransactionState) -> Result<(), DbError> {
        if self.state != TransactionState::Active {
            return Ok(());
        }
        self.state = outcome;
        let sql = match outcome {
            TransactionState::RolledBack => "ROLLBACK",
            _ => "COMMIT",
        };
        if let Err(e) = self.connection.execute_batch(sql) {
            if outcome == TransactionState::Committed && is_transaction_active(self.connection) {
                self.state = TransactionState::RolledBack;
                tracing::warn!(error = %e, "commit failed, rolling back");
                if let Err(rollback) = self.connection.execute_batch("ROLLBACK") {
                    tracing::error!(error = %rollback, "failed to roll back after a failed commit");
                }
            }
            return Err(e.into());
        }
        Ok(())
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.state != TransactionState::Active {
            return;
        }

        let outcome = if self.rollback_on_drop || std::thread::panicking() {
            TransactionState::RolledBack
        } else {
            TransactionState::Committed
        };

        if let Err(e) = self.resolve(outcome) {
            tracing::error!(error = %e, outcome = ?outcome, "failed to resolve transaction on drop");
        }
    }
}
