//! Operator console for the keel program database.
//!
//! Loads [`config::Config`], builds the [`ProgramDatabase`] it describes, and
//! runs `db ...` inspection commands from [`commands`].

pub mod commands;
pub mod config;

use std::path::PathBuf;
use std::sync::Arc;

use keel_db::{
    bundled_resources, DatabaseOptions, DbError, DirectoryBundle, ProgramDatabase, ResourceBundle,
};
use keel_types::AppPaths;
use thiserror::Error;

use crate::config::{Config, ConfigError};

/// Errors that stop the console from starting.
#[derive(Debug, Error)]
pub enum ConsoleError {
    /// The configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Locating the application directories or console I/O failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The program database could not be initialized.
    #[error(transparent)]
    Database(#[from] DbError),
}

/// Builds the program database described by `config`.
///
/// Table definitions come from `resources.dir` when set and from the
/// definitions compiled into the binary otherwise. Nothing is opened until
/// [`ProgramDatabase::init`].
///
/// # Errors
///
/// Returns `ConsoleError::Io` if the executable directory cannot be found.
pub fn build_database(config: &Config) -> Result<ProgramDatabase, ConsoleError> {
    Ok(build_database_in(AppPaths::detect()?, config))
}

/// Builds the program database described by `config` inside `paths`.
pub fn build_database_in(paths: AppPaths, config: &Config) -> ProgramDatabase {
    let bundle: Arc<dyn ResourceBundle> = match &config.resources.dir {
        Some(dir) => Arc::new(DirectoryBundle::new(dir)),
        None => Arc::new(bundled_resources()),
    };

    let options = DatabaseOptions {
        settings: config.database.runtime_settings(),
        affinity: config.database.thread_affinity,
        database_path: config.database.path.as_ref().map(PathBuf::from),
        template_source: config.resources.template.as_ref().map(PathBuf::from),
    };

    tracing::debug!(
        bundled = config.resources.dir.is_none(),
        "building program database"
    );
    ProgramDatabase::new(paths, bundle, options)
}
