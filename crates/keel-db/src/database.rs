//! The program database service.
//!
//! [`ProgramDatabase`] is built once on the main thread at startup and owns
//! everything process-wide: the path layout, the resource bundle, the
//! context registry (and with it the main context), the template
//! provisioner, and the last initialization error. Pass it (usually in an
//! `Arc`) to whatever needs database access.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use keel_types::{
    AppDir, AppPaths, ThreadAffinity, DATABASE_FILE_NAME, TEMPLATE_FILE_NAME,
    TEMPLATE_RESOURCE_PATH,
};

use crate::connection::DbRuntimeSettings;
use crate::context::{Context, ContextHandle};
use crate::error::DbError;
use crate::registry::{ContextRegistry, ThreadContext};
use crate::resources::ResourceBundle;
use crate::schema::{create_database, create_missing_tables};
use crate::template::TemplateProvisioner;

/// Process-wide access point to the program database.
pub struct ProgramDatabase {
    paths: AppPaths,
    database_path: PathBuf,
    settings: DbRuntimeSettings,
    bundle: Arc<dyn ResourceBundle>,
    registry: Arc<ContextRegistry>,
    template: TemplateProvisioner,
    last_error: Mutex<Option<String>>,
}

impl std::fmt::Debug for ProgramDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgramDatabase")
            .field("database_path", &self.database_path)
            .field("settings", &self.settings)
            .field("registry", &self.registry)
            .field("template", &self.template)
            .finish_non_exhaustive()
    }
}

/// Builder-style options for [`ProgramDatabase::new`].
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    /// Connection settings used by every context.
    pub settings: DbRuntimeSettings,
    /// Policy for threads without a registered context.
    pub affinity: ThreadAffinity,
    /// Database file; defaults to `keel.sqlite` in the user directory.
    pub database_path: Option<PathBuf>,
    /// Pristine template; defaults to the executable's bundled copy.
    pub template_source: Option<PathBuf>,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            settings: DbRuntimeSettings::default(),
            affinity: ThreadAffinity::Strict,
            database_path: None,
            template_source: None,
        }
    }
}

impl ProgramDatabase {
    /// Creates the service. The calling thread becomes the main thread.
    ///
    /// Nothing is opened until [`ProgramDatabase::init`].
    pub fn new(paths: AppPaths, bundle: Arc<dyn ResourceBundle>, options: DatabaseOptions) -> Self {
        let database_path = options
            .database_path
            .unwrap_or_else(|| paths.path(DATABASE_FILE_NAME, AppDir::User));
        let template_source = options
            .template_source
            .unwrap_or_else(|| paths.path(TEMPLATE_RESOURCE_PATH, AppDir::Executable));
        let template =
            TemplateProvisioner::new(template_source, paths.path(TEMPLATE_FILE_NAME, AppDir::Temp));

        Self {
            registry: Arc::new(ContextRegistry::new(
                Context::new(options.settings),
                options.affinity,
            )),
            paths,
            database_path,
            settings: options.settings,
            bundle,
            template,
            last_error: Mutex::new(None),
        }
    }

    /// Returns the path of the program database file.
    pub fn program_database_path(&self) -> &std::path::Path {
        &self.database_path
    }

    /// Returns `true` if the program database file exists.
    pub fn file_exists(&self) -> bool {
        keel_types::file_exists(&self.database_path)
    }

    /// Returns the application directory layout.
    pub fn paths(&self) -> &AppPaths {
        &self.paths
    }

    /// Returns the connection settings contexts are opened with.
    pub fn settings(&self) -> DbRuntimeSettings {
        self.settings
    }

    /// Returns the resource bundle holding the table definitions.
    pub fn bundle(&self) -> &dyn ResourceBundle {
        self.bundle.as_ref()
    }

    /// Returns the context registry.
    pub fn registry(&self) -> &Arc<ContextRegistry> {
        &self.registry
    }

    /// Returns the message of the last failed initialization step.
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_last_error(&self, message: String) {
        *self
            .last_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(message);
    }

    /// Initializes the program database.
    ///
    /// Creates the file and its tables if it does not exist, opens the main
    /// context, and creates any tables missing from an existing file.
    ///
    /// # Errors
    ///
    /// Returns the error of the first failing step. Its message is also
    /// kept for [`ProgramDatabase::last_error`].
    pub fn init(&self) -> Result<(), DbError> {
        self.try_init().map_err(|e| {
            let message = match &e {
                DbError::Open { .. } | DbError::Close { .. } => {
                    format!("Unable to open global database connections: {e}")
                }
                _ => format!("Unable to initialize program database: {e}"),
            };
            tracing::error!(error = %e, path = %self.database_path.display(), "{message}");
            self.set_last_error(message);
            e
        })
    }

    fn try_init(&self) -> Result<(), DbError> {
        let mut created = false;
        if !self.file_exists() {
            let tables = create_database(&self.database_path, self.bundle.as_ref(), self.settings)?;
            tracing::info!(
                path = %self.database_path.display(),
                tables,
                "created program database"
            );
            created = true;
        }

        self.registry.main().lock()?.open(&self.database_path)?;

        if !created {
            self.update_database()?;
        }
        Ok(())
    }

    /// Creates tables that are defined in the bundle but missing from the
    /// open main context's database.
    ///
    /// Returns the number of tables created.
    ///
    /// # Errors
    ///
    /// Returns `DbError::NotOpen` if the main context is closed and
    /// `DbError::Schema` if bootstrap fails.
    pub fn update_database(&self) -> Result<usize, DbError> {
        let main = self.registry.main().lock()?;
        let conn = main.connection_rw().ok_or(DbError::NotOpen)?;
        Ok(create_missing_tables(conn, self.bundle.as_ref())?)
    }

    /// Closes the main context. Thread contexts are closed by their owners.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Close` if the connections could not be released.
    pub fn close(&self) -> Result<(), DbError> {
        self.registry.main().lock()?.close()
    }

    /// Returns the context for the calling thread.
    ///
    /// # Errors
    ///
    /// See [`ContextRegistry::global`].
    pub fn global(&self) -> Result<ContextHandle, DbError> {
        self.registry.global()
    }

    /// Opens and registers a context for the calling thread.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Open` if the connections cannot be opened.
    pub fn thread_context(&self) -> Result<ThreadContext, DbError> {
        ThreadContext::open(&self.registry, &self.database_path, self.settings)
    }

    /// Executes `sql` on the calling thread's read-write connection.
    ///
    /// Returns the number of rows changed, or 0 if that context is closed.
    ///
    /// # Errors
    ///
    /// Returns the lookup error from [`ProgramDatabase::global`] or
    /// `DbError::Sqlite` if the statement fails.
    pub fn exec(&self, sql: &str) -> Result<u64, DbError> {
        let handle = self.global()?;
        let context = handle.lock()?;
        context.exec(sql)
    }

    /// Returns the path of the provisioned template database, copying it on
    /// first use.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Template` if the first copy fails.
    pub fn template_db_path(&self) -> Result<PathBuf, DbError> {
        Ok(self.template.template_db_path()?.to_path_buf())
    }
}
