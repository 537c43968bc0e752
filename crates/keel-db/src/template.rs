//! Pristine template database provisioning.
//!
//! The template is copied out of the executable's resources into the temp
//! directory on first use. The copied path is then cached for the rest of
//! the process and never refreshed: if the temp file is later deleted or
//! modified, callers still get the same path and must recopy it themselves.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use thiserror::Error;

/// Errors that can occur while provisioning the template database.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// Copying the template into place failed.
    #[error("failed to copy template database from {} to {}: {source}", from.display(), to.display())]
    Copy {
        /// The bundled template.
        from: PathBuf,
        /// The temp destination.
        to: PathBuf,
        /// The underlying IO error.
        source: std::io::Error,
    },
}

/// Copies the template database once and remembers where it went.
#[derive(Debug)]
pub struct TemplateProvisioner {
    source: PathBuf,
    destination: PathBuf,
    provisioned: OnceLock<PathBuf>,
    init_gate: Mutex<()>,
}

impl TemplateProvisioner {
    /// Creates a provisioner copying `source` to `destination` on first use.
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            provisioned: OnceLock::new(),
            init_gate: Mutex::new(()),
        }
    }

    /// Returns the path of the provisioned template, copying it on the first
    /// call.
    ///
    /// # Errors
    ///
    /// Returns `TemplateError::Copy` if the first copy fails; a later call
    /// retries the copy.
    pub fn template_db_path(&self) -> Result<&Path, TemplateError> {
        if let Some(path) = self.provisioned.get() {
            return Ok(path.as_path());
        }

        // Serialise first-time copies; losers of the race find the path set.
        let _gate = self
            .init_gate
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(path) = self.provisioned.get() {
            return Ok(path.as_path());
        }

        keel_types::copy_file(&self.source, &self.destination).map_err(|source| {
            TemplateError::Copy {
                from: self.source.clone(),
                to: self.destination.clone(),
                source,
            }
        })?;
        tracing::info!(
            from = %self.source.display(),
            to = %self.destination.display(),
            "provisioned template database"
        );

        Ok(self.provisioned.get_or_init(|| self.destination.clone()).as_path())
    }

    /// Returns the provisioned path without copying, if provisioning has
    /// already happened.
    pub fn provisioned_path(&self) -> Option<&Path> {
        self.provisioned.get().map(PathBuf::as_path)
    }
}
