//! Shared types and constants for the keel database layer.
//!
//! This crate holds the definitions that both the database crate and the
//! console need without pulling in the SQLite stack: well-known file and
//! resource names, the application directory model, and the thread-affinity
//! policy used when resolving a thread's database context.

use serde::{Deserialize, Serialize};

mod paths;
pub use paths::{copy_file, file_exists, AppDir, AppPaths};

/// File name of the program database inside the user data directory.
pub const DATABASE_FILE_NAME: &str = "keel.sqlite";

/// File name the template database is copied to inside the temp directory.
pub const TEMPLATE_FILE_NAME: &str = "keel_template.sqlite";

/// Location of the pristine template database, relative to the executable.
pub const TEMPLATE_RESOURCE_PATH: &str = "res/database/keel.sqlite";

/// Virtual directory of the resource bundle holding `<table>.sql` scripts.
pub const TABLE_DEFINITIONS_DIR: &str = "database/tables";

/// How a non-main thread without a registered context is treated when it
/// asks for "the database for the calling thread".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadAffinity {
    /// Refuse the lookup with an error.
    #[default]
    Strict,
    /// Log a warning and hand out the main thread's context.
    FallbackToMain,
}

impl ThreadAffinity {
    /// Returns the configuration label for this policy.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::FallbackToMain => "fallback_to_main",
        }
    }

    /// Parses a configuration label.
    ///
    /// Returns `None` for unknown labels.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim() {
            "strict" => Some(Self::Strict),
            "fallback_to_main" | "fallback" => Some(Self::FallbackToMain),
            _ => None,
        }
    }
}
