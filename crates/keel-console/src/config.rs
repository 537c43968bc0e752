//! Console configuration loading from file and environment variables.

use keel_db::DbRuntimeSettings;
use keel_types::ThreadAffinity;
use serde::Deserialize;
use thiserror::Error;

/// Top-level console configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Resource locations.
    #[serde(default)]
    pub resources: ResourcesConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the program database file. Defaults to `keel.sqlite` in the
    /// user data directory.
    #[serde(default)]
    pub path: Option<String>,

    /// Busy timeout for SQLite connections, in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Prepared statements kept per connection.
    #[serde(default = "default_statement_cache_capacity")]
    pub statement_cache_capacity: usize,

    /// Whether to switch the database to WAL journal mode.
    #[serde(default = "default_wal")]
    pub wal: bool,

    /// Policy for threads that ask for a context without registering one.
    #[serde(default)]
    pub thread_affinity: ThreadAffinity,
}

/// Resource configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourcesConfig {
    /// Directory holding `database/tables/*.sql`. The definitions compiled
    /// into the binary are used when unset.
    #[serde(default)]
    pub dir: Option<String>,

    /// Path to the pristine template database. Defaults to
    /// `res/database/keel.sqlite` next to the executable.
    #[serde(default)]
    pub template: Option<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "keel_db=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_busy_timeout_ms() -> u64 {
    DbRuntimeSettings::default().busy_timeout_ms
}

fn default_statement_cache_capacity() -> usize {
    DbRuntimeSettings::default().statement_cache_capacity
}

fn default_wal() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: default_busy_timeout_ms(),
            statement_cache_capacity: default_statement_cache_capacity(),
            wal: default_wal(),
            thread_affinity: ThreadAffinity::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl DatabaseConfig {
    /// Returns the connection settings described by this section.
    pub fn runtime_settings(&self) -> DbRuntimeSettings {
        DbRuntimeSettings {
            busy_timeout_ms: self.busy_timeout_ms,
            statement_cache_capacity: self.statement_cache_capacity,
            wal: self.wal,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `KEEL_DB_PATH` overrides `database.path`
/// - `KEEL_BUSY_TIMEOUT_MS` overrides `database.busy_timeout_ms`
/// - `KEEL_THREAD_AFFINITY` overrides `database.thread_affinity`
/// - `KEEL_RESOURCES_DIR` overrides `resources.dir`
/// - `KEEL_LOG_LEVEL` overrides `logging.level`
/// - `KEEL_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    Ok(apply_overrides(config, |key| std::env::var(key).ok()))
}

/// Applies `KEEL_*` overrides read through `lookup`.
///
/// Unparseable numeric or policy values are ignored.
pub fn apply_overrides(mut config: Config, lookup: impl Fn(&str) -> Option<String>) -> Config {
    if let Some(db_path) = lookup("KEEL_DB_PATH") {
        config.database.path = Some(db_path);
    }
    if let Some(timeout) = lookup("KEEL_BUSY_TIMEOUT_MS") {
        if let Ok(parsed) = timeout.parse() {
            config.database.busy_timeout_ms = parsed;
        }
    }
    if let Some(affinity) = lookup("KEEL_THREAD_AFFINITY") {
        if let Some(parsed) = ThreadAffinity::parse(&affinity) {
            config.database.thread_affinity = parsed;
        }
    }
    if let Some(dir) = lookup("KEEL_RESOURCES_DIR") {
        config.resources.dir = Some(dir);
    }
    if let Some(level) = lookup("KEEL_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = lookup("KEEL_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }

    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_runtime_settings() {
        let config = Config::default();
        assert_eq!(config.database.runtime_settings(), DbRuntimeSettings::default());
        assert_eq!(config.database.thread_affinity, ThreadAffinity::Strict);
        assert!(config.database.path.is_none());
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
    }

    #[test]
    fn parses_partial_file() {
        let config: Config = toml::from_str(
            r#"
            [database]
            path = "/var/lib/keel/keel.sqlite"
            busy_timeout_ms = 250
            thread_affinity = "fallback_to_main"

            [resources]
            dir = "/usr/share/keel"
            "#,
        )
        .expect("config should parse");

        assert_eq!(config.database.path.as_deref(), Some("/var/lib/keel/keel.sqlite"));
        assert_eq!(config.database.busy_timeout_ms, 250);
        assert_eq!(config.database.statement_cache_capacity, 64);
        assert!(config.database.wal);
        assert_eq!(config.database.thread_affinity, ThreadAffinity::FallbackToMain);
        assert_eq!(config.resources.dir.as_deref(), Some("/usr/share/keel"));
        assert!(config.resources.template.is_none());
    }

    #[test]
    fn rejects_unknown_affinity() {
        let result: Result<Config, _> = toml::from_str(
            r#"
            [database]
            thread_affinity = "whatever"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("absent.toml");
        let config = load_config(path.to_str()).expect("missing file is not an error");
        assert_eq!(config.database.busy_timeout_ms, 5_000);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("keel.toml");
        std::fs::write(&path, "[database\npath = ").expect("should write config");

        let err = load_config(path.to_str()).expect_err("malformed toml should fail");
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn overrides_apply_and_ignore_garbage() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("KEEL_DB_PATH", "/tmp/other.sqlite"),
            ("KEEL_BUSY_TIMEOUT_MS", "not-a-number"),
            ("KEEL_THREAD_AFFINITY", "fallback_to_main"),
            ("KEEL_LOG_LEVEL", "keel_db=debug,info"),
            ("KEEL_LOG_JSON", "1"),
        ]);

        let config = apply_overrides(Config::default(), |key| {
            env.get(key).map(|value| value.to_string())
        });

        assert_eq!(config.database.path.as_deref(), Some("/tmp/other.sqlite"));
        assert_eq!(config.database.busy_timeout_ms, 5_000, "garbage is ignored");
        assert_eq!(config.database.thread_affinity, ThreadAffinity::FallbackToMain);
        assert_eq!(config.logging.level, "keel_db=debug,info");
        assert!(config.logging.json);
        assert!(config.resources.dir.is_none());
    }
}
