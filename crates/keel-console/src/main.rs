//! keel console binary: opens the program database and reads `db ...`
//! commands from stdin until EOF or `quit`.

use std::io::{self, BufRead, Write};
use std::process::ExitCode;

use keel_console::{commands, config, ConsoleError};
use keel_types::AppDir;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("KEEL_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

fn main() -> ExitCode {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("keel.toml"));

    let config = match config::load_config(selected_config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    match run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "keel console failed");
            ExitCode::FAILURE
        }
    }
}

fn run(config: &config::Config) -> Result<(), ConsoleError> {
    let db = keel_console::build_database(config)?;
    db.init()?;
    tracing::info!(
        path = %db.program_database_path().display(),
        user_dir = %db.paths().dir(AppDir::User).display(),
        affinity = db.registry().affinity().as_str(),
        "program database ready"
    );

    let stdin = io::stdin();
    let mut stdout = io::stdout().lock();
    for line in stdin.lock().lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed == "quit" || trimmed == "exit" {
            break;
        }
        for output in commands::run_command(&db, trimmed) {
            writeln!(stdout, "{output}")?;
        }
        stdout.flush()?;
    }

    db.close()?;
    tracing::info!("keel console shut down");
    Ok(())
}
