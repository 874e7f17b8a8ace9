pub mod app;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use uuid::Uuid;

use app::adb::locator::{resolve_adb_program, validate_adb_program};
use app::adb::runner::SystemAdb;
use app::cli::Cli;
use app::config::{load_config_from_path, save_config_to_path, validate_config, AppConfig};
use app::error::AppError;
use app::logging::init_logging;
use app::session::{Session, SessionOptions};
use app::signals::install_interrupt_handler;

pub fn run() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            // Usage errors exit 1; --help and --version are not errors.
            return if err.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    init_logging(cli.verbose);

    match run_cli(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run_cli(cli: &Cli) -> Result<bool, AppError> {
    let trace_id = Uuid::new_v4().to_string();

    if let Some(path) = &cli.init_config {
        write_default_config(path, &trace_id)?;
        println!("Wrote default config to {}", path.display());
        return Ok(true);
    }

    let package_path = cli
        .package_path
        .as_deref()
        .ok_or_else(|| AppError::validation("APK path is required", &trace_id))?;

    let config = match &cli.config {
        Some(path) => load_config_from_path(path, &trace_id)?,
        None => AppConfig::default(),
    };
    let config = validate_config(cli.apply_overrides(config));

    let program = resolve_adb_program(cli.adb.as_deref(), &config.adb.command_path);
    validate_adb_program(&program)
        .map_err(|message| AppError::tool_unavailable(message, &trace_id))?;

    let timeout = Some(Duration::from_secs(config.command.command_timeout_secs));
    let options = session_options(cli, &config);
    let runner = SystemAdb::new(program)
        .with_serial(options.serial.clone())
        .with_timeout(timeout);
    info!(trace_id = %trace_id, adb = %runner.program(), "adb resolved");

    let mut session = Session::with_trace_id(runner, options, trace_id.clone());
    install_interrupt_handler(session.running_flag(), &trace_id)?;

    let summary = session.run(package_path);
    if cli.json {
        let payload = serde_json::to_string_pretty(&summary)
            .map_err(|err| AppError::system(format!("Failed to serialize summary: {err}"), &trace_id))?;
        println!("{payload}");
    }
    Ok(summary.success())
}

fn session_options(cli: &Cli, config: &AppConfig) -> SessionOptions {
    let mut options = SessionOptions::from_config(config);
    // Keep stdout parseable when the summary is printed as JSON.
    options.status_to_stderr = cli.json;
    options
}

fn backup_path(path: &Path) -> PathBuf {
    let mut backup = path.as_os_str().to_owned();
    backup.push(".bak");
    PathBuf::from(backup)
}

fn write_default_config(path: &Path, trace_id: &str) -> Result<(), AppError> {
    save_config_to_path(&AppConfig::default(), path, &backup_path(path), trace_id)
}
