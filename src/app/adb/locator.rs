use std::path::Path;

use crate::app::config::expand_home;

pub const DEFAULT_ADB_PROGRAM: &str = "adb";

pub fn normalize_command_path(value: &str) -> String {
    let trimmed = value.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = trimmed
            .strip_prefix(quote)
            .and_then(|candidate| candidate.strip_suffix(quote))
        {
            return inner.trim().to_string();
        }
    }
    trimmed.to_string()
}

/// Picks the adb program: command-line override first, then the config value, then `adb` on PATH.
pub fn resolve_adb_program(override_path: Option<&str>, config_command_path: &str) -> String {
    let candidate = override_path
        .map(normalize_command_path)
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| normalize_command_path(config_command_path));
    if candidate.is_empty() {
        return DEFAULT_ADB_PROGRAM.to_string();
    }
    expand_home(&candidate).to_string_lossy().to_string()
}

pub fn validate_adb_program(program: &str) -> Result<(), String> {
    if program.trim().is_empty() {
        return Err("ADB command is empty".to_string());
    }
    // Bare names are looked up on PATH when spawned.
    if !program.contains(['/', '\\']) {
        return Ok(());
    }
    let path = Path::new(program);
    if path.is_dir() {
        return Err("ADB path must point to an executable file".to_string());
    }
    if !path.exists() {
        return Err(format!("ADB executable not found at {program}"));
    }
    Ok(())
}
