use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::app::error::AppError;

pub const DEFAULT_PACKAGE_NAME: &str = "com.wealthmanager";
pub const DEFAULT_LAUNCH_ACTIVITY: &str = ".MainActivity";
pub const DEFAULT_LOG_TAG: &str = "WealthManagerDebug";
pub const DEFAULT_LOG_PREFIX: &str = "WealthManager_logs";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AdbSettings {
    pub command_path: String,
    pub serial: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TargetSettings {
    pub package_name: String,
    pub launch_activity: String,
}

impl Default for TargetSettings {
    fn default() -> Self {
        Self {
            package_name: DEFAULT_PACKAGE_NAME.to_string(),
            launch_activity: DEFAULT_LAUNCH_ACTIVITY.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptureSettings {
    pub log_tag: String,
    pub file_prefix: String,
    pub output_dir: String,
    pub poll_interval_secs: u64,
    pub clear_buffer: bool,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            log_tag: DEFAULT_LOG_TAG.to_string(),
            file_prefix: DEFAULT_LOG_PREFIX.to_string(),
            output_dir: String::new(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            clear_buffer: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApkInstallSettings {
    pub replace_existing: bool,
    pub allow_downgrade: bool,
    pub grant_permissions: bool,
    pub allow_test_packages: bool,
    pub uninstall_existing: bool,
    pub extra_args: String,
}

impl Default for ApkInstallSettings {
    fn default() -> Self {
        Self {
            replace_existing: true,
            allow_downgrade: false,
            grant_permissions: false,
            allow_test_packages: false,
            uninstall_existing: true,
            extra_args: String::new(),
        }
    }
}

/// Per-command timeout. Zero means adb commands may block indefinitely.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct CommandSettings {
    pub command_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub adb: AdbSettings,
    #[serde(default)]
    pub target: TargetSettings,
    #[serde(default)]
    pub capture: CaptureSettings,
    #[serde(default)]
    pub apk_install: ApkInstallSettings,
    #[serde(default)]
    pub command: CommandSettings,
}

impl AppConfig {
    pub fn output_dir(&self) -> PathBuf {
        let trimmed = self.capture.output_dir.trim();
        if trimmed.is_empty() {
            PathBuf::from(".")
        } else {
            expand_home(trimmed)
        }
    }
}

pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

pub fn load_config_from_path(path: &Path, trace_id: &str) -> Result<AppConfig, AppError> {
    if !path.exists() {
        return Err(AppError::validation(
            format!("Config file not found: {}", path.display()),
            trace_id,
        ));
    }
    let raw = fs::read_to_string(path)
        .map_err(|err| AppError::system(format!("Failed to read config: {err}"), trace_id))?;
    let config: AppConfig = serde_json::from_str(&raw)
        .map_err(|err| AppError::validation(format!("Failed to parse config: {err}"), trace_id))?;
    Ok(validate_config(config))
}

pub fn save_config_to_path(
    config: &AppConfig,
    path: &Path,
    backup_path: &Path,
    trace_id: &str,
) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    if path.exists() {
        fs::copy(path, backup_path).map_err(|err| {
            AppError::system(format!("Failed to back up config: {err}"), trace_id)
        })?;
    }
    let payload = serde_json::to_string_pretty(config)
        .map_err(|err| AppError::system(format!("Failed to serialize config: {err}"), trace_id))?;
    fs::write(path, payload)
        .map_err(|err| AppError::system(format!("Failed to write config: {err}"), trace_id))?;
    Ok(())
}

pub fn validate_config(mut config: AppConfig) -> AppConfig {
    let defaults_target = TargetSettings::default();
    let defaults_capture = CaptureSettings::default();
    if config.target.package_name.trim().is_empty() {
        config.target.package_name = defaults_target.package_name;
    }
    if config.target.launch_activity.trim().is_empty() {
        config.target.launch_activity = defaults_target.launch_activity;
    }
    if config.capture.log_tag.trim().is_empty() {
        config.capture.log_tag = defaults_capture.log_tag;
    }
    if config.capture.file_prefix.trim().is_empty() {
        config.capture.file_prefix = defaults_capture.file_prefix;
    }
    if config.capture.poll_interval_secs == 0 {
        config.capture.poll_interval_secs = DEFAULT_POLL_INTERVAL_SECS;
    }
    config.adb.serial = config.adb.serial.trim().to_string();
    config
}
