use std::path::PathBuf;

use clap::Parser;

use crate::app::config::AppConfig;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "apk_logcat",
    version,
    about = "Install an APK over adb, launch it and record its logcat until Ctrl+C",
    after_help = "Example: apk_logcat WealthManager-v0.1.5-complete.apk"
)]
pub struct Cli {
    /// APK (or .apks/.xapk bundle) to install
    #[arg(value_name = "APK", required_unless_present = "init_config")]
    pub package_path: Option<String>,

    /// JSON config file
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Write a default config to FILE and exit
    #[arg(long, value_name = "FILE", conflicts_with = "package_path")]
    pub init_config: Option<PathBuf>,

    /// adb executable (default: `adb` on PATH)
    #[arg(long, value_name = "PATH")]
    pub adb: Option<String>,

    /// Device serial, for when several devices are connected
    #[arg(short, long)]
    pub serial: Option<String>,

    /// Application id to uninstall, launch and watch
    #[arg(short, long, value_name = "ID")]
    pub package: Option<String>,

    /// Directory for the captured log file
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<String>,

    /// Print the run summary as JSON at the end
    #[arg(long)]
    pub json: bool,

    /// Debug logging on stderr
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Command-line values win over the config file.
    pub fn apply_overrides(&self, mut config: AppConfig) -> AppConfig {
        if let Some(serial) = self.serial.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            config.adb.serial = serial.to_string();
        }
        if let Some(package) = self.package.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            config.target.package_name = package.to_string();
        }
        if let Some(dir) = self.output_dir.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            config.capture.output_dir = dir.to_string();
        }
        config
    }
}
