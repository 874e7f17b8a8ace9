//! One install-and-log run.
//!
//! A [`Session`] walks a fixed sequence of stages against an [`AdbRunner`]: prerequisites,
//! uninstall, install, launch, capture, poll. Prerequisite, file and install failures abort the
//! run; uninstall and launch problems are reported and the run goes on. Whatever happens, the
//! capture process is stopped exactly once before [`Session::run`] returns.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::app::adb::apk::{extract_split_apks, get_apk_info, normalize_apk_path};
use crate::app::adb::apps::is_package_installed;
use crate::app::adb::parse::{interpret_tool_output, parse_adb_devices, parse_pids, Outcome, Step};
use crate::app::adb::runner::{AdbRunner, CommandOutput};
use crate::app::capture::{build_capture_args, build_log_file_name, CaptureProcess};
use crate::app::config::AppConfig;
use crate::app::error::AppError;
use crate::app::models::{RunStatus, RunSummary, StageReport, StageStatus};
use crate::app::signals::sleep_while_running;

#[cfg(test)]
mod tests;

// User-facing status line: stdout, or stderr when stdout is reserved for the JSON summary.
macro_rules! status {
    ($session:expr, $($arg:tt)*) => {
        if $session.options.status_to_stderr {
            eprintln!($($arg)*)
        } else {
            println!($($arg)*)
        }
    };
}

pub const STAGE_PREREQUISITES: &str = "prerequisites";
pub const STAGE_UNINSTALL: &str = "uninstall_existing";
pub const STAGE_INSTALL: &str = "install";
pub const STAGE_LAUNCH: &str = "launch";
pub const STAGE_CAPTURE: &str = "start_capture";
pub const STAGE_MONITOR: &str = "monitor";
pub const STAGE_STOP_CAPTURE: &str = "stop_capture";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOptions {
    pub replace: bool,
    pub allow_downgrade: bool,
    pub grant_permissions: bool,
    pub allow_test_packages: bool,
    pub extra_args: Vec<String>,
}

impl InstallOptions {
    fn flags(&self) -> Vec<String> {
        let mut flags = Vec::new();
        if self.replace {
            flags.push("-r".to_string());
        }
        if self.allow_downgrade {
            flags.push("-d".to_string());
        }
        if self.grant_permissions {
            flags.push("-g".to_string());
        }
        if self.allow_test_packages {
            flags.push("-t".to_string());
        }
        flags.extend(self.extra_args.iter().cloned());
        flags
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub package_name: String,
    pub launch_activity: String,
    pub log_tag: String,
    pub file_prefix: String,
    pub output_dir: PathBuf,
    pub poll_interval: Duration,
    pub clear_buffer: bool,
    pub uninstall_existing: bool,
    pub serial: Option<String>,
    pub install: InstallOptions,
    pub status_to_stderr: bool,
}

impl SessionOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            package_name: config.target.package_name.trim().to_string(),
            launch_activity: config.target.launch_activity.trim().to_string(),
            log_tag: config.capture.log_tag.trim().to_string(),
            file_prefix: config.capture.file_prefix.trim().to_string(),
            output_dir: config.output_dir(),
            poll_interval: Duration::from_secs(config.capture.poll_interval_secs),
            clear_buffer: config.capture.clear_buffer,
            uninstall_existing: config.apk_install.uninstall_existing,
            serial: Some(config.adb.serial.clone()).filter(|serial| !serial.is_empty()),
            install: InstallOptions {
                replace: config.apk_install.replace_existing,
                allow_downgrade: config.apk_install.allow_downgrade,
                grant_permissions: config.apk_install.grant_permissions,
                allow_test_packages: config.apk_install.allow_test_packages,
                extra_args: config
                    .apk_install
                    .extra_args
                    .split_whitespace()
                    .map(str::to_string)
                    .collect(),
            },
            status_to_stderr: false,
        }
    }

    fn launch_component(&self) -> String {
        if self.launch_activity.contains('/') {
            self.launch_activity.clone()
        } else {
            format!("{}/{}", self.package_name, self.launch_activity)
        }
    }
}

// What a stage hands back to be recorded: non-fatal status plus an optional note.
struct StageNote {
    status: StageStatus,
    detail: Option<String>,
}

impl StageNote {
    fn pass(detail: Option<String>) -> Self {
        Self {
            status: StageStatus::Pass,
            detail,
        }
    }

    fn warn(detail: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Warn,
            detail: Some(detail.into()),
        }
    }

    fn skip(detail: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Skip,
            detail: Some(detail.into()),
        }
    }
}

pub struct Session<R: AdbRunner> {
    runner: R,
    options: SessionOptions,
    trace_id: String,
    running: Arc<AtomicBool>,
    capture: Option<CaptureProcess>,
    log_path: Option<PathBuf>,
    stages: Vec<StageReport>,
}

impl<R: AdbRunner> Session<R> {
    pub fn new(runner: R, options: SessionOptions) -> Self {
        Self::with_trace_id(runner, options, Uuid::new_v4().to_string())
    }

    pub fn with_trace_id(runner: R, options: SessionOptions, trace_id: impl Into<String>) -> Self {
        Self {
            runner,
            options,
            trace_id: trace_id.into(),
            running: Arc::new(AtomicBool::new(true)),
            capture: None,
            log_path: None,
            stages: Vec::new(),
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// The continuation flag. Clearing it ends the poll loop; it is never set again.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn log_path(&self) -> Option<&PathBuf> {
        self.log_path.as_ref()
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.as_ref().is_some_and(CaptureProcess::is_running)
    }

    pub fn stages(&self) -> &[StageReport] {
        &self.stages
    }

    pub fn run(&mut self, package_path: &str) -> RunSummary {
        status!(self, "APK install and logcat capture for {}", self.options.package_name);
        status!(self, "{}", "=".repeat(50));
        info!(trace_id = %self.trace_id, package = %self.options.package_name, path = %package_path, "run started");

        let result = self.run_stages(package_path);
        if let Err(err) = &result {
            error!(trace_id = %self.trace_id, code = %err.code, error = %err.error, "run aborted");
            status!(self, "[fail] {}", err.error);
        }

        self.stop_capture();

        let summary = RunSummary {
            trace_id: self.trace_id.clone(),
            package_name: self.options.package_name.clone(),
            package_path: package_path.to_string(),
            status: if result.is_ok() {
                RunStatus::Pass
            } else {
                RunStatus::Fail
            },
            log_path: self
                .log_path
                .as_ref()
                .map(|path| path.to_string_lossy().to_string()),
            error_code: result.as_ref().err().map(|err| err.code.clone()),
            error: result.as_ref().err().map(|err| err.error.clone()),
            stages: self.stages.clone(),
        };

        if summary.success() {
            if let Some(path) = &summary.log_path {
                status!(self, "\n[ok] Logs saved to: {path}");
            }
            status!(self, "Done in {:.1}s.", summary.total_duration().as_secs_f64());
        }
        summary
    }

    // An interrupt before capture starts ends the run; during the poll loop it is the normal stop.
    fn run_stages(&mut self, package_path: &str) -> Result<(), AppError> {
        self.ensure_running()?;
        self.check_prerequisites()?;
        self.ensure_running()?;
        self.uninstall_existing();
        self.ensure_running()?;
        self.install_package(package_path)?;
        self.ensure_running()?;
        self.launch_app();
        self.ensure_running()?;
        self.start_capture()?;
        self.monitor();
        Ok(())
    }

    fn ensure_running(&self) -> Result<(), AppError> {
        if self.running.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AppError::interrupted(
                "Interrupted before log capture started",
                &self.trace_id,
            ))
        }
    }

    pub fn check_prerequisites(&mut self) -> Result<(), AppError> {
        let started = Instant::now();
        status!(self, "Checking prerequisites...");
        let result = self.check_prerequisites_inner();
        self.record(STAGE_PREREQUISITES, started, result)
    }

    fn check_prerequisites_inner(&mut self) -> Result<StageNote, AppError> {
        let version = self.adb(&["version"]).map_err(|err| {
            AppError::tool_unavailable(format!("ADB is not available: {}", err.error), &self.trace_id)
        })?;
        if let Outcome::Failure(detail) =
            interpret_tool_output(Step::Version, &version.stdout, &version.stderr)
        {
            return Err(AppError::tool_unavailable(
                format!("ADB is not available: {detail}"),
                &self.trace_id,
            ));
        }
        status!(self, "[ok] ADB is available");

        let devices_output = self.adb(&["devices"]).map_err(|err| {
            AppError::tool_unavailable(format!("ADB is not available: {}", err.error), &self.trace_id)
        })?;
        if let Outcome::Failure(detail) =
            interpret_tool_output(Step::Devices, &devices_output.stdout, &devices_output.stderr)
        {
            return Err(AppError::no_device(
                format!("No connected Android device: {detail}"),
                &self.trace_id,
            ));
        }

        let online: Vec<String> = parse_adb_devices(&devices_output.stdout)
            .into_iter()
            .filter(|device| device.is_online())
            .map(|device| device.serial)
            .collect();
        if let Some(serial) = &self.options.serial {
            if !online.contains(serial) {
                return Err(AppError::no_device(
                    format!("Device {serial} is not connected"),
                    &self.trace_id,
                ));
            }
        } else if online.len() > 1 {
            warn!(trace_id = %self.trace_id, devices = ?online, "several devices connected and no serial selected");
        }
        status!(self, "[ok] Device connected: {}", online.join(", "));
        Ok(StageNote::pass(Some(online.join(","))))
    }

    /// Best effort: never fails the run.
    pub fn uninstall_existing(&mut self) {
        let started = Instant::now();
        let note = if self.options.uninstall_existing {
            self.uninstall_existing_inner()
        } else {
            Ok(StageNote::skip("disabled by configuration"))
        };
        let note = note.unwrap_or_else(|err| {
            warn!(trace_id = %self.trace_id, error = %err.error, "uninstall check failed");
            status!(self, "[warn] Uninstall may have failed: {}", err.error);
            StageNote::warn(err.error)
        });
        let _ = self.record(STAGE_UNINSTALL, started, Ok(note));
    }

    fn uninstall_existing_inner(&mut self) -> Result<StageNote, AppError> {
        let package = self.options.package_name.clone();
        status!(self, "Checking whether {package} is installed...");
        let listing = self.adb(&["shell", "pm", "list", "packages"])?;
        if !is_package_installed(&listing.stdout, &package) {
            status!(self, "[ok] {package} is not installed");
            return Ok(StageNote::skip("not installed"));
        }

        status!(self, "Uninstalling existing {package}...");
        let output = self.adb(&["uninstall", package.as_str()])?;
        match interpret_tool_output(Step::Uninstall, &output.stdout, &output.stderr) {
            Outcome::Failure(detail) => {
                status!(self, "[warn] Uninstall may have failed: {detail}");
                Ok(StageNote::warn(detail))
            }
            _ => {
                status!(self, "[ok] Existing app uninstalled");
                Ok(StageNote::pass(None))
            }
        }
    }

    pub fn install_package(&mut self, package_path: &str) -> Result<(), AppError> {
        let started = Instant::now();
        let result = self.install_package_inner(package_path);
        self.record(STAGE_INSTALL, started, result)
    }

    fn install_package_inner(&mut self, package_path: &str) -> Result<StageNote, AppError> {
        let path = normalize_apk_path(package_path);
        if !path.is_file() {
            return Err(AppError::file_not_found(
                format!("APK file does not exist: {}", path.display()),
                &self.trace_id,
            ));
        }

        let info = get_apk_info(&path);
        if let Some(problem) = &info.error {
            warn!(trace_id = %self.trace_id, path = %info.path, error = %problem, "package file looks wrong");
            status!(self, "[warn] {problem}");
        }

        status!(self, "Installing {}...", path.display());
        let mut args = Vec::new();
        let _bundle = if info.is_split_bundle {
            let bundle = extract_split_apks(&path)
                .map_err(|err| AppError::install_failed(err, &self.trace_id))?;
            args.push("install-multiple".to_string());
            args.extend(self.options.install.flags());
            args.extend(bundle.apk_paths.iter().cloned());
            Some(bundle)
        } else {
            args.push("install".to_string());
            args.extend(self.options.install.flags());
            args.push(path.to_string_lossy().to_string());
            None
        };

        let output = self.runner.run(&args, &self.trace_id)?;
        match interpret_tool_output(Step::Install, &output.stdout, &output.stderr) {
            Outcome::Failure(detail) => Err(AppError::install_failed(
                format!("APK install failed: {detail}"),
                &self.trace_id,
            )),
            _ => {
                status!(self, "[ok] APK installed ({} bytes)", info.file_size_bytes);
                Ok(StageNote::pass(Some(info.path)))
            }
        }
    }

    /// A launch that does not report `Starting:` is a warning; the capture still begins.
    pub fn launch_app(&mut self) {
        let started = Instant::now();
        let component = self.options.launch_component();
        status!(self, "Launching {component}...");
        let note = match self.adb(&["shell", "am", "start", "-n", component.as_str()]) {
            Ok(output) => match interpret_tool_output(Step::Launch, &output.stdout, &output.stderr) {
                Outcome::Success => {
                    status!(self, "[ok] App launched");
                    StageNote::pass(None)
                }
                Outcome::Warning(detail) => {
                    status!(self, "[ok] App launched ({detail})");
                    StageNote::pass(Some(detail))
                }
                Outcome::Failure(detail) => {
                    status!(self, "[warn] App launch may have failed: {detail}");
                    StageNote::warn(detail)
                }
            },
            Err(err) => {
                status!(self, "[warn] App launch may have failed: {}", err.error);
                StageNote::warn(err.error)
            }
        };
        let _ = self.record(STAGE_LAUNCH, started, Ok(note));
    }

    pub fn start_capture(&mut self) -> Result<(), AppError> {
        let started = Instant::now();
        let result = self.start_capture_inner();
        self.record(STAGE_CAPTURE, started, result)
    }

    fn start_capture_inner(&mut self) -> Result<StageNote, AppError> {
        if self.capture.is_some() {
            return Err(AppError::validation("Capture already running", &self.trace_id));
        }

        if self.options.clear_buffer {
            match self.adb(&["logcat", "-c"]) {
                Ok(output) if output.exit_code.unwrap_or_default() != 0 => {
                    warn!(trace_id = %self.trace_id, stderr = %output.stderr.trim(), "logcat clear failed");
                }
                Err(err) => {
                    warn!(trace_id = %self.trace_id, error = %err.error, "logcat clear failed");
                }
                Ok(_) => {}
            }
        }

        let pids = self.lookup_pids();
        let args = build_capture_args(&pids, &self.options.log_tag);

        fs::create_dir_all(&self.options.output_dir).map_err(|err| {
            AppError::system(
                format!(
                    "Failed to create output dir {}: {err}",
                    self.options.output_dir.display()
                ),
                &self.trace_id,
            )
        })?;
        let log_path = self
            .options
            .output_dir
            .join(build_log_file_name(&self.options.file_prefix, &Local::now()));

        status!(self, "Recording logs to: {}", log_path.display());
        if pids.is_empty() {
            status!(self, "App process not found, filtering by tag {}", self.options.log_tag);
        } else {
            status!(self, "Filtering by pid {}", join_pids(&pids));
        }

        let capture = CaptureProcess::start(&self.runner, args, &log_path, &self.trace_id)?;
        let detail = capture.args().join(" ");
        self.capture = Some(capture);
        self.log_path = Some(log_path);
        status!(self, "[ok] Log capture started");
        Ok(StageNote::pass(Some(detail)))
    }

    /// Polls the app's pid until the continuation flag is cleared.
    pub fn monitor(&mut self) {
        let started = Instant::now();
        let package = self.options.package_name.clone();
        status!(self, "Monitoring {package}...");
        status!(self, "Logs are recorded until you press Ctrl+C; the app may be closed and reopened.");
        status!(self, "{}", "=".repeat(50));

        let mut polls = 0u64;
        let mut capture_exit_reported = false;
        while self.running.load(Ordering::SeqCst) {
            let pids = self.lookup_pids();
            if pids.is_empty() {
                status!(self, "{package} is not running (you can start it again)");
            } else {
                status!(self, "{package} is running (pid: {}) - recording...", join_pids(&pids));
            }
            polls += 1;

            if !capture_exit_reported {
                if let Some(capture) = self.capture.as_mut() {
                    if capture.has_exited() {
                        warn!(trace_id = %self.trace_id, "logcat process exited on its own");
                        status!(self, "[warn] The log capture process exited early");
                        capture_exit_reported = true;
                    }
                }
            }

            sleep_while_running(self.options.poll_interval, &self.running);
        }

        status!(self, "\nInterrupt received");
        let _ = self.record(
            STAGE_MONITOR,
            started,
            Ok(StageNote::pass(Some(format!("{polls} polls")))),
        );
    }

    /// Terminates and waits for the capture process. A no-op when nothing is capturing.
    pub fn stop_capture(&mut self) -> bool {
        let started = Instant::now();
        let stopped = match self.capture.as_mut() {
            Some(capture) if capture.is_running() => {
                status!(self, "Stopping log capture...");
                let stopped = capture.stop();
                status!(self, "[ok] Log capture stopped");
                stopped
            }
            _ => false,
        };
        let already_recorded = self
            .stages
            .iter()
            .any(|stage| stage.name == STAGE_STOP_CAPTURE);
        if stopped || !already_recorded {
            let note = if stopped {
                StageNote::pass(None)
            } else {
                StageNote::skip("no capture running")
            };
            let _ = self.record(STAGE_STOP_CAPTURE, started, Ok(note));
        }
        stopped
    }

    fn lookup_pids(&self) -> Vec<u32> {
        match self.adb(&["shell", "pidof", self.options.package_name.as_str()]) {
            Ok(output) => parse_pids(&output.stdout),
            Err(err) => {
                warn!(trace_id = %self.trace_id, error = %err.error, "pid lookup failed");
                Vec::new()
            }
        }
    }

    fn adb(&self, args: &[&str]) -> Result<CommandOutput, AppError> {
        let args: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
        self.runner.run(&args, &self.trace_id)
    }

    fn record(
        &mut self,
        name: &str,
        started: Instant,
        result: Result<StageNote, AppError>,
    ) -> Result<(), AppError> {
        let duration_ms = started.elapsed().as_millis();
        let report = match &result {
            Ok(note) => StageReport {
                name: name.to_string(),
                status: note.status,
                duration_ms,
                error_code: None,
                detail: note.detail.clone(),
            },
            Err(err) => StageReport {
                name: name.to_string(),
                status: StageStatus::Fail,
                duration_ms,
                error_code: Some(err.code.clone()),
                detail: Some(err.error.clone()),
            },
        };
        info!(
            trace_id = %self.trace_id,
            stage = %report.name,
            status = ?report.status,
            duration_ms = (report.duration_ms as u64),
            "stage finished"
        );
        self.stages.push(report);
        result.map(|_| ())
    }
}

fn join_pids(pids: &[u32]) -> String {
    pids.iter()
        .map(|pid| pid.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}
