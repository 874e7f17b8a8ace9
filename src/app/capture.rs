use std::fs::File;
use std::path::Path;
use std::process::Child;

use chrono::{DateTime, TimeZone};
use tracing::{info, warn};

use crate::app::adb::runner::AdbRunner;
use crate::app::error::AppError;

/// `<prefix>_<YYYYMMDD>_<HHMMSS>.txt`
pub fn build_log_file_name<Tz: TimeZone>(prefix: &str, now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("{}_{}.txt", prefix, now.format("%Y%m%d_%H%M%S"))
}

/// Filter by pid when the app is already running, otherwise fall back to its log tag.
pub fn build_capture_args(pids: &[u32], log_tag: &str) -> Vec<String> {
    let mut args = vec!["logcat".to_string(), "-v".to_string(), "time".to_string()];
    if pids.is_empty() {
        args.push(format!("{log_tag}:*"));
        args.push("*:S".to_string());
    } else {
        let csv = pids
            .iter()
            .map(|pid| pid.to_string())
            .collect::<Vec<_>>()
            .join(",");
        args.push("--pid".to_string());
        args.push(csv);
    }
    args
}

/// The background logcat process. Owned by one session; stopped exactly once, on drop at the
/// latest.
pub struct CaptureProcess {
    child: Option<Child>,
    args: Vec<String>,
    trace_id: String,
}

impl CaptureProcess {
    pub fn start<R: AdbRunner + ?Sized>(
        runner: &R,
        args: Vec<String>,
        log_path: &Path,
        trace_id: &str,
    ) -> Result<Self, AppError> {
        let log_file = File::create(log_path).map_err(|err| {
            AppError::system(
                format!("Failed to create log file {}: {err}", log_path.display()),
                trace_id,
            )
        })?;
        let child = runner.spawn_capture(&args, log_file, trace_id)?;
        info!(trace_id = %trace_id, pid = child.id(), log_path = %log_path.display(), "capture started");
        Ok(Self {
            child: Some(child),
            args,
            trace_id: trace_id.to_string(),
        })
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    /// True when the logcat process died on its own while we still hold it.
    pub fn has_exited(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(Some(_))),
            None => true,
        }
    }

    /// Terminates then waits. Returns false when there was nothing left to stop.
    pub fn stop(&mut self) -> bool {
        let Some(mut child) = self.child.take() else {
            return false;
        };
        terminate(&mut child, &self.trace_id);
        match child.wait() {
            Ok(status) => {
                info!(trace_id = %self.trace_id, status = %status, "capture stopped");
            }
            Err(err) => {
                warn!(trace_id = %self.trace_id, error = %err, "failed to wait for capture process");
            }
        }
        true
    }
}

impl Drop for CaptureProcess {
    fn drop(&mut self) {
        if self.stop() {
            warn!(trace_id = %self.trace_id, "capture stopped on drop");
        }
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child, trace_id: &str) {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(child.id()) else {
        let _ = child.kill();
        return;
    };
    // The capture runs in its own process group; signal the group, then the pid alone.
    if let Err(group_err) = signal::kill(Pid::from_raw(-raw), Signal::SIGTERM) {
        if let Err(err) = signal::kill(Pid::from_raw(raw), Signal::SIGTERM) {
            warn!(
                trace_id = %trace_id,
                group_error = %group_err,
                error = %err,
                "failed to send SIGTERM to capture process"
            );
        }
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child, trace_id: &str) {
    if let Err(err) = child.kill() {
        warn!(trace_id = %trace_id, error = %err, "failed to kill capture process");
    }
}
