use std::fs::File;
use std::io::Read;
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::app::error::AppError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

/// Everything the orchestrator needs from the device bridge.
///
/// `run` executes a command to completion. `spawn_capture` starts the long-lived
/// logcat process with its stdout redirected into `log_file`; the caller owns the
/// returned child.
pub trait AdbRunner {
    fn run(&self, args: &[String], trace_id: &str) -> Result<CommandOutput, AppError>;

    fn spawn_capture(
        &self,
        args: &[String],
        log_file: File,
        trace_id: &str,
    ) -> Result<Child, AppError>;
}

#[derive(Debug, Clone)]
pub struct SystemAdb {
    program: String,
    serial: Option<String>,
    timeout: Option<Duration>,
}

impl SystemAdb {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            serial: None,
            timeout: None,
        }
    }

    pub fn with_serial(mut self, serial: Option<String>) -> Self {
        self.serial = serial.filter(|value| !value.trim().is_empty());
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout.filter(|value| !value.is_zero());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn full_args(&self, args: &[String]) -> Vec<String> {
        let mut full = Vec::with_capacity(args.len() + 2);
        if let Some(serial) = &self.serial {
            full.push("-s".to_string());
            full.push(serial.clone());
        }
        full.extend(args.iter().cloned());
        full
    }
}

impl AdbRunner for SystemAdb {
    fn run(&self, args: &[String], trace_id: &str) -> Result<CommandOutput, AppError> {
        let full = self.full_args(args);
        debug!(trace_id = %trace_id, program = %self.program, args = ?full, "run adb");
        match self.timeout {
            Some(timeout) => run_command_with_timeout(&self.program, &full, timeout, trace_id),
            None => run_command(&self.program, &full, trace_id),
        }
    }

    fn spawn_capture(
        &self,
        args: &[String],
        log_file: File,
        trace_id: &str,
    ) -> Result<Child, AppError> {
        let full = self.full_args(args);
        debug!(trace_id = %trace_id, program = %self.program, args = ?full, "spawn capture");
        let mut cmd = Command::new(&self.program);
        cmd.args(&full)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::null());
        // Own process group: a terminal Ctrl+C must reach only us, we stop the capture ourselves.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        cmd.spawn()
            .map_err(|err| AppError::dependency(format!("Failed to start logcat: {err}"), trace_id))
    }
}

/// Runs `program` to completion with no deadline.
pub fn run_command(
    program: &str,
    args: &[String],
    trace_id: &str,
) -> Result<CommandOutput, AppError> {
    let (mut child, stdout_handle, stderr_handle) = spawn_piped(program, args, trace_id)?;
    let status = child.wait().map_err(|err| {
        AppError::system(format!("Failed to wait for command: {err}"), trace_id)
    });
    let stdout_bytes = stdout_handle.join().unwrap_or_default();
    let stderr_bytes = stderr_handle.join().unwrap_or_default();
    let status = status?;

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&stdout_bytes).to_string(),
        stderr: String::from_utf8_lossy(&stderr_bytes).to_string(),
        exit_code: status.code(),
    })
}

pub fn run_command_with_timeout(
    program: &str,
    args: &[String],
    timeout: Duration,
    trace_id: &str,
) -> Result<CommandOutput, AppError> {
    let (mut child, stdout_handle, stderr_handle) = spawn_piped(program, args, trace_id)?;

    let start = Instant::now();
    let exit_code = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status.code(),
            Ok(None) => {
                if start.elapsed() > timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    let _ = stdout_handle.join();
                    let _ = stderr_handle.join();
                    return Err(AppError::dependency("Command timed out".to_string(), trace_id));
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(err) => {
                let _ = stdout_handle.join();
                let _ = stderr_handle.join();
                return Err(AppError::system(
                    format!("Failed to poll command: {err}"),
                    trace_id,
                ));
            }
        }
    };

    let stdout_bytes = stdout_handle.join().unwrap_or_default();
    let stderr_bytes = stderr_handle.join().unwrap_or_default();

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&stdout_bytes).to_string(),
        stderr: String::from_utf8_lossy(&stderr_bytes).to_string(),
        exit_code,
    })
}

type Drain = JoinHandle<Vec<u8>>;

// Drain stdout/stderr in parallel; otherwise a chatty child blocks once the pipe buffer fills.
fn spawn_piped(
    program: &str,
    args: &[String],
    trace_id: &str,
) -> Result<(Child, Drain, Drain), AppError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| AppError::system(format!("Failed to spawn command: {err}"), trace_id))?;

    let stdout: ChildStdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::system("Failed to capture stdout", trace_id))?;
    let stderr: ChildStderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::system("Failed to capture stderr", trace_id))?;

    Ok((child, drain(stdout), drain(stderr)))
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> Drain {
    std::thread::spawn(move || {
        let mut buffer = Vec::<u8>::new();
        let _ = reader.read_to_end(&mut buffer);
        buffer
    })
}
