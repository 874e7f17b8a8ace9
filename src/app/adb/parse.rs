//! Interpretation of adb's textual output.
//!
//! adb reports most outcomes only as text on stdout, so every success/failure decision the
//! orchestrator makes goes through [`interpret_tool_output`]. Keep the marker strings here.

use std::sync::OnceLock;

use regex::Regex;

use crate::app::models::DeviceSummary;

pub const VERSION_MARKER: &str = "Android Debug Bridge";
pub const SUCCESS_MARKER: &str = "Success";
pub const LAUNCH_STARTING_MARKER: &str = "Starting:";
pub const LAUNCH_WARNING_MARKER: &str = "Warning:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Version,
    Devices,
    Uninstall,
    Install,
    Launch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Accepted, but adb had something to say about it.
    Warning(String),
    Failure(String),
}

pub fn interpret_tool_output(step: Step, stdout: &str, stderr: &str) -> Outcome {
    match step {
        Step::Version => interpret_version(stdout, stderr),
        Step::Devices => interpret_devices(stdout),
        Step::Uninstall => {
            if stdout.contains(SUCCESS_MARKER) {
                Outcome::Success
            } else {
                Outcome::Failure(first_non_empty(&[stderr, stdout], "uninstall did not report Success"))
            }
        }
        Step::Install => interpret_install(stdout, stderr),
        Step::Launch => interpret_launch(stdout, stderr),
    }
}

fn interpret_version(stdout: &str, stderr: &str) -> Outcome {
    if !stderr.trim().is_empty() {
        return Outcome::Failure(stderr.trim().to_string());
    }
    if !stdout.contains(VERSION_MARKER) {
        return Outcome::Failure(format!(
            "unexpected `adb version` output: {}",
            first_line(stdout).unwrap_or("<empty>")
        ));
    }
    Outcome::Success
}

fn interpret_devices(stdout: &str) -> Outcome {
    let devices = parse_adb_devices(stdout);
    if devices.iter().any(DeviceSummary::is_online) {
        return Outcome::Success;
    }
    match devices.first() {
        Some(device) => Outcome::Failure(format!(
            "device {} is {}, not ready",
            device.serial, device.state
        )),
        None => Outcome::Failure("no devices listed".to_string()),
    }
}

fn interpret_install(stdout: &str, stderr: &str) -> Outcome {
    if stdout.contains(SUCCESS_MARKER) {
        return Outcome::Success;
    }
    let combined = format!("{stdout}\n{stderr}");
    match parse_install_failure_code(&combined) {
        Some(code) => Outcome::Failure(format!("{code}: {}", describe_install_failure(&code))),
        None => Outcome::Failure(first_non_empty(&[stderr, stdout], "install did not report Success")),
    }
}

fn interpret_launch(stdout: &str, stderr: &str) -> Outcome {
    if let Some(line) = stdout
        .lines()
        .find(|line| line.contains(LAUNCH_WARNING_MARKER))
    {
        return Outcome::Warning(line.trim().to_string());
    }
    if stdout.contains(LAUNCH_STARTING_MARKER) {
        return Outcome::Success;
    }
    Outcome::Failure(first_non_empty(&[stderr, stdout], "activity manager did not report Starting"))
}

pub fn parse_adb_devices(output: &str) -> Vec<DeviceSummary> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter(|line| !line.trim_start().starts_with('*'))
        .filter(|line| !line.to_lowercase().contains("list of devices"))
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            let serial = tokens.next()?;
            let state = tokens.next()?;
            Some(DeviceSummary {
                serial: serial.to_string(),
                state: state.to_string(),
            })
        })
        .collect()
}

/// `pidof` prints space separated pids, or nothing when the app is not running.
pub fn parse_pids(output: &str) -> Vec<u32> {
    output
        .split_whitespace()
        .filter_map(|token| token.parse::<u32>().ok())
        .collect()
}

pub fn parse_install_failure_code(output: &str) -> Option<String> {
    static CODE_RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = CODE_RE
        .get_or_init(|| Regex::new(r"\b(INSTALL_(?:PARSE_)?FAILED_[A-Z_]+)\b").ok())
        .as_ref()?;
    re.captures(output).map(|caps| caps[1].to_string())
}

pub fn describe_install_failure(code: &str) -> &'static str {
    match code {
        "INSTALL_FAILED_ALREADY_EXISTS" => "Package already installed",
        "INSTALL_FAILED_UPDATE_INCOMPATIBLE" => {
            "Signature mismatch with the installed version - uninstall it first"
        }
        "INSTALL_FAILED_DUPLICATE_PACKAGE" => "A package with the same name already exists",
        "INSTALL_FAILED_OLDER_SDK" => "Device Android version is older than the APK requires",
        "INSTALL_FAILED_NEWER_SDK" => "APK requires an older Android version",
        "INSTALL_FAILED_VERSION_DOWNGRADE" => "Cannot downgrade - enable allow_downgrade",
        "INSTALL_FAILED_INSUFFICIENT_STORAGE" => "Not enough storage space on the device",
        "INSTALL_FAILED_MEDIA_UNAVAILABLE" => "Storage media not available",
        "INSTALL_FAILED_USER_RESTRICTED" => "Installation restricted by user settings",
        "INSTALL_FAILED_VERIFICATION_FAILURE" => "Package verification failed",
        "INSTALL_PARSE_FAILED_NOT_APK" => "File is not a valid APK",
        "INSTALL_PARSE_FAILED_BAD_MANIFEST" => "APK manifest is invalid",
        "INSTALL_PARSE_FAILED_NO_CERTIFICATES" => "APK is not signed",
        "INSTALL_PARSE_FAILED_INCONSISTENT_CERTIFICATES" => {
            "APK certificates are inconsistent with the installed version"
        }
        "INSTALL_FAILED_INVALID_APK" => "APK file is corrupted or invalid",
        "INSTALL_FAILED_ABORTED" => "Installation was aborted",
        "INSTALL_FAILED_NO_MATCHING_ABIS" => "APK has no native code for this device's ABI",
        "INSTALL_FAILED_TEST_ONLY" => "Test-only APK - enable allow_test_packages",
        _ => "Unknown installation error",
    }
}

fn first_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).find(|line| !line.is_empty())
}

fn first_non_empty(candidates: &[&str], fallback: &str) -> String {
    candidates
        .iter()
        .map(|text| text.trim())
        .find(|text| !text.is_empty())
        .unwrap_or(fallback)
        .to_string()
}
