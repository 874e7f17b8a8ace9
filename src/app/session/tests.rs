use super::*;

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::process::{Child, Command, Stdio};

use tempfile::TempDir;

use crate::app::models::StageStatus;

const PACKAGE: &str = "com.wealthmanager";
const VERSION_OK: &str = "Android Debug Bridge version 1.0.41\nVersion 34.0.5-10900879\n";
const DEVICES_OK: &str = "List of devices attached\nemulator-5554\tdevice\n\n";

/// Scripted adb: answers by the joined argument list and records every call.
#[derive(Default)]
struct FakeAdb {
    responses: RefCell<HashMap<String, Vec<CommandOutput>>>,
    calls: RefCell<Vec<String>>,
    captures: RefCell<Vec<Vec<String>>>,
    capture_pids: RefCell<Vec<u32>>,
    // Clears the flag when a command with this prefix runs, like a Ctrl+C mid-command.
    interrupt_on: RefCell<Option<(String, Arc<AtomicBool>)>>,
}

impl FakeAdb {
    fn healthy() -> Self {
        Self::default()
            .respond("version", VERSION_OK)
            .respond("devices", DEVICES_OK)
    }

    fn respond(self, args: &str, stdout: &str) -> Self {
        self.respond_full(args, stdout, "")
    }

    fn respond_full(self, args: &str, stdout: &str, stderr: &str) -> Self {
        self.responses
            .borrow_mut()
            .entry(args.to_string())
            .or_default()
            .push(CommandOutput {
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
                exit_code: Some(0),
            });
        self
    }

    fn interrupt_on(&self, prefix: &str, flag: Arc<AtomicBool>) {
        *self.interrupt_on.borrow_mut() = Some((prefix.to_string(), flag));
    }

    fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    fn called_with_prefix(&self, prefix: &str) -> bool {
        self.calls.borrow().iter().any(|call| call.starts_with(prefix))
    }

    fn captures(&self) -> Vec<Vec<String>> {
        self.captures.borrow().clone()
    }
}

impl AdbRunner for FakeAdb {
    fn run(&self, args: &[String], _trace_id: &str) -> Result<CommandOutput, AppError> {
        let key = args.join(" ");
        self.calls.borrow_mut().push(key.clone());
        if let Some((prefix, flag)) = self.interrupt_on.borrow().as_ref() {
            if key.starts_with(prefix.as_str()) {
                flag.store(false, Ordering::SeqCst);
            }
        }
        let mut responses = self.responses.borrow_mut();
        // Queued answers are consumed in order; the last one sticks.
        let output = match responses.get_mut(&key) {
            Some(queue) if queue.len() > 1 => queue.remove(0),
            Some(queue) => queue.first().cloned().unwrap_or_default(),
            None => CommandOutput::default(),
        };
        Ok(output)
    }

    fn spawn_capture(
        &self,
        args: &[String],
        log_file: File,
        trace_id: &str,
    ) -> Result<Child, AppError> {
        self.captures.borrow_mut().push(args.to_vec());
        let child = spawn_long_running_child(log_file)
            .map_err(|err| AppError::system(err.to_string(), trace_id))?;
        self.capture_pids.borrow_mut().push(child.id());
        Ok(child)
    }
}

fn spawn_long_running_child(log_file: File) -> std::io::Result<Child> {
    if cfg!(windows) {
        Command::new("cmd.exe")
            .args(["/C", "ping", "127.0.0.1", "-n", "30"])
            .stdout(Stdio::from(log_file))
            .spawn()
    } else {
        Command::new("sh")
            .args(["-c", "sleep 30"])
            .stdout(Stdio::from(log_file))
            .spawn()
    }
}

fn options(output_dir: &Path) -> SessionOptions {
    let mut config = AppConfig::default();
    config.capture.output_dir = output_dir.to_string_lossy().to_string();
    let mut options = SessionOptions::from_config(&config);
    options.poll_interval = Duration::from_millis(20);
    options
}

fn write_apk(dir: &Path) -> String {
    let path = dir.join("WealthManager.apk");
    let file = File::create(&path).expect("apk");
    let mut zip = zip::ZipWriter::new(file);
    zip.start_file("AndroidManifest.xml", zip::write::SimpleFileOptions::default())
        .expect("entry");
    std::io::Write::write_all(&mut zip, b"<manifest/>").expect("write");
    zip.finish().expect("finish");
    path.to_string_lossy().to_string()
}

fn clear_after(flag: Arc<AtomicBool>, delay: Duration) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        std::thread::sleep(delay);
        flag.store(false, Ordering::SeqCst);
    })
}

fn stop_reports(summary: &RunSummary) -> usize {
    summary
        .stages
        .iter()
        .filter(|stage| stage.name == STAGE_STOP_CAPTURE)
        .count()
}

#[test]
fn prerequisite_failure_never_installs() {
    let out = TempDir::new().expect("out");
    let apk_dir = TempDir::new().expect("apk");
    let apk = write_apk(apk_dir.path());
    let adb = FakeAdb::default().respond("version", "adb: command not found");

    let mut session = Session::with_trace_id(adb, options(out.path()), "trace-prereq");
    let summary = session.run(&apk);

    assert!(!summary.success());
    assert_eq!(summary.error_code.as_deref(), Some("ERR_TOOL_UNAVAILABLE"));
    assert!(!session.runner().called_with_prefix("install"));
    assert!(session.runner().captures().is_empty());
    assert_eq!(stop_reports(&summary), 1);
}

#[test]
fn no_devices_fails_without_creating_files() {
    let out = TempDir::new().expect("out");
    let apk_dir = TempDir::new().expect("apk");
    let apk = write_apk(apk_dir.path());
    let adb = FakeAdb::default()
        .respond("version", VERSION_OK)
        .respond("devices", "List of devices attached\n\n");

    let mut session = Session::new(adb, options(out.path()));
    let summary = session.run(&apk);

    assert!(!summary.success());
    assert_eq!(summary.error_code.as_deref(), Some("ERR_NO_DEVICE"));
    assert_eq!(session.runner().calls(), vec!["version", "devices"]);
    assert_eq!(fs::read_dir(out.path()).expect("read dir").count(), 0);
    assert!(summary.log_path.is_none());
}

#[test]
fn selected_serial_must_be_connected() {
    let out = TempDir::new().expect("out");
    let mut opts = options(out.path());
    opts.serial = Some("R58M123".to_string());

    let mut session = Session::new(FakeAdb::healthy(), opts);
    let err = session.check_prerequisites().expect_err("expected missing serial");
    assert_eq!(err.code, "ERR_NO_DEVICE");
    assert!(err.error.contains("R58M123"));
}

#[test]
fn missing_package_file_fails_before_install() {
    let out = TempDir::new().expect("out");
    let mut session = Session::new(FakeAdb::healthy(), options(out.path()));
    let summary = session.run("/this/path/should/not/exist/app.apk");

    assert!(!summary.success());
    assert_eq!(summary.error_code.as_deref(), Some("ERR_FILE_NOT_FOUND"));
    assert!(!session.runner().called_with_prefix("install"));
    assert_eq!(
        summary.stage(STAGE_INSTALL).map(|stage| stage.status),
        Some(StageStatus::Fail)
    );
}

#[test]
fn install_without_success_marker_aborts_before_capture() {
    let out = TempDir::new().expect("out");
    let apk_dir = TempDir::new().expect("apk");
    let apk = write_apk(apk_dir.path());
    let adb = FakeAdb::healthy().respond(
        &format!("install -r {apk}"),
        "Performing Streamed Install\nadb: failed to install: Failure [INSTALL_FAILED_OLDER_SDK: Requires newer sdk version]\n",
    );

    let mut session = Session::new(adb, options(out.path()));
    let summary = session.run(&apk);

    assert!(!summary.success());
    assert_eq!(summary.error_code.as_deref(), Some("ERR_INSTALL_FAILED"));
    assert!(summary
        .error
        .as_deref()
        .unwrap_or("")
        .contains("INSTALL_FAILED_OLDER_SDK"));
    assert!(session.runner().captures().is_empty());
    assert!(summary.stage(STAGE_LAUNCH).is_none());
    assert_eq!(stop_reports(&summary), 1);
    assert_eq!(
        summary.stage(STAGE_STOP_CAPTURE).map(|stage| stage.status),
        Some(StageStatus::Skip)
    );
}

#[test]
fn uninstalls_only_exact_package_and_tolerates_failure() {
    let out = TempDir::new().expect("out");
    let adb = FakeAdb::healthy()
        .respond(
            "shell pm list packages",
            "package:com.android.settings\npackage:com.wealthmanager\n",
        )
        .respond_full(&format!("uninstall {PACKAGE}"), "Failure [DELETE_FAILED_INTERNAL_ERROR]", "");

    let mut session = Session::new(adb, options(out.path()));
    session.uninstall_existing();

    assert!(session.runner().called_with_prefix("uninstall"));
    assert_eq!(session.stages()[0].status, StageStatus::Warn);

    let adb = FakeAdb::healthy().respond("shell pm list packages", "package:com.wealthmanager.debug\n");
    let mut session = Session::new(adb, options(out.path()));
    session.uninstall_existing();
    assert!(!session.runner().called_with_prefix("uninstall"));
    assert_eq!(session.stages()[0].status, StageStatus::Skip);
}

#[test]
fn launch_failure_is_only_a_warning() {
    let out = TempDir::new().expect("out");
    let adb = FakeAdb::healthy().respond(
        &format!("shell am start -n {PACKAGE}/.MainActivity"),
        "Error: Activity class {com.wealthmanager/com.wealthmanager.MainActivity} does not exist.\n",
    );
    let mut session = Session::new(adb, options(out.path()));
    session.launch_app();
    assert_eq!(session.stages()[0].status, StageStatus::Warn);
}

#[test]
fn capture_filters_by_pid_when_app_is_running() {
    let out = TempDir::new().expect("out");
    let adb = FakeAdb::healthy().respond(&format!("shell pidof {PACKAGE}"), "4242\n");
    let mut session = Session::new(adb, options(out.path()));

    session.start_capture().expect("capture");
    assert!(session.is_capturing());
    assert_eq!(
        session.runner().captures(),
        vec![vec!["logcat", "-v", "time", "--pid", "4242"]]
    );
    assert!(session.runner().called_with_prefix("logcat -c"));

    let log_path = session.log_path().cloned().expect("log path");
    assert!(log_path.exists());
    let name = log_path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let re = regex::Regex::new(r"^WealthManager_logs_\d{8}_\d{6}\.txt$").unwrap();
    assert!(re.is_match(name), "unexpected log name {name}");

    let err = session.start_capture().expect_err("second capture");
    assert_eq!(err.code, "ERR_VALIDATION");
    assert_eq!(session.runner().captures().len(), 1);

    assert!(session.stop_capture());
    assert!(!session.is_capturing());
}

#[test]
fn capture_falls_back_to_tag_filter() {
    let out = TempDir::new().expect("out");
    let mut session = Session::new(FakeAdb::healthy(), options(out.path()));

    session.start_capture().expect("capture");
    assert_eq!(
        session.runner().captures(),
        vec![vec!["logcat", "-v", "time", "WealthManagerDebug:*", "*:S"]]
    );
    session.stop_capture();
}

#[test]
fn stop_capture_on_idle_session_is_a_noop() {
    let out = TempDir::new().expect("out");
    let mut session = Session::new(FakeAdb::healthy(), options(out.path()));
    assert!(!session.stop_capture());
    assert!(!session.stop_capture());
    let recorded = session
        .stages()
        .iter()
        .filter(|stage| stage.name == STAGE_STOP_CAPTURE)
        .count();
    assert_eq!(recorded, 1);
}

#[test]
fn interrupt_ends_poll_loop_and_stops_capture() {
    let out = TempDir::new().expect("out");
    let apk_dir = TempDir::new().expect("apk");
    let apk = write_apk(apk_dir.path());
    let adb = FakeAdb::healthy()
        .respond(&format!("install -r {apk}"), "Performing Streamed Install\nSuccess\n")
        .respond(
            &format!("shell am start -n {PACKAGE}/.MainActivity"),
            "Starting: Intent { cmp=com.wealthmanager/.MainActivity }\n",
        )
        .respond(&format!("shell pidof {PACKAGE}"), "4242\n")
        .respond(&format!("shell pidof {PACKAGE}"), "");

    let mut session = Session::with_trace_id(adb, options(out.path()), "trace-interrupt");
    let clearer = clear_after(session.running_flag(), Duration::from_millis(300));
    let summary = session.run(&apk);
    clearer.join().expect("join");

    assert!(summary.success(), "summary: {summary:?}");
    assert_eq!(summary.trace_id, "trace-interrupt");
    assert!(!session.is_capturing());
    assert_eq!(stop_reports(&summary), 1);
    assert_eq!(
        summary.stage(STAGE_STOP_CAPTURE).map(|stage| stage.status),
        Some(StageStatus::Pass)
    );
    assert_eq!(
        session.runner().captures(),
        vec![vec!["logcat", "-v", "time", "--pid", "4242"]]
    );

    let polls = session
        .runner()
        .calls()
        .iter()
        .filter(|call| call.starts_with("shell pidof"))
        .count();
    assert!(polls >= 2, "expected the poll loop to query pidof, got {polls}");

    let log_path = summary.log_path.clone().expect("log path");
    assert!(Path::new(&log_path).exists());
    assert!(!session.running_flag().load(Ordering::SeqCst));
}

#[cfg(unix)]
#[test]
fn capture_process_is_reaped_after_run() {
    use nix::sys::signal;
    use nix::unistd::Pid;

    let out = TempDir::new().expect("out");
    let apk_dir = TempDir::new().expect("apk");
    let apk = write_apk(apk_dir.path());
    let adb = FakeAdb::healthy().respond(&format!("install -r {apk}"), "Success\n");

    let mut session = Session::new(adb, options(out.path()));
    let clearer = clear_after(session.running_flag(), Duration::from_millis(300));
    let summary = session.run(&apk);
    clearer.join().expect("join");
    assert!(summary.success());

    let pids = session.runner().capture_pids.borrow().clone();
    assert_eq!(pids.len(), 1);
    let pid = Pid::from_raw(pids[0] as i32);
    assert!(signal::kill(pid, None).is_err(), "capture process still exists");
}

#[test]
fn split_bundle_installs_with_install_multiple() {
    let out = TempDir::new().expect("out");
    let apk_dir = TempDir::new().expect("apk");
    let bundle = apk_dir.path().join("WealthManager.apks");
    let file = File::create(&bundle).expect("bundle");
    let mut zip = zip::ZipWriter::new(file);
    for name in ["split_config.en.apk", "base.apk"] {
        zip.start_file(name, zip::write::SimpleFileOptions::default())
            .expect("entry");
        std::io::Write::write_all(&mut zip, b"apk").expect("write");
    }
    zip.finish().expect("finish");

    let mut session = Session::new(FakeAdb::healthy(), options(out.path()));
    let err = session
        .install_package(bundle.to_str().expect("utf8"))
        .expect_err("fake adb never reports Success");
    assert_eq!(err.code, "ERR_INSTALL_FAILED");

    let calls = session.runner().calls();
    let install = calls
        .iter()
        .find(|call| call.starts_with("install-multiple -r "))
        .expect("install-multiple call");
    let base = install.find("base.apk").expect("base split");
    let config = install.find("split_config.en.apk").expect("config split");
    assert!(base < config);
}

#[test]
fn interrupt_before_run_touches_nothing() {
    let out = TempDir::new().expect("out");
    let apk_dir = TempDir::new().expect("apk");
    let apk = write_apk(apk_dir.path());

    let mut session = Session::new(FakeAdb::healthy(), options(out.path()));
    session.running_flag().store(false, Ordering::SeqCst);
    let summary = session.run(&apk);

    assert!(!summary.success());
    assert_eq!(summary.error_code.as_deref(), Some("ERR_INTERRUPTED"));
    assert!(!session.runner().called_with_prefix("install"));
    assert!(!session.runner().called_with_prefix("shell am start"));
    assert!(session.runner().captures().is_empty());
    assert!(summary.log_path.is_none());
    assert_eq!(fs::read_dir(out.path()).expect("read dir").count(), 0);
    assert_eq!(stop_reports(&summary), 1);
}

#[test]
fn interrupt_during_install_skips_launch_and_capture() {
    let out = TempDir::new().expect("out");
    let apk_dir = TempDir::new().expect("apk");
    let apk = write_apk(apk_dir.path());
    let adb = FakeAdb::healthy().respond(&format!("install -r {apk}"), "Success\n");

    let mut session = Session::new(adb, options(out.path()));
    session.runner().interrupt_on("install", session.running_flag());
    let summary = session.run(&apk);

    assert!(!summary.success());
    assert_eq!(summary.error_code.as_deref(), Some("ERR_INTERRUPTED"));
    assert_eq!(
        summary.stage(STAGE_INSTALL).map(|stage| stage.status),
        Some(StageStatus::Pass)
    );
    assert!(summary.stage(STAGE_LAUNCH).is_none());
    assert!(!session.runner().called_with_prefix("shell am start"));
    assert!(!session.runner().called_with_prefix("logcat"));
    assert!(session.runner().captures().is_empty());
}
