use std::process::ExitCode;

fn main() -> ExitCode {
    apk_logcat_lib::run()
}
