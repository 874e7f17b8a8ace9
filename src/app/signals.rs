use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::app::error::AppError;

/// Clears `running` on Ctrl+C, SIGTERM or SIGHUP.
///
/// Repeated interrupts only clear the flag again, so the caller always gets to stop the capture
/// process instead of the process dying with it orphaned.
pub fn install_interrupt_handler(running: Arc<AtomicBool>, trace_id: &str) -> Result<(), AppError> {
    let trace = trace_id.to_string();
    ctrlc::set_handler(move || {
        if running.swap(false, Ordering::SeqCst) {
            info!(trace_id = %trace, "interrupt received");
        }
    })
    .map_err(|err| AppError::system(format!("Failed to install Ctrl+C handler: {err}"), trace_id))
}

/// Sleeps up to `duration`, returning early once `running` is cleared.
pub fn sleep_while_running(duration: Duration, running: &AtomicBool) {
    let mut remaining = duration;
    let chunk = Duration::from_millis(50);
    while !remaining.is_zero() {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        let step = remaining.min(chunk);
        std::thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn sleep_returns_early_when_flag_cleared() {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let clearer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            flag.store(false, Ordering::SeqCst);
        });

        let start = Instant::now();
        sleep_while_running(Duration::from_secs(30), &running);
        assert!(start.elapsed() < Duration::from_secs(5));
        clearer.join().expect("join");
    }

    #[test]
    fn sleep_runs_full_duration_while_running() {
        let running = AtomicBool::new(true);
        let start = Instant::now();
        sleep_while_running(Duration::from_millis(120), &running);
        assert!(start.elapsed() >= Duration::from_millis(120));
    }
}
