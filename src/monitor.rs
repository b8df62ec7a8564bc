//! Background liveness and memory monitors.
//!
//! Both run as detached threads and die with the process. The pulse thread
//! shares a mutex with the worker pool so liveness lines never interleave
//! with a job's log dump.

use std::sync::{Mutex, OnceLock};
use std::thread;

use crate::fsutil::sleep_seconds;

pub const PULSE_INTERVAL_SEC: u64 = 600;

/// Serializes stderr between the pulse thread and worker job footers.
pub fn stderr_mutex() -> &'static Mutex<()> {
    static MUTEX: OnceLock<Mutex<()>> = OnceLock::new();
    MUTEX.get_or_init(|| Mutex::new(()))
}

pub fn start_pulse_thread() {
    thread::Builder::new()
        .name("fuzzrig-pulse".to_string())
        .spawn(|| loop {
            sleep_seconds(PULSE_INTERVAL_SEC);
            let _guard = stderr_mutex().lock().unwrap();
            eprintln!("pulse...");
        })
        .expect("spawn pulse thread");
}

/// Sample peak RSS once per second; call back when it exceeds the limit.
/// Does nothing when the limit is zero.
pub fn start_rss_thread(rss_limit_mb: usize, callback: impl Fn(usize) + Send + 'static) {
    if rss_limit_mb == 0 {
        return;
    }
    thread::Builder::new()
        .name("fuzzrig-rss".to_string())
        .spawn(move || loop {
            sleep_seconds(1);
            let peak = peak_rss_mb();
            if peak > rss_limit_mb {
                callback(peak);
            }
        })
        .expect("spawn rss thread");
}

/// Peak resident set size of this process in Mb. Reads `VmHWM` from
/// `/proc/self/status`; falls back to `getrusage` where procfs is absent.
pub fn peak_rss_mb() -> usize {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if let Some(rest) = line.strip_prefix("VmHWM:") {
                    let kb: usize = rest
                        .trim()
                        .trim_end_matches("kB")
                        .trim()
                        .parse()
                        .unwrap_or(0);
                    return kb / 1024;
                }
            }
        }
    }
    #[cfg(unix)]
    {
        unsafe {
            let mut usage: libc::rusage = std::mem::zeroed();
            if libc::getrusage(libc::RUSAGE_SELF, &mut usage) == 0 {
                let maxrss = usage.ru_maxrss.max(0) as usize;
                // ru_maxrss is kilobytes on Linux, bytes on macOS.
                #[cfg(target_os = "macos")]
                return maxrss / (1024 * 1024);
                #[cfg(not(target_os = "macos"))]
                return maxrss / 1024;
            }
        }
    }
    0
}
