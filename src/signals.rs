//! Signal installation for the `handle_*` toggles.
//!
//! Handlers must stay async-signal-safe: they only `write(2)` a fixed
//! message and `_exit(2)` with the configured code. Exit codes are parked in
//! atomics at install time so the handlers never touch the options struct.

use std::sync::atomic::{AtomicI32, Ordering};

use crate::options::FuzzingOptions;

static ERROR_EXITCODE: AtomicI32 = AtomicI32::new(77);
static TIMEOUT_EXITCODE: AtomicI32 = AtomicI32::new(70);

pub fn set_signal_handler(options: &FuzzingOptions) {
    ERROR_EXITCODE.store(options.error_exitcode, Ordering::Relaxed);
    TIMEOUT_EXITCODE.store(options.timeout_exitcode, Ordering::Relaxed);
    imp::install(options);
}

/// Arm the per-run watchdog; a run outliving it dies with the timeout exit
/// code.
pub fn arm_alarm(seconds: u64) {
    imp::arm_alarm(seconds);
}

pub fn disarm_alarm() {
    imp::disarm_alarm();
}

#[cfg(unix)]
mod imp {
    use super::{ERROR_EXITCODE, TIMEOUT_EXITCODE};
    use std::sync::atomic::Ordering;

    use crate::options::FuzzingOptions;

    fn write_stderr(msg: &str) {
        unsafe {
            libc::write(2, msg.as_ptr() as *const libc::c_void, msg.len());
        }
    }

    extern "C" fn crash_handler(_sig: libc::c_int) {
        write_stderr("ERROR: fuzzrig: deadly signal\n");
        unsafe { libc::_exit(ERROR_EXITCODE.load(Ordering::Relaxed)) }
    }

    extern "C" fn alarm_handler(_sig: libc::c_int) {
        write_stderr("ERROR: fuzzrig: timeout\n");
        unsafe { libc::_exit(TIMEOUT_EXITCODE.load(Ordering::Relaxed)) }
    }

    extern "C" fn interrupt_handler(_sig: libc::c_int) {
        write_stderr("INFO: fuzzrig: interrupted; exiting\n");
        unsafe { libc::_exit(0) }
    }

    fn install_one(sig: libc::c_int, handler: extern "C" fn(libc::c_int)) {
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = handler as usize;
            libc::sigemptyset(&mut action.sa_mask);
            libc::sigaction(sig, &action, std::ptr::null_mut());
        }
    }

    pub fn install(options: &FuzzingOptions) {
        if options.handle_segv {
            install_one(libc::SIGSEGV, crash_handler);
        }
        if options.handle_abrt {
            install_one(libc::SIGABRT, crash_handler);
        }
        if options.handle_alrm {
            install_one(libc::SIGALRM, alarm_handler);
        }
        if options.handle_int {
            install_one(libc::SIGINT, interrupt_handler);
        }
        if options.handle_term {
            install_one(libc::SIGTERM, interrupt_handler);
        }
    }

    pub fn arm_alarm(seconds: u64) {
        unsafe {
            libc::alarm(seconds.min(u64::from(u32::MAX)) as libc::c_uint);
        }
    }

    pub fn disarm_alarm() {
        unsafe {
            libc::alarm(0);
        }
    }
}

#[cfg(not(unix))]
mod imp {
    use crate::options::FuzzingOptions;

    pub fn install(_options: &FuzzingOptions) {}
    pub fn arm_alarm(_seconds: u64) {}
    pub fn disarm_alarm() {}
}
