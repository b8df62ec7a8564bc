//! Multi-process worker pool.
//!
//! N threads pull job ids from a shared counter; each spawns this binary
//! again (with `-jobs`/`-workers` stripped) and streams the job's log to
//! stderr when it finishes. Job ids are globally unique and contiguous;
//! completion order is unspecified; the shared mutex makes each job footer
//! plus log dump atomic relative to other workers and the pulse thread.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;

use crate::exec::{clone_args_without, Command};
use crate::monitor::{self, stderr_mutex};

fn worker_loop(
    base: &Command,
    counter: &AtomicU32,
    num_jobs: u32,
    has_errors: &AtomicBool,
    verbosity: i64,
) {
    loop {
        let job = counter.fetch_add(1, Ordering::Relaxed);
        if job >= num_jobs {
            break;
        }
        let log = PathBuf::from(format!("fuzz-{job}.log"));
        let mut cmd = base.clone();
        cmd.set_output_file(&log);
        cmd.combine_out_and_err();
        if verbosity > 0 {
            eprintln!("{cmd}");
        }
        let exit_code = match cmd.execute() {
            Ok(code) => code,
            Err(err) => {
                eprintln!("WARNING: job {job}: {err}");
                1
            }
        };
        if exit_code != 0 {
            has_errors.store(true, Ordering::Relaxed);
        }
        let _guard = stderr_mutex().lock().unwrap();
        eprintln!(
            "================== Job {job} exited with exit code {exit_code} ============"
        );
        if let Ok(bytes) = std::fs::read(&log) {
            use std::io::Write;
            let _ = std::io::stderr().write_all(&bytes);
        }
    }
}

pub fn run_in_multiple_processes(
    args: &[String],
    num_workers: u32,
    num_jobs: u32,
    verbosity: i64,
) -> i32 {
    let counter = Arc::new(AtomicU32::new(0));
    let has_errors = Arc::new(AtomicBool::new(false));
    let base = Command::new(&clone_args_without(args, "jobs", "workers"));
    monitor::start_pulse_thread();
    let mut handles = Vec::with_capacity(num_workers as usize);
    for _ in 0..num_workers {
        let base = base.clone();
        let counter = Arc::clone(&counter);
        let has_errors = Arc::clone(&has_errors);
        let handle = thread::Builder::new()
            .name("fuzzrig-worker".to_string())
            .spawn(move || worker_loop(&base, &counter, num_jobs, &has_errors, verbosity))
            .expect("spawn worker thread");
        handles.push(handle);
    }
    for handle in handles {
        let _ = handle.join();
    }
    if has_errors.load(Ordering::Relaxed) {
        1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn job_counter_hands_out_each_id_exactly_once() {
        let counter = AtomicU32::new(0);
        let num_jobs = 17u32;
        let claimed: Vec<u32> = std::thread::scope(|scope| {
            let mut handles = Vec::new();
            for _ in 0..4 {
                handles.push(scope.spawn(|| {
                    let mut mine = Vec::new();
                    loop {
                        let job = counter.fetch_add(1, Ordering::Relaxed);
                        if job >= num_jobs {
                            break;
                        }
                        mine.push(job);
                    }
                    mine
                }));
            }
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });
        let mut sorted = claimed;
        sorted.sort_unstable();
        assert_eq!(sorted, (0..num_jobs).collect::<Vec<_>>());
    }
}
