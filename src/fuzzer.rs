//! Fuzzer core: target execution, the main mutation loop, and the
//! in-process crash-minimization loop.
//!
//! A crash inside the target surfaces as a Rust panic; the panic is caught,
//! reported with a `DEDUP_TOKEN:` line derived from the panic message, the
//! offending input is written as an artifact, and the process exits with the
//! configured error code. Outer tooling keys on that exit code and token.

use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::time::Instant;

use tracing::debug;

use crate::corpus::InputCorpus;
use crate::coverage;
use crate::fsutil::{file_to_vec_capped, hash_unit, read_dir_to_units, write_file, SizedFile};
use crate::monitor;
use crate::mutate::MutationDispatcher;
use crate::options::FuzzingOptions;
use crate::signals;

pub type UserCallback = fn(&[u8]) -> i32;

const DEFAULT_MAX_LEN: usize = 4096;
const MAX_SANE_LEN: usize = 1 << 20;

pub struct Fuzzer {
    callback: UserCallback,
    corpus: &'static mut InputCorpus,
    md: &'static mut MutationDispatcher,
    options: FuzzingOptions,
    max_input_len: usize,
    total_runs: u64,
    new_units_added: u64,
    start: Instant,
}

impl Fuzzer {
    pub fn new(
        callback: UserCallback,
        corpus: &'static mut InputCorpus,
        md: &'static mut MutationDispatcher,
        options: FuzzingOptions,
    ) -> Self {
        let max_input_len = options.max_len;
        Self {
            callback,
            corpus,
            md,
            options,
            max_input_len,
            total_runs: 0,
            new_units_added: 0,
            start: Instant::now(),
        }
    }

    pub fn md_mut(&mut self) -> &mut MutationDispatcher {
        self.md
    }

    pub fn total_runs(&self) -> u64 {
        self.total_runs
    }

    pub fn seconds_since_start(&self) -> u64 {
        self.start.elapsed().as_secs()
    }

    pub fn set_max_input_len(&mut self, len: usize) {
        self.max_input_len = len;
    }

    pub fn max_input_len(&self) -> usize {
        self.max_input_len
    }

    pub fn set_max_mutation_len(&mut self, len: usize) {
        self.md.set_max_mutation_len(len);
    }

    /// Run the target on one input. Resets the coverage collector first, so
    /// `coverage::snapshot()` right after returns this input's features.
    /// A panicking target does not return: the crash is reported and the
    /// process exits with the error exit code.
    pub fn execute_callback(&mut self, data: &[u8]) -> i32 {
        self.total_runs += 1;
        coverage::reset();
        if self.options.unit_timeout_sec > 0 {
            signals::arm_alarm(self.options.unit_timeout_sec as u64);
        }
        let callback = self.callback;
        let result = catch_unwind(AssertUnwindSafe(|| callback(data)));
        signals::disarm_alarm();
        match result {
            Ok(status) => status,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                self.crash_report(data, &message)
            }
        }
    }

    fn crash_report(&mut self, unit: &[u8], message: &str) -> ! {
        let pid = std::process::id();
        let token = message.lines().next().unwrap_or("").trim();
        eprintln!(
            "=={pid}== ERROR: fuzzrig: panic on input of {} bytes: {message}",
            unit.len()
        );
        eprintln!("DEDUP_TOKEN: {token}");
        eprintln!("SUMMARY: fuzzrig: panic");
        if let Some(path) = self.write_unit_to_file_with_prefix(unit, "crash-") {
            eprintln!("Test unit written to {}", path.display());
        }
        self.print_final_stats();
        std::process::exit(self.options.error_exitcode);
    }

    /// Write an artifact for this unit, honoring `exact_artifact_path` over
    /// `artifact_prefix`. Returns the path, or None when artifact saving is
    /// off or the write failed.
    pub fn write_unit_to_file_with_prefix(&self, unit: &[u8], prefix: &str) -> Option<PathBuf> {
        if !self.options.save_artifacts {
            return None;
        }
        let path = match &self.options.exact_artifact_path {
            Some(exact) => PathBuf::from(exact),
            None => PathBuf::from(format!(
                "{}{prefix}{}",
                self.options.artifact_prefix,
                hash_unit(unit)
            )),
        };
        match write_file(&path, unit) {
            Ok(()) => Some(path),
            Err(err) => {
                eprintln!("WARNING: failed to write artifact {}: {err}", path.display());
                None
            }
        }
    }

    /// Leak probing needs allocator instrumentation this build does not
    /// carry; the hook stays so run-individual keeps its call shape.
    pub fn try_detecting_a_memory_leak(&mut self, unit: &[u8]) {
        if !self.options.detect_leaks {
            return;
        }
        debug!(size = unit.len(), "leak probe (no allocator instrumentation)");
    }

    /// Fold the last execution's features into the all-time observed set.
    pub fn update_observed_pcs(&mut self) {
        coverage::merge_observed();
    }

    pub fn write_to_output_corpus(&self, unit: &[u8]) {
        self.corpus.write_to_output_corpus(unit);
    }

    /// The main fuzzing loop over the gathered corpora.
    pub fn loop_on(&mut self, corpora: Vec<SizedFile>) {
        let mut seeds = Vec::new();
        for file in &corpora {
            match file_to_vec_capped(&file.path, self.options.max_len) {
                Ok(unit) => seeds.push(unit),
                Err(err) => {
                    eprintln!("WARNING: failed to read {}: {err}", file.path.display())
                }
            }
        }
        if self.options.shuffle_at_startup {
            for i in (1..seeds.len()).rev() {
                let j = self.md.rand_below(i + 1);
                seeds.swap(i, j);
            }
        }
        if self.max_input_len == 0 {
            let longest = seeds.iter().map(Vec::len).max().unwrap_or(0);
            self.max_input_len = longest.max(DEFAULT_MAX_LEN).min(MAX_SANE_LEN);
            if self.options.verbosity >= 1 {
                eprintln!(
                    "INFO: -max_len is not provided; using {}",
                    self.max_input_len
                );
            }
        }

        for unit in seeds {
            self.execute_callback(&unit);
            let snapshot = coverage::snapshot();
            if (self.corpus.count_new_features(&snapshot) > 0 || self.options.keep_seed)
                && !self.corpus.contains(&unit)
            {
                self.corpus.add_unit(unit, &snapshot);
            } else {
                self.corpus.merge_features(&snapshot);
            }
            if self.budget_exhausted() {
                break;
            }
        }
        if self.corpus.is_empty() {
            let unit = vec![b'\n'];
            self.execute_callback(&unit);
            let snapshot = coverage::snapshot();
            self.corpus.add_unit(unit, &snapshot);
        }
        if self.options.verbosity >= 1 {
            eprintln!(
                "#{}\tINITED cov: {} corp: {}",
                self.total_runs,
                self.corpus.num_features(),
                self.corpus.len()
            );
        }

        let mut temp_max_len = if self.options.len_control > 0 {
            self.max_input_len.min(4).max(1)
        } else {
            self.max_input_len
        };
        let mut last_progress_runs = self.total_runs;
        let mut last_reload = Instant::now();

        loop {
            if self.budget_exhausted() {
                break;
            }
            if let Some(stop) = &self.options.stop_file {
                if stop.exists() {
                    if self.options.verbosity >= 1 {
                        eprintln!("INFO: found {}; stopping", stop.display());
                    }
                    break;
                }
            }
            self.maybe_reload(&mut last_reload);

            // Grow the working length cap once the current one stops paying.
            if self.options.len_control > 0 && temp_max_len < self.max_input_len {
                let log = usize::BITS - (temp_max_len as u32).leading_zeros();
                let patience = self.options.len_control as u64 * u64::from(log);
                if self.total_runs - last_progress_runs > patience {
                    temp_max_len = (temp_max_len + log as usize).min(self.max_input_len);
                    last_progress_runs = self.total_runs;
                }
            }

            let mut unit = match self.corpus.choose(self.md) {
                Some(base) => base.to_vec(),
                None => vec![b'\n'],
            };
            if self.options.do_cross_over
                && self.corpus.len() >= 2
                && self.md.rand_below(10) == 0
            {
                let other = self
                    .corpus
                    .choose(self.md)
                    .map(<[u8]>::to_vec)
                    .unwrap_or_default();
                unit = self.md.cross_over(&unit, &other, temp_max_len);
            }
            let rounds = 1 + self.md.rand_below(self.options.mutate_depth.max(1) as usize);
            for _ in 0..rounds {
                self.md.mutate(&mut unit, temp_max_len);
            }
            if self.options.only_ascii {
                to_ascii(&mut unit);
            }

            self.execute_callback(&unit);
            let snapshot = coverage::snapshot();
            if self.corpus.count_new_features(&snapshot) > 0 {
                self.corpus.add_unit(unit, &snapshot);
                self.new_units_added += 1;
                last_progress_runs = self.total_runs;
                if self.options.verbosity >= 1 {
                    eprintln!(
                        "#{}\tNEW    cov: {} corp: {} exec/s: {}",
                        self.total_runs,
                        self.corpus.num_features(),
                        self.corpus.len(),
                        self.execs_per_sec()
                    );
                }
            } else if self.options.verbosity >= 1
                && self.total_runs >= 2
                && self.total_runs.is_power_of_two()
            {
                eprintln!(
                    "#{}\tpulse  cov: {} corp: {} exec/s: {} rss: {}Mb",
                    self.total_runs,
                    self.corpus.num_features(),
                    self.corpus.len(),
                    self.execs_per_sec(),
                    monitor::peak_rss_mb()
                );
            }
        }
    }

    /// Keep mutating the crashing input below its own size. Never returns on
    /// success: the first crashing mutant is reported by `execute_callback`
    /// (artifact to the exact artifact path) and exits non-zero. Returning
    /// means the budget ran out with no smaller crash.
    pub fn minimize_crash_loop(&mut self, unit: &[u8]) {
        let base = unit.to_vec();
        loop {
            if self.budget_exhausted() {
                return;
            }
            let mut mutant = base.clone();
            self.md.mutate(&mut mutant, self.max_input_len);
            if mutant.len() >= base.len() {
                continue;
            }
            self.execute_callback(&mutant);
        }
    }

    fn budget_exhausted(&self) -> bool {
        if let Some(max_runs) = self.options.max_number_of_runs {
            if self.total_runs >= max_runs {
                return true;
            }
        }
        if self.options.max_total_time_sec > 0
            && self.start.elapsed().as_secs() >= self.options.max_total_time_sec as u64
        {
            return true;
        }
        false
    }

    /// Pick up units other jobs wrote into the shared output corpus.
    fn maybe_reload(&mut self, last_reload: &mut Instant) {
        let interval = self.options.reload_interval_sec;
        if interval <= 0 || last_reload.elapsed().as_secs() < interval as u64 {
            return;
        }
        *last_reload = Instant::now();
        let Some(dir) = self.corpus.output_corpus().cloned() else {
            return;
        };
        let mut units = Vec::new();
        read_dir_to_units(&dir, self.max_input_len, &mut units);
        for unit in units {
            if self.corpus.contains(&unit) {
                continue;
            }
            self.execute_callback(&unit);
            let snapshot = coverage::snapshot();
            if self.corpus.count_new_features(&snapshot) > 0 {
                self.corpus.add_unit(unit, &snapshot);
            } else {
                self.corpus.merge_features(&snapshot);
            }
        }
    }

    fn execs_per_sec(&self) -> u64 {
        self.total_runs / self.start.elapsed().as_secs().max(1)
    }

    pub fn print_final_stats(&self) {
        if !self.options.print_final_stats {
            return;
        }
        eprintln!("stat::number_of_executed_units: {}", self.total_runs);
        eprintln!("stat::average_exec_per_sec:     {}", self.execs_per_sec());
        eprintln!("stat::new_units_added:          {}", self.new_units_added);
        eprintln!("stat::slowest_unit_time_sec:    0");
        eprintln!("stat::peak_rss_mb:              {}", monitor::peak_rss_mb());
    }

    /// End-of-run coverage report per the print_coverage flags.
    pub fn print_coverage_summary(&self) {
        if self.options.print_full_coverage {
            eprintln!(
                "FULL COVERAGE: {} features observed",
                coverage::observed_len()
            );
        } else if self.options.print_coverage {
            eprintln!(
                "COVERAGE: {} features, {} corpus units",
                self.corpus.num_features(),
                self.corpus.len()
            );
        }
    }
}

/// OOM report for the RSS monitor; exits with the error code.
pub fn rss_limit_exceeded(peak_mb: usize, limit_mb: usize, error_exitcode: i32) -> ! {
    let pid = std::process::id();
    eprintln!("=={pid}== ERROR: fuzzrig: out-of-memory (used: {peak_mb}Mb; limit: {limit_mb}Mb)");
    eprintln!("   To change the out-of-memory limit use -rss_limit_mb=<N>");
    std::process::exit(error_exitcode);
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn to_ascii(unit: &mut [u8]) {
    for byte in unit {
        *byte &= 0x7f;
        if !byte.is_ascii_graphic() && !byte.is_ascii_whitespace() {
            *byte = b' ';
        }
    }
}

/// Snapshot of the features one input produces, for callers that compare
/// feature sets (the dictionary analyzer).
pub fn features_of_run(fuzzer: &mut Fuzzer, unit: &[u8]) -> BTreeSet<u64> {
    fuzzer.execute_callback(unit);
    coverage::snapshot()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::EntropicOptions;
    use std::sync::atomic::{AtomicU64, Ordering};

    static CALLS: AtomicU64 = AtomicU64::new(0);

    fn counting_target(data: &[u8]) -> i32 {
        CALLS.fetch_add(1, Ordering::Relaxed);
        coverage::edge("fuzzer-test-base");
        if data.first() == Some(&b'A') {
            coverage::edge("fuzzer-test-a");
        }
        if data.len() > 2 {
            coverage::edge("fuzzer-test-long");
        }
        0
    }

    fn quiet_options(runs: u64) -> FuzzingOptions {
        let mut flags = crate::flags::Flags::default();
        flags.runs = runs as i64;
        flags.verbosity = 0;
        let mut options = FuzzingOptions::from_flags(&flags);
        options.save_artifacts = false;
        options
    }

    fn leaked_fuzzer(runs: u64) -> Fuzzer {
        let corpus = Box::leak(Box::new(InputCorpus::new(
            None,
            EntropicOptions::default(),
            true,
        )));
        let md = Box::leak(Box::new(MutationDispatcher::new(42)));
        Fuzzer::new(counting_target, corpus, md, quiet_options(runs))
    }

    #[test]
    fn loop_stops_at_the_run_budget() {
        let mut fuzzer = leaked_fuzzer(50);
        fuzzer.loop_on(Vec::new());
        assert!(fuzzer.total_runs() >= 50);
        assert!(fuzzer.total_runs() < 60);
    }

    #[test]
    fn executing_accumulates_coverage_snapshots() {
        let mut fuzzer = leaked_fuzzer(10);
        let features = features_of_run(&mut fuzzer, b"Axx");
        assert!(features.contains(&coverage::edge_id("fuzzer-test-a")));
        assert!(features.contains(&coverage::edge_id("fuzzer-test-long")));
        let features = features_of_run(&mut fuzzer, b"x");
        assert!(!features.contains(&coverage::edge_id("fuzzer-test-a")));
    }

    #[test]
    fn ascii_mode_produces_printable_bytes() {
        let mut unit = vec![0x00, 0xff, b'a', 0x07];
        to_ascii(&mut unit);
        assert!(unit
            .iter()
            .all(|b| b.is_ascii_graphic() || b.is_ascii_whitespace()));
        assert_eq!(unit[2], b'a');
    }
}
