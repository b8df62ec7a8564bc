//! Semantic configuration consumed by the fuzzing loop and the terminal
//! modes. Built once from the parsed flags, read-only afterwards.

use std::path::PathBuf;

use crate::flags::Flags;

#[derive(Debug, Clone, Default)]
pub struct EntropicOptions {
    pub enabled: bool,
    pub feature_frequency_threshold: usize,
    pub number_of_rarest_features: usize,
    pub scale_per_exec_time: bool,
}

#[derive(Debug, Clone)]
pub struct FuzzingOptions {
    pub verbosity: i64,
    pub max_len: usize,
    pub len_control: i64,
    pub keep_seed: bool,
    pub unit_timeout_sec: i64,
    pub error_exitcode: i32,
    pub timeout_exitcode: i32,
    pub ignore_timeouts: bool,
    pub ignore_ooms: bool,
    pub ignore_crashes: bool,
    pub max_total_time_sec: i64,
    pub do_cross_over: bool,
    pub mutate_depth: i64,
    pub reduce_depth: bool,
    pub shrink: bool,
    pub reduce_inputs: bool,
    pub shuffle_at_startup: bool,
    pub prefer_small: bool,
    pub reload_interval_sec: i64,
    pub only_ascii: bool,
    pub detect_leaks: bool,
    pub rss_limit_mb: usize,
    pub malloc_limit_mb: usize,
    /// None means unbounded (`-runs=-1`).
    pub max_number_of_runs: Option<u64>,
    pub seed: u64,
    pub output_corpus: Option<PathBuf>,
    pub artifact_prefix: String,
    pub exact_artifact_path: Option<String>,
    pub save_artifacts: bool,
    pub print_final_stats: bool,
    pub print_coverage: bool,
    pub print_full_coverage: bool,
    pub stop_file: Option<PathBuf>,
    pub entropic: EntropicOptions,
    pub handle_abrt: bool,
    pub handle_alrm: bool,
    pub handle_int: bool,
    pub handle_segv: bool,
    pub handle_term: bool,
}

impl FuzzingOptions {
    pub fn from_flags(flags: &Flags) -> Self {
        let mut options = FuzzingOptions {
            verbosity: flags.verbosity,
            max_len: flags.max_len.max(0) as usize,
            len_control: flags.len_control,
            keep_seed: flags.keep_seed != 0,
            unit_timeout_sec: flags.timeout,
            error_exitcode: flags.error_exitcode as i32,
            timeout_exitcode: flags.timeout_exitcode as i32,
            ignore_timeouts: flags.ignore_timeouts != 0,
            ignore_ooms: flags.ignore_ooms != 0,
            ignore_crashes: flags.ignore_crashes != 0,
            max_total_time_sec: flags.max_total_time,
            do_cross_over: flags.cross_over != 0,
            mutate_depth: flags.mutate_depth,
            reduce_depth: flags.reduce_depth != 0,
            shrink: flags.shrink != 0,
            reduce_inputs: flags.reduce_inputs != 0,
            shuffle_at_startup: flags.shuffle != 0,
            prefer_small: flags.prefer_small != 0,
            reload_interval_sec: flags.reload,
            only_ascii: flags.only_ascii != 0,
            detect_leaks: flags.detect_leaks != 0,
            rss_limit_mb: flags.rss_limit_mb.max(0) as usize,
            malloc_limit_mb: flags.malloc_limit_mb.max(0) as usize,
            max_number_of_runs: if flags.runs >= 0 {
                Some(flags.runs as u64)
            } else {
                None
            },
            seed: flags.seed,
            output_corpus: None,
            artifact_prefix: flags.artifact_prefix.clone().unwrap_or_default(),
            exact_artifact_path: flags.exact_artifact_path.clone(),
            save_artifacts: true,
            print_final_stats: flags.print_final_stats != 0,
            print_coverage: flags.print_coverage != 0,
            print_full_coverage: flags.print_full_coverage != 0,
            stop_file: flags.stop_file.clone().map(PathBuf::from),
            entropic: EntropicOptions {
                enabled: flags.entropic != 0,
                feature_frequency_threshold: flags
                    .entropic_feature_frequency_threshold
                    .max(0) as usize,
                number_of_rarest_features: flags.entropic_number_of_rarest_features.max(0)
                    as usize,
                scale_per_exec_time: flags.entropic_scale_per_exec_time != 0,
            },
            handle_abrt: flags.handle_abrt != 0,
            // The outer crash minimizer owns the alarm.
            handle_alrm: flags.handle_alrm != 0 && flags.minimize_crash == 0,
            handle_int: flags.handle_int != 0,
            handle_segv: flags.handle_segv != 0,
            handle_term: flags.handle_term != 0,
        };
        if options.malloc_limit_mb == 0 {
            options.malloc_limit_mb = options.rss_limit_mb;
        }
        options
    }
}
