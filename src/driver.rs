//! Driver entry point and mode dispatcher.
//!
//! Exactly one terminal action runs per invocation, selected by a
//! priority-ordered cascade after the options snapshot is finalized. Every
//! terminal path the driver owns exits the process instead of returning, so
//! the deliberately leaked fuzzer, corpus and mutation dispatcher never run
//! destructors that could race a signal-triggered exit.

use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::debug;

use crate::cleanse::cleanse_crash_input;
use crate::corpus::InputCorpus;
use crate::dictionary::{analyze_dictionary, parse_dictionary_file};
use crate::extfn::ExternalFunctions;
use crate::flags::{parse_flags, print_help, Flags};
use crate::fsutil::{
    close_stderr, close_stdout, dir_name, file_to_string, file_to_vec_capped, is_separator,
    number_of_cpu_cores, read_dir_to_units, validate_directory_exists,
};
use crate::fuzzer::{rss_limit_exceeded, Fuzzer, UserCallback};
use crate::merge;
use crate::minimize::{minimize_crash_input, minimize_crash_input_internal_step};
use crate::monitor;
use crate::mutate::MutationDispatcher;
use crate::options::FuzzingOptions;
use crate::seeds::{parse_seed_inputs, read_corpora};
use crate::signals::set_signal_handler;
use crate::workers::run_in_multiple_processes;

const DEFAULT_MAX_MERGE_LEN: usize = 1 << 20;

/// Stable entry point: parse argv, build the subsystems, dispatch to one
/// terminal mode.
pub fn run_driver(args: &[String], callback: UserCallback) -> i32 {
    run_driver_with_hooks(args, callback, ExternalFunctions::default())
}

pub fn run_driver_with_hooks(
    args: &[String],
    callback: UserCallback,
    ef: ExternalFunctions,
) -> i32 {
    assert!(!args.is_empty(), "argv cannot be empty");
    let argv0 = args[0].clone();
    let mut args = args.to_vec();
    if let Some(initialize) = ef.initialize {
        initialize(&mut args);
    }
    if args.first() != Some(&argv0) {
        eprintln!("ERROR: argv[0] has been modified by the initializer");
        std::process::exit(1);
    }
    let prog_name = argv0;

    let mut flags = Flags::default();
    let inputs = parse_flags(&mut flags, &args, &ef);
    if flags.help != 0 {
        print_help(&prog_name);
        return 0;
    }

    if flags.close_fd_mask & 2 != 0 {
        close_stderr();
    }
    if flags.close_fd_mask & 1 != 0 {
        close_stdout();
    }

    if flags.jobs > 0 && flags.workers == 0 {
        flags.workers = ((number_of_cpu_cores() / 2) as i64).min(flags.jobs);
        if flags.workers > 1 {
            eprintln!("Running {} workers", flags.workers);
        }
    }
    if flags.workers > 0 && flags.jobs > 0 {
        return run_in_multiple_processes(
            &args,
            flags.workers as u32,
            flags.jobs as u32,
            flags.verbosity,
        );
    }

    let mut options = FuzzingOptions::from_flags(&flags);

    // The first positional input that is not an existing file is the output
    // corpus directory.
    if !inputs.is_empty() && flags.minimize_crash_internal_step == 0 {
        let first = &inputs[0];
        if !Path::new(first).is_file() {
            options.output_corpus = Some(PathBuf::from(first));
            validate_directory_exists(first, flags.create_missing_dirs != 0);
        }
    }

    if let Some(prefix) = &flags.artifact_prefix {
        options.artifact_prefix = prefix.clone();
        // A prefix ending in a separator names a directory; otherwise its
        // parent is the directory to validate.
        let artifact_dir = if prefix.chars().last().is_some_and(is_separator) {
            prefix.clone()
        } else {
            dir_name(prefix)
        };
        validate_directory_exists(&artifact_dir, flags.create_missing_dirs != 0);
    }
    if let Some(exact) = &flags.exact_artifact_path {
        options.exact_artifact_path = Some(exact.clone());
        validate_directory_exists(&dir_name(exact), flags.create_missing_dirs != 0);
    }

    let mut dictionary: Vec<Vec<u8>> = Vec::new();
    if let Some(dict_path) = &flags.dict {
        let text = match file_to_string(Path::new(dict_path)) {
            Ok(text) => text,
            Err(err) => {
                eprintln!("ERROR: failed to read dictionary {dict_path}: {err}");
                return 1;
            }
        };
        match parse_dictionary_file(&text) {
            Ok(entries) => dictionary = entries,
            Err(err) => {
                eprintln!("ERROR: {err}");
                return 1;
            }
        }
    }
    if flags.verbosity > 0 && !dictionary.is_empty() {
        eprintln!("Dictionary: {} entries", dictionary.len());
    }

    let run_individual_files = all_inputs_are_files(&inputs);
    options.save_artifacts = !run_individual_files || flags.minimize_crash_internal_step != 0;

    let mut seed = flags.seed;
    if seed == 0 {
        seed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
            .wrapping_add(u64::from(std::process::id()));
    }
    if flags.verbosity > 0 {
        eprintln!("INFO: Seed: {seed}");
    }
    options.seed = seed;

    // These three own resources whose destructors must never race the
    // at-exit and signal paths; they are leaked on purpose.
    let md: &'static mut MutationDispatcher =
        Box::leak(Box::new(MutationDispatcher::new(seed)));
    let corpus: &'static mut InputCorpus = Box::leak(Box::new(InputCorpus::new(
        options.output_corpus.clone(),
        options.entropic.clone(),
        options.prefer_small,
    )));
    let fuzzer: &'static mut Fuzzer =
        Box::leak(Box::new(Fuzzer::new(callback, corpus, md, options.clone())));

    let mut oversize_words = 0usize;
    for word in &dictionary {
        if word.len() <= MutationDispatcher::max_word_size() {
            fuzzer.md_mut().add_word_to_manual_dictionary(word);
        } else {
            oversize_words += 1;
        }
    }
    debug!(
        words = dictionary.len() - oversize_words,
        dropped = oversize_words,
        "manual dictionary loaded"
    );

    {
        let limit_mb = options.rss_limit_mb;
        let error_exitcode = options.error_exitcode;
        monitor::start_rss_thread(limit_mb, move |peak_mb| {
            rss_limit_exceeded(peak_mb, limit_mb, error_exitcode)
        });
    }

    set_signal_handler(&options);

    if flags.minimize_crash != 0 {
        return minimize_crash_input(&args, &flags, &options, &inputs);
    }
    if flags.minimize_crash_internal_step != 0 {
        return minimize_crash_input_internal_step(fuzzer, &inputs);
    }
    if flags.cleanse_crash != 0 {
        return cleanse_crash_input(&args, &flags, &inputs);
    }

    if run_individual_files {
        let runs = flags.runs.max(1);
        eprintln!(
            "{prog_name}: Running {} inputs {} time(s) each.",
            inputs.len(),
            runs
        );
        for path in &inputs {
            let start = Instant::now();
            eprintln!("Running: {path}");
            for _ in 0..runs {
                run_one_test(fuzzer, path, options.max_len, flags.print_full_coverage != 0);
            }
            eprintln!("Executed {path} in {} ms", start.elapsed().as_millis());
        }
        eprintln!("***");
        eprintln!("*** NOTE: fuzzing was not performed, you have only");
        eprintln!("***       executed the target code on a fixed set of inputs.");
        eprintln!("***");
        fuzzer.print_coverage_summary();
        fuzzer.print_final_stats();
        std::process::exit(0);
    }

    if flags.fork > 0 {
        eprintln!(
            "ERROR: -fork is delegated to the external fork orchestrator, \
             which is not linked into this binary"
        );
        std::process::exit(1);
    }

    if flags.merge != 0 || flags.set_cover_merge != 0 {
        merge::merge(
            fuzzer,
            &options,
            &args,
            &inputs,
            flags.merge_control_file.as_deref(),
            flags.set_cover_merge != 0,
        );
    }

    if let Some(inner) = flags.merge_inner.clone() {
        if options.max_len == 0 {
            fuzzer.set_max_input_len(DEFAULT_MAX_MERGE_LEN);
        }
        let Some(control_file) = flags.merge_control_file.clone() else {
            eprintln!("ERROR: -merge_inner requires -merge_control_file");
            std::process::exit(1);
        };
        if let Err(err) = merge::crash_resistant_merge_internal_step(
            fuzzer,
            Path::new(&control_file),
            inner.starts_with('2'),
        ) {
            eprintln!("ERROR: merge step failed: {err}");
            std::process::exit(1);
        }
        std::process::exit(0);
    }

    if flags.analyze_dict != 0 {
        let mut units = Vec::new();
        for input in &inputs {
            eprintln!("Loading corpus dir: {input}");
            read_dir_to_units(Path::new(input), options.max_len, &mut units);
        }
        if dictionary.is_empty() || inputs.is_empty() {
            eprintln!("ERROR: can't analyze dict without dict and corpus provided");
            return 1;
        }
        if analyze_dictionary(fuzzer, &dictionary, &units) != 0 {
            eprintln!("Dictionary analysis failed");
            std::process::exit(1);
        }
        eprintln!("Dictionary analysis succeeded");
        std::process::exit(0);
    }

    let corpora = read_corpora(&inputs, &parse_seed_inputs(flags.seed_inputs.as_deref()));
    fuzzer.loop_on(corpora);
    if flags.verbosity > 0 {
        eprintln!(
            "Done {} runs in {} second(s)",
            fuzzer.total_runs(),
            fuzzer.seconds_since_start()
        );
    }
    fuzzer.print_coverage_summary();
    fuzzer.print_final_stats();
    std::process::exit(0);
}

fn all_inputs_are_files(inputs: &[String]) -> bool {
    if inputs.is_empty() {
        return false;
    }
    inputs.iter().all(|path| Path::new(path).is_file())
}

/// Run one input file through the target. Collecting full coverage replaces
/// the leak probe; the two share the post-run slot.
pub fn run_one_test(fuzzer: &mut Fuzzer, path: &str, max_len: usize, full_coverage: bool) -> i32 {
    let unit = match file_to_vec_capped(Path::new(path), max_len) {
        Ok(unit) => unit,
        Err(err) => {
            eprintln!("ERROR: failed to read {path}: {err}");
            std::process::exit(1);
        }
    };
    fuzzer.execute_callback(&unit);
    if full_coverage {
        fuzzer.update_observed_pcs();
    } else {
        fuzzer.try_detecting_a_memory_leak(&unit);
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inputs_that_are_all_files_select_run_individual_mode() {
        let file = crate::fsutil::temp_path("driver-file", ".bin");
        std::fs::write(&file, b"x").unwrap();
        let file_arg = file.to_string_lossy().into_owned();
        assert!(all_inputs_are_files(&[file_arg.clone()]));
        assert!(!all_inputs_are_files(&[]));
        assert!(!all_inputs_are_files(&[
            file_arg,
            "no-such-path-anywhere".to_string()
        ]));
        std::fs::remove_file(&file).unwrap();
    }
}
