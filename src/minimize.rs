//! Crash-input minimization.
//!
//! The outer loop re-invokes this binary twice per round: once to confirm
//! the current input still crashes (and to capture its dedup token), once
//! with the internal-step flag so the child mutates below the current size
//! and writes any smaller crasher to the artifact path. Rounds continue
//! until the child cannot reduce further or the reduction turns into a
//! different bug.

use std::path::Path;

use crate::exec::{clone_args_without, dedup_token_from_output, Command};
use crate::flags::Flags;
use crate::fsutil::{file_to_vec, hash_unit, write_file};
use crate::fuzzer::Fuzzer;
use crate::options::FuzzingOptions;

pub fn minimize_crash_input(
    args: &[String],
    flags: &Flags,
    options: &FuzzingOptions,
    inputs: &[String],
) -> i32 {
    if inputs.len() != 1 {
        eprintln!("ERROR: -minimize_crash should be given one input file");
        std::process::exit(1);
    }
    let input_file = &inputs[0];
    let mut base_cmd = Command::new(&clone_args_without(
        args,
        "minimize_crash",
        "exact_artifact_path",
    ));
    if !base_cmd.has_argument(input_file) {
        eprintln!("ERROR: the crashing input {input_file} is not among the arguments");
        std::process::exit(1);
    }
    base_cmd.remove_argument(input_file);
    if flags.runs <= 0 && flags.max_total_time == 0 {
        eprintln!(
            "INFO: you need to specify -runs=N or -max_total_time=N with -minimize_crash=1"
        );
        eprintln!("INFO: defaulting to -max_total_time=600");
        base_cmd.add_flag("max_total_time", "600");
    }

    let mut current_file = input_file.clone();
    loop {
        let unit = match file_to_vec(Path::new(&current_file)) {
            Ok(unit) => unit,
            Err(err) => {
                eprintln!("ERROR: failed to read {current_file}: {err}");
                std::process::exit(1);
            }
        };
        eprintln!(
            "CRASH_MIN: minimizing crash input: '{current_file}' ({} bytes)",
            unit.len()
        );

        let mut cmd = base_cmd.clone();
        cmd.add_argument(&current_file);
        eprintln!("CRASH_MIN: executing: {cmd}");
        let (exit_code, output) = match cmd.execute_capture() {
            Ok(result) => result,
            Err(err) => {
                eprintln!("ERROR: {err}");
                std::process::exit(1);
            }
        };
        if exit_code == 0 {
            eprintln!("ERROR: the input {current_file} did not crash");
            std::process::exit(1);
        }
        eprintln!(
            "CRASH_MIN: '{current_file}' ({} bytes) caused a crash. Will try to minimize it further",
            unit.len()
        );
        let dedup_token1 = dedup_token_from_output(&output);
        if !dedup_token1.is_empty() {
            eprintln!("CRASH_MIN: DedupToken1: {dedup_token1}");
        }

        let artifact_path = match &flags.exact_artifact_path {
            Some(exact) => exact.clone(),
            None => format!(
                "{}minimized-from-{}",
                options.artifact_prefix,
                hash_unit(&unit)
            ),
        };
        cmd.add_flag("minimize_crash_internal_step", "1");
        cmd.add_flag("exact_artifact_path", &artifact_path);
        eprintln!("CRASH_MIN: executing: {cmd}");
        let (exit_code, output) = match cmd.execute_capture() {
            Ok(result) => result,
            Err(err) => {
                eprintln!("ERROR: {err}");
                std::process::exit(1);
            }
        };
        eprint!("{output}");
        if exit_code == 0 {
            // The step could not crash below the current size.
            if let Some(exact) = &flags.exact_artifact_path {
                current_file = exact.clone();
                if let Err(err) = write_file(Path::new(&current_file), &unit) {
                    eprintln!("ERROR: failed to write {current_file}: {err}");
                    std::process::exit(1);
                }
            }
            eprintln!(
                "CRASH_MIN: failed to minimize beyond {current_file} ({} bytes), exiting",
                unit.len()
            );
            break;
        }
        let dedup_token2 = dedup_token_from_output(&output);
        if !dedup_token2.is_empty() {
            eprintln!("CRASH_MIN: DedupToken2: {dedup_token2}");
        }
        if dedup_token1 != dedup_token2 {
            if let Some(exact) = &flags.exact_artifact_path {
                current_file = exact.clone();
                if let Err(err) = write_file(Path::new(&current_file), &unit) {
                    eprintln!("ERROR: failed to write {current_file}: {err}");
                    std::process::exit(1);
                }
            }
            eprintln!(
                "CRASH_MIN: mismatch in dedup tokens (looks like a different bug). Won't minimize further"
            );
            break;
        }

        current_file = artifact_path;
        eprintln!("*********************************");
    }
    0
}

/// The in-process side: mutate strictly below the input's size until a
/// crash (reported by the fuzzer, which writes the artifact and exits
/// non-zero) or the budget runs out (exit 0, nothing smaller found).
pub fn minimize_crash_input_internal_step(fuzzer: &mut Fuzzer, inputs: &[String]) -> i32 {
    if inputs.len() != 1 {
        eprintln!("ERROR: the minimization step should be given one input file");
        std::process::exit(1);
    }
    let unit = match file_to_vec(Path::new(&inputs[0])) {
        Ok(unit) => unit,
        Err(err) => {
            eprintln!("ERROR: failed to read {}: {err}", inputs[0]);
            std::process::exit(1);
        }
    };
    eprintln!("INFO: Starting crash input minimization: {} bytes", unit.len());
    if unit.len() < 2 {
        eprintln!("INFO: The input is small enough, exiting");
        std::process::exit(0);
    }
    fuzzer.set_max_input_len(unit.len());
    fuzzer.set_max_mutation_len(unit.len() - 1);
    fuzzer.minimize_crash_loop(&unit);
    eprintln!("INFO: Done with the crash minimization step, no crashes found");
    std::process::exit(0);
}
