//! Flag registry and command-line parsing.
//!
//! Flags are recognized strictly in the form `-name=value`. The registry is a
//! single ordered table; declaration order drives help output. Unknown flags
//! warn and are discarded, `--name=value` is ignored with a one-time notice
//! so wrappers can pass their own options through to subprocesses.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::extfn::ExternalFunctions;

/// One process-wide record, one field per registered flag. Every field holds
/// its declared default until `parse_flags` routes values into it.
#[derive(Debug, Clone)]
pub struct Flags {
    pub help: i64,
    pub verbosity: i64,
    pub max_len: i64,
    pub len_control: i64,
    pub seed: u64,
    pub runs: i64,
    pub max_total_time: i64,
    pub timeout: i64,
    pub error_exitcode: i64,
    pub timeout_exitcode: i64,
    pub keep_seed: i64,
    pub cross_over: i64,
    pub mutate_depth: i64,
    pub reduce_depth: i64,
    pub shrink: i64,
    pub reduce_inputs: i64,
    pub shuffle: i64,
    pub prefer_small: i64,
    pub only_ascii: i64,
    pub reload: i64,
    pub jobs: i64,
    pub workers: i64,
    pub fork: i64,
    pub merge: i64,
    pub set_cover_merge: i64,
    pub minimize_crash: i64,
    pub cleanse_crash: i64,
    pub minimize_crash_internal_step: i64,
    pub analyze_dict: i64,
    pub ignore_remaining_args: i64,
    pub create_missing_dirs: i64,
    pub print_final_stats: i64,
    pub print_coverage: i64,
    pub print_full_coverage: i64,
    pub detect_leaks: i64,
    pub close_fd_mask: i64,
    pub rss_limit_mb: i64,
    pub malloc_limit_mb: i64,
    pub ignore_timeouts: i64,
    pub ignore_ooms: i64,
    pub ignore_crashes: i64,
    pub entropic: i64,
    pub entropic_feature_frequency_threshold: i64,
    pub entropic_number_of_rarest_features: i64,
    pub entropic_scale_per_exec_time: i64,
    pub handle_abrt: i64,
    pub handle_alrm: i64,
    pub handle_int: i64,
    pub handle_segv: i64,
    pub handle_term: i64,
    pub dict: Option<String>,
    pub artifact_prefix: Option<String>,
    pub exact_artifact_path: Option<String>,
    pub seed_inputs: Option<String>,
    pub merge_control_file: Option<String>,
    pub merge_inner: Option<String>,
    pub stop_file: Option<String>,
}

enum FlagStore {
    Int(fn(&mut Flags) -> &mut i64),
    Unsigned(fn(&mut Flags) -> &mut u64),
    Str(fn(&mut Flags) -> &mut Option<String>),
    Deprecated,
}

pub struct FlagSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub default: i64,
    store: FlagStore,
}

macro_rules! int_flag {
    ($name:ident, $default:expr, $desc:expr) => {
        FlagSpec {
            name: stringify!($name),
            description: $desc,
            default: $default,
            store: FlagStore::Int(|f| &mut f.$name),
        }
    };
}

macro_rules! unsigned_flag {
    ($name:ident, $default:expr, $desc:expr) => {
        FlagSpec {
            name: stringify!($name),
            description: $desc,
            default: $default,
            store: FlagStore::Unsigned(|f| &mut f.$name),
        }
    };
}

macro_rules! str_flag {
    ($name:ident, $desc:expr) => {
        FlagSpec {
            name: stringify!($name),
            description: $desc,
            default: 0,
            store: FlagStore::Str(|f| &mut f.$name),
        }
    };
}

macro_rules! deprecated_flag {
    ($name:ident) => {
        FlagSpec {
            name: stringify!($name),
            description: "Deprecated; don't use",
            default: 0,
            store: FlagStore::Deprecated,
        }
    };
}

pub static FLAG_TABLE: &[FlagSpec] = &[
    int_flag!(help, 0, "Print help."),
    int_flag!(verbosity, 1, "Verbosity level."),
    unsigned_flag!(
        seed,
        0,
        "Random seed. If 0, the seed is derived from the current time and pid."
    ),
    int_flag!(
        runs,
        -1,
        "Number of individual test runs (-1 for infinite runs)."
    ),
    int_flag!(
        max_len,
        0,
        "Maximum length of a test input. If 0, a default is chosen from the corpus."
    ),
    int_flag!(
        len_control,
        100,
        "Try generating small inputs first, then try larger inputs over time. \
         Specifies the rate at which the length limit is increased (smaller == faster). \
         If 0, immediately try inputs with size up to max_len."
    ),
    int_flag!(
        keep_seed,
        0,
        "If 1, keep all seed inputs in the corpus even if they do not produce new coverage."
    ),
    int_flag!(cross_over, 1, "If 1, cross over inputs."),
    int_flag!(mutate_depth, 5, "Apply this number of consecutive mutations to each input."),
    int_flag!(
        reduce_depth,
        0,
        "Experimental: if 1, prefer mutations that shrink the input."
    ),
    int_flag!(shuffle, 1, "Shuffle inputs at startup."),
    int_flag!(prefer_small, 1, "If 1, schedule smaller inputs with higher priority."),
    int_flag!(
        timeout,
        1200,
        "Timeout in seconds for a single run. If an input takes longer, the process is aborted."
    ),
    int_flag!(error_exitcode, 77, "When the fuzzing engine itself reports a bug, exit with this code."),
    int_flag!(timeout_exitcode, 70, "When an input times out, exit with this code."),
    int_flag!(
        max_total_time,
        0,
        "If positive, run the fuzzer for at most this number of seconds."
    ),
    int_flag!(
        merge,
        0,
        "If 1, the second, third, etc. corpus directories will be merged into the first one. \
         Only inputs that add new coverage are written."
    ),
    int_flag!(
        set_cover_merge,
        0,
        "If 1, merge with a set-cover strategy: keep a minimal subset of the new corpus that \
         preserves the union of its coverage."
    ),
    int_flag!(minimize_crash, 0, "If 1, minimizes the provided crash input."),
    int_flag!(
        cleanse_crash,
        0,
        "If 1, replace every byte of the provided crash input that does not affect the crash \
         with a filler byte. Requires -exact_artifact_path."
    ),
    int_flag!(
        minimize_crash_internal_step,
        0,
        "internal flag: one step of crash input minimization, operating in-process."
    ),
    int_flag!(
        fork,
        0,
        "Experimental: fuzz in a subprocess pool driven by the fork orchestrator."
    ),
    int_flag!(ignore_timeouts, 1, "Ignore timeouts in fork mode."),
    int_flag!(ignore_ooms, 1, "Ignore out-of-memory conditions in fork mode."),
    int_flag!(ignore_crashes, 0, "Ignore crashes in fork mode."),
    int_flag!(jobs, 0, "Number of jobs to run. Spawns this many subprocesses overall."),
    int_flag!(
        workers,
        0,
        "Number of simultaneous worker processes running the jobs. \
         If zero, min(jobs, half the cores) is used."
    ),
    int_flag!(reload, 1, "Reload the main corpus every <N> seconds to pick up new inputs."),
    int_flag!(only_ascii, 0, "If 1, generate only ASCII (isprint+isspace) inputs."),
    str_flag!(dict, "Use the dictionary file at this path."),
    str_flag!(
        artifact_prefix,
        "Write fuzzing artifacts (crash, timeout, oom inputs) as $(artifact_prefix)file."
    ),
    str_flag!(
        exact_artifact_path,
        "Write the single artifact on failure (crash, timeout) to this path, \
         overriding -artifact_prefix."
    ),
    str_flag!(
        seed_inputs,
        "A comma-separated list of input files to use as extra seeds, \
         or '@file' to read the list from a file."
    ),
    int_flag!(print_final_stats, 0, "If 1, print statistics at exit."),
    int_flag!(print_coverage, 0, "If 1, print newly covered features at exit."),
    int_flag!(
        print_full_coverage,
        0,
        "If 1, print the full observed feature set at exit; disables the leak probe for \
         individual runs."
    ),
    int_flag!(detect_leaks, 1, "If 1, try to detect memory leaks after each run."),
    int_flag!(
        close_fd_mask,
        0,
        "Close stdout (bit 1) and/or stderr (bit 2) of the target at startup."
    ),
    int_flag!(rss_limit_mb, 2048, "Memory usage limit in Mb, 0 for no limit."),
    int_flag!(
        malloc_limit_mb,
        0,
        "If non-zero, report a single allocation larger than this many Mb. \
         If zero, rss_limit_mb is used."
    ),
    str_flag!(
        merge_control_file,
        "Specify a control file used for the merge process. If a merge process is killed it \
         attempts to leave this file in a state suitable for resuming the merge."
    ),
    str_flag!(merge_inner, "internal flag: one inner step of the crash-resistant merge."),
    int_flag!(
        analyze_dict,
        0,
        "Instead of fuzzing, analyze how the given dictionary affects coverage of the \
         given corpus and report useless entries."
    ),
    int_flag!(shrink, 0, "Experimental: try to shrink corpus inputs."),
    int_flag!(
        reduce_inputs,
        1,
        "Try to reduce the size of inputs while preserving their full feature sets."
    ),
    int_flag!(
        ignore_remaining_args,
        0,
        "If 1, ignore all arguments passed after this one. \
         Useful for fuzzers that need to do their own argument parsing."
    ),
    int_flag!(
        create_missing_dirs,
        0,
        "Automatically attempt to create directories for arguments that would normally \
         expect them to already exist (artifact_prefix, exact_artifact_path, the output corpus)."
    ),
    int_flag!(entropic, 1, "Enable entropic power schedule."),
    int_flag!(
        entropic_feature_frequency_threshold,
        255,
        "Experimental: only features whose global frequency is below this threshold \
         are considered for entropy computation."
    ),
    int_flag!(
        entropic_number_of_rarest_features,
        100,
        "Experimental: this many rarest features are considered for entropy computation."
    ),
    int_flag!(
        entropic_scale_per_exec_time,
        0,
        "Experimental: scale the entropic scheduling weight by input execution time."
    ),
    str_flag!(
        stop_file,
        "Stop fuzzing as soon as this file exists."
    ),
    int_flag!(handle_abrt, 1, "If 1, install a SIGABRT handler."),
    int_flag!(handle_alrm, 1, "If 1, install a SIGALRM handler."),
    int_flag!(handle_int, 1, "If 1, install a SIGINT handler."),
    int_flag!(handle_segv, 1, "If 1, install a SIGSEGV handler."),
    int_flag!(handle_term, 1, "If 1, install a SIGTERM handler."),
    deprecated_flag!(save_minimized_corpus),
    deprecated_flag!(output_csv),
];

impl Default for Flags {
    fn default() -> Self {
        let mut flags = Flags {
            help: 0,
            verbosity: 0,
            max_len: 0,
            len_control: 0,
            seed: 0,
            runs: 0,
            max_total_time: 0,
            timeout: 0,
            error_exitcode: 0,
            timeout_exitcode: 0,
            keep_seed: 0,
            cross_over: 0,
            mutate_depth: 0,
            reduce_depth: 0,
            shrink: 0,
            reduce_inputs: 0,
            shuffle: 0,
            prefer_small: 0,
            only_ascii: 0,
            reload: 0,
            jobs: 0,
            workers: 0,
            fork: 0,
            merge: 0,
            set_cover_merge: 0,
            minimize_crash: 0,
            cleanse_crash: 0,
            minimize_crash_internal_step: 0,
            analyze_dict: 0,
            ignore_remaining_args: 0,
            create_missing_dirs: 0,
            print_final_stats: 0,
            print_coverage: 0,
            print_full_coverage: 0,
            detect_leaks: 0,
            close_fd_mask: 0,
            rss_limit_mb: 0,
            malloc_limit_mb: 0,
            ignore_timeouts: 0,
            ignore_ooms: 0,
            ignore_crashes: 0,
            entropic: 0,
            entropic_feature_frequency_threshold: 0,
            entropic_number_of_rarest_features: 0,
            entropic_scale_per_exec_time: 0,
            handle_abrt: 0,
            handle_alrm: 0,
            handle_int: 0,
            handle_segv: 0,
            handle_term: 0,
            dict: None,
            artifact_prefix: None,
            exact_artifact_path: None,
            seed_inputs: None,
            merge_control_file: None,
            merge_inner: None,
            stop_file: None,
        };
        // The table is authoritative for defaults; the literal zeros above are
        // placeholders so new flags cannot be forgotten here.
        for spec in FLAG_TABLE {
            match spec.store {
                FlagStore::Int(field) => *field(&mut flags) = spec.default,
                FlagStore::Unsigned(field) => *field(&mut flags) = spec.default as u64,
                FlagStore::Str(field) => *field(&mut flags) = None,
                FlagStore::Deprecated => {}
            }
        }
        flags
    }
}

/// If `param` looks like `-name=tail` for exactly this flag name, return the
/// tail. The character right after the name must be `=`, so `-foobar=x` never
/// resolves to a flag named `foo`.
pub fn flag_value<'a>(param: &'a str, name: &str) -> Option<&'a str> {
    let rest = param.strip_prefix('-')?;
    let rest = rest.strip_prefix(name)?;
    rest.strip_prefix('=')
}

/// Hand-rolled signed decimal parser. Stops at the first non-digit and
/// returns what was parsed so far; the empty string and a bare `-` parse
/// to 0. Never fails.
pub fn parse_signed(s: &str) -> i64 {
    let (sign, digits) = match s.strip_prefix('-') {
        Some(rest) => (-1i64, rest),
        None => (1i64, s),
    };
    let mut value = 0i64;
    for b in digits.bytes() {
        if !b.is_ascii_digit() {
            break;
        }
        value = value.wrapping_mul(10).wrapping_add(i64::from(b - b'0'));
    }
    value.wrapping_mul(sign)
}

fn parse_unsigned_or_die(name: &str, s: &str) -> u64 {
    match s.parse::<u64>() {
        Ok(value) => value,
        Err(_) => {
            eprintln!("ERROR: '{s}' is not a valid unsigned integer for flag -{name}");
            std::process::exit(1);
        }
    }
}

static DOUBLE_DASH_NOTICE: AtomicBool = AtomicBool::new(false);

/// Consume one argv token. Returns true if the token was a flag (recognized
/// or not); false means the token is a positional input.
pub fn parse_one_flag(flags: &mut Flags, param: &str) -> bool {
    if !param.starts_with('-') {
        return false;
    }
    if param.as_bytes().get(1) == Some(&b'-') {
        if !DOUBLE_DASH_NOTICE.swap(true, Ordering::Relaxed) {
            eprintln!("INFO: flags starting with '--' are ignored");
        }
        for spec in FLAG_TABLE {
            if flag_value(&param[1..], spec.name).is_some() {
                eprintln!("WARNING: did you mean '{}' (single dash)?", &param[1..]);
            }
        }
        return true;
    }
    for spec in FLAG_TABLE {
        let Some(value) = flag_value(param, spec.name) else {
            continue;
        };
        match spec.store {
            FlagStore::Int(field) => {
                let parsed = parse_signed(value);
                *field(flags) = parsed;
                if flags.verbosity >= 2 {
                    eprintln!("Flag: {} {}", spec.name, parsed);
                }
            }
            FlagStore::Unsigned(field) => {
                let parsed = parse_unsigned_or_die(spec.name, value);
                *field(flags) = parsed;
                if flags.verbosity >= 2 {
                    eprintln!("Flag: {} {}", spec.name, parsed);
                }
            }
            FlagStore::Str(field) => {
                *field(flags) = Some(value.to_string());
                if flags.verbosity >= 2 {
                    eprintln!("Flag: {} {}", spec.name, value);
                }
            }
            FlagStore::Deprecated => {
                eprintln!("Flag: {}: deprecated, don't use", spec.name);
            }
        }
        return true;
    }
    eprintln!("\nWARNING: unrecognized flag '{param}'; use -help=1 to list all flags\n");
    true
}

/// Populate `flags` from argv. Returns the positional inputs, in order.
/// Inputs never contain a token beginning with `-`.
pub fn parse_flags(flags: &mut Flags, args: &[String], ef: &ExternalFunctions) -> Vec<String> {
    *flags = Flags::default();

    // A custom mutator owns input sizing; length control would fight it.
    if ef.custom_mutator.is_some() {
        flags.len_control = 0;
        eprintln!("INFO: found a custom mutator, disabling -len_control by default");
    }

    let mut inputs = Vec::new();
    for arg in args.iter().skip(1) {
        if parse_one_flag(flags, arg) {
            if flags.ignore_remaining_args != 0 {
                break;
            }
            continue;
        }
        inputs.push(arg.clone());
    }
    inputs
}

/// Render the flag table. Flags whose description begins with
/// `internal flag` are suppressed.
pub fn print_help(prog: &str) {
    println!("Usage:");
    println!();
    println!("To run fuzzing pass 0 or more directories.");
    println!("{prog} [-flag1=val1 [-flag2=val2 ...] ] [dir1 [dir2 ...] ]");
    println!();
    println!("To run individual tests without fuzzing pass 1 or more files:");
    println!("{prog} [-flag1=val1 [-flag2=val2 ...] ] file1 [file2 ...]");
    println!();
    println!("Flags: (strictly in form -flag=value)");
    let width = FLAG_TABLE
        .iter()
        .map(|spec| spec.name.len())
        .max()
        .unwrap_or(0);
    for spec in FLAG_TABLE {
        if spec.description.starts_with("internal flag") {
            continue;
        }
        println!(" {:width$}\t{}\t{}", spec.name, spec.default, spec.description);
    }
    println!();
    println!("Flags starting with '--' will be ignored and will be passed verbatim to subprocesses.");
}
