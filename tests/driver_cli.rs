use std::path::{Path, PathBuf};
use std::process::Command;

fn temp_workspace(name: &str) -> PathBuf {
    let root = std::env::temp_dir().join(format!("fuzzrig-cli-{name}-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&root).expect("create temp workspace");
    root
}

fn run_cli(cwd: &Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_fuzzrig"))
        .args(args)
        .current_dir(cwd)
        .output()
        .expect("run cli")
}

fn stderr_of(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn help_prints_usage_on_stdout() {
    let ws = temp_workspace("help");
    let out = run_cli(&ws, &["-help=1"]);
    assert_eq!(out.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("Usage:"), "stdout: {stdout}");
    assert!(stdout.contains("-flag=value"));
    // Internal flags stay out of the listing.
    assert!(!stdout.contains("minimize_crash_internal_step"));
    assert!(stdout.contains("minimize_crash"));
}

#[test]
fn unknown_flags_warn_but_do_not_abort() {
    let ws = temp_workspace("unknown-flag");
    let corpus = ws.join("corpus");
    std::fs::create_dir_all(&corpus).unwrap();
    std::fs::write(corpus.join("seed"), b"ab").unwrap();
    let out = run_cli(&ws, &["-no_such_flag=1", "-runs=0", corpus.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(0), "stderr: {}", stderr_of(&out));
    assert!(stderr_of(&out).contains("unrecognized flag"));
}

#[test]
fn double_dash_flags_are_ignored_with_a_hint() {
    let ws = temp_workspace("double-dash");
    let corpus = ws.join("corpus");
    std::fs::create_dir_all(&corpus).unwrap();
    let out = run_cli(&ws, &["--runs=0", "-runs=0", corpus.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(0), "stderr: {}", stderr_of(&out));
    let stderr = stderr_of(&out);
    assert!(stderr.contains("ignored"));
    assert!(stderr.contains("did you mean"));
}

#[test]
fn missing_output_corpus_dir_is_a_user_error() {
    let ws = temp_workspace("missing-dir");
    let out = run_cli(&ws, &["-runs=0", "no/such/dir"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr_of(&out).contains("ERROR:"));
}

#[test]
fn create_missing_dirs_makes_the_output_corpus() {
    let ws = temp_workspace("create-dir");
    let corpus = ws.join("fresh").join("corpus");
    let out = run_cli(
        &ws,
        &["-create_missing_dirs=1", "-runs=0", corpus.to_str().unwrap()],
    );
    assert_eq!(out.status.code(), Some(0), "stderr: {}", stderr_of(&out));
    assert!(corpus.is_dir());
}

#[test]
fn workers_produce_one_log_per_job() {
    let ws = temp_workspace("workers");
    let corpus = ws.join("corpus");
    std::fs::create_dir_all(&corpus).unwrap();
    std::fs::write(corpus.join("seed"), b"ab").unwrap();
    let out = run_cli(
        &ws,
        &["-jobs=3", "-workers=2", "-runs=0", corpus.to_str().unwrap()],
    );
    assert_eq!(out.status.code(), Some(0), "stderr: {}", stderr_of(&out));
    for job in 0..3 {
        assert!(ws.join(format!("fuzz-{job}.log")).is_file(), "missing log {job}");
    }
    assert!(!ws.join("fuzz-3.log").exists());
    let stderr = stderr_of(&out);
    for job in 0..3 {
        assert!(stderr.contains(&format!("Job {job} exited with exit code 0")));
    }
}

#[test]
fn a_failing_job_fails_the_whole_pool() {
    let ws = temp_workspace("workers-fail");
    let corpus = ws.join("corpus");
    std::fs::create_dir_all(&corpus).unwrap();
    // Every job replays this crashing seed.
    std::fs::write(corpus.join("seed"), b"X").unwrap();
    let out = run_cli(
        &ws,
        &["-jobs=2", "-workers=2", "-runs=0", corpus.to_str().unwrap()],
    );
    assert_eq!(out.status.code(), Some(1));
}

#[test]
fn run_individual_files_executes_each_input() {
    let ws = temp_workspace("run-individual");
    let a = ws.join("a.bin");
    let b = ws.join("b.bin");
    std::fs::write(&a, b"ab").unwrap();
    std::fs::write(&b, b"cd").unwrap();
    let out = run_cli(&ws, &["-runs=2", a.to_str().unwrap(), b.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(0), "stderr: {}", stderr_of(&out));
    let stderr = stderr_of(&out);
    assert!(stderr.contains("Running 2 inputs 2 time(s) each."));
    assert!(stderr.contains(&format!("Running: {}", a.display())));
    assert!(stderr.contains(&format!("Running: {}", b.display())));
    assert!(stderr.contains("fuzzing was not performed"));
    // Artifact saving is forced off in this mode.
    let artifacts = std::fs::read_dir(&ws)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with("crash-"))
        .count();
    assert_eq!(artifacts, 0);
}

#[test]
fn a_crashing_individual_input_exits_with_the_error_code() {
    let ws = temp_workspace("run-crash");
    let crash = ws.join("crash.bin");
    std::fs::write(&crash, b"X").unwrap();
    let out = run_cli(&ws, &[crash.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(77));
    let stderr = stderr_of(&out);
    assert!(stderr.contains("DEDUP_TOKEN: marker byte reached"));
    assert!(stderr.contains("panic on input"));
}

#[test]
fn fuzzing_finds_the_marker_crash_and_saves_an_artifact() {
    let ws = temp_workspace("fuzz-crash");
    let corpus = ws.join("corpus");
    std::fs::create_dir_all(&corpus).unwrap();
    std::fs::write(corpus.join("seed"), b"AAAA").unwrap();
    let out = run_cli(
        &ws,
        &["-runs=200000", "-seed=5", corpus.to_str().unwrap()],
    );
    assert_eq!(out.status.code(), Some(77), "stderr: {}", stderr_of(&out));
    assert!(stderr_of(&out).contains("DEDUP_TOKEN: marker byte reached"));
    let artifact = std::fs::read_dir(&ws)
        .unwrap()
        .filter_map(Result::ok)
        .find(|e| e.file_name().to_string_lossy().starts_with("crash-"))
        .expect("crash artifact written");
    let bytes = std::fs::read(artifact.path()).unwrap();
    assert!(bytes.contains(&b'X'));
}

#[test]
fn minimize_crash_shrinks_the_input_and_keeps_it_crashing() {
    let ws = temp_workspace("minimize");
    let crash = ws.join("crash.bin");
    std::fs::write(&crash, b"AAXBB").unwrap();
    let artifact = ws.join("minimized");
    let out = run_cli(
        &ws,
        &[
            "-minimize_crash=1",
            "-runs=5000",
            &format!("-exact_artifact_path={}", artifact.display()),
            crash.to_str().unwrap(),
        ],
    );
    assert_eq!(out.status.code(), Some(0), "stderr: {}", stderr_of(&out));
    let minimized = std::fs::read(&artifact).expect("minimized artifact missing");
    assert!(minimized.len() < 5, "not reduced: {minimized:?}");
    assert!(minimized.contains(&b'X'));
    // The minimized input still reproduces the crash.
    let replay = run_cli(&ws, &[artifact.to_str().unwrap()]);
    assert_eq!(replay.status.code(), Some(77));
    assert!(stderr_of(&replay).contains("DEDUP_TOKEN: marker byte reached"));
}

#[test]
fn cleanse_keeps_only_the_bytes_the_crash_depends_on() {
    let ws = temp_workspace("cleanse");
    let crash = ws.join("crash.bin");
    std::fs::write(&crash, b"AXB").unwrap();
    let artifact = ws.join("cleansed");
    let out = run_cli(
        &ws,
        &[
            "-cleanse_crash=1",
            &format!("-exact_artifact_path={}", artifact.display()),
            crash.to_str().unwrap(),
        ],
    );
    assert_eq!(out.status.code(), Some(0), "stderr: {}", stderr_of(&out));
    let cleansed = std::fs::read(&artifact).expect("cleansed artifact missing");
    assert_eq!(cleansed, b" X ");
}

#[test]
fn cleanse_without_exact_artifact_path_is_rejected() {
    let ws = temp_workspace("cleanse-noargs");
    let crash = ws.join("crash.bin");
    std::fs::write(&crash, b"AXB").unwrap();
    let out = run_cli(&ws, &["-cleanse_crash=1", crash.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr_of(&out).contains("ERROR:"));
}

#[test]
fn merge_rejects_a_corpus_with_no_new_coverage() {
    let ws = temp_workspace("merge-reject");
    let dir1 = ws.join("dir1");
    let dir2 = ws.join("dir2");
    std::fs::create_dir_all(&dir1).unwrap();
    std::fs::create_dir_all(&dir2).unwrap();
    std::fs::write(dir1.join("a"), b"ab").unwrap();
    std::fs::write(dir1.join("b"), b"12").unwrap();
    // Lowercase input covers nothing dir1 does not already cover.
    std::fs::write(dir2.join("c"), b"cd").unwrap();
    let before = std::fs::read_dir(&dir1).unwrap().count();
    let out = run_cli(
        &ws,
        &["-merge=1", dir1.to_str().unwrap(), dir2.to_str().unwrap()],
    );
    assert_eq!(out.status.code(), Some(0), "stderr: {}", stderr_of(&out));
    let after = std::fs::read_dir(&dir1).unwrap().count();
    assert_eq!(before, after, "merge must not add covered inputs");
}

#[test]
fn merge_adopts_inputs_with_new_coverage() {
    let ws = temp_workspace("merge-adopt");
    let dir1 = ws.join("dir1");
    let dir2 = ws.join("dir2");
    std::fs::create_dir_all(&dir1).unwrap();
    std::fs::create_dir_all(&dir2).unwrap();
    std::fs::write(dir1.join("a"), b"ab").unwrap();
    std::fs::write(dir2.join("braces"), b"{}").unwrap();
    let before = std::fs::read_dir(&dir1).unwrap().count();
    let out = run_cli(
        &ws,
        &["-merge=1", dir1.to_str().unwrap(), dir2.to_str().unwrap()],
    );
    assert_eq!(out.status.code(), Some(0), "stderr: {}", stderr_of(&out));
    let after = std::fs::read_dir(&dir1).unwrap().count();
    assert_eq!(after, before + 1, "exactly the novel input is adopted");
    let adopted = std::fs::read_dir(&dir1)
        .unwrap()
        .filter_map(Result::ok)
        .find(|e| std::fs::read(e.path()).unwrap() == b"{}");
    assert!(adopted.is_some(), "the adopted unit keeps its bytes");
}

#[test]
fn set_cover_merge_also_reports_success() {
    let ws = temp_workspace("merge-setcover");
    let dir1 = ws.join("dir1");
    let dir2 = ws.join("dir2");
    std::fs::create_dir_all(&dir1).unwrap();
    std::fs::create_dir_all(&dir2).unwrap();
    std::fs::write(dir1.join("a"), b"ab").unwrap();
    std::fs::write(dir2.join("rich"), b"{}9").unwrap();
    std::fs::write(dir2.join("poor"), b"{").unwrap();
    let out = run_cli(
        &ws,
        &[
            "-set_cover_merge=1",
            dir1.to_str().unwrap(),
            dir2.to_str().unwrap(),
        ],
    );
    assert_eq!(out.status.code(), Some(0), "stderr: {}", stderr_of(&out));
    // The richer input alone covers both new features.
    let adopted: Vec<Vec<u8>> = std::fs::read_dir(&dir1)
        .unwrap()
        .filter_map(Result::ok)
        .map(|e| std::fs::read(e.path()).unwrap())
        .collect();
    assert!(adopted.iter().any(|u| u == b"{}9"));
    assert!(!adopted.iter().any(|u| u == b"{"));
}

#[test]
fn merge_with_one_dir_is_a_no_op() {
    let ws = temp_workspace("merge-one");
    let dir1 = ws.join("dir1");
    std::fs::create_dir_all(&dir1).unwrap();
    let out = run_cli(&ws, &["-merge=1", dir1.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(0));
    assert!(stderr_of(&out).contains("two or more corpus dirs"));
}

#[test]
fn analyze_dict_reports_useless_tokens() {
    let ws = temp_workspace("analyze-dict");
    let corpus = ws.join("corpus");
    std::fs::create_dir_all(&corpus).unwrap();
    std::fs::write(corpus.join("u1"), b"abc").unwrap();
    std::fs::write(corpus.join("u2"), b"KEY9").unwrap();
    let dict = ws.join("tokens.dict");
    std::fs::write(&dict, "t1=\"ab\"\nt2=\"KEY\"\nt3=\"qz\"\n").unwrap();
    let out = run_cli(
        &ws,
        &[
            &format!("-dict={}", dict.display()),
            "-analyze_dict=1",
            corpus.to_str().unwrap(),
        ],
    );
    assert_eq!(out.status.code(), Some(0), "stderr: {}", stderr_of(&out));
    let stderr = stderr_of(&out);
    assert!(stderr.contains("###### Useless dictionary elements. ######"));
    // Masking "ab" inside "abc" changes nothing the remaining byte does not
    // already cover, so the token scores negative.
    assert!(stderr.contains("\"ab\" # Score: -1, Used: 1"), "stderr: {stderr}");
    // Masking "KEY" removes its edge, so the token is useful and unlisted.
    assert!(!stderr.contains("\"KEY\" #"), "stderr: {stderr}");
    // A token appearing in no unit keeps a zero score and zero usage count.
    assert!(stderr.contains("\"qz\" # Score: 0, Used: 0"), "stderr: {stderr}");
    assert!(stderr.contains("Dictionary analysis succeeded"));
}

#[test]
fn analyze_dict_without_a_dictionary_is_an_error() {
    let ws = temp_workspace("analyze-nodict");
    let corpus = ws.join("corpus");
    std::fs::create_dir_all(&corpus).unwrap();
    std::fs::write(corpus.join("u1"), b"abc").unwrap();
    let out = run_cli(&ws, &["-analyze_dict=1", corpus.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr_of(&out).contains("can't analyze dict"));
}

#[test]
fn seed_inputs_feed_extra_files_into_the_corpus() {
    let ws = temp_workspace("seed-inputs");
    let corpus = ws.join("corpus");
    std::fs::create_dir_all(&corpus).unwrap();
    let extra = ws.join("extra.bin");
    std::fs::write(&extra, b"{}").unwrap();
    let out = run_cli(
        &ws,
        &[
            "-runs=0",
            &format!("-seed_inputs={}", extra.display()),
            corpus.to_str().unwrap(),
        ],
    );
    assert_eq!(out.status.code(), Some(0), "stderr: {}", stderr_of(&out));
    // The seed was executed and persisted into the output corpus.
    let adopted = std::fs::read_dir(&corpus)
        .unwrap()
        .filter_map(Result::ok)
        .any(|e| std::fs::read(e.path()).unwrap() == b"{}");
    assert!(adopted, "seed input not adopted into the corpus");
}

#[test]
fn print_final_stats_emits_the_stat_block() {
    let ws = temp_workspace("stats");
    let corpus = ws.join("corpus");
    std::fs::create_dir_all(&corpus).unwrap();
    std::fs::write(corpus.join("seed"), b"ab").unwrap();
    let out = run_cli(
        &ws,
        &["-runs=0", "-print_final_stats=1", corpus.to_str().unwrap()],
    );
    assert_eq!(out.status.code(), Some(0), "stderr: {}", stderr_of(&out));
    let stderr = stderr_of(&out);
    assert!(stderr.contains("stat::number_of_executed_units:"));
    assert!(stderr.contains("stat::peak_rss_mb:"));
}
