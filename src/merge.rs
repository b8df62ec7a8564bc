//! Two-cohort corpus merge with a crash-resistant primitive.
//!
//! The control file is an append-only JSON-lines journal: a header naming
//! every file of both cohorts, then a `started` record before each
//! execution and a `done` record with the measured feature set after it.
//! A crash while measuring input k leaves a dangling `started k`; the next
//! attempt replays the journal, skips k, and resumes. Selection happens in
//! the outer process once every input has been measured.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::coverage;
use crate::error::{DriverError, DriverResult};
use crate::exec::Command;
use crate::fsutil::{
    file_to_string, file_to_vec_capped, remove_file_quiet, temp_path, SizedFile,
};
use crate::fuzzer::Fuzzer;
use crate::options::FuzzingOptions;

#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "event", rename_all = "snake_case")]
enum JournalRecord {
    Header {
        files: Vec<String>,
        num_files_in_first_corpus: usize,
        set_cover: bool,
    },
    Started {
        index: usize,
        size: u64,
    },
    Done {
        index: usize,
        features: Vec<u64>,
    },
}

struct Journal {
    files: Vec<String>,
    num_files_in_first_corpus: usize,
    features: BTreeMap<usize, Vec<u64>>,
    /// Inputs whose measurement started but never finished: they crashed
    /// the measuring process and are excluded from the merge.
    poisoned: BTreeSet<usize>,
}

fn parse_journal(text: &str) -> DriverResult<Journal> {
    let mut header: Option<(Vec<String>, usize)> = None;
    let mut started: BTreeSet<usize> = BTreeSet::new();
    let mut features: BTreeMap<usize, Vec<u64>> = BTreeMap::new();
    for (lineno, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: JournalRecord = serde_json::from_str(line).map_err(|e| {
            DriverError::MergeControl(format!("line {}: {e}", lineno + 1))
        })?;
        match record {
            JournalRecord::Header {
                files,
                num_files_in_first_corpus,
                ..
            } => header = Some((files, num_files_in_first_corpus)),
            JournalRecord::Started { index, .. } => {
                started.insert(index);
            }
            JournalRecord::Done { index, features: f } => {
                features.insert(index, f);
            }
        }
    }
    let (files, num_files_in_first_corpus) =
        header.ok_or_else(|| DriverError::MergeControl("missing header".to_string()))?;
    let poisoned: BTreeSet<usize> = started
        .into_iter()
        .filter(|index| !features.contains_key(index))
        .collect();
    Ok(Journal {
        files,
        num_files_in_first_corpus,
        features,
        poisoned,
    })
}

/// One measuring pass, run inside a re-invoked child. Resumes from the
/// journal and appends a record per input; a crashing input kills this
/// process and is skipped by the next attempt.
pub fn crash_resistant_merge_internal_step(
    fuzzer: &mut Fuzzer,
    control_file: &Path,
    _set_cover: bool,
) -> DriverResult<()> {
    let journal = parse_journal(&file_to_string(control_file)?)?;
    eprintln!(
        "MERGE-INNER: '{}': {} total files; {} processed earlier",
        control_file.display(),
        journal.files.len(),
        journal.features.len()
    );
    let mut out = std::fs::OpenOptions::new()
        .append(true)
        .open(control_file)?;
    for (index, file) in journal.files.iter().enumerate() {
        if journal.features.contains_key(&index) || journal.poisoned.contains(&index) {
            continue;
        }
        let unit = match file_to_vec_capped(Path::new(file), fuzzer.max_input_len()) {
            Ok(unit) => unit,
            Err(err) => {
                eprintln!("WARNING: failed to read {file}: {err}");
                continue;
            }
        };
        let started = JournalRecord::Started {
            index,
            size: unit.len() as u64,
        };
        writeln!(out, "{}", serde_json::to_string(&started)?)?;
        out.flush()?;
        fuzzer.execute_callback(&unit);
        let done = JournalRecord::Done {
            index,
            features: coverage::snapshot().into_iter().collect(),
        };
        writeln!(out, "{}", serde_json::to_string(&done)?)?;
        out.flush()?;
    }
    eprintln!("MERGE-INNER: finished measuring '{}'", control_file.display());
    Ok(())
}

fn write_header(
    control_file: &Path,
    old_corpus: &[SizedFile],
    new_corpus: &[SizedFile],
    set_cover: bool,
) -> DriverResult<()> {
    let files: Vec<String> = old_corpus
        .iter()
        .chain(new_corpus.iter())
        .map(|f| f.path.to_string_lossy().into_owned())
        .collect();
    let header = JournalRecord::Header {
        files,
        num_files_in_first_corpus: old_corpus.len(),
        set_cover,
    };
    let mut out = std::fs::File::create(control_file)?;
    writeln!(out, "{}", serde_json::to_string(&header)?)?;
    Ok(())
}

/// Greedy selection: walk new-cohort candidates in (size, path) order and
/// keep each one that contributes a feature not yet covered.
fn select_greedy(journal: &Journal) -> Vec<PathBuf> {
    let mut covered: BTreeSet<u64> = BTreeSet::new();
    for index in 0..journal.num_files_in_first_corpus {
        if let Some(features) = journal.features.get(&index) {
            covered.extend(features.iter().copied());
        }
    }
    let mut selected = Vec::new();
    for index in journal.num_files_in_first_corpus..journal.files.len() {
        let Some(features) = journal.features.get(&index) else {
            continue;
        };
        if features.iter().any(|f| !covered.contains(f)) {
            covered.extend(features.iter().copied());
            selected.push(PathBuf::from(&journal.files[index]));
        }
    }
    selected
}

/// Set-cover selection: repeatedly take the candidate covering the most
/// still-uncovered features; ties go to the earlier (smaller) candidate.
fn select_set_cover(journal: &Journal) -> Vec<PathBuf> {
    let mut covered: BTreeSet<u64> = BTreeSet::new();
    for index in 0..journal.num_files_in_first_corpus {
        if let Some(features) = journal.features.get(&index) {
            covered.extend(features.iter().copied());
        }
    }
    let mut remaining: Vec<(usize, BTreeSet<u64>)> = (journal.num_files_in_first_corpus
        ..journal.files.len())
        .filter_map(|index| {
            journal
                .features
                .get(&index)
                .map(|f| (index, f.iter().copied().collect()))
        })
        .collect();
    let mut selected = Vec::new();
    loop {
        let mut best: Option<(usize, usize)> = None;
        for (slot, (_, features)) in remaining.iter().enumerate() {
            let gain = features.difference(&covered).count();
            if gain > 0 && best.map_or(true, |(_, best_gain)| gain > best_gain) {
                best = Some((slot, gain));
            }
        }
        let Some((slot, _)) = best else {
            break;
        };
        let (index, features) = remaining.remove(slot);
        covered.extend(features);
        selected.push(PathBuf::from(&journal.files[index]));
    }
    selected.sort();
    selected
}

/// Measure both cohorts via re-invoked children (resuming over crashes),
/// then select the new-cohort files whose features are not covered by the
/// first cohort.
pub fn crash_resistant_merge(
    args: &[String],
    corpora: &[String],
    old_corpus: &[SizedFile],
    new_corpus: &[SizedFile],
    control_file: &Path,
    set_cover: bool,
) -> DriverResult<Vec<PathBuf>> {
    let resuming = control_file.exists()
        && std::fs::metadata(control_file).map(|m| m.len() > 0).unwrap_or(false);
    if resuming {
        eprintln!(
            "MERGE-OUTER: resuming from existing control file '{}'",
            control_file.display()
        );
    } else {
        write_header(control_file, old_corpus, new_corpus, set_cover)?;
    }

    let mut base_cmd = Command::new(args);
    base_cmd.remove_flag("merge");
    base_cmd.remove_flag("set_cover_merge");
    base_cmd.remove_flag("merge_control_file");
    for dir in corpora {
        base_cmd.remove_argument(dir);
    }
    base_cmd.add_flag("merge_control_file", &control_file.to_string_lossy());
    base_cmd.add_flag("merge_inner", if set_cover { "2" } else { "1" });

    let total = old_corpus.len() + new_corpus.len();
    let mut measured_before = parse_journal(&file_to_string(control_file)?)?
        .features
        .len();
    let mut stagnant_attempts = 0;
    for attempt in 1..=total + 10 {
        eprintln!(
            "MERGE-OUTER: attempt {attempt}: executing {base_cmd}"
        );
        let exit_code = base_cmd.execute()?;
        let journal = parse_journal(&file_to_string(control_file)?)?;
        if exit_code == 0 {
            return Ok(if set_cover {
                select_set_cover(&journal)
            } else {
                select_greedy(&journal)
            });
        }
        let measured = journal.features.len() + journal.poisoned.len();
        if measured <= measured_before {
            stagnant_attempts += 1;
            if stagnant_attempts >= 2 {
                return Err(DriverError::MergeControl(
                    "no progress across merge attempts".to_string(),
                ));
            }
        } else {
            stagnant_attempts = 0;
        }
        measured_before = measured;
        eprintln!(
            "MERGE-OUTER: the merge step crashed; resuming past the poisoned input"
        );
    }
    Err(DriverError::MergeControl(
        "too many merge attempts".to_string(),
    ))
}

/// Terminal merge mode: first dir is the output cohort, the rest feed it.
pub fn merge(
    fuzzer: &mut Fuzzer,
    options: &FuzzingOptions,
    args: &[String],
    corpora: &[String],
    control_file: Option<&str>,
    set_cover: bool,
) -> ! {
    if corpora.len() < 2 {
        eprintln!("INFO: Merge requires two or more corpus dirs");
        std::process::exit(0);
    }
    let mut old_corpus = Vec::new();
    if let Err(err) =
        crate::fsutil::sized_files_from_dir(Path::new(&corpora[0]), &mut old_corpus)
    {
        eprintln!("ERROR: {err}");
        std::process::exit(1);
    }
    let mut new_corpus = Vec::new();
    for dir in &corpora[1..] {
        if let Err(err) = crate::fsutil::sized_files_from_dir(Path::new(dir), &mut new_corpus)
        {
            eprintln!("ERROR: {err}");
            std::process::exit(1);
        }
    }
    old_corpus.sort();
    new_corpus.sort();

    let cf_path = match control_file {
        Some(path) => PathBuf::from(path),
        None => temp_path("merge", ".journal"),
    };
    let new_files =
        match crash_resistant_merge(args, corpora, &old_corpus, &new_corpus, &cf_path, set_cover)
        {
            Ok(files) => files,
            Err(err) => {
                eprintln!("ERROR: merge failed: {err}");
                std::process::exit(1);
            }
        };
    eprintln!(
        "MERGE-OUTER: {} new files with new features added to the output corpus",
        new_files.len()
    );
    for path in &new_files {
        match file_to_vec_capped(path, options.max_len) {
            Ok(unit) => fuzzer.write_to_output_corpus(&unit),
            Err(err) => eprintln!("WARNING: failed to read {}: {err}", path.display()),
        }
    }
    if control_file.is_none() {
        remove_file_quiet(&cf_path);
    }
    std::process::exit(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn journal_from(records: &[JournalRecord]) -> Journal {
        let text: String = records
            .iter()
            .map(|r| format!("{}\n", serde_json::to_string(r).unwrap()))
            .collect();
        parse_journal(&text).unwrap()
    }

    fn header(files: &[&str], first: usize) -> JournalRecord {
        JournalRecord::Header {
            files: files.iter().map(|s| s.to_string()).collect(),
            num_files_in_first_corpus: first,
            set_cover: false,
        }
    }

    fn done(index: usize, features: &[u64]) -> JournalRecord {
        JournalRecord::Done {
            index,
            features: features.to_vec(),
        }
    }

    #[test]
    fn greedy_selection_skips_covered_candidates() {
        let journal = journal_from(&[
            header(&["old/a", "new/b", "new/c"], 1),
            done(0, &[1, 2]),
            done(1, &[1, 2]),
            done(2, &[3]),
        ]);
        assert_eq!(select_greedy(&journal), vec![PathBuf::from("new/c")]);
    }

    #[test]
    fn fully_covered_new_corpus_selects_nothing() {
        let journal = journal_from(&[
            header(&["old/a", "new/b"], 1),
            done(0, &[1, 2, 3]),
            done(1, &[2]),
        ]);
        assert!(select_greedy(&journal).is_empty());
        assert!(select_set_cover(&journal).is_empty());
    }

    #[test]
    fn set_cover_prefers_the_biggest_contributor() {
        let journal = journal_from(&[
            header(&["old/a", "new/b", "new/c", "new/d"], 1),
            done(0, &[]),
            done(1, &[1]),
            done(2, &[1, 2, 3]),
            done(3, &[2]),
        ]);
        // One candidate covers everything the others would add.
        assert_eq!(select_set_cover(&journal), vec![PathBuf::from("new/c")]);
    }

    #[test]
    fn dangling_started_marks_the_input_poisoned() {
        let text = [
            serde_json::to_string(&header(&["old/a", "new/b"], 1)).unwrap(),
            serde_json::to_string(&done(0, &[1])).unwrap(),
            serde_json::to_string(&JournalRecord::Started { index: 1, size: 9 }).unwrap(),
        ]
        .join("\n");
        let journal = parse_journal(&text).unwrap();
        assert!(journal.poisoned.contains(&1));
        assert!(select_greedy(&journal).is_empty());
    }

    #[test]
    fn journal_without_header_is_rejected() {
        assert!(parse_journal("").is_err());
    }
}
