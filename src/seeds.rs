//! Seed-input parsing and corpus enumeration.

use std::path::Path;

use crate::fsutil::{file_to_string, sized_files_from_dir, SizedFile};

/// Parse `-seed_inputs=file1,file2,...` or `-seed_inputs=@file` (the file
/// holds the comma-separated list). The list is split right-to-left, so the
/// output order is the reverse of the textual order. An empty spec is a
/// user error.
pub fn parse_seed_inputs(spec: Option<&str>) -> Vec<String> {
    let Some(spec) = spec else {
        return Vec::new();
    };
    let list = if let Some(list_file) = spec.strip_prefix('@') {
        file_to_string(Path::new(list_file))
            .map(|text| text.trim_end().to_string())
            .unwrap_or_default()
    } else {
        spec.to_string()
    };
    if list.is_empty() {
        eprintln!("seed_inputs is empty or @file does not exist.");
        std::process::exit(1);
    }
    let mut files = Vec::new();
    let mut rest = list;
    while let Some(comma) = rest.rfind(',') {
        files.push(rest[comma + 1..].to_string());
        rest.truncate(comma);
    }
    files.push(rest);
    files
}

/// Enumerate the corpus directories (reporting a per-directory count) and
/// append the extra seed files that exist and are non-empty.
pub fn read_corpora(corpus_dirs: &[String], extra_seed_files: &[String]) -> Vec<SizedFile> {
    let mut sized_files = Vec::new();
    let mut last_count = 0;
    for dir in corpus_dirs {
        if let Err(err) = sized_files_from_dir(Path::new(dir), &mut sized_files) {
            eprintln!("WARNING: failed to enumerate {dir}: {err}");
        }
        eprintln!(
            "INFO: {:8} files found in {dir}",
            sized_files.len() - last_count
        );
        last_count = sized_files.len();
    }
    for file in extra_seed_files {
        if let Ok(metadata) = std::fs::metadata(file) {
            if metadata.len() > 0 {
                sized_files.push(SizedFile {
                    size: metadata.len(),
                    path: file.into(),
                });
            }
        }
    }
    sized_files
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsutil::temp_path;

    #[test]
    fn seed_list_order_is_the_reverse_of_textual_order() {
        assert_eq!(parse_seed_inputs(Some("a,b,c")), vec!["c", "b", "a"]);
        assert_eq!(parse_seed_inputs(Some("only")), vec!["only"]);
    }

    #[test]
    fn empty_list_entries_are_kept() {
        assert_eq!(parse_seed_inputs(Some("a,,b")), vec!["b", "", "a"]);
    }

    #[test]
    fn at_file_reads_the_list_and_trims_the_trailing_newline() {
        let list_file = temp_path("seed-list", ".txt");
        std::fs::write(&list_file, "a\n").unwrap();
        let spec = format!("@{}", list_file.display());
        assert_eq!(parse_seed_inputs(Some(&spec)), vec!["a"]);
        std::fs::remove_file(&list_file).unwrap();
    }

    #[test]
    fn absent_spec_yields_no_seeds() {
        assert!(parse_seed_inputs(None).is_empty());
    }

    #[test]
    fn empty_extra_seed_files_are_skipped() {
        let empty = temp_path("seed-empty", ".bin");
        let full = temp_path("seed-full", ".bin");
        std::fs::write(&empty, b"").unwrap();
        std::fs::write(&full, b"data").unwrap();
        let files = read_corpora(
            &[],
            &[
                empty.to_string_lossy().into_owned(),
                full.to_string_lossy().into_owned(),
            ],
        );
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].size, 4);
        std::fs::remove_file(&empty).unwrap();
        std::fs::remove_file(&full).unwrap();
    }
}
