//! In-memory corpus with a persistent mirror.
//!
//! Units are credited with the features they produced; the union of all
//! credited features is the novelty ledger the fuzzing loop tests each
//! execution against. Interesting units are mirrored into the output corpus
//! directory under their content hash so concurrent jobs can pick them up.

use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;

use tracing::debug;

use crate::fsutil::{hash_unit, write_file};
use crate::mutate::MutationDispatcher;
use crate::options::EntropicOptions;

struct CorpusEntry {
    data: Vec<u8>,
    num_features: usize,
}

pub struct InputCorpus {
    entries: Vec<CorpusEntry>,
    features: BTreeSet<u64>,
    hashes: HashSet<String>,
    output_corpus: Option<PathBuf>,
    entropic: EntropicOptions,
    prefer_small: bool,
}

impl InputCorpus {
    pub fn new(
        output_corpus: Option<PathBuf>,
        entropic: EntropicOptions,
        prefer_small: bool,
    ) -> Self {
        Self {
            entries: Vec::new(),
            features: BTreeSet::new(),
            hashes: HashSet::new(),
            output_corpus,
            entropic,
            prefer_small,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn num_features(&self) -> usize {
        self.features.len()
    }

    pub fn output_corpus(&self) -> Option<&PathBuf> {
        self.output_corpus.as_ref()
    }

    /// How many of the snapshot's features are not yet in the ledger.
    pub fn count_new_features(&self, snapshot: &BTreeSet<u64>) -> usize {
        snapshot.difference(&self.features).count()
    }

    /// Whether the unit's content is already present.
    pub fn contains(&self, unit: &[u8]) -> bool {
        self.hashes.contains(&hash_unit(unit))
    }

    /// Credit a unit with its features, fold them into the ledger, and
    /// mirror the unit to the output corpus. Returns the unit's index.
    pub fn add_unit(&mut self, data: Vec<u8>, snapshot: &BTreeSet<u64>) -> usize {
        self.features.extend(snapshot.iter().copied());
        self.hashes.insert(hash_unit(&data));
        self.write_to_output_corpus(&data);
        debug!(
            size = data.len(),
            features = snapshot.len(),
            corpus = self.entries.len() + 1,
            "corpus add"
        );
        self.entries.push(CorpusEntry {
            data,
            num_features: snapshot.len(),
        });
        self.entries.len() - 1
    }

    /// Record features without keeping the unit (seed execution in
    /// non-keep_seed mode still extends the ledger).
    pub fn merge_features(&mut self, snapshot: &BTreeSet<u64>) -> usize {
        let before = self.features.len();
        self.features.extend(snapshot.iter().copied());
        self.features.len() - before
    }

    /// Pick a base unit for mutation. With `prefer_small`, a biased second
    /// draw keeps small inputs hot; the entropic knobs further weight
    /// feature-rich units.
    pub fn choose<'a>(&'a self, md: &mut MutationDispatcher) -> Option<&'a [u8]> {
        if self.entries.is_empty() {
            return None;
        }
        let first = md.rand_below(self.entries.len());
        let mut pick = first;
        if self.prefer_small {
            let second = md.rand_below(self.entries.len());
            if self.entries[second].data.len() < self.entries[pick].data.len() {
                pick = second;
            }
        }
        if self.entropic.enabled {
            let second = md.rand_below(self.entries.len());
            if self.entries[second].num_features > self.entries[pick].num_features {
                pick = second;
            }
        }
        Some(&self.entries[pick].data)
    }

    /// Mirror a unit into the output corpus under its content hash.
    pub fn write_to_output_corpus(&self, unit: &[u8]) {
        let Some(dir) = &self.output_corpus else {
            return;
        };
        let path = dir.join(hash_unit(unit));
        if path.exists() {
            return;
        }
        if let Err(err) = write_file(&path, unit) {
            eprintln!("WARNING: failed to write corpus file {}: {err}", path.display());
        }
    }

    pub fn max_unit_len(&self) -> usize {
        self.entries.iter().map(|e| e.data.len()).max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn features(ids: &[u64]) -> BTreeSet<u64> {
        ids.iter().copied().collect()
    }

    #[test]
    fn novelty_is_relative_to_the_ledger() {
        let mut corpus = InputCorpus::new(None, EntropicOptions::default(), true);
        assert_eq!(corpus.count_new_features(&features(&[1, 2])), 2);
        corpus.add_unit(vec![1], &features(&[1, 2]));
        assert_eq!(corpus.count_new_features(&features(&[2, 3])), 1);
        assert_eq!(corpus.num_features(), 2);
    }

    #[test]
    fn contains_tracks_unit_content() {
        let mut corpus = InputCorpus::new(None, EntropicOptions::default(), true);
        corpus.add_unit(b"abc".to_vec(), &features(&[1]));
        assert!(corpus.contains(b"abc"));
        assert!(!corpus.contains(b"abd"));
    }

    #[test]
    fn choose_returns_none_only_when_empty() {
        let mut md = MutationDispatcher::new(1);
        let mut corpus = InputCorpus::new(None, EntropicOptions::default(), true);
        assert!(corpus.choose(&mut md).is_none());
        corpus.add_unit(vec![7], &features(&[1]));
        assert_eq!(corpus.choose(&mut md), Some(&[7u8][..]));
    }

    #[test]
    fn output_corpus_mirror_uses_content_hash_names() {
        let dir = std::env::temp_dir().join(format!(
            "fuzzrig-corpus-{}",
            uuid::Uuid::new_v4()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let mut corpus =
            InputCorpus::new(Some(dir.clone()), EntropicOptions::default(), true);
        corpus.add_unit(b"unit".to_vec(), &features(&[1]));
        let expected = dir.join(crate::fsutil::hash_unit(b"unit"));
        assert!(expected.exists());
        assert_eq!(std::fs::read(expected).unwrap(), b"unit");
    }
}
