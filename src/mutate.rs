//! Mutation dispatcher: deterministic byte-level mutations over a seeded
//! ChaCha20 stream, with a manual dictionary fed from `-dict`.

use rand_chacha::ChaCha20Rng;
use rand_core::{RngCore, SeedableRng};

/// Dictionary words longer than this are dropped by the driver.
pub const MAX_WORD_SIZE: usize = 64;

pub struct MutationDispatcher {
    rng: ChaCha20Rng,
    dictionary: Vec<Vec<u8>>,
    /// Hard cap applied on top of the caller-provided length limit;
    /// 0 means uncapped. Crash minimization uses it to force shrinking.
    max_mutation_len: usize,
}

impl MutationDispatcher {
    pub fn new(seed: u64) -> Self {
        let digest = blake3::hash(&seed.to_le_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest.as_bytes()[..32]);
        Self {
            rng: ChaCha20Rng::from_seed(key),
            dictionary: Vec::new(),
            max_mutation_len: 0,
        }
    }

    pub fn max_word_size() -> usize {
        MAX_WORD_SIZE
    }

    pub fn add_word_to_manual_dictionary(&mut self, word: &[u8]) {
        self.dictionary.push(word.to_vec());
    }

    pub fn dictionary_len(&self) -> usize {
        self.dictionary.len()
    }

    pub fn set_max_mutation_len(&mut self, len: usize) {
        self.max_mutation_len = len;
    }

    pub fn rand_u64(&mut self) -> u64 {
        self.rng.next_u64()
    }

    /// Uniform value in [0, bound); 0 when the bound is 0.
    pub fn rand_below(&mut self, bound: usize) -> usize {
        if bound == 0 {
            return 0;
        }
        (self.rng.next_u64() as usize) % bound
    }

    fn effective_cap(&self, max_len: usize) -> usize {
        match (self.max_mutation_len, max_len) {
            (0, cap) => cap,
            (cap, 0) => cap,
            (a, b) => a.min(b),
        }
    }

    /// Apply one randomly chosen mutation in place, keeping the result
    /// within the length cap. The result is never left empty.
    pub fn mutate(&mut self, data: &mut Vec<u8>, max_len: usize) {
        let cap = self.effective_cap(max_len);
        if cap != 0 && data.len() > cap {
            data.truncate(cap);
        }
        match self.rand_below(6) {
            0 => self.flip_bit(data),
            1 => self.insert_byte(data, cap),
            2 => self.erase_byte(data),
            3 => self.overwrite_byte(data),
            4 => self.copy_chunk(data, cap),
            _ => self.insert_dictionary_word(data, cap),
        }
        if data.is_empty() {
            data.push(self.rng.next_u64() as u8);
        }
        if cap != 0 && data.len() > cap {
            data.truncate(cap);
        }
    }

    /// Splice a prefix of one input with a suffix of another.
    pub fn cross_over(&mut self, a: &[u8], b: &[u8], max_len: usize) -> Vec<u8> {
        let cap = self.effective_cap(max_len);
        let cut_a = self.rand_below(a.len() + 1);
        let cut_b = self.rand_below(b.len() + 1);
        let mut out = Vec::with_capacity(cut_a + (b.len() - cut_b));
        out.extend_from_slice(&a[..cut_a]);
        out.extend_from_slice(&b[cut_b..]);
        if cap != 0 && out.len() > cap {
            out.truncate(cap);
        }
        out
    }

    fn flip_bit(&mut self, data: &mut Vec<u8>) {
        if data.is_empty() {
            return;
        }
        let idx = self.rand_below(data.len());
        let bit = 1u8 << self.rand_below(8);
        data[idx] ^= bit;
    }

    fn insert_byte(&mut self, data: &mut Vec<u8>, cap: usize) {
        if cap != 0 && data.len() >= cap {
            return;
        }
        let idx = self.rand_below(data.len() + 1);
        let value = self.rng.next_u64() as u8;
        data.insert(idx, value);
    }

    fn erase_byte(&mut self, data: &mut Vec<u8>) {
        if data.is_empty() {
            return;
        }
        let idx = self.rand_below(data.len());
        data.remove(idx);
    }

    fn overwrite_byte(&mut self, data: &mut Vec<u8>) {
        if data.is_empty() {
            return;
        }
        let idx = self.rand_below(data.len());
        data[idx] = self.rng.next_u64() as u8;
    }

    fn copy_chunk(&mut self, data: &mut Vec<u8>, cap: usize) {
        if data.is_empty() {
            return;
        }
        let from = self.rand_below(data.len());
        let len = 1 + self.rand_below((data.len() - from).min(8));
        let chunk: Vec<u8> = data[from..from + len].to_vec();
        let at = self.rand_below(data.len() + 1);
        for (offset, byte) in chunk.into_iter().enumerate() {
            if cap != 0 && data.len() >= cap {
                break;
            }
            data.insert(at + offset, byte);
        }
    }

    fn insert_dictionary_word(&mut self, data: &mut Vec<u8>, cap: usize) {
        if self.dictionary.is_empty() {
            self.overwrite_byte(data);
            return;
        }
        let idx = self.rand_below(self.dictionary.len());
        let word = self.dictionary[idx].clone();
        let at = self.rand_below(data.len() + 1);
        for (offset, byte) in word.into_iter().enumerate() {
            if cap != 0 && data.len() >= cap {
                break;
            }
            data.insert(at + offset, byte);
        }
    }
}
