//! Shared main memory: a small word array with read/write latencies.

use crate::core::{Address, Word};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Largest initial value of a memory word.
pub const MAX_INITIAL_WORD: Word = 50;

/// Configuration for shared memory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Latency in cycles to read a word.
    pub read_latency_cycles: u32,
    /// Latency in cycles to write a word back.
    pub write_latency_cycles: u32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            read_latency_cycles: 3,
            write_latency_cycles: 5,
        }
    }
}

/// Main memory shared by every cache.
pub struct MainMemory {
    config: MemoryConfig,
    words: Vec<Word>,
}

impl MainMemory {
    /// Memory of `size` words, initialised deterministically from `seed` with values in
    /// `0..=MAX_INITIAL_WORD`.
    pub fn seeded(config: MemoryConfig, size: u64, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let words = (0..size)
            .map(|_| rng.random_range(0..=MAX_INITIAL_WORD))
            .collect();
        Self { config, words }
    }

    pub fn with_words(config: MemoryConfig, words: Vec<Word>) -> Self {
        Self { config, words }
    }

    pub fn size(&self) -> u64 {
        self.words.len() as u64
    }

    pub fn contains(&self, address: Address) -> bool {
        address.0 < self.size()
    }

    pub fn read(&self, address: Address) -> Word {
        self.words[address.0 as usize]
    }

    pub fn write(&mut self, address: Address, value: Word) {
        self.words[address.0 as usize] = value;
    }

    pub fn words(&self) -> &[Word] {
        &self.words
    }

    pub fn read_latency_cycles(&self) -> u32 {
        self.config.read_latency_cycles
    }

    pub fn write_latency_cycles(&self) -> u32 {
        self.config.write_latency_cycles
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }
}
