//! Private cache model: set-associative with configurable geometry and LRU replacement.
//! Every way holds a line whose coherence state is `Invalid` until it is filled.

use crate::core::{Address, Word};
use crate::protocol::LineState;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Result of a cache lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheAccessResult {
    Hit,
    Miss,
}

/// Configuration for a private cache.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Number of sets (power of two).
    pub num_sets: usize,
    /// Associativity (number of ways per set).
    pub associativity: usize,
    /// Latency in cycles for a hit.
    pub hit_latency_cycles: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        // Four lines, fully associative.
        Self {
            num_sets: 1,
            associativity: 4,
            hit_latency_cycles: 1,
        }
    }
}

impl CacheConfig {
    pub fn num_lines(&self) -> usize {
        self.num_sets * self.associativity
    }
}

/// One cache line: address tag, cached word and coherence state.
#[derive(Clone, Copy, Debug, Default)]
struct CacheLine {
    address: Address,
    data: Word,
    state: LineState,
}

/// A valid line pushed out to make room for a fill.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Evicted {
    pub address: Address,
    pub data: Word,
    pub state: LineState,
}

/// Per-line view for inspection and reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct LineSnapshot {
    pub set: usize,
    pub way: usize,
    pub address: Option<Address>,
    pub data: Word,
    pub state: LineState,
}

/// One set: multiple ways with LRU ordering.
struct CacheSet {
    lines: Vec<CacheLine>,
    /// Front = most recently used, back = least recently used.
    lru_order: VecDeque<usize>,
}

impl CacheSet {
    fn new(associativity: usize) -> Self {
        Self {
            lines: vec![CacheLine::default(); associativity],
            lru_order: (0..associativity).collect(),
        }
    }

    fn find(&self, address: Address) -> Option<usize> {
        self.lines
            .iter()
            .position(|line| line.state.is_valid() && line.address == address)
    }

    /// Picks an invalid way if there is one, otherwise the LRU way.
    fn victim(&self) -> usize {
        self.lru_order
            .iter()
            .rev()
            .copied()
            .find(|&way| !self.lines[way].state.is_valid())
            .or_else(|| self.lru_order.back().copied())
            .unwrap_or(0)
    }

    fn touch(&mut self, way: usize) {
        if let Some(pos) = self.lru_order.iter().position(|&w| w == way) {
            self.lru_order.remove(pos);
            self.lru_order.push_front(way);
        }
    }
}

/// Private cache of one processing element.
pub struct Cache {
    config: CacheConfig,
    sets: Vec<CacheSet>,
    set_mask: u64,
}

impl Cache {
    pub fn new(config: CacheConfig) -> Self {
        assert!(config.num_sets > 0, "cache must have at least one set");
        assert!(config.associativity > 0, "cache must have at least one way");
        assert!(config.num_sets.is_power_of_two(), "set count must be a power of two");
        let sets = (0..config.num_sets)
            .map(|_| CacheSet::new(config.associativity))
            .collect();
        let set_mask = config.num_sets as u64 - 1;
        Self {
            config,
            sets,
            set_mask,
        }
    }

    fn set_index(&self, address: Address) -> usize {
        (address.0 & self.set_mask) as usize
    }

    fn line(&self, address: Address) -> Option<&CacheLine> {
        let set = &self.sets[self.set_index(address)];
        set.find(address).map(|way| &set.lines[way])
    }

    fn line_mut(&mut self, address: Address) -> Option<&mut CacheLine> {
        let idx = self.set_index(address);
        let set = &mut self.sets[idx];
        let way = set.find(address)?;
        Some(&mut set.lines[way])
    }

    /// Coherence state of `address`; `Invalid` when not resident.
    pub fn state_of(&self, address: Address) -> LineState {
        self.line(address).map_or(LineState::Invalid, |l| l.state)
    }

    /// Cached word of `address`, if resident.
    pub fn data_of(&self, address: Address) -> Option<Word> {
        self.line(address).map(|l| l.data)
    }

    /// Looks up `address` and refreshes its LRU position on a hit.
    pub fn access(&mut self, address: Address) -> CacheAccessResult {
        let idx = self.set_index(address);
        let set = &mut self.sets[idx];
        match set.find(address) {
            Some(way) => {
                set.touch(way);
                CacheAccessResult::Hit
            }
            None => CacheAccessResult::Miss,
        }
    }

    /// Changes the state of a resident line. Returns false if `address` is not cached.
    pub fn set_state(&mut self, address: Address, state: LineState) -> bool {
        match self.line_mut(address) {
            Some(line) => {
                line.state = state;
                true
            }
            None => false,
        }
    }

    /// Overwrites the word of a resident line. Returns false if `address` is not cached.
    pub fn set_data(&mut self, address: Address, data: Word) -> bool {
        match self.line_mut(address) {
            Some(line) => {
                line.data = data;
                true
            }
            None => false,
        }
    }

    /// Places `address` in the cache (or updates it in place) as most recently used.
    /// Returns the valid line that had to be evicted, if any.
    pub fn fill(&mut self, address: Address, data: Word, state: LineState) -> Option<Evicted> {
        let idx = self.set_index(address);
        let set = &mut self.sets[idx];
        let (way, evicted) = match set.find(address) {
            Some(way) => (way, None),
            None => {
                let way = set.victim();
                let old = set.lines[way];
                let evicted = old.state.is_valid().then_some(Evicted {
                    address: old.address,
                    data: old.data,
                    state: old.state,
                });
                (way, evicted)
            }
        };
        set.lines[way] = CacheLine {
            address,
            data,
            state,
        };
        set.touch(way);
        evicted
    }

    /// Every valid (address, state) pair held by this cache.
    pub fn resident(&self) -> impl Iterator<Item = (Address, LineState)> + '_ {
        self.sets
            .iter()
            .flat_map(|set| set.lines.iter())
            .filter(|line| line.state.is_valid())
            .map(|line| (line.address, line.state))
    }

    pub fn snapshot(&self) -> Vec<LineSnapshot> {
        self.sets
            .iter()
            .enumerate()
            .flat_map(|(set_idx, set)| {
                set.lines.iter().enumerate().map(move |(way, line)| LineSnapshot {
                    set: set_idx,
                    way,
                    address: line.state.is_valid().then_some(line.address),
                    data: line.data,
                    state: line.state,
                })
            })
            .collect()
    }

    pub fn hit_latency_cycles(&self) -> u32 {
        self.config.hit_latency_cycles
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn num_sets(&self) -> usize {
        self.sets.len()
    }
}
