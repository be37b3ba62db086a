//! Interleaving model: decides which processing element issues the next event.

use crate::core::CoreId;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// How per-core programs are merged into one global event order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interleaving {
    /// Core 0, core 1, ..., core N-1, core 0, ...
    #[default]
    RoundRobin,
    /// A random core among those with events left.
    Random,
}

/// Hands out issue slots until every core has issued its quota of events.
pub struct Scheduler {
    interleaving: Interleaving,
    remaining: Vec<usize>,
    issued: usize,
}

impl Scheduler {
    pub fn new(num_cores: usize, events_per_core: usize, interleaving: Interleaving) -> Self {
        Self {
            interleaving,
            remaining: vec![events_per_core; num_cores],
            issued: 0,
        }
    }

    /// Core that issues the next event, or `None` once every quota is spent.
    pub fn next_core<R: Rng>(&mut self, rng: &mut R) -> Option<CoreId> {
        let left = self.remaining();
        if left == 0 {
            return None;
        }
        let core = match self.interleaving {
            Interleaving::RoundRobin => self.issued % self.remaining.len(),
            Interleaving::Random => {
                let mut pick = rng.random_range(0..left);
                let mut chosen = 0;
                for (idx, &quota) in self.remaining.iter().enumerate() {
                    if pick < quota {
                        chosen = idx;
                        break;
                    }
                    pick -= quota;
                }
                chosen
            }
        };
        self.remaining[core] -= 1;
        self.issued += 1;
        Some(CoreId(core))
    }

    /// Events not yet issued.
    pub fn remaining(&self) -> usize {
        self.remaining.iter().sum()
    }

    pub fn num_cores(&self) -> usize {
        self.remaining.len()
    }
}
