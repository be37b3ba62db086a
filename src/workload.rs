//! Seeded event sequencer: reproducible READ / WRITE / INC streams across several cores.

use crate::core::{Address, Event, Operation};
use crate::error::{Error, Result};
use crate::scheduler::{Interleaving, Scheduler};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest number of processing elements a run may have.
pub const MAX_CORES: usize = 256;

/// Largest memory, in words, a run may address.
pub const MAX_ADDRESS_SPACE: u64 = 1 << 24;

/// Seed of a run. The same seed and workload configuration always yield the same events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Seed(pub u64);

impl Seed {
    /// Draws a new seed from the thread RNG.
    pub fn fresh() -> Self {
        Seed(rand::rng().random())
    }
}

impl fmt::Display for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// Relative weights of the three operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationMix {
    pub read: u32,
    pub write: u32,
    pub inc: u32,
}

impl Default for OperationMix {
    fn default() -> Self {
        Self {
            read: 1,
            write: 1,
            inc: 1,
        }
    }
}

impl OperationMix {
    /// Sum of the weights, widened so that it cannot overflow.
    pub fn total(&self) -> u64 {
        u64::from(self.read) + u64::from(self.write) + u64::from(self.inc)
    }

    fn pick<R: Rng>(&self, rng: &mut R) -> Operation {
        let roll = rng.random_range(0..self.total());
        let read = u64::from(self.read);
        if roll < read {
            Operation::Read
        } else if roll < read + u64::from(self.write) {
            Operation::Write
        } else {
            Operation::Inc
        }
    }
}

/// Workload configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Number of processing elements (one private cache each).
    pub num_cores: usize,
    /// Events issued by every core.
    pub events_per_core: usize,
    /// Addresses are drawn uniformly from `0..address_space`.
    pub address_space: u64,
    pub mix: OperationMix,
    pub interleaving: Interleaving,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            num_cores: 3,
            events_per_core: 10,
            address_space: 16,
            mix: OperationMix::default(),
            interleaving: Interleaving::RoundRobin,
        }
    }
}

impl WorkloadConfig {
    /// Length of the event sequence, `None` if it does not fit a `usize`.
    pub fn total_events(&self) -> Option<usize> {
        self.num_cores.checked_mul(self.events_per_core)
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_cores == 0 || self.num_cores > MAX_CORES {
            return Err(Error::InvalidConfig(format!(
                "num_cores must be in 1..={MAX_CORES}, got {}",
                self.num_cores
            )));
        }
        if self.address_space == 0 || self.address_space > MAX_ADDRESS_SPACE {
            return Err(Error::InvalidConfig(format!(
                "address_space must be in 1..={MAX_ADDRESS_SPACE}, got {}",
                self.address_space
            )));
        }
        if self.total_events().is_none() {
            return Err(Error::InvalidConfig(format!(
                "{} cores x {} events per core overflows",
                self.num_cores, self.events_per_core
            )));
        }
        if self.mix.total() == 0 {
            return Err(Error::InvalidConfig("operation mix weights are all zero".into()));
        }
        Ok(())
    }
}

/// Lazy, finite event stream for one run. Restartable from its seed, not resumable.
pub struct EventSequence {
    rng: StdRng,
    scheduler: Scheduler,
    mix: OperationMix,
    address_space: u64,
}

impl EventSequence {
    pub fn new(seed: Seed, config: &WorkloadConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed.0),
            scheduler: Scheduler::new(config.num_cores, config.events_per_core, config.interleaving),
            mix: config.mix,
            address_space: config.address_space,
        }
    }
}

impl Iterator for EventSequence {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        let core = self.scheduler.next_core(&mut self.rng)?;
        let operation = self.mix.pick(&mut self.rng);
        let address = match operation {
            Operation::Inc => Address(0),
            Operation::Read | Operation::Write => Address(self.rng.random_range(0..self.address_space)),
        };
        Some(Event {
            operation,
            address,
            core,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.scheduler.remaining();
        (left, Some(left))
    }
}

impl ExactSizeIterator for EventSequence {}

/// Renders a core's program in the `READ 5` / `WRITE 10` / `INC` text form.
pub fn program_listing(events: &[Event], core: usize) -> Vec<String> {
    events
        .iter()
        .filter(|e| e.core.0 == core)
        .map(|e| match e.operation {
            Operation::Inc => "INC".to_string(),
            op => format!("{} {}", op, e.address.0),
        })
        .collect()
}
