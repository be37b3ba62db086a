//! Processing-element model: identifiers, operations, events and the per-core register.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Simulation cycle counter (discrete time).
pub type Cycle = u64;

/// Memory word stored in caches and main memory.
pub type Word = u32;

/// Identifies a processing element and its private cache (0..N).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CoreId(pub usize);

/// Word address in main memory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(pub u64);

/// Operation issued by a processing element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    /// Load a word into the register.
    Read,
    /// Store the register into a word.
    Write,
    /// Increment the register; never touches the cache.
    Inc,
}

impl Operation {
    pub fn is_memory_op(self) -> bool {
        matches!(self, Operation::Read | Operation::Write)
    }
}

/// One step of a run: `core` performs `operation` on `address`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub operation: Operation,
    pub address: Address,
    pub core: CoreId,
}

impl Event {
    pub fn read(core: usize, address: u64) -> Self {
        Self {
            operation: Operation::Read,
            address: Address(address),
            core: CoreId(core),
        }
    }

    pub fn write(core: usize, address: u64) -> Self {
        Self {
            operation: Operation::Write,
            address: Address(address),
            core: CoreId(core),
        }
    }

    pub fn inc(core: usize) -> Self {
        Self {
            operation: Operation::Inc,
            address: Address(0),
            core: CoreId(core),
        }
    }
}

/// A processing element with its single register.
#[derive(Clone, Debug, Default)]
pub struct Processor {
    pub id: CoreId,
    register: Word,
}

impl Processor {
    pub fn new(id: CoreId) -> Self {
        Self { id, register: 0 }
    }

    pub fn register(&self) -> Word {
        self.register
    }

    pub fn load(&mut self, value: Word) {
        self.register = value;
    }

    pub fn increment(&mut self) {
        self.register = self.register.wrapping_add(1);
    }
}

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PE{}", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Read => write!(f, "READ"),
            Operation::Write => write!(f, "WRITE"),
            Operation::Inc => write!(f, "INC"),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operation {
            Operation::Inc => write!(f, "{} INC", self.core),
            op => write!(f, "{} {} {}", self.core, op, self.address),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inc_is_not_a_memory_op() {
        assert!(!Operation::Inc.is_memory_op());
        assert!(Operation::Read.is_memory_op());
        assert!(Operation::Write.is_memory_op());
    }

    #[test]
    fn processor_register_ops() {
        let mut p = Processor::new(CoreId(2));
        p.increment();
        p.increment();
        assert_eq!(p.register(), 2);
        p.load(40);
        assert_eq!(p.register(), 40);
    }

    #[test]
    fn default_address_is_word_zero() {
        assert_eq!(Address::default(), Address(0));
        assert_eq!(CoreId::default(), CoreId(0));
    }

    #[test]
    fn event_display() {
        assert_eq!(Event::write(1, 10).to_string(), "PE1 WRITE 0xa");
        assert_eq!(Event::inc(0).to_string(), "PE0 INC");
    }
}
