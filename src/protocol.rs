//! Coherence protocol state table: per-line states and the MESI / MOESI transition functions.
//!
//! The processor side answers "what happens when my core reads or writes this line",
//! given what the other caches report on the shared/dirty wired-OR lines. The snoop
//! side answers "what does a cache holding this line do when it sees a bus request".
//! The two tables differ only in how a dirty line reacts to a remote read: MESI
//! flushes it to memory and drops to Shared, MOESI keeps it dirty as Owned and keeps
//! supplying it from the cache.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Coherence protocol selected for a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "MESI")]
    Mesi,
    #[serde(rename = "MOESI")]
    Moesi,
}

/// Coherence state of one cache line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LineState {
    Modified,
    Owned,
    Exclusive,
    Shared,
    #[default]
    Invalid,
}

/// Processor-side access kind (INC never reaches the cache).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// Transactions a cache can put on the bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BusRequest {
    /// Read miss: fetch a copy, others may keep theirs.
    BusRd,
    /// Write miss: fetch a copy and invalidate every other copy.
    BusRdX,
    /// Write hit on a shared line: invalidate every other copy, no data moves.
    BusUpgr,
}

/// What the other caches report for a block before a request is granted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Sharing {
    /// Some other cache holds a valid copy.
    pub shared: bool,
    /// Some other cache holds the block in Modified or Owned.
    pub dirty: bool,
}

/// Side effects the bus must carry out for a transition.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BusActions {
    pub invalidate_others: bool,
    pub fetch_from_memory: bool,
    pub fetch_from_owner: bool,
    /// The remote dirty copy is flushed to memory.
    pub writeback: bool,
}

/// Result of a processor-side access on one line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub next: LineState,
    pub hit: bool,
    pub request: Option<BusRequest>,
    pub actions: BusActions,
}

/// How a snooping cache reacts to a bus request for a line it may hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SnoopResponse {
    pub next: LineState,
    pub supplies_data: bool,
}

impl Protocol {
    pub const ALL: [Protocol; 2] = [Protocol::Mesi, Protocol::Moesi];

    pub fn name(self) -> &'static str {
        match self {
            Protocol::Mesi => "MESI",
            Protocol::Moesi => "MOESI",
        }
    }

    /// States a line may take under this protocol.
    pub fn states(self) -> &'static [LineState] {
        use LineState::*;
        match self {
            Protocol::Mesi => &[Modified, Exclusive, Shared, Invalid],
            Protocol::Moesi => &[Modified, Owned, Exclusive, Shared, Invalid],
        }
    }

    pub fn allows(self, state: LineState) -> bool {
        self.states().contains(&state)
    }

    /// Processor-side transition for `access` on a line currently in `state`.
    pub fn transition(self, state: LineState, access: Access, sharing: Sharing) -> Transition {
        use LineState::*;
        match (access, state) {
            (Access::Read, Invalid) => {
                let next = if sharing.shared { Shared } else { Exclusive };
                Transition {
                    next,
                    hit: false,
                    request: Some(BusRequest::BusRd),
                    actions: BusActions {
                        invalidate_others: false,
                        fetch_from_memory: !sharing.shared,
                        fetch_from_owner: sharing.shared,
                        writeback: self == Protocol::Mesi && sharing.dirty,
                    },
                }
            }
            (Access::Read, valid) => Transition::silent(valid),

            (Access::Write, Invalid) => Transition {
                next: Modified,
                hit: false,
                request: Some(BusRequest::BusRdX),
                actions: BusActions {
                    invalidate_others: sharing.shared,
                    fetch_from_memory: !sharing.shared,
                    fetch_from_owner: sharing.shared,
                    writeback: false,
                },
            },
            (Access::Write, Shared | Owned) => Transition {
                next: Modified,
                hit: true,
                request: Some(BusRequest::BusUpgr),
                actions: BusActions {
                    invalidate_others: sharing.shared,
                    ..BusActions::default()
                },
            },
            (Access::Write, Exclusive | Modified) => Transition::silent(Modified),
        }
    }

    /// Snoop-side reaction of a cache holding `state` to a remote `request`.
    pub fn snoop(self, state: LineState, request: BusRequest) -> SnoopResponse {
        use LineState::*;
        match (request, state) {
            (_, Invalid) => SnoopResponse {
                next: Invalid,
                supplies_data: false,
            },
            (BusRequest::BusRd, Modified) => SnoopResponse {
                next: match self {
                    Protocol::Mesi => Shared,
                    Protocol::Moesi => Owned,
                },
                supplies_data: true,
            },
            (BusRequest::BusRd, Owned) => SnoopResponse {
                next: Owned,
                supplies_data: true,
            },
            (BusRequest::BusRd, Exclusive | Shared) => SnoopResponse {
                next: Shared,
                supplies_data: true,
            },
            (BusRequest::BusRdX, _) => SnoopResponse {
                next: Invalid,
                supplies_data: true,
            },
            (BusRequest::BusUpgr, _) => SnoopResponse {
                next: Invalid,
                supplies_data: false,
            },
        }
    }
}

impl Transition {
    fn silent(next: LineState) -> Self {
        Self {
            next,
            hit: true,
            request: None,
            actions: BusActions::default(),
        }
    }
}

impl LineState {
    pub fn is_valid(self) -> bool {
        self != LineState::Invalid
    }

    /// Memory is stale while a line is in this state.
    pub fn is_dirty(self) -> bool {
        matches!(self, LineState::Modified | LineState::Owned)
    }

    /// No other cache may hold a valid copy while a line is in this state.
    pub fn is_exclusive(self) -> bool {
        matches!(self, LineState::Modified | LineState::Exclusive)
    }

    /// Single-letter mnemonic.
    pub fn letter(self) -> char {
        match self {
            LineState::Modified => 'M',
            LineState::Owned => 'O',
            LineState::Exclusive => 'E',
            LineState::Shared => 'S',
            LineState::Invalid => 'I',
        }
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MESI" => Ok(Protocol::Mesi),
            "MOESI" => Ok(Protocol::Moesi),
            other => Err(Error::UnsupportedProtocol(other.to_string())),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for LineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

impl fmt::Display for BusRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusRequest::BusRd => write!(f, "BusRd"),
            BusRequest::BusRdX => write!(f, "BusRdX"),
            BusRequest::BusUpgr => write!(f, "BusUpgr"),
        }
    }
}
