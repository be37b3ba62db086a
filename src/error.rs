//! Error type shared by the simulator, configuration loading, the state store and the session boundary.

use crate::core::{Address, CoreId};
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The requested protocol is not one of `MESI` / `MOESI`.
    #[error("unsupported protocol {0:?} (expected \"MESI\" or \"MOESI\")")]
    UnsupportedProtocol(String),

    /// A reuse run was requested but no seed has been persisted yet.
    #[error("no previously generated seed is stored; run once with lastCode=false first")]
    NoStoredSeed,

    #[error("event references core {core} / address {address}, outside a system of {num_cores} cores and {address_space} words")]
    InvalidEvent {
        core: CoreId,
        address: Address,
        num_cores: usize,
        address_space: u64,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O failed: {0}")]
    Store(#[from] io::Error),

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
}
