//! Session boundary: the Initialize operation, seed resolution and state persistence.
//!
//! A run is all-or-nothing. The protocol and seed are written to the store only after
//! the simulation has produced its report, so a failed run leaves the state as it was.

use crate::config::SystemConfig;
use crate::error::{Error, Result};
use crate::metrics::MetricsReport;
use crate::protocol::Protocol;
use crate::simulator::{SimulationResult, Simulator};
use crate::store::{SessionState, StateStore};
use crate::workload::{EventSequence, Seed};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

/// Initialize request as it arrives from the view layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializeRequest {
    #[serde(alias = "type")]
    pub protocol: String,
    /// Reuse the stored seed instead of drawing a new one.
    #[serde(rename = "lastCode", alias = "useLastSeed", default)]
    pub last_code: bool,
}

impl InitializeRequest {
    pub fn new(protocol: impl Into<String>, last_code: bool) -> Self {
        Self {
            protocol: protocol.into(),
            last_code,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeedMode {
    Fresh,
    Reuse,
}

/// Validated, immutable parameters of one run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunConfiguration {
    pub protocol: Protocol,
    pub seed_mode: SeedMode,
}

impl RunConfiguration {
    pub fn from_request(request: &InitializeRequest) -> Result<Self> {
        Ok(Self {
            protocol: request.protocol.parse()?,
            seed_mode: if request.last_code {
                SeedMode::Reuse
            } else {
                SeedMode::Fresh
            },
        })
    }
}

/// What an Initialize call returns.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunReport {
    pub protocol: Protocol,
    pub seed: Seed,
    pub metrics: MetricsReport,
}

/// Replays the sequence generated from `seed` under `protocol`, over memory drawn from the
/// same seed.
pub fn simulate(protocol: Protocol, config: &SystemConfig, seed: Seed) -> Result<SimulationResult> {
    Simulator::seeded(protocol, config, seed)?.run(EventSequence::new(seed, &config.workload))
}

/// Serialises runs and owns the persisted session state.
pub struct Session<S> {
    store: Mutex<S>,
    config: SystemConfig,
}

impl<S: StateStore> Session<S> {
    pub fn new(store: S, config: SystemConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store: Mutex::new(store),
            config,
        })
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    /// Parses the request and performs one run.
    pub fn initialize(&self, request: &InitializeRequest) -> Result<RunReport> {
        let run = RunConfiguration::from_request(request)?;
        self.run(run)
    }

    pub fn run(&self, run: RunConfiguration) -> Result<RunReport> {
        let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        let state = store.load()?;
        let seed = match run.seed_mode {
            SeedMode::Fresh => Seed::fresh(),
            SeedMode::Reuse => state.last_seed.ok_or_else(|| {
                warn!("reuse of the last seed requested, but none is stored");
                Error::NoStoredSeed
            })?,
        };
        info!("initialize {} with seed {} ({:?})", run.protocol, seed, run.seed_mode);

        let result = simulate(run.protocol, &self.config, seed)?;
        store.save(&SessionState {
            protocol: Some(run.protocol),
            last_seed: Some(seed),
        })?;
        info!(
            "{} finished: hit rate {:.2}%, miss rate {:.2}%",
            run.protocol,
            result.report.hit_rate(),
            result.report.miss_rate()
        );
        Ok(RunReport {
            protocol: run.protocol,
            seed,
            metrics: result.report,
        })
    }

    pub fn state(&self) -> Result<SessionState> {
        self.store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .load()
    }
}

impl<S: StateStore + Send + 'static> Session<S> {
    /// Runs `request` on a background thread.
    pub fn spawn(self: &Arc<Self>, request: InitializeRequest) -> JoinHandle<Result<RunReport>> {
        let session = Arc::clone(self);
        thread::spawn(move || session.initialize(&request))
    }
}
