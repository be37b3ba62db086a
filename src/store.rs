//! Persisted session state: the active protocol and the seed of the last run.

use crate::error::Result;
use crate::protocol::Protocol;
use crate::workload::Seed;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// State carried from one run to the next.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionState {
    pub protocol: Option<Protocol>,
    pub last_seed: Option<Seed>,
}

/// Where session state lives between runs.
pub trait StateStore {
    fn load(&self) -> Result<SessionState>;
    fn save(&mut self, state: &SessionState) -> Result<()>;
}

/// Keeps the state for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: SessionState,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: SessionState) -> Self {
        Self { state }
    }
}

impl StateStore for MemoryStore {
    fn load(&self) -> Result<SessionState> {
        Ok(self.state)
    }

    fn save(&mut self, state: &SessionState) -> Result<()> {
        self.state = *state;
        Ok(())
    }
}

/// Pretty-printed JSON file. A missing file reads as the empty state.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for FileStore {
    fn load(&self) -> Result<SessionState> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!("no session state at {}, starting empty", self.path.display());
                Ok(SessionState::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn save(&mut self, state: &SessionState) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(state)?;
        fs::write(&self.path, json)?;
        Ok(())
    }
}
