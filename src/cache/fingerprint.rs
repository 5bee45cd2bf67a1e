// src/cache/fingerprint.rs

use std::collections::HashMap;

use anyhow::Result;
use tracing::{debug, trace};

/// Live fingerprint of a stage: what it would compute right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// Serialized declared state.
    pub state: String,
    /// Description of the current input bindings.
    pub inputs: String,
}

impl Fingerprint {
    pub fn new(state: impl Into<String>, inputs: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            inputs: inputs.into(),
        }
    }

    /// Text stored as the stage's fingerprint record.
    pub fn record(&self) -> String {
        format!("{},inports={}", self.state, self.inputs)
    }
}

/// Abstract storage for per-stage fingerprint records.
pub trait FingerprintStore: Send {
    fn load(&self, stage: &str) -> Result<Option<String>>;
    fn save(&mut self, stage: &str, record: &str) -> Result<()>;
    /// Remove records for stages not in `active`.
    fn prune(&mut self, active: &[&str]) -> Result<()>;
}

/// Keeps fingerprint records in memory only.
#[derive(Debug, Default)]
pub struct MemoryFingerprintStore {
    map: HashMap<String, String>,
}

impl MemoryFingerprintStore {
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }
}

impl FingerprintStore for MemoryFingerprintStore {
    fn load(&self, stage: &str) -> Result<Option<String>> {
        Ok(self.map.get(stage).cloned())
    }

    fn save(&mut self, stage: &str, record: &str) -> Result<()> {
        self.map.insert(stage.to_string(), record.to_string());
        trace!(stage = %stage, record = %record, "stored fingerprint");
        Ok(())
    }

    fn prune(&mut self, active: &[&str]) -> Result<()> {
        let initial_len = self.map.len();
        self.map.retain(|k, _| active.contains(&k.as_str()));
        if self.map.len() < initial_len {
            debug!(
                removed = initial_len - self.map.len(),
                "pruned stale fingerprint records"
            );
        }
        Ok(())
    }
}
