// src/cache/mod.rs

//! Two independent caching tiers.
//!
//! - [`validity`]: per-stage "result still valid" flags for stages whose
//!   whole neighbourhood is cacheable.
//! - [`DerivedCache`]: fingerprint comparison plus a content-addressed
//!   store of derived objects for stages with volume-handle outputs.

pub mod fingerprint;
pub mod store;
pub mod validity;

use tracing::{debug, trace, warn};

use crate::binding::{Binding, PortBindings};
use crate::errors::CacheStateError;
use crate::graph::{PayloadKind, PortRef, StageGraph, StageId};

pub use fingerprint::{Fingerprint, FingerprintStore, MemoryFingerprintStore};
pub use store::{CacheKey, DerivedStore, MemoryDerivedStore};
pub use validity::ResultCache;

/// Answer of the derived-data tier for one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheState {
    /// The record matches the live fingerprint; nothing to do.
    Fresh,
    /// The record is out of date; carries the live fingerprint.
    Stale(Fingerprint),
}

/// Whether `stage` can use the derived-data tier: cacheable with at least
/// one volume-handle output.
pub fn is_derived_compatible(graph: &StageGraph, stage: StageId) -> bool {
    graph.flags(stage).is_cacheable
        && graph
            .ports(stage)
            .iter()
            .any(|p| p.is_output() && p.kind == PayloadKind::VolumeHandle)
}

/// Derived-data tier.
pub struct DerivedCache {
    enabled: bool,
    records: Box<dyn FingerprintStore>,
    store: Box<dyn DerivedStore>,
}

impl DerivedCache {
    pub fn new(enabled: bool, capacity: usize) -> Self {
        Self {
            enabled,
            records: Box::new(MemoryFingerprintStore::new()),
            store: Box::new(MemoryDerivedStore::new(capacity)),
        }
    }

    pub fn with_store(mut self, store: Box<dyn DerivedStore>) -> Self {
        self.store = store;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn store(&self) -> &dyn DerivedStore {
        self.store.as_ref()
    }

    /// Current record of `stage`, if any.
    pub fn record(&self, stage: &str) -> Option<String> {
        self.records.load(stage).ok().flatten()
    }

    /// Give every compatible stage a blank record so its first tick needs
    /// execution, and drop records of stages that are gone.
    pub fn seed(&mut self, graph: &StageGraph) {
        let mut active = Vec::new();
        for id in graph.stage_ids() {
            if !is_derived_compatible(graph, id) {
                continue;
            }
            let Some(name) = graph.name(id) else { continue };
            active.push(name);
            if let Err(err) = self.records.save(name, "") {
                warn!(stage = %name, error = %err, "failed to seed fingerprint record");
            }
        }
        if let Err(err) = self.records.prune(&active) {
            warn!(error = %err, "failed to prune fingerprint records");
        }
        debug!(compatible = active.len(), "fingerprint records seeded");
    }

    /// Compare the live fingerprint of `stage` with its record.
    pub fn cache_state(
        &self,
        graph: &StageGraph,
        bindings: &PortBindings,
        stage: StageId,
    ) -> Result<CacheState, CacheStateError> {
        let name = graph.label(stage);
        if !is_derived_compatible(graph, stage) {
            return Err(CacheStateError::Incompatible(name));
        }

        let record = match self.records.load(&name) {
            Ok(Some(record)) => record,
            Ok(None) => return Err(CacheStateError::ProcessorMissing(name)),
            Err(err) => {
                warn!(stage = %name, error = %err, "fingerprint record unreadable");
                return Err(CacheStateError::ProcessorMissing(name));
            }
        };

        let live = live_fingerprint(graph, bindings, stage)
            .ok_or_else(|| CacheStateError::ProcessorMissing(name.clone()))?;

        if live.record() == record {
            trace!(stage = %name, "fingerprint unchanged");
            Ok(CacheState::Fresh)
        } else {
            Ok(CacheState::Stale(live))
        }
    }

    /// Try to fill every volume output of `stage` from the store.
    ///
    /// All outputs must hit; on success the record is updated.
    pub fn restore(
        &mut self,
        graph: &StageGraph,
        bindings: &PortBindings,
        stage: StageId,
        live: &Fingerprint,
    ) -> bool {
        let name = graph.label(stage);
        let mut hits = Vec::new();

        for (port, port_name) in volume_outputs(graph, stage) {
            let key = CacheKey::new(&name, &port_name, &live.inputs, &live.state);
            let Some(Binding::Volume(cell)) = bindings.output(port) else {
                return false;
            };
            match self.store.find(&key) {
                Some(object) => hits.push((cell.clone(), object)),
                None => {
                    trace!(stage = %name, port = %port_name, "derived store miss");
                    return false;
                }
            }
        }
        if hits.is_empty() {
            return false;
        }

        for (cell, object) in hits {
            cell.set(object);
        }
        self.save_record(&name, live);
        debug!(stage = %name, "outputs restored from derived store");
        true
    }

    /// Store the freshly computed volume outputs of `stage` and update its
    /// record.
    pub fn publish(
        &mut self,
        graph: &StageGraph,
        bindings: &PortBindings,
        stage: StageId,
        live: &Fingerprint,
    ) {
        let name = graph.label(stage);
        for (port, port_name) in volume_outputs(graph, stage) {
            let Some(Binding::Volume(cell)) = bindings.output(port) else {
                continue;
            };
            let Some(object) = cell.get() else {
                continue;
            };
            let key = CacheKey::new(&name, &port_name, &live.inputs, &live.state);
            self.store.insert(key, object);
        }
        self.save_record(&name, live);
    }

    fn save_record(&mut self, name: &str, live: &Fingerprint) {
        if let Err(err) = self.records.save(name, &live.record()) {
            warn!(stage = %name, error = %err, "failed to store fingerprint record");
        }
    }
}

impl std::fmt::Debug for DerivedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedCache")
            .field("enabled", &self.enabled)
            .field("stored", &self.store.len())
            .finish()
    }
}

/// Live fingerprint of `stage`, or `None` if the stage is not present.
pub fn live_fingerprint(
    graph: &StageGraph,
    bindings: &PortBindings,
    stage: StageId,
) -> Option<Fingerprint> {
    let instance = graph.stage(stage)?;
    let inputs = instance
        .inport_config_descriptor()
        .unwrap_or_else(|| bindings.describe_inputs(graph, stage));
    Some(Fingerprint::new(instance.declared_state(), inputs))
}

fn volume_outputs(graph: &StageGraph, stage: StageId) -> Vec<(PortRef, String)> {
    graph
        .ports(stage)
        .iter()
        .enumerate()
        .filter(|(_, p)| p.is_output() && p.kind == PayloadKind::VolumeHandle)
        .map(|(idx, p)| (PortRef::new(stage, idx), p.name.clone()))
        .collect()
}
