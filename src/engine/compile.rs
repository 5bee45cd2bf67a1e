// src/engine/compile.rs

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, info};

use crate::alloc::{SlotAllocator, SlotRecord};
use crate::binding::{Binding, BindingId, GeometryTable, PortBindings, Router};
use crate::cache::ResultCache;
use crate::dag::{Priorities, assign_priorities, validate_graph};
use crate::errors::{BindingError, CompileError, PortBindingTypeMismatch};
use crate::graph::{PortRef, StageGraph, StageId};

use super::EvaluatorConfig;

/// Everything one compile decided: order, levels, bindings and slot
/// claims.
#[derive(Debug, Clone)]
pub struct CompiledGraph {
    revision: u64,
    sinks: Vec<StageId>,
    priorities: Priorities,
    /// Stage names at compile time, to detect recycled ids.
    names: HashMap<StageId, String>,
    bindings: PortBindings,
    free_slots: Vec<usize>,
    slot_records: Vec<SlotRecord>,
    published: BTreeSet<usize>,
}

impl CompiledGraph {
    /// Graph revision this compile was made from.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn sinks(&self) -> &[StageId] {
        &self.sinks
    }

    /// Execution order, level >= 0 only.
    pub fn order(&self) -> &[StageId] {
        self.priorities.order()
    }

    pub fn level_of(&self, stage: StageId) -> i32 {
        self.priorities.level_of(stage)
    }

    pub fn priorities(&self) -> &Priorities {
        &self.priorities
    }

    pub fn stage_name(&self, stage: StageId) -> Option<&str> {
        self.names.get(&stage).map(String::as_str)
    }

    pub fn bindings(&self) -> &PortBindings {
        &self.bindings
    }

    /// Free list left after allocation, ascending.
    pub fn free_slots(&self) -> &[usize] {
        &self.free_slots
    }

    pub fn slot_records(&self) -> &[SlotRecord] {
        &self.slot_records
    }

    /// Slots published to the ForbiddenSet.
    pub fn published_slots(&self) -> &BTreeSet<usize> {
        &self.published
    }

    pub fn rejected_connections(&self) -> &[PortBindingTypeMismatch] {
        self.bindings.rejected()
    }

    /// Binding behind `port` of `stage`.
    ///
    /// Outputs ignore `index`; inputs are indexed in declared connection
    /// order.
    pub fn binding(
        &self,
        graph: &StageGraph,
        stage: StageId,
        port: &str,
        index: usize,
    ) -> Result<&Binding, BindingError> {
        let idx = graph
            .port_index(stage, port)
            .ok_or_else(|| BindingError::UnknownPort {
                stage: graph.label(stage),
                port: port.to_string(),
            })?;
        self.binding_at(graph, PortRef::new(stage, idx), index)
    }

    pub fn binding_at(
        &self,
        graph: &StageGraph,
        port: PortRef,
        index: usize,
    ) -> Result<&Binding, BindingError> {
        let found = match graph.port(port) {
            Some(spec) if spec.is_output() => self.bindings.output(port),
            Some(_) => self.bindings.input(port, index),
            None => None,
        };

        found.ok_or_else(|| BindingError::NotBound {
            stage: graph.label(port.stage),
            port: graph
                .port(port)
                .map(|p| p.name.clone())
                .unwrap_or_else(|| format!("#{}", port.port)),
            index,
        })
    }

    /// One entry per declared connection; `None` where it was rejected.
    pub fn input_ids(&self, port: PortRef) -> &[Option<BindingId>] {
        self.bindings.input_ids(port)
    }
}

/// Validate, schedule, allocate and bind.
///
/// Side-effect free on failure: geometry is registered into `geometry`,
/// which the caller only adopts on success, and nothing is published.
pub fn compile_graph(
    graph: &StageGraph,
    config: &EvaluatorConfig,
    forbidden: &BTreeSet<usize>,
    geometry: &mut GeometryTable,
) -> Result<(CompiledGraph, ResultCache), CompileError> {
    let validated = validate_graph(graph)?;
    let priorities = assign_priorities(graph, &validated.sinks);
    let results = ResultCache::plan(graph);

    let mut allocator = SlotAllocator::new(config.pool, forbidden, config.reuse_slots);
    let mut router = Router::new(graph, geometry);

    // Scheduled stages first, then the ones only reachable by calls.
    let unscheduled: Vec<StageId> = graph
        .stage_ids()
        .filter(|id| !priorities.is_scheduled(*id))
        .collect();
    for stage in priorities.order().iter().chain(unscheduled.iter()) {
        router.route_stage(*stage, &mut allocator, &priorities, results.qualifies(*stage))?;
    }
    let bindings = router.finish();

    let published = allocator.published();
    let (free_slots, slot_records) = allocator.into_parts();

    let names = graph
        .stage_ids()
        .map(|id| (id, graph.label(id)))
        .collect();

    info!(
        stages = graph.len(),
        scheduled = priorities.order().len(),
        bindings = bindings.len(),
        slots = slot_records.len(),
        rejected = bindings.rejected().len(),
        "graph compiled"
    );
    debug!(free = ?free_slots, published = ?published, "slot pool after compile");

    let compiled = CompiledGraph {
        revision: graph.revision(),
        sinks: validated.sinks,
        priorities,
        names,
        bindings,
        free_slots,
        slot_records,
        published,
    };
    Ok((compiled, results))
}
