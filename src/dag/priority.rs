// src/dag/priority.rs

use std::collections::HashMap;

use tracing::trace;

use crate::graph::{StageGraph, StageId};

/// Level of a stage that is never scheduled.
pub const UNSCHEDULED: i32 = -1;

/// Per-stage levels and the resulting execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Priorities {
    levels: HashMap<StageId, i32>,
    order: Vec<StageId>,
}

impl Priorities {
    /// Stages with level >= 0, highest level first.
    pub fn order(&self) -> &[StageId] {
        &self.order
    }

    pub fn level_of(&self, stage: StageId) -> i32 {
        self.levels.get(&stage).copied().unwrap_or(UNSCHEDULED)
    }

    pub fn is_scheduled(&self, stage: StageId) -> bool {
        self.level_of(stage) > UNSCHEDULED
    }
}

/// Assign every stage its maximum distance from any sink.
///
/// Walks backward from each sink along all input connections (data and
/// coprocessor). A stage flagged coprocessor-only without data inputs is
/// pinned at [`UNSCHEDULED`] and not walked through. Requires an acyclic
/// graph.
pub fn assign_priorities(graph: &StageGraph, sinks: &[StageId]) -> Priorities {
    let mut levels: HashMap<StageId, i32> =
        graph.stage_ids().map(|id| (id, UNSCHEDULED)).collect();

    for sink in sinks {
        let mut stack: Vec<(StageId, i32)> = vec![(*sink, 0)];

        while let Some((stage, depth)) = stack.pop() {
            if graph.flags(stage).is_coprocessor_only && !graph.has_data_inputs(stage) {
                levels.insert(stage, UNSCHEDULED);
                continue;
            }

            let current = levels.get(&stage).copied().unwrap_or(UNSCHEDULED);
            if current >= depth {
                // Already walked at this depth or deeper.
                continue;
            }
            levels.insert(stage, depth);
            trace!(stage = %graph.label(stage), level = depth, "level raised");

            for pred in graph.predecessors(stage) {
                stack.push((pred, depth + 1));
            }
        }
    }

    let mut order: Vec<StageId> = graph
        .stage_ids()
        .filter(|id| levels.get(id).copied().unwrap_or(UNSCHEDULED) > UNSCHEDULED)
        .collect();
    // Stable: ties keep insertion order.
    order.sort_by(|a, b| levels[b].cmp(&levels[a]));

    Priorities { levels, order }
}
