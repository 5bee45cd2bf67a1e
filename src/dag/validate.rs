// src/dag/validate.rs

use std::collections::HashMap;

use tracing::debug;

use crate::errors::GraphInvalidError;
use crate::graph::{StageGraph, StageId};

/// Outcome of a successful structural check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedGraph {
    /// Sink stages, in insertion order.
    pub sinks: Vec<StageId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    /// On the active path.
    Open,
    /// Fully explored, known acyclic.
    Done,
}

/// Check the graph for cycles and collect its sinks.
///
/// Pure: nothing is allocated or published, so a failure leaves every
/// scheduler resource untouched.
pub fn validate_graph(graph: &StageGraph) -> Result<ValidatedGraph, GraphInvalidError> {
    if let Some(cycle) = find_cycle(graph) {
        let stages: Vec<String> = cycle.iter().map(|id| graph.label(*id)).collect();
        debug!(?stages, "cycle found");
        return Err(GraphInvalidError::CycleDetected { stages });
    }

    let sinks: Vec<StageId> = graph
        .stage_ids()
        .filter(|id| graph.flags(*id).is_sink)
        .collect();

    if sinks.is_empty() {
        return Err(GraphInvalidError::NoSink);
    }

    Ok(ValidatedGraph { sinks })
}

/// Depth-first walk along input edges with an explicit stack.
///
/// Returns the stages on the first cycle found, in walk order (consumer
/// first).
pub fn find_cycle(graph: &StageGraph) -> Option<Vec<StageId>> {
    let mut marks: HashMap<StageId, Mark> = HashMap::new();

    for start in graph.stage_ids() {
        if marks.contains_key(&start) {
            continue;
        }

        // Each frame: stage, its producers, next producer to visit.
        let mut stack: Vec<(StageId, Vec<StageId>, usize)> =
            vec![(start, graph.predecessors(start), 0)];
        marks.insert(start, Mark::Open);

        while let Some(frame) = stack.last_mut() {
            let (stage, preds, next) = frame;
            if *next == preds.len() {
                marks.insert(*stage, Mark::Done);
                stack.pop();
                continue;
            }

            let pred = preds[*next];
            *next += 1;

            match marks.get(&pred) {
                Some(Mark::Done) => {}
                Some(Mark::Open) => {
                    let begin = stack
                        .iter()
                        .position(|(s, _, _)| *s == pred)
                        .unwrap_or(0);
                    return Some(stack[begin..].iter().map(|(s, _, _)| *s).collect());
                }
                None => {
                    marks.insert(pred, Mark::Open);
                    stack.push((pred, graph.predecessors(pred), 0));
                }
            }
        }
    }

    None
}
