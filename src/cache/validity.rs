// src/cache/validity.rs

use std::collections::{BTreeSet, HashMap};

use petgraph::algo::toposort;
use petgraph::visit::Bfs;
use tracing::{debug, trace};

use crate::graph::{StageGraph, StageId};

/// Result-validity tier.
///
/// A stage qualifies when it is cacheable, not a sink, and every path
/// through it stays within cacheable stages until it meets a cache
/// boundary (or a sink downstream, a source upstream). Only qualifying
/// stages carry a validity flag; all flags start cleared.
#[derive(Debug, Clone, Default)]
pub struct ResultCache {
    qualifying: BTreeSet<StageId>,
    forward: HashMap<StageId, BTreeSet<StageId>>,
    valid: HashMap<StageId, bool>,
}

impl ResultCache {
    /// Work out qualification and forward sets for the current topology.
    ///
    /// Expects an acyclic graph; a cyclic one yields an empty plan.
    pub fn plan(graph: &StageGraph) -> Self {
        let topo = match toposort(graph.inner(), None) {
            Ok(order) => order,
            Err(cycle) => {
                debug!(stage = cycle.node_id().index(), "cyclic graph, no result caching");
                return Self::default();
            }
        };

        // Upstream: every producer is a boundary or a cacheable stage with
        // the same property.
        let mut backward_ok: HashMap<StageId, bool> = HashMap::new();
        for s in topo.iter().copied() {
            let ok = graph.predecessors(s).into_iter().all(|p| {
                let flags = graph.flags(p);
                flags.is_cache_boundary
                    || (flags.is_cacheable && backward_ok.get(&p).copied().unwrap_or(false))
            });
            backward_ok.insert(s, ok);
        }

        // Downstream: every consumer is a boundary, a sink, or a cacheable
        // stage with the same property. Dead ends do not qualify.
        let mut forward_ok: HashMap<StageId, bool> = HashMap::new();
        for s in topo.iter().rev().copied() {
            let succs = graph.successors(s);
            let ok = if succs.is_empty() {
                graph.flags(s).is_sink
            } else {
                succs.into_iter().all(|t| {
                    let flags = graph.flags(t);
                    flags.is_cache_boundary
                        || flags.is_sink
                        || (flags.is_cacheable && forward_ok.get(&t).copied().unwrap_or(false))
                })
            };
            forward_ok.insert(s, ok);
        }

        let qualifying: BTreeSet<StageId> = topo
            .iter()
            .copied()
            .filter(|s| {
                let flags = graph.flags(*s);
                flags.is_cacheable
                    && !flags.is_sink
                    && forward_ok.get(s).copied().unwrap_or(false)
                    && backward_ok.get(s).copied().unwrap_or(false)
            })
            .collect();

        let forward = topo
            .iter()
            .copied()
            .map(|s| (s, forward_reachable(graph, s)))
            .collect();

        let valid = qualifying.iter().map(|s| (*s, false)).collect();

        debug!(
            qualifying = qualifying.len(),
            stages = graph.len(),
            "result cache planned"
        );
        Self {
            qualifying,
            forward,
            valid,
        }
    }

    pub fn qualifies(&self, stage: StageId) -> bool {
        self.qualifying.contains(&stage)
    }

    pub fn qualifying(&self) -> impl Iterator<Item = StageId> + '_ {
        self.qualifying.iter().copied()
    }

    /// Stages reachable downstream of `stage`, excluding itself.
    pub fn forward_set(&self, stage: StageId) -> Option<&BTreeSet<StageId>> {
        self.forward.get(&stage)
    }

    /// Always false for stages that do not qualify.
    pub fn is_valid(&self, stage: StageId) -> bool {
        self.valid.get(&stage).copied().unwrap_or(false)
    }

    /// Record a successful execution.
    pub fn mark_valid(&mut self, stage: StageId) {
        if let Some(flag) = self.valid.get_mut(&stage) {
            *flag = true;
        }
    }

    /// Clear `stage` and everything downstream of it.
    ///
    /// Returns the stages whose flag went from set to cleared.
    pub fn invalidate(&mut self, stage: StageId) -> Vec<StageId> {
        let mut cleared = Vec::new();
        let targets = std::iter::once(stage).chain(
            self.forward
                .get(&stage)
                .into_iter()
                .flat_map(|set| set.iter().copied()),
        );

        for s in targets {
            if let Some(flag) = self.valid.get_mut(&s) {
                if *flag {
                    cleared.push(s);
                }
                *flag = false;
            }
        }

        trace!(stage = stage.index(), cleared = cleared.len(), "invalidated");
        cleared
    }

    pub fn invalidate_all(&mut self) {
        for flag in self.valid.values_mut() {
            *flag = false;
        }
    }
}

fn forward_reachable(graph: &StageGraph, start: StageId) -> BTreeSet<StageId> {
    let mut reached = BTreeSet::new();
    let mut bfs = Bfs::new(graph.inner(), start);
    while let Some(node) = bfs.next(graph.inner()) {
        if node != start {
            reached.insert(node);
        }
    }
    reached
}
