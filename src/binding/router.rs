// src/binding/router.rs

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::alloc::{Retention, SlotAllocator};
use crate::dag::Priorities;
use crate::errors::{PortBindingTypeMismatch, ResourceExhaustionError};
use crate::graph::{Connection, PayloadKind, PortRef, StageGraph, StageId};

use super::payload::{GeometryTable, TypedCell, VolumeCell};
use super::{Binding, BindingId, CallTarget};

/// Every binding of one compile, addressed by [`BindingId`].
#[derive(Debug, Clone, Default)]
pub struct PortBindings {
    bindings: Vec<Binding>,
    outputs: HashMap<PortRef, BindingId>,
    /// Inputs list producer bindings in declared connection order. A
    /// rejected connection keeps its position as `None`.
    inputs: HashMap<PortRef, Vec<Option<BindingId>>>,
    rejected: Vec<PortBindingTypeMismatch>,
}

impl PortBindings {
    pub fn get(&self, id: BindingId) -> Option<&Binding> {
        self.bindings.get(id.0)
    }

    pub fn output_id(&self, port: PortRef) -> Option<BindingId> {
        self.outputs.get(&port).copied()
    }

    pub fn output(&self, port: PortRef) -> Option<&Binding> {
        self.output_id(port).and_then(|id| self.get(id))
    }

    pub fn input_ids(&self, port: PortRef) -> &[Option<BindingId>] {
        self.inputs.get(&port).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn input(&self, port: PortRef, index: usize) -> Option<&Binding> {
        self.input_ids(port)
            .get(index)
            .copied()
            .flatten()
            .and_then(|id| self.get(id))
    }

    /// Connections left unbound because their kinds disagree.
    pub fn rejected(&self) -> &[PortBindingTypeMismatch] {
        &self.rejected
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Serialized description of the current input bindings of `stage`,
    /// in port declaration order.
    pub fn describe_inputs(&self, graph: &StageGraph, stage: StageId) -> String {
        graph
            .ports(stage)
            .iter()
            .enumerate()
            .filter(|(_, spec)| spec.is_input())
            .map(|(idx, spec)| {
                let ids = self.input_ids(PortRef::new(stage, idx));
                let bound = if ids.is_empty() {
                    "disconnected".to_string()
                } else {
                    ids.iter()
                        .map(|id| match id.and_then(|id| self.get(id)) {
                            Some(binding) => binding.describe(),
                            None => "unbound".to_string(),
                        })
                        .collect::<Vec<_>>()
                        .join("+")
                };
                format!("{}={}", spec.name, bound)
            })
            .collect::<Vec<_>>()
            .join(";")
    }
}

/// Resolves output ports to bindings, one stage at a time.
///
/// Stages must be routed in allocation order: image slots are claimed
/// through the shared [`SlotAllocator`], which recycles them as stages
/// retire.
pub struct Router<'a> {
    graph: &'a StageGraph,
    geometry: &'a mut GeometryTable,
    /// Input bindings tagged with connection sequence numbers.
    pending: HashMap<PortRef, Vec<(u64, Option<BindingId>)>>,
    out: PortBindings,
}

impl<'a> Router<'a> {
    pub fn new(graph: &'a StageGraph, geometry: &'a mut GeometryTable) -> Self {
        Self {
            graph,
            geometry,
            pending: HashMap::new(),
            out: PortBindings::default(),
        }
    }

    /// Bind every output port of `stage`, then retire it from the
    /// allocator's consumer records.
    ///
    /// `cached` marks a producer whose outputs must outlive the tick.
    pub fn route_stage(
        &mut self,
        stage: StageId,
        allocator: &mut SlotAllocator,
        priorities: &Priorities,
        cached: bool,
    ) -> Result<(), ResourceExhaustionError> {
        let graph = self.graph;
        let stage_name = graph.label(stage);

        for (idx, spec) in graph.ports(stage).iter().enumerate() {
            if !spec.is_output() {
                continue;
            }
            let port = PortRef::new(stage, idx);

            let accepted: Vec<Connection> = graph
                .connections_from(port)
                .into_iter()
                .filter(|conn| match check_compatible(graph, conn) {
                    Ok(()) => true,
                    Err(mismatch) => {
                        warn!(error = %mismatch, "connection left unbound");
                        self.out.rejected.push(mismatch);
                        self.pending.entry(conn.to).or_default().push((conn.seq, None));
                        false
                    }
                })
                .collect();

            let binding = match &spec.kind {
                PayloadKind::Image => {
                    if accepted.is_empty() {
                        debug!(stage = %stage_name, port = %spec.name, "unconnected image output, no slot");
                        continue;
                    }
                    // Unscheduled stages never execute, so nothing would write the slot.
                    if !priorities.is_scheduled(stage) {
                        debug!(stage = %stage_name, port = %spec.name, "unscheduled producer, no slot");
                        for conn in &accepted {
                            self.pending.entry(conn.to).or_default().push((conn.seq, None));
                        }
                        continue;
                    }
                    let consumers: Vec<PortRef> = accepted
                        .iter()
                        .map(|c| c.to)
                        .filter(|to| priorities.is_scheduled(to.stage))
                        .collect();
                    let feeds_sink = consumers
                        .iter()
                        .any(|to| graph.flags(to.stage).is_sink);
                    let retention = if spec.persistent {
                        Retention::Persistent
                    } else if cached {
                        Retention::Cached
                    } else if feeds_sink {
                        Retention::Presented
                    } else {
                        Retention::Reusable
                    };
                    let slot =
                        allocator.allocate(port, consumers, retention, &stage_name, &spec.name)?;
                    Binding::Image { slot }
                }
                PayloadKind::Private => {
                    let slot = allocator.allocate(
                        port,
                        Vec::new(),
                        Retention::Private,
                        &stage_name,
                        &spec.name,
                    )?;
                    Binding::Private { slot }
                }
                PayloadKind::Geometry => Binding::Geometry(self.geometry.register()),
                PayloadKind::VolumeHandle => Binding::Volume(VolumeCell::new()),
                PayloadKind::Coprocessor => Binding::Coprocessor(CallTarget {
                    stage,
                    entry: spec.name.clone(),
                }),
                PayloadKind::Generic { type_tag } => Binding::Generic(TypedCell::new(type_tag)),
            };

            let id = BindingId(self.out.bindings.len());
            debug!(stage = %stage_name, port = %spec.name, binding = %binding.describe(), "output bound");
            self.out.bindings.push(binding);
            self.out.outputs.insert(port, id);
            for conn in accepted {
                self.pending.entry(conn.to).or_default().push((conn.seq, Some(id)));
            }
        }

        allocator.retire_stage(stage);
        Ok(())
    }

    /// Order fan-in inputs by declared connection order and hand out the
    /// finished table.
    pub fn finish(mut self) -> PortBindings {
        for (port, mut tagged) in self.pending.drain() {
            tagged.sort_by_key(|(seq, _)| *seq);
            self.out
                .inputs
                .insert(port, tagged.into_iter().map(|(_, id)| id).collect());
        }
        self.out
    }
}

/// Producer and consumer must agree on kind, and on type tag for generic
/// ports.
pub fn check_compatible(
    graph: &StageGraph,
    conn: &Connection,
) -> Result<(), PortBindingTypeMismatch> {
    let producer = graph.port(conn.from);
    let consumer = graph.port(conn.to);

    match (producer, consumer) {
        (Some(p), Some(c)) if p.kind == c.kind => Ok(()),
        (p, c) => Err(PortBindingTypeMismatch {
            producer: graph.port_label(conn.from),
            consumer: graph.port_label(conn.to),
            expected: c
                .map(|c| c.kind.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            found: p
                .map(|p| p.kind.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        }),
    }
}
