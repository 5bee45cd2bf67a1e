// src/graph/stage_graph.rs

use std::collections::HashMap;
use std::fmt;

use petgraph::Direction;
use petgraph::stable_graph::StableDiGraph;
use petgraph::visit::EdgeRef;
use tracing::debug;

use crate::errors::GraphError;

use super::{PortDirection, PortRef, PortSpec, Stage, StageFlags, StageId};

/// Edge weight: which ports a connection joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    pub from_port: usize,
    pub to_port: usize,
    /// Declaration order, unique within a graph.
    pub seq: u64,
}

/// A resolved connection between two ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub from: PortRef,
    pub to: PortRef,
    pub seq: u64,
}

pub(crate) struct StageNode {
    name: String,
    ports: Vec<PortSpec>,
    flags: StageFlags,
    /// `None` while the stage is executing.
    stage: Option<Box<dyn Stage>>,
}

impl fmt::Debug for StageNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageNode")
            .field("name", &self.name)
            .field("ports", &self.ports)
            .field("flags", &self.flags)
            .field("present", &self.stage.is_some())
            .finish()
    }
}

/// The user-assembled stage graph.
///
/// Owns every stage. Edges point from producer to consumer. Port
/// declarations and flags are captured when a stage is added, so the
/// scheduler can inspect them while the stage itself is busy executing.
#[derive(Debug, Default)]
pub struct StageGraph {
    graph: StableDiGraph<StageNode, Link>,
    names: HashMap<String, StageId>,
    /// Insertion order; node indices are recycled after removals.
    insertion: Vec<StageId>,
    next_seq: u64,
    revision: u64,
}

impl StageGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a boxed stage. Names must be unique.
    pub fn add_stage(&mut self, stage: Box<dyn Stage>) -> Result<StageId, GraphError> {
        let name = stage.name().to_string();
        if self.names.contains_key(&name) {
            return Err(GraphError::DuplicateStage(name));
        }

        let node = StageNode {
            name: name.clone(),
            ports: stage.ports(),
            flags: stage.flags(),
            stage: Some(stage),
        };
        let id = self.graph.add_node(node);
        self.names.insert(name.clone(), id);
        self.insertion.push(id);
        self.revision += 1;

        debug!(stage = %name, id = id.index(), "stage added");
        Ok(id)
    }

    pub fn add<S: Stage + 'static>(&mut self, stage: S) -> Result<StageId, GraphError> {
        self.add_stage(Box::new(stage))
    }

    /// Remove a stage together with all of its connections.
    pub fn remove_stage(&mut self, id: StageId) -> Option<Box<dyn Stage>> {
        let node = self.graph.remove_node(id)?;
        self.names.remove(&node.name);
        self.insertion.retain(|s| *s != id);
        self.revision += 1;

        debug!(stage = %node.name, "stage removed");
        node.stage
    }

    /// Connect `from.out_port` to `to.in_port`.
    ///
    /// Payload kinds are not compared here; mismatches surface when the
    /// graph is compiled.
    pub fn connect(
        &mut self,
        from: StageId,
        out_port: &str,
        to: StageId,
        in_port: &str,
    ) -> Result<(), GraphError> {
        let from_idx = self.resolve_port(from, out_port, PortDirection::Output)?;
        let to_idx = self.resolve_port(to, in_port, PortDirection::Input)?;

        let from_ref = PortRef::new(from, from_idx);
        let to_ref = PortRef::new(to, to_idx);
        let existing = self.connections_into(to_ref);

        if existing.iter().any(|c| c.from == from_ref) {
            return Err(GraphError::DuplicateConnection {
                from: self.port_label(from_ref),
                to: self.port_label(to_ref),
            });
        }

        let to_spec = &self.graph[to].ports[to_idx];
        if !to_spec.multiple && !existing.is_empty() {
            return Err(GraphError::PortAlreadyConnected {
                stage: self.graph[to].name.clone(),
                port: to_spec.name.clone(),
            });
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.graph.add_edge(
            from,
            to,
            Link {
                from_port: from_idx,
                to_port: to_idx,
                seq,
            },
        );
        self.revision += 1;

        debug!(
            from = %self.port_label(from_ref),
            to = %self.port_label(to_ref),
            seq,
            "connected"
        );
        Ok(())
    }

    /// Connect by stage names.
    pub fn connect_names(
        &mut self,
        from: &str,
        out_port: &str,
        to: &str,
        in_port: &str,
    ) -> Result<(), GraphError> {
        let from_id = self
            .stage_id(from)
            .ok_or_else(|| GraphError::UnknownStage(from.to_string()))?;
        let to_id = self
            .stage_id(to)
            .ok_or_else(|| GraphError::UnknownStage(to.to_string()))?;
        self.connect(from_id, out_port, to_id, in_port)
    }

    /// Remove a connection. Returns whether one existed.
    pub fn disconnect(&mut self, from: PortRef, to: PortRef) -> bool {
        let edge = self
            .graph
            .edges_directed(from.stage, Direction::Outgoing)
            .find(|e| {
                e.target() == to.stage
                    && e.weight().from_port == from.port
                    && e.weight().to_port == to.port
            })
            .map(|e| e.id());

        match edge {
            Some(edge) => {
                self.graph.remove_edge(edge);
                self.revision += 1;
                true
            }
            None => false,
        }
    }

    pub fn stage_id(&self, name: &str) -> Option<StageId> {
        self.names.get(name).copied()
    }

    /// Stage ids in insertion order.
    pub fn stage_ids(&self) -> impl Iterator<Item = StageId> + '_ {
        self.insertion.iter().copied()
    }

    pub fn contains(&self, id: StageId) -> bool {
        self.graph.contains_node(id)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Bumped on every structural edit.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn name(&self, id: StageId) -> Option<&str> {
        self.graph.node_weight(id).map(|n| n.name.as_str())
    }

    /// Name for diagnostics; never fails.
    pub fn label(&self, id: StageId) -> String {
        self.name(id)
            .map(str::to_string)
            .unwrap_or_else(|| format!("#{}", id.index()))
    }

    pub fn flags(&self, id: StageId) -> StageFlags {
        self.graph
            .node_weight(id)
            .map(|n| n.flags)
            .unwrap_or_default()
    }

    pub fn ports(&self, id: StageId) -> &[PortSpec] {
        self.graph
            .node_weight(id)
            .map(|n| n.ports.as_slice())
            .unwrap_or(&[])
    }

    pub fn port(&self, port: PortRef) -> Option<&PortSpec> {
        self.ports(port.stage).get(port.port)
    }

    pub fn port_index(&self, id: StageId, name: &str) -> Option<usize> {
        self.ports(id).iter().position(|p| p.name == name)
    }

    /// `stage.port` for diagnostics.
    pub fn port_label(&self, port: PortRef) -> String {
        let port_name = self
            .port(port)
            .map(|p| p.name.clone())
            .unwrap_or_else(|| format!("#{}", port.port));
        format!("{}.{}", self.label(port.stage), port_name)
    }

    /// Whether the stage declares at least one data input port.
    pub fn has_data_inputs(&self, id: StageId) -> bool {
        self.ports(id).iter().any(|p| p.is_input() && p.kind.is_data())
    }

    /// Connections into `id`, in declaration order.
    pub fn incoming(&self, id: StageId) -> Vec<Connection> {
        self.connections(id, Direction::Incoming)
    }

    /// Connections out of `id`, in declaration order.
    pub fn outgoing(&self, id: StageId) -> Vec<Connection> {
        self.connections(id, Direction::Outgoing)
    }

    pub fn connections_into(&self, port: PortRef) -> Vec<Connection> {
        let mut conns = self.incoming(port.stage);
        conns.retain(|c| c.to == port);
        conns
    }

    pub fn connections_from(&self, port: PortRef) -> Vec<Connection> {
        let mut conns = self.outgoing(port.stage);
        conns.retain(|c| c.from == port);
        conns
    }

    /// Distinct producers feeding `id` (data and coprocessor inputs).
    pub fn predecessors(&self, id: StageId) -> Vec<StageId> {
        let preds = self.incoming(id).into_iter().map(|c| c.from.stage).collect();
        dedup_unsorted(preds)
    }

    /// Distinct consumers fed by `id`.
    pub fn successors(&self, id: StageId) -> Vec<StageId> {
        let succs = self.outgoing(id).into_iter().map(|c| c.to.stage).collect();
        dedup_unsorted(succs)
    }

    pub fn stage(&self, id: StageId) -> Option<&dyn Stage> {
        self.graph
            .node_weight(id)
            .and_then(|n| n.stage.as_deref())
    }

    /// `None` if the stage does not exist or is currently executing.
    pub fn stage_mut(&mut self, id: StageId) -> Option<&mut (dyn Stage + 'static)> {
        self.graph
            .node_weight_mut(id)
            .and_then(|n| n.stage.as_deref_mut())
    }

    pub(crate) fn take_stage(&mut self, id: StageId) -> Option<Box<dyn Stage>> {
        self.graph.node_weight_mut(id).and_then(|n| n.stage.take())
    }

    pub(crate) fn restore_stage(&mut self, id: StageId, stage: Box<dyn Stage>) {
        if let Some(node) = self.graph.node_weight_mut(id) {
            node.stage = Some(stage);
        }
    }

    pub(crate) fn inner(&self) -> &StableDiGraph<StageNode, Link> {
        &self.graph
    }

    fn connections(&self, id: StageId, dir: Direction) -> Vec<Connection> {
        if !self.graph.contains_node(id) {
            return Vec::new();
        }
        let mut conns: Vec<Connection> = self
            .graph
            .edges_directed(id, dir)
            .map(|e| Connection {
                from: PortRef::new(e.source(), e.weight().from_port),
                to: PortRef::new(e.target(), e.weight().to_port),
                seq: e.weight().seq,
            })
            .collect();
        conns.sort_by_key(|c| c.seq);
        conns
    }

    fn resolve_port(
        &self,
        id: StageId,
        port: &str,
        direction: PortDirection,
    ) -> Result<usize, GraphError> {
        let node = self
            .graph
            .node_weight(id)
            .ok_or_else(|| GraphError::UnknownStage(format!("#{}", id.index())))?;

        let idx = node
            .ports
            .iter()
            .position(|p| p.name == port)
            .ok_or_else(|| GraphError::UnknownPort {
                stage: node.name.clone(),
                port: port.to_string(),
            })?;

        let spec = &node.ports[idx];
        let usable = spec.direction == direction && spec.kind != super::PayloadKind::Private;
        if !usable {
            return Err(GraphError::WrongDirection {
                stage: node.name.clone(),
                port: port.to_string(),
                expected: match direction {
                    PortDirection::Input => "an input",
                    PortDirection::Output => "an output",
                },
            });
        }
        Ok(idx)
    }
}

/// Drop repeated ids, keeping first occurrences in order.
fn dedup_unsorted(ids: Vec<StageId>) -> Vec<StageId> {
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}
