// src/engine/context.rs

use anyhow::{Context as _, Result, anyhow};

use crate::binding::{
    AnyValue, Binding, DerivedObject, GeometryHandle, SharedGeometryTable, TypedValue,
};
use crate::errors::BindingError;
use crate::graph::{StageGraph, StageId};

use super::CompiledGraph;

/// What a stage sees while it executes: its bindings and the stages it
/// may call.
///
/// The executing stage is checked out of the graph for the duration of
/// the call, so calls back into itself report it as busy.
pub struct StageContext<'a> {
    stage: StageId,
    graph: &'a mut StageGraph,
    compiled: &'a CompiledGraph,
    geometry: &'a SharedGeometryTable,
    tick: u64,
}

impl<'a> StageContext<'a> {
    pub(crate) fn new(
        stage: StageId,
        graph: &'a mut StageGraph,
        compiled: &'a CompiledGraph,
        geometry: &'a SharedGeometryTable,
        tick: u64,
    ) -> Self {
        Self {
            stage,
            graph,
            compiled,
            geometry,
            tick,
        }
    }

    pub fn stage_id(&self) -> StageId {
        self.stage
    }

    /// Sequence number of the running tick.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn binding(&self, port: &str, index: usize) -> Result<&Binding, BindingError> {
        self.compiled.binding(self.graph, self.stage, port, index)
    }

    /// Number of connections into an input port, rejected ones included.
    pub fn input_count(&self, port: &str) -> usize {
        match self.graph.port_index(self.stage, port) {
            Some(idx) => self
                .compiled
                .input_ids(crate::graph::PortRef::new(self.stage, idx))
                .len(),
            None => 0,
        }
    }

    /// Slot of an image or private port.
    pub fn slot(&self, port: &str, index: usize) -> Result<usize, BindingError> {
        let binding = self.binding(port, index)?;
        binding.slot().ok_or_else(|| self.wrong_kind(port, "slot"))
    }

    pub fn read_volume(&self, port: &str, index: usize) -> Result<Option<DerivedObject>, BindingError> {
        match self.binding(port, index)? {
            Binding::Volume(cell) => Ok(cell.get()),
            _ => Err(self.wrong_kind(port, "volume")),
        }
    }

    pub fn write_volume(&self, port: &str, object: DerivedObject) -> Result<(), BindingError> {
        match self.binding(port, 0)? {
            Binding::Volume(cell) => {
                cell.set(object);
                Ok(())
            }
            _ => Err(self.wrong_kind(port, "volume")),
        }
    }

    pub fn read_value(&self, port: &str, index: usize) -> Result<Option<TypedValue>, BindingError> {
        match self.binding(port, index)? {
            Binding::Generic(cell) => Ok(cell.get()),
            _ => Err(self.wrong_kind(port, "generic")),
        }
    }

    pub fn publish_value(&self, port: &str, value: TypedValue) -> Result<(), BindingError> {
        match self.binding(port, 0)? {
            Binding::Generic(cell) => cell.set(value).map_err(|rejected| BindingError::TypeTag {
                port: port.to_string(),
                expected: cell.type_tag().to_string(),
                found: rejected.type_tag().to_string(),
            }),
            _ => Err(self.wrong_kind(port, "generic")),
        }
    }

    pub fn geometry_handle(&self, port: &str, index: usize) -> Result<GeometryHandle, BindingError> {
        match self.binding(port, index)? {
            Binding::Geometry(handle) => Ok(*handle),
            _ => Err(self.wrong_kind(port, "geometry")),
        }
    }

    pub fn store_geometry(&self, port: &str, value: AnyValue) -> Result<(), BindingError> {
        let handle = self.geometry_handle(port, 0)?;
        let mut table = self.geometry.lock().unwrap_or_else(|e| e.into_inner());
        if table.store(handle, value) {
            Ok(())
        } else {
            Err(self.not_bound(port, 0))
        }
    }

    pub fn read_geometry(&self, port: &str, index: usize) -> Result<Option<AnyValue>, BindingError> {
        let handle = self.geometry_handle(port, index)?;
        let table = self.geometry.lock().unwrap_or_else(|e| e.into_inner());
        Ok(table.get(handle))
    }

    /// Call the stage behind the `index`-th binding of coprocessor input
    /// `port`.
    pub fn call(&mut self, port: &str, index: usize, args: &TypedValue) -> Result<TypedValue> {
        let target = match self.binding(port, index)? {
            Binding::Coprocessor(target) => target.clone(),
            _ => return Err(self.wrong_kind(port, "coprocessor").into()),
        };

        let label = self.graph.label(target.stage);
        let callee = self
            .graph
            .stage_mut(target.stage)
            .ok_or_else(|| anyhow!("coprocessor '{label}' is busy or gone"))?;
        callee
            .invoke(&target.entry, args)
            .with_context(|| format!("calling {label}.{}", target.entry))
    }

    fn wrong_kind(&self, port: &str, expected: &'static str) -> BindingError {
        BindingError::WrongKind {
            stage: self.graph.label(self.stage),
            port: port.to_string(),
            expected,
        }
    }

    fn not_bound(&self, port: &str, index: usize) -> BindingError {
        BindingError::NotBound {
            stage: self.graph.label(self.stage),
            port: port.to_string(),
            index,
        }
    }
}
