// src/graph/stage.rs

use anyhow::{Result, bail};

use crate::binding::TypedValue;
use crate::engine::StageContext;

use super::PortSpec;

/// Scheduling and caching flags declared by a stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageFlags {
    /// Terminal stage whose completion is the goal of a tick.
    pub is_sink: bool,
    /// Output depends only on declared state and inputs.
    pub is_cacheable: bool,
    /// Only reachable through coprocessor calls.
    pub is_coprocessor_only: bool,
    /// Stops propagation of result-validity qualification.
    pub is_cache_boundary: bool,
}

/// Width and height of the active output surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputSize {
    pub width: u32,
    pub height: u32,
}

impl OutputSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// A unit of computation placed in a [`StageGraph`](super::StageGraph).
///
/// The scheduler never looks inside a stage; it only decides whether, when
/// and with which resources `execute` runs.
pub trait Stage: Send {
    /// Unique name within the owning graph.
    fn name(&self) -> &str;

    /// Port declarations. Read once when the stage is added to a graph.
    fn ports(&self) -> Vec<PortSpec>;

    fn flags(&self) -> StageFlags {
        StageFlags::default()
    }

    /// Serialized user-visible state, part of the derived-data fingerprint.
    fn declared_state(&self) -> String {
        String::new()
    }

    /// Overrides the router's description of the current input bindings.
    fn inport_config_descriptor(&self) -> Option<String> {
        None
    }

    /// Stages that are not ready are skipped for the tick.
    fn is_ready(&self) -> bool {
        true
    }

    /// Output size this stage renders at, if it renders to the surface.
    fn output_size(&self) -> Option<OutputSize> {
        None
    }

    fn set_output_size(&mut self, _size: OutputSize) {}

    fn execute(&mut self, ctx: &mut StageContext<'_>) -> Result<()>;

    /// Coprocessor entry point, called by consumers of this stage's
    /// coprocessor outputs.
    fn invoke(&mut self, entry: &str, _args: &TypedValue) -> Result<TypedValue> {
        bail!("stage '{}' has no entry point '{}'", self.name(), entry)
    }
}
