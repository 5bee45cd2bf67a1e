// src/engine/mod.rs

//! Compile pipeline and per-tick execution.
//!
//! [`compile`] runs validation, scheduling, allocation and binding once per
//! topology change. [`Evaluator`] owns the result and drives ticks,
//! consulting both cache tiers before executing a stage.

pub mod compile;
pub mod context;
pub mod evaluator;
pub mod hooks;

use tokio::sync::mpsc;

use crate::alloc::{PoolConfig, PoolId};
use crate::errors::StageExecutionError;
use crate::graph::StageId;

pub use compile::{CompiledGraph, compile_graph};
pub use context::StageContext;
pub use evaluator::Evaluator;
pub use hooks::{NullSurface, ProcessHook, RenderSurface, TimingHook};

/// Runtime settings of one evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluatorConfig {
    pub pool: PoolConfig,
    /// Identity of the shared pool; ForbiddenSet messages are scoped to it.
    pub pool_id: PoolId,
    /// Return slots to the pool once all their consumers have executed.
    pub reuse_slots: bool,
    pub derived_cache: bool,
    /// Maximum number of objects in the derived-data store.
    pub derived_capacity: usize,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::new(16).with_picking_slot(15),
            pool_id: 0,
            reuse_slots: true,
            derived_cache: true,
            derived_capacity: 64,
        }
    }
}

impl EvaluatorConfig {
    /// Pool of `size` slots with no picking slot.
    pub fn with_pool_size(size: usize) -> Self {
        Self {
            pool: PoolConfig::new(size),
            ..Self::default()
        }
    }

    pub fn reuse(mut self, enabled: bool) -> Self {
        self.reuse_slots = enabled;
        self
    }
}

/// What happened during one tick.
#[derive(Debug, Default)]
pub struct TickReport {
    pub tick: u64,
    pub executed: Vec<StageId>,
    /// Skipped because a cache tier reported the result still valid.
    pub skipped: Vec<StageId>,
    /// Outputs injected from the derived-data store.
    pub restored: Vec<StageId>,
    pub not_ready: Vec<StageId>,
    /// Removed from the graph after the compile.
    pub removed: Vec<StageId>,
    pub failures: Vec<StageExecutionError>,
    /// Viewport changes applied during the tick.
    pub resizes: u32,
}

impl TickReport {
    pub fn new(tick: u64) -> Self {
        Self {
            tick,
            ..Self::default()
        }
    }

    pub fn success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed(&self) -> impl Iterator<Item = &str> {
        self.failures.iter().map(|f| f.stage.as_str())
    }
}

/// Cloneable handle for requesting invalidation of a stage from any
/// thread. Requests are applied at the start of the next tick.
#[derive(Debug, Clone)]
pub struct InvalidationSender(pub(crate) mpsc::UnboundedSender<StageId>);

impl InvalidationSender {
    /// Returns false if the evaluator is gone.
    pub fn send(&self, stage: StageId) -> bool {
        self.0.send(stage).is_ok()
    }
}
