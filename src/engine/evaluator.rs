// src/engine/evaluator.rs

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::alloc::{ForbiddenSet, OwnerId, SlotAllocator, next_owner_id};
use crate::binding::{GeometryTable, SharedGeometryTable};
use crate::cache::{CacheState, DerivedCache, DerivedStore, ResultCache};
use crate::errors::{CompileError, EvaluateError, StageExecutionError};
use crate::graph::{OutputSize, StageGraph, StageId};

use super::compile::{CompiledGraph, compile_graph};
use super::context::StageContext;
use super::hooks::{NullSurface, ProcessHook, RenderSurface};
use super::{EvaluatorConfig, InvalidationSender, TickReport};

/// Compiles a [`StageGraph`] and runs it one tick at a time.
///
/// Each evaluator is one scheduler on a slot pool: it publishes the slots
/// it keeps across ticks to the shared [`ForbiddenSet`] and withdraws
/// them when it recompiles or is dropped.
pub struct Evaluator {
    owner: OwnerId,
    config: EvaluatorConfig,
    forbidden: Arc<ForbiddenSet>,
    geometry: SharedGeometryTable,
    compiled: Option<CompiledGraph>,
    results: ResultCache,
    derived: DerivedCache,
    hooks: Vec<Box<dyn ProcessHook>>,
    surface: Box<dyn RenderSurface>,
    current_size: Option<OutputSize>,
    locked: bool,
    invalidation_tx: InvalidationSender,
    invalidation_rx: mpsc::UnboundedReceiver<StageId>,
    ticks: u64,
}

impl Evaluator {
    pub fn new(config: EvaluatorConfig, forbidden: Arc<ForbiddenSet>) -> Self {
        if forbidden.pool() != config.pool_id {
            warn!(
                configured = config.pool_id,
                shared = forbidden.pool(),
                "forbidden set belongs to a different pool"
            );
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let derived = DerivedCache::new(config.derived_cache, config.derived_capacity);

        Self {
            owner: next_owner_id(),
            config,
            forbidden,
            geometry: Arc::new(Mutex::new(GeometryTable::new())),
            compiled: None,
            results: ResultCache::default(),
            derived,
            hooks: Vec::new(),
            surface: Box::new(NullSurface::default()),
            current_size: None,
            locked: false,
            invalidation_tx: InvalidationSender(tx),
            invalidation_rx: rx,
            ticks: 0,
        }
    }

    pub fn with_surface(mut self, surface: Box<dyn RenderSurface>) -> Self {
        self.surface = surface;
        self
    }

    pub fn with_derived_store(mut self, store: Box<dyn DerivedStore>) -> Self {
        let enabled = self.derived.is_enabled();
        self.derived = DerivedCache::new(enabled, self.config.derived_capacity).with_store(store);
        self
    }

    pub fn add_hook(&mut self, hook: Box<dyn ProcessHook>) {
        self.hooks.push(hook);
    }

    pub fn owner_id(&self) -> OwnerId {
        self.owner
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    pub fn compiled(&self) -> Option<&CompiledGraph> {
        self.compiled.as_ref()
    }

    /// Whether `graph` changed since the last successful compile.
    pub fn is_stale(&self, graph: &StageGraph) -> bool {
        self.compiled
            .as_ref()
            .is_none_or(|c| c.revision() != graph.revision())
    }

    /// Compile `graph`, replacing the current compile on success.
    ///
    /// A failed compile publishes nothing and leaves the previous compile
    /// in effect.
    pub fn compile(&mut self, graph: &StageGraph) -> Result<&CompiledGraph, CompileError> {
        let forbidden = self.forbidden.forbidden_for(self.owner);
        let mut staging = {
            let table = self.geometry.lock().unwrap_or_else(|e| e.into_inner());
            GeometryTable::continuing_from(&table)
        };

        let (compiled, results) =
            match compile_graph(graph, &self.config, &forbidden, &mut staging) {
                Ok(done) => done,
                Err(err) => {
                    warn!(error = %err, "compile failed; previous compile stays in effect");
                    return Err(err);
                }
            };

        // Add replaces the previous publication wholesale.
        self.forbidden
            .publish(self.owner, compiled.published_slots().clone());
        *self.geometry.lock().unwrap_or_else(|e| e.into_inner()) = staging;
        self.results = results;
        self.derived.seed(graph);
        self.current_size = None;

        info!(
            owner = self.owner,
            order = compiled.order().len(),
            published = compiled.published_slots().len(),
            "compile installed"
        );
        Ok(self.compiled.insert(compiled))
    }

    /// Run one tick over the compiled order.
    ///
    /// Stage failures are collected in the report; they never abort the
    /// tick.
    pub fn evaluate(&mut self, graph: &mut StageGraph) -> Result<TickReport, EvaluateError> {
        if self.locked {
            return Err(EvaluateError::Locked);
        }
        if self.compiled.is_none() {
            return Err(EvaluateError::NotCompiled);
        }
        self.drain_invalidations();
        self.ticks += 1;
        let tick = self.ticks;

        let Self {
            compiled,
            results,
            derived,
            hooks,
            surface,
            current_size,
            geometry,
            ..
        } = self;
        let Some(compiled) = compiled.as_ref() else {
            return Err(EvaluateError::NotCompiled);
        };
        if compiled.revision() != graph.revision() {
            debug!("graph edited since compile; running the previous compile");
        }

        let mut report = TickReport::new(tick);
        for hook in hooks.iter_mut() {
            hook.before_tick(tick);
        }

        for &stage in compiled.order() {
            let Some(name) = compiled.stage_name(stage) else {
                continue;
            };
            if graph.name(stage) != Some(name) {
                debug!(stage = %name, "stage removed since compile; skipped");
                report.removed.push(stage);
                continue;
            }

            if results.is_valid(stage) {
                trace!(stage = %name, "result still valid");
                report.skipped.push(stage);
                continue;
            }

            let mut live = None;
            if derived.is_enabled() {
                match derived.cache_state(graph, compiled.bindings(), stage) {
                    Ok(CacheState::Fresh) => {
                        trace!(stage = %name, "fingerprint unchanged");
                        report.skipped.push(stage);
                        continue;
                    }
                    Ok(CacheState::Stale(fingerprint)) => {
                        if derived.restore(graph, compiled.bindings(), stage, &fingerprint) {
                            results.mark_valid(stage);
                            report.restored.push(stage);
                            continue;
                        }
                        live = Some(fingerprint);
                    }
                    Err(err) => trace!(stage = %name, error = %err, "derived tier not consulted"),
                }
            }

            if !graph.stage(stage).is_some_and(|s| s.is_ready()) {
                warn!(stage = %name, "stage not ready; skipped this tick");
                report.not_ready.push(stage);
                continue;
            }

            for hook in hooks.iter_mut() {
                hook.before_stage(name);
            }

            let wanted = graph.stage(stage).and_then(|s| s.output_size());
            if let Some(size) = wanted.filter(|size| *current_size != Some(*size)) {
                debug!(stage = %name, width = size.width, height = size.height, "output size changed");
                surface.set_viewport(size);
                *current_size = Some(size);
                report.resizes += 1;
            }

            let outcome = run_stage(graph, compiled, geometry, stage, tick);

            for hook in hooks.iter_mut() {
                hook.after_stage(name, outcome.is_ok());
            }

            match outcome {
                Ok(()) => {
                    results.mark_valid(stage);
                    if let Some(fingerprint) = live {
                        derived.publish(graph, compiled.bindings(), stage, &fingerprint);
                    }
                    report.executed.push(stage);
                }
                Err(cause) => {
                    error!(stage = %name, error = %format!("{cause:#}"), "stage execution failed");
                    report.failures.push(StageExecutionError {
                        stage: name.to_string(),
                        cause,
                    });
                }
            }
        }

        for hook in hooks.iter_mut() {
            hook.after_tick(&report);
        }
        debug!(
            tick,
            executed = report.executed.len(),
            skipped = report.skipped.len(),
            restored = report.restored.len(),
            failed = report.failures.len(),
            "tick finished"
        );
        Ok(report)
    }

    /// Clear the validity of `stage` and everything downstream of it.
    pub fn invalidate(&mut self, stage: StageId) -> Vec<StageId> {
        self.results.invalidate(stage)
    }

    pub fn invalidate_all(&mut self) {
        self.results.invalidate_all();
        debug!("all results invalidated");
    }

    /// Sender for invalidation requests from other threads; drained at the
    /// start of every tick.
    pub fn invalidation_sender(&self) -> InvalidationSender {
        self.invalidation_tx.clone()
    }

    /// Apply queued invalidation requests now. Returns how many there were.
    pub fn drain_invalidations(&mut self) -> usize {
        let mut drained = 0;
        while let Ok(stage) = self.invalidation_rx.try_recv() {
            self.results.invalidate(stage);
            drained += 1;
        }
        if drained > 0 {
            debug!(drained, "invalidation requests applied");
        }
        drained
    }

    pub fn is_valid(&self, stage: StageId) -> bool {
        self.results.is_valid(stage)
    }

    pub fn result_cache(&self) -> &ResultCache {
        &self.results
    }

    pub fn derived_cache(&self) -> &DerivedCache {
        &self.derived
    }

    pub fn set_derived_caching(&mut self, enabled: bool) {
        self.derived.set_enabled(enabled);
        info!(enabled, "derived-data caching toggled");
    }

    pub fn lock(&mut self) {
        self.locked = true;
    }

    pub fn unlock(&mut self) {
        self.locked = false;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Broadcast a new output size to every stage and apply it to the
    /// surface.
    pub fn set_output_size(&mut self, graph: &mut StageGraph, size: OutputSize) {
        let ids: Vec<StageId> = graph.stage_ids().collect();
        for id in ids {
            if let Some(stage) = graph.stage_mut(id) {
                stage.set_output_size(size);
            }
        }
        if self.current_size != Some(size) {
            debug!(width = size.width, height = size.height, "output size set");
            self.surface.set_viewport(size);
            self.current_size = Some(size);
        }
    }

    pub fn current_output_size(&self) -> Option<OutputSize> {
        self.current_size
    }

    pub fn geometry(&self) -> SharedGeometryTable {
        Arc::clone(&self.geometry)
    }

    /// Free list of the current compile, or the initial pool before the
    /// first successful compile.
    pub fn free_slots(&self) -> Vec<usize> {
        match &self.compiled {
            Some(compiled) => compiled.free_slots().to_vec(),
            None => {
                let forbidden = self.forbidden.forbidden_for(self.owner);
                SlotAllocator::new(self.config.pool, &forbidden, self.config.reuse_slots)
                    .free_slots()
            }
        }
    }

    pub fn tick_count(&self) -> u64 {
        self.ticks
    }
}

impl Drop for Evaluator {
    fn drop(&mut self) {
        self.forbidden.withdraw(self.owner);
    }
}

impl fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Evaluator")
            .field("owner", &self.owner)
            .field("compiled", &self.compiled.is_some())
            .field("locked", &self.locked)
            .field("ticks", &self.ticks)
            .finish_non_exhaustive()
    }
}

/// Check the stage out of the graph, execute it, and put it back.
fn run_stage(
    graph: &mut StageGraph,
    compiled: &CompiledGraph,
    geometry: &SharedGeometryTable,
    stage: StageId,
    tick: u64,
) -> anyhow::Result<()> {
    let Some(mut instance) = graph.take_stage(stage) else {
        bail!("stage is busy or gone");
    };

    let outcome = {
        let mut ctx = StageContext::new(stage, graph, compiled, geometry, tick);
        panic::catch_unwind(AssertUnwindSafe(|| instance.execute(&mut ctx)))
    };
    graph.restore_stage(stage, instance);

    match outcome {
        Ok(result) => result,
        Err(payload) => Err(anyhow!("stage panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
