// src/stages.rs

//! Config-driven stages used by the `framedag` binary.
//!
//! A [`ScriptedStage`] has no real computation. It fills its outputs with
//! values derived from its name, state and inputs, which is enough to drive
//! the scheduler, allocator and caches end to end.

use std::sync::Arc;

use anyhow::{Result, bail};
use tracing::{debug, info};

use crate::binding::{DerivedObject, TypedValue};
use crate::config::model::{ConfigFile, StageConfig, StageRole};
use crate::engine::StageContext;
use crate::errors::GraphError;
use crate::graph::{OutputSize, PayloadKind, PortSpec, Stage, StageFlags, StageGraph};

#[derive(Debug, Clone)]
pub struct ScriptedStage {
    name: String,
    ports: Vec<PortSpec>,
    flags: StageFlags,
    state: String,
    size: Option<OutputSize>,
    fail: bool,
}

impl ScriptedStage {
    pub fn from_config(name: &str, cfg: &StageConfig) -> Self {
        let mut ports = Vec::new();
        for port in cfg.inputs.iter() {
            let mut spec = PortSpec::input(&port.name, port.payload_kind());
            spec.multiple = port.multiple;
            ports.push(spec);
        }
        for port in cfg.outputs.iter() {
            let mut spec = PortSpec::output(&port.name, port.payload_kind());
            spec.persistent = port.persistent;
            ports.push(spec);
        }
        for private in cfg.private.iter() {
            ports.push(PortSpec::private(private));
        }

        let flags = StageFlags {
            is_sink: cfg.role == StageRole::Sink,
            is_cacheable: cfg.cacheable,
            is_coprocessor_only: cfg.role == StageRole::Coprocessor,
            is_cache_boundary: cfg.boundary,
        };

        Self {
            name: name.to_string(),
            ports,
            flags,
            state: cfg.state.clone(),
            size: cfg.size.map(|[w, h]| OutputSize::new(w, h)),
            fail: cfg.fail,
        }
    }

    pub fn set_state(&mut self, state: impl Into<String>) {
        self.state = state.into();
    }
}

impl Stage for ScriptedStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn ports(&self) -> Vec<PortSpec> {
        self.ports.clone()
    }

    fn flags(&self) -> StageFlags {
        self.flags
    }

    fn declared_state(&self) -> String {
        self.state.clone()
    }

    fn output_size(&self) -> Option<OutputSize> {
        self.size
    }

    fn set_output_size(&mut self, size: OutputSize) {
        if self.size.is_some() {
            self.size = Some(size);
        }
    }

    fn execute(&mut self, ctx: &mut StageContext<'_>) -> Result<()> {
        if self.fail {
            bail!("configured to fail");
        }

        // Gather what came in, calling coprocessors on the way.
        let mut seen = Vec::new();
        for spec in self.ports.iter().filter(|p| p.is_input()) {
            for index in 0..ctx.input_count(&spec.name) {
                if ctx.binding(&spec.name, index).is_err() {
                    seen.push("unbound".to_string());
                    continue;
                }
                match &spec.kind {
                    PayloadKind::Coprocessor => {
                        let answer = ctx.call(&spec.name, index, &TypedValue::unit())?;
                        seen.push(answer.type_tag().to_string());
                    }
                    PayloadKind::VolumeHandle => {
                        let digest = ctx
                            .read_volume(&spec.name, index)?
                            .map(|obj| obj.digest()[..8].to_string())
                            .unwrap_or_else(|| "empty".to_string());
                        seen.push(digest);
                    }
                    _ => seen.push(ctx.binding(&spec.name, index)?.describe()),
                }
            }
        }
        let summary = format!("{}|{}|{}", self.name, self.state, seen.join(","));

        for spec in self.ports.iter().filter(|p| p.is_output()) {
            let bound = ctx.binding(&spec.name, 0).is_ok();
            if !bound {
                continue;
            }
            match &spec.kind {
                PayloadKind::VolumeHandle => {
                    ctx.write_volume(&spec.name, DerivedObject::new(&summary, summary.clone()))?;
                }
                PayloadKind::Generic { type_tag } => {
                    ctx.publish_value(&spec.name, TypedValue::new(type_tag.clone(), summary.clone()))?;
                }
                PayloadKind::Geometry => {
                    ctx.store_geometry(&spec.name, Arc::new(summary.clone()))?;
                }
                PayloadKind::Image | PayloadKind::Private => {
                    let slot = ctx.slot(&spec.name, 0)?;
                    debug!(stage = %self.name, port = %spec.name, slot, "rendered into slot");
                }
                PayloadKind::Coprocessor => {}
            }
        }

        if self.flags.is_sink {
            info!(stage = %self.name, tick = ctx.tick(), inputs = %seen.join(","), "frame presented");
        }
        Ok(())
    }

    fn invoke(&mut self, entry: &str, _args: &TypedValue) -> Result<TypedValue> {
        debug!(stage = %self.name, entry, "coprocessor call");
        Ok(TypedValue::new(
            format!("{}.{}", self.name, entry),
            self.state.clone(),
        ))
    }
}

/// Build the graph described by a validated config.
pub fn build_graph(cfg: &ConfigFile) -> Result<StageGraph, GraphError> {
    let mut graph = StageGraph::new();
    for (name, stage) in cfg.stage.iter() {
        graph.add(ScriptedStage::from_config(name, stage))?;
    }

    for conn in cfg.connection.iter() {
        let (Some((from, out_port)), Some((to, in_port))) = (conn.source(), conn.target()) else {
            return Err(GraphError::UnknownPort {
                stage: conn.from.clone(),
                port: conn.to.clone(),
            });
        };
        graph.connect_names(from, out_port, to, in_port)?;
    }
    Ok(graph)
}
