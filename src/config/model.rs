// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::alloc::PoolConfig;
use crate::engine::EvaluatorConfig;
use crate::graph::PayloadKind;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [evaluator]
/// pool_size = 8
/// picking_slot = 7
///
/// [stage.source]
/// role = "source"
/// cacheable = true
/// outputs = [{ name = "volume", kind = "volume" }]
///
/// [stage.canvas]
/// role = "sink"
/// inputs = [{ name = "volume", kind = "volume" }]
///
/// [[connection]]
/// from = "source.volume"
/// to = "canvas.volume"
/// ```
///
/// Only `[stage.<name>]` tables are required.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub evaluator: EvaluatorSection,

    #[serde(default)]
    pub cache: CacheSection,

    /// Keys are the stage names.
    #[serde(default)]
    pub stage: BTreeMap<String, StageConfig>,

    #[serde(default)]
    pub connection: Vec<ConnectionConfig>,
}

/// Validated configuration. Built from [`RawConfigFile`] via `TryFrom`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub evaluator: EvaluatorSection,
    pub cache: CacheSection,
    pub stage: BTreeMap<String, StageConfig>,
    pub connection: Vec<ConnectionConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            evaluator: raw.evaluator,
            cache: raw.cache,
            stage: raw.stage,
            connection: raw.connection,
        }
    }

    pub fn evaluator_config(&self) -> EvaluatorConfig {
        let mut pool = PoolConfig::new(self.evaluator.pool_size);
        pool.picking_slot = self.evaluator.picking_slot;
        EvaluatorConfig {
            pool,
            pool_id: self.evaluator.pool_id,
            reuse_slots: self.evaluator.reuse_slots,
            derived_cache: self.cache.enabled,
            derived_capacity: self.cache.capacity,
        }
    }
}

/// `[evaluator]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct EvaluatorSection {
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Slot withheld for picking. Omit to use every slot.
    #[serde(default)]
    pub picking_slot: Option<usize>,

    #[serde(default = "default_true")]
    pub reuse_slots: bool,

    /// Evaluators sharing a pool id exclude each other's reserved slots.
    #[serde(default)]
    pub pool_id: u64,
}

fn default_pool_size() -> usize {
    16
}

fn default_true() -> bool {
    true
}

fn default_capacity() -> usize {
    64
}

impl Default for EvaluatorSection {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            picking_slot: None,
            reuse_slots: true,
            pool_id: 0,
        }
    }
}

/// `[cache]` section: the derived-data tier.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum number of stored derived objects.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: default_capacity(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageRole {
    Source,
    #[default]
    Filter,
    Sink,
    /// Only reachable through coprocessor calls.
    Coprocessor,
}

/// `[stage.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct StageConfig {
    #[serde(default)]
    pub role: StageRole,

    #[serde(default)]
    pub inputs: Vec<PortConfig>,

    #[serde(default)]
    pub outputs: Vec<PortConfig>,

    /// Names of private image slots.
    #[serde(default)]
    pub private: Vec<String>,

    #[serde(default)]
    pub cacheable: bool,

    /// Marks a result-cache boundary.
    #[serde(default)]
    pub boundary: bool,

    /// Declared state, part of the derived-data fingerprint.
    #[serde(default)]
    pub state: String,

    /// Output size `[width, height]` for stages that render to the surface.
    #[serde(default)]
    pub size: Option<[u32; 2]>,

    /// Make every execution fail, for exercising error reporting.
    #[serde(default)]
    pub fail: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortKind {
    Image,
    Geometry,
    Volume,
    Coprocessor,
    Generic,
}

/// A port inside a stage's `inputs` or `outputs` list.
#[derive(Debug, Clone, Deserialize)]
pub struct PortConfig {
    pub name: String,
    pub kind: PortKind,

    /// Required for `kind = "generic"`.
    #[serde(default)]
    pub type_tag: Option<String>,

    #[serde(default)]
    pub multiple: bool,

    #[serde(default)]
    pub persistent: bool,
}

impl PortConfig {
    pub fn payload_kind(&self) -> PayloadKind {
        match self.kind {
            PortKind::Image => PayloadKind::Image,
            PortKind::Geometry => PayloadKind::Geometry,
            PortKind::Volume => PayloadKind::VolumeHandle,
            PortKind::Coprocessor => PayloadKind::Coprocessor,
            PortKind::Generic => {
                PayloadKind::generic(self.type_tag.clone().unwrap_or_default())
            }
        }
    }
}

/// `[[connection]]` entry: `from = "stage.port"`, `to = "stage.port"`.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    pub from: String,
    pub to: String,
}

impl ConnectionConfig {
    /// `(stage, port)` of the producing side.
    pub fn source(&self) -> Option<(&str, &str)> {
        self.from.split_once('.')
    }

    /// `(stage, port)` of the consuming side.
    pub fn target(&self) -> Option<(&str, &str)> {
        self.to.split_once('.')
    }
}
