#![allow(dead_code)]

use std::collections::BTreeMap;

use framedag::config::{
    CacheSection, ConfigFile, ConnectionConfig, EvaluatorSection, PortConfig, PortKind,
    RawConfigFile, StageConfig, StageRole,
};
use framedag::graph::{StageGraph, StageId};

use crate::stages::{ExecutionLog, TestStage, new_log};

/// Builder for a [`StageGraph`] of [`TestStage`]s sharing one log.
pub struct GraphBuilder {
    graph: StageGraph,
    log: ExecutionLog,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self {
            graph: StageGraph::new(),
            log: new_log(),
        }
    }

    pub fn log(&self) -> ExecutionLog {
        self.log.clone()
    }

    pub fn stage(mut self, stage: TestStage) -> Self {
        let stage = stage.log(&self.log);
        self.graph.add(stage).expect("duplicate stage in test graph");
        self
    }

    /// Connect `"A.out"` to `"B.in"`.
    pub fn connect(mut self, from: &str, to: &str) -> Self {
        let (from_stage, out_port) = from.split_once('.').expect("from must be stage.port");
        let (to_stage, in_port) = to.split_once('.').expect("to must be stage.port");
        self.graph
            .connect_names(from_stage, out_port, to_stage, in_port)
            .expect("invalid connection in test graph");
        self
    }

    pub fn build(self) -> (StageGraph, ExecutionLog) {
        (self.graph, self.log)
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// `names[0] -> names[1] -> ... -> names[n-1]` over image ports `out`/`in`.
///
/// The first stage is a source, the last one a sink.
pub fn image_chain(names: &[&str]) -> GraphBuilder {
    let mut builder = GraphBuilder::new();
    let last = names.len().saturating_sub(1);
    for (i, name) in names.iter().enumerate() {
        let mut stage = TestStage::new(name);
        if i > 0 {
            stage = stage.input("in", framedag::graph::PayloadKind::Image);
        }
        if i < last {
            stage = stage.output("out", framedag::graph::PayloadKind::Image);
        } else {
            stage = stage.sink();
        }
        builder = builder.stage(stage);
    }
    for pair in names.windows(2) {
        builder = builder.connect(&format!("{}.out", pair[0]), &format!("{}.in", pair[1]));
    }
    builder
}

/// Look up a stage id by name, panicking if missing.
pub fn id(graph: &StageGraph, name: &str) -> StageId {
    graph
        .stage_id(name)
        .unwrap_or_else(|| panic!("no stage named {name}"))
}

/// Builder for `ConfigFile` to simplify config tests.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                evaluator: EvaluatorSection::default(),
                cache: CacheSection::default(),
                stage: BTreeMap::new(),
                connection: Vec::new(),
            },
        }
    }

    pub fn pool(mut self, size: usize, picking_slot: Option<usize>) -> Self {
        self.config.evaluator.pool_size = size;
        self.config.evaluator.picking_slot = picking_slot;
        self
    }

    pub fn with_stage(mut self, name: &str, stage: StageConfig) -> Self {
        self.config.stage.insert(name.to_string(), stage);
        self
    }

    pub fn connect(mut self, from: &str, to: &str) -> Self {
        self.config.connection.push(ConnectionConfig {
            from: from.to_string(),
            to: to.to_string(),
        });
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `StageConfig`.
pub struct StageConfigBuilder {
    stage: StageConfig,
}

impl StageConfigBuilder {
    pub fn new(role: StageRole) -> Self {
        Self {
            stage: StageConfig {
                role,
                inputs: vec![],
                outputs: vec![],
                private: vec![],
                cacheable: false,
                boundary: false,
                state: String::new(),
                size: None,
                fail: false,
            },
        }
    }

    pub fn input(mut self, name: &str, kind: PortKind) -> Self {
        self.stage.inputs.push(port(name, kind));
        self
    }

    pub fn output(mut self, name: &str, kind: PortKind) -> Self {
        self.stage.outputs.push(port(name, kind));
        self
    }

    pub fn cacheable(mut self) -> Self {
        self.stage.cacheable = true;
        self
    }

    pub fn state(mut self, state: &str) -> Self {
        self.stage.state = state.to_string();
        self
    }

    pub fn build(self) -> StageConfig {
        self.stage
    }
}

fn port(name: &str, kind: PortKind) -> PortConfig {
    PortConfig {
        name: name.to_string(),
        kind,
        type_tag: None,
        multiple: false,
        persistent: false,
    }
}
