// src/errors.rs

//! Crate-wide error types and aliases.
//!
//! Compile-phase failures ([`GraphInvalidError`], [`ResourceExhaustionError`])
//! abort the whole compile. [`PortBindingTypeMismatch`] only rejects the
//! offending connection. Run-time failures ([`StageExecutionError`],
//! [`CacheStateError`]) are reported per stage and never abort a tick.

use thiserror::Error;

/// Structural problems detected before any resource is allocated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphInvalidError {
    #[error("cycle detected in stage graph: {}", stages.join(" -> "))]
    CycleDetected { stages: Vec<String> },

    #[error("stage graph has no sink stage")]
    NoSink,
}

/// The slot pool ran dry while binding an image output.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("no free render-target slot for {stage}.{port} (pool size {pool_size})")]
pub struct ResourceExhaustionError {
    pub stage: String,
    pub port: String,
    pub pool_size: usize,
}

/// A connection whose producer and consumer disagree on the payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot bind {producer} -> {consumer}: consumer expects {expected}, producer declares {found}")]
pub struct PortBindingTypeMismatch {
    /// `stage.port` of the producing output.
    pub producer: String,
    /// `stage.port` of the consuming input.
    pub consumer: String,
    pub expected: String,
    pub found: String,
}

/// Failure of a single stage during a tick.
#[derive(Error, Debug)]
#[error("stage '{stage}' failed: {cause:#}")]
pub struct StageExecutionError {
    pub stage: String,
    pub cause: anyhow::Error,
}

/// Reasons the derived-data tier cannot answer for a stage.
///
/// Both degrade to "needs execution".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheStateError {
    #[error("no fingerprint record for stage '{0}'")]
    ProcessorMissing(String),

    #[error("stage '{0}' is not compatible with the derived-data cache")]
    Incompatible(String),
}

/// Everything that can fail a compile.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error(transparent)]
    Graph(#[from] GraphInvalidError),

    #[error(transparent)]
    Exhausted(#[from] ResourceExhaustionError),
}

/// Errors raised while editing a [`StageGraph`](crate::graph::StageGraph).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("stage '{0}' already exists")]
    DuplicateStage(String),

    #[error("unknown stage '{0}'")]
    UnknownStage(String),

    #[error("stage '{stage}' has no port '{port}'")]
    UnknownPort { stage: String, port: String },

    #[error("port {stage}.{port} cannot be used as {expected}")]
    WrongDirection {
        stage: String,
        port: String,
        expected: &'static str,
    },

    #[error("input {stage}.{port} accepts a single connection and is already connected")]
    PortAlreadyConnected { stage: String, port: String },

    #[error("connection {from} -> {to} already exists")]
    DuplicateConnection { from: String, to: String },
}

/// Errors returned by binding queries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindingError {
    #[error("port {stage}.{port} is not bound (index {index})")]
    NotBound {
        stage: String,
        port: String,
        index: usize,
    },

    #[error("stage '{stage}' has no port '{port}'")]
    UnknownPort { stage: String, port: String },

    #[error("port {stage}.{port} is not a {expected} binding")]
    WrongKind {
        stage: String,
        port: String,
        expected: &'static str,
    },

    #[error("port {port} carries '{expected}' values, got '{found}'")]
    TypeTag {
        port: String,
        expected: String,
        found: String,
    },
}

/// Errors returned by [`Evaluator::evaluate`](crate::engine::Evaluator::evaluate).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvaluateError {
    #[error("evaluator has no compiled graph")]
    NotCompiled,

    #[error("evaluator is locked")]
    Locked,
}

#[derive(Error, Debug)]
pub enum FramedagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Evaluate(#[from] EvaluateError),

    #[error(transparent)]
    Binding(#[from] BindingError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, FramedagError>;
