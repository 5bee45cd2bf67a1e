// src/graph/mod.rs

//! Stage graph model.
//!
//! - [`port`] declares payload kinds and port specs.
//! - [`stage`] holds the [`Stage`] trait implemented by collaborators.
//! - [`stage_graph`] stores stages and connections in a stable arena.

pub mod port;
pub mod stage;
pub mod stage_graph;

use petgraph::stable_graph::NodeIndex;

/// Stable identifier of a stage inside its [`StageGraph`].
pub type StageId = NodeIndex;

pub use port::{PayloadKind, PortDirection, PortRef, PortSpec};
pub use stage::{OutputSize, Stage, StageFlags};
pub use stage_graph::{Connection, Link, StageGraph};
