// src/graph/port.rs

use std::fmt;

use super::StageId;

/// What travels across a port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    /// Render-target image, backed by a slot of the pool.
    Image,
    /// Geometry registered in the shared geometry table.
    Geometry,
    /// Shared indirection cell holding a derived data object.
    VolumeHandle,
    /// Direct call into another stage's entry point.
    Coprocessor,
    /// Arbitrary value tagged with a type name.
    Generic { type_tag: String },
    /// Stage-internal image slot, never connected.
    Private,
}

impl PayloadKind {
    pub fn generic(type_tag: impl Into<String>) -> Self {
        PayloadKind::Generic {
            type_tag: type_tag.into(),
        }
    }

    /// Kinds that take part in data flow (and therefore in scheduling).
    pub fn is_data(&self) -> bool {
        !matches!(self, PayloadKind::Coprocessor | PayloadKind::Private)
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadKind::Image => f.write_str("image"),
            PayloadKind::Geometry => f.write_str("geometry"),
            PayloadKind::VolumeHandle => f.write_str("volume"),
            PayloadKind::Coprocessor => f.write_str("coprocessor"),
            PayloadKind::Generic { type_tag } => write!(f, "generic<{type_tag}>"),
            PayloadKind::Private => f.write_str("private"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortDirection {
    Input,
    Output,
}

/// Declaration of a single port on a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSpec {
    pub name: String,
    pub direction: PortDirection,
    pub kind: PayloadKind,
    /// Inputs only: accept more than one connection.
    pub multiple: bool,
    /// Image outputs only: the slot is never returned to the pool.
    pub persistent: bool,
}

impl PortSpec {
    pub fn input(name: impl Into<String>, kind: PayloadKind) -> Self {
        Self {
            name: name.into(),
            direction: PortDirection::Input,
            kind,
            multiple: false,
            persistent: false,
        }
    }

    pub fn output(name: impl Into<String>, kind: PayloadKind) -> Self {
        Self {
            name: name.into(),
            direction: PortDirection::Output,
            kind,
            multiple: false,
            persistent: false,
        }
    }

    /// A private image slot owned by the stage itself.
    pub fn private(name: impl Into<String>) -> Self {
        Self::output(name, PayloadKind::Private)
    }

    pub fn multiple(mut self) -> Self {
        self.multiple = true;
        self
    }

    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    pub fn is_input(&self) -> bool {
        self.direction == PortDirection::Input
    }

    pub fn is_output(&self) -> bool {
        self.direction == PortDirection::Output
    }
}

/// A port addressed by owning stage and declaration index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortRef {
    pub stage: StageId,
    pub port: usize,
}

impl PortRef {
    pub fn new(stage: StageId, port: usize) -> Self {
        Self { stage, port }
    }
}
