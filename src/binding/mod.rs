// src/binding/mod.rs

//! Port bindings: the resolved payload behind every connected port.
//!
//! - [`payload`] defines the shared cells, values and the geometry table.
//! - [`router`] turns connections into [`Binding`]s and records fan-in
//!   order.

pub mod payload;
pub mod router;

use crate::graph::StageId;

pub use payload::{
    AnyValue, DerivedObject, GeometryHandle, GeometryTable, SharedGeometryTable, TypedCell,
    TypedValue, VolumeCell,
};
pub use router::{PortBindings, Router, check_compatible};

/// Index of a binding within one compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingId(pub usize);

/// Stage and entry point behind a coprocessor binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallTarget {
    pub stage: StageId,
    pub entry: String,
}

/// Resolved payload of one output port.
///
/// Created once per output and shared by every connected input.
#[derive(Debug, Clone)]
pub enum Binding {
    Image { slot: usize },
    Private { slot: usize },
    Geometry(GeometryHandle),
    Volume(VolumeCell),
    Coprocessor(CallTarget),
    Generic(TypedCell),
}

impl Binding {
    /// Slot index for image and private bindings.
    pub fn slot(&self) -> Option<usize> {
        match self {
            Binding::Image { slot } | Binding::Private { slot } => Some(*slot),
            _ => None,
        }
    }

    /// Stable text form, used for input descriptions.
    pub fn describe(&self) -> String {
        match self {
            Binding::Image { slot } => format!("image:{slot}"),
            Binding::Private { slot } => format!("private:{slot}"),
            Binding::Geometry(handle) => format!("geometry:{}", handle.0),
            Binding::Volume(cell) => cell.describe(),
            Binding::Coprocessor(target) => {
                format!("call:{}:{}", target.stage.index(), target.entry)
            }
            Binding::Generic(cell) => format!("typed:{}", cell.type_tag()),
        }
    }
}
