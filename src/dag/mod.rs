// src/dag/mod.rs

//! Graph validation and scheduling.
//!
//! - [`validate`] rejects cyclic graphs and graphs without sinks.
//! - [`priority`] assigns levels and derives the execution order.

pub mod priority;
pub mod validate;

pub use priority::{Priorities, UNSCHEDULED, assign_priorities};
pub use validate::{ValidatedGraph, find_cycle, validate_graph};
