// src/alloc/mod.rs

//! Render-target slot allocation.
//!
//! - [`slots`] hands out slot indices from a bounded pool and recycles them
//!   once every consumer has executed.
//! - [`forbidden`] is the per-pool registry of slots reserved by other
//!   schedulers.

pub mod forbidden;
pub mod slots;

pub use forbidden::{ForbiddenMessage, ForbiddenSet, OwnerId, PoolId, next_owner_id};
pub use slots::{PoolConfig, Retention, SlotAllocator, SlotRecord};
