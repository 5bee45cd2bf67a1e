// src/alloc/slots.rs

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap};

use tracing::{debug, trace};

use crate::errors::ResourceExhaustionError;
use crate::graph::{PortRef, StageId};

/// Slot pool parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of slots, indices `[0, size)`.
    pub size: usize,
    /// Slot withheld for picking; never enters the free list.
    pub picking_slot: Option<usize>,
}

impl PoolConfig {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            picking_slot: None,
        }
    }

    pub fn with_picking_slot(mut self, slot: usize) -> Self {
        self.picking_slot = Some(slot);
        self
    }
}

/// Why a slot stays claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// Returned once every consumer has executed.
    Reusable,
    /// Declared persistent by the stage; published.
    Persistent,
    /// Stage-internal slot; published.
    Private,
    /// Feeds a sink; stays resident but is not published.
    Presented,
    /// Output of a result-cached stage; published.
    Cached,
}

impl Retention {
    /// Whether the slot goes into the ForbiddenSet.
    pub fn is_published(self) -> bool {
        matches!(
            self,
            Retention::Persistent | Retention::Private | Retention::Cached
        )
    }
}

/// One slot claim made during a compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRecord {
    pub producer: PortRef,
    pub slot: usize,
    pub retention: Retention,
    /// Scheduled consumers at allocation time.
    pub consumers: Vec<PortRef>,
    pending: Vec<PortRef>,
    /// Stage whose retirement returned the slot.
    pub released_by: Option<StageId>,
}

impl SlotRecord {
    pub fn is_released(&self) -> bool {
        self.released_by.is_some()
    }
}

/// Bounded render-target slot allocator.
///
/// Free slots live in a min-heap so the lowest index is always handed
/// out first.
#[derive(Debug)]
pub struct SlotAllocator {
    pool: PoolConfig,
    reuse: bool,
    free: BinaryHeap<Reverse<usize>>,
    records: Vec<SlotRecord>,
}

impl SlotAllocator {
    /// Seed the free list with `[0, size)` minus the picking slot and
    /// minus `forbidden`.
    pub fn new(pool: PoolConfig, forbidden: &BTreeSet<usize>, reuse: bool) -> Self {
        let free = (0..pool.size)
            .filter(|slot| Some(*slot) != pool.picking_slot)
            .filter(|slot| !forbidden.contains(slot))
            .map(Reverse)
            .collect();

        Self {
            pool,
            reuse,
            free,
            records: Vec::new(),
        }
    }

    /// Claim the lowest free slot for `producer`.
    ///
    /// `stage` and `port` only label the exhaustion error.
    pub fn allocate(
        &mut self,
        producer: PortRef,
        consumers: Vec<PortRef>,
        retention: Retention,
        stage: &str,
        port: &str,
    ) -> Result<usize, ResourceExhaustionError> {
        let Some(Reverse(slot)) = self.free.pop() else {
            return Err(ResourceExhaustionError {
                stage: stage.to_string(),
                port: port.to_string(),
                pool_size: self.pool.size,
            });
        };

        debug!(stage, port, slot, ?retention, "slot allocated");
        self.records.push(SlotRecord {
            producer,
            slot,
            retention,
            pending: consumers.clone(),
            consumers,
            released_by: None,
        });
        Ok(slot)
    }

    /// Mark every input of `stage` as consumed.
    ///
    /// Reusable records left without pending consumers return their slot
    /// to the free list. No-op when reuse is disabled.
    pub fn retire_stage(&mut self, stage: StageId) -> Vec<usize> {
        if !self.reuse {
            return Vec::new();
        }

        let mut released = Vec::new();
        for record in self.records.iter_mut() {
            if record.retention != Retention::Reusable || record.is_released() {
                continue;
            }
            record.pending.retain(|p| p.stage != stage);
            if record.pending.is_empty() {
                record.released_by = Some(stage);
                self.free.push(Reverse(record.slot));
                released.push(record.slot);
            }
        }

        if !released.is_empty() {
            trace!(stage = stage.index(), ?released, "slots returned to free list");
        }
        released
    }

    /// Current free list, ascending.
    pub fn free_slots(&self) -> Vec<usize> {
        let mut slots: Vec<usize> = self.free.iter().map(|Reverse(s)| *s).collect();
        slots.sort_unstable();
        slots
    }

    pub fn records(&self) -> &[SlotRecord] {
        &self.records
    }

    /// Slots this allocator publishes to the ForbiddenSet.
    pub fn published(&self) -> BTreeSet<usize> {
        self.records
            .iter()
            .filter(|r| r.retention.is_published())
            .map(|r| r.slot)
            .collect()
    }

    pub fn into_parts(self) -> (Vec<usize>, Vec<SlotRecord>) {
        let free = self.free_slots();
        (free, self.records)
    }
}
