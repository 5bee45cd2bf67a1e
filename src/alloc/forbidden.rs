// src/alloc/forbidden.rs

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, trace};

/// Identity of a slot pool shared between schedulers.
pub type PoolId = u64;

/// Identity of a scheduler publishing into a [`ForbiddenSet`].
pub type OwnerId = u64;

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

/// Fresh owner identity, unique for the process.
pub fn next_owner_id() -> OwnerId {
    NEXT_OWNER.fetch_add(1, Ordering::Relaxed)
}

/// The only way to change a [`ForbiddenSet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForbiddenMessage {
    /// Replace everything `owner` has published with `slots`.
    Add {
        pool: PoolId,
        owner: OwnerId,
        slots: BTreeSet<usize>,
    },
    /// Withdraw everything `owner` has published.
    Remove { pool: PoolId, owner: OwnerId },
}

impl ForbiddenMessage {
    pub fn pool(&self) -> PoolId {
        match self {
            ForbiddenMessage::Add { pool, .. } | ForbiddenMessage::Remove { pool, .. } => *pool,
        }
    }
}

/// Slots reserved by schedulers sharing one pool.
///
/// Shared as `Arc<ForbiddenSet>`. Every scheduler on the pool sees the
/// union of what the others have published and keeps those slots out of
/// its own free list.
#[derive(Debug)]
pub struct ForbiddenSet {
    pool: PoolId,
    entries: Mutex<BTreeMap<OwnerId, BTreeSet<usize>>>,
}

impl ForbiddenSet {
    pub fn new(pool: PoolId) -> Self {
        Self {
            pool,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn pool(&self) -> PoolId {
        self.pool
    }

    /// Apply a broadcast message. Messages for other pools are ignored.
    ///
    /// Returns whether the message was applied.
    pub fn apply(&self, message: ForbiddenMessage) -> bool {
        if message.pool() != self.pool {
            trace!(
                pool = self.pool,
                message_pool = message.pool(),
                "ignoring forbidden-set message for another pool"
            );
            return false;
        }

        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match message {
            ForbiddenMessage::Add { owner, slots, .. } => {
                debug!(pool = self.pool, owner, ?slots, "slots published");
                if slots.is_empty() {
                    entries.remove(&owner);
                } else {
                    entries.insert(owner, slots);
                }
            }
            ForbiddenMessage::Remove { owner, .. } => {
                if entries.remove(&owner).is_some() {
                    debug!(pool = self.pool, owner, "slots withdrawn");
                }
            }
        }
        true
    }

    /// Publish `slots` for `owner`, replacing any earlier publication.
    pub fn publish(&self, owner: OwnerId, slots: BTreeSet<usize>) {
        self.apply(ForbiddenMessage::Add {
            pool: self.pool,
            owner,
            slots,
        });
    }

    pub fn withdraw(&self, owner: OwnerId) {
        self.apply(ForbiddenMessage::Remove {
            pool: self.pool,
            owner,
        });
    }

    /// Slots `owner` must not use: everything published by other owners.
    pub fn forbidden_for(&self, owner: OwnerId) -> BTreeSet<usize> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .iter()
            .filter(|(o, _)| **o != owner)
            .flat_map(|(_, slots)| slots.iter().copied())
            .collect()
    }

    pub fn published_by(&self, owner: OwnerId) -> BTreeSet<usize> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(&owner).cloned().unwrap_or_default()
    }

    pub fn all(&self) -> BTreeSet<usize> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.values().flatten().copied().collect()
    }
}
