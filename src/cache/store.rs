// src/cache/store.rs

use std::collections::HashMap;
use std::fmt;

use tracing::{debug, trace};

use crate::binding::DerivedObject;

/// Content-addressed key of a derived object.
///
/// Built from stage name, output port, input description and declared
/// state; the digest of those parts is the lookup key and the label is
/// for logs.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    digest: String,
    label: String,
}

impl CacheKey {
    pub fn new(stage: &str, port: &str, inputs: &str, state: &str) -> Self {
        let label = format!("Stage{stage}.Outport{port}.InportConfig{inputs}.State{state}");
        // Length-prefixed parts, so names containing '.' cannot collide.
        let mut hasher = blake3::Hasher::new();
        for part in [stage, port, inputs, state] {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        let digest = hasher.finalize().to_hex().to_string();
        Self { digest, label }
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", &self.digest[..12.min(self.digest.len())])
    }
}

/// Storage for derived objects.
pub trait DerivedStore: Send {
    /// Look up `key`, counting a read on hit.
    fn find(&mut self, key: &CacheKey) -> Option<DerivedObject>;
    fn insert(&mut self, key: CacheKey, object: DerivedObject);
    fn contains(&self, key: &CacheKey) -> bool;
    fn clear(&mut self);
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
struct StoreEntry {
    object: DerivedObject,
    reads: u64,
    inserted: u64,
}

/// In-memory store with a fixed capacity.
///
/// When full, the entry with the fewest reads goes first; ties go to the
/// oldest insertion.
#[derive(Debug)]
pub struct MemoryDerivedStore {
    capacity: usize,
    entries: HashMap<String, StoreEntry>,
    clock: u64,
}

impl MemoryDerivedStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            clock: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Hits recorded for `key`.
    pub fn reads(&self, key: &CacheKey) -> Option<u64> {
        self.entries.get(key.digest()).map(|e| e.reads)
    }

    fn evict_one(&mut self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, e)| (e.reads, e.inserted))
            .map(|(digest, _)| digest.clone());

        if let Some(digest) = victim {
            self.entries.remove(&digest);
            debug!(digest = %digest, "evicted derived object");
        }
    }
}

impl DerivedStore for MemoryDerivedStore {
    fn find(&mut self, key: &CacheKey) -> Option<DerivedObject> {
        let entry = self.entries.get_mut(key.digest())?;
        entry.reads += 1;
        trace!(key = %key.label(), reads = entry.reads, "derived store hit");
        Some(entry.object.clone())
    }

    fn insert(&mut self, key: CacheKey, object: DerivedObject) {
        if self.capacity == 0 {
            return;
        }
        self.clock += 1;

        if let Some(entry) = self.entries.get_mut(key.digest()) {
            entry.object = object;
            entry.inserted = self.clock;
            return;
        }

        while self.entries.len() >= self.capacity {
            self.evict_one();
        }
        trace!(key = %key.label(), "derived store insert");
        self.entries.insert(
            key.digest,
            StoreEntry {
                object,
                reads: 0,
                inserted: self.clock,
            },
        );
    }

    fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key.digest())
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
