// src/binding/payload.rs

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

/// Type-erased shared value.
pub type AnyValue = Arc<dyn Any + Send + Sync>;

/// A value carrying the name of its type, for generic ports and
/// coprocessor calls.
#[derive(Clone)]
pub struct TypedValue {
    type_tag: String,
    value: AnyValue,
}

impl TypedValue {
    pub fn new<T: Any + Send + Sync>(type_tag: impl Into<String>, value: T) -> Self {
        Self {
            type_tag: type_tag.into(),
            value: Arc::new(value),
        }
    }

    /// Empty argument for calls that take none.
    pub fn unit() -> Self {
        Self::new("unit", ())
    }

    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }
}

impl fmt::Debug for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedValue")
            .field("type_tag", &self.type_tag)
            .finish_non_exhaustive()
    }
}

/// Derived data (e.g. a preprocessed volume) identified by the digest of
/// the descriptor it was built from.
#[derive(Clone)]
pub struct DerivedObject {
    digest: String,
    value: AnyValue,
}

impl DerivedObject {
    pub fn new<T: Any + Send + Sync>(descriptor: &str, value: T) -> Self {
        Self {
            digest: blake3::hash(descriptor.as_bytes()).to_hex().to_string(),
            value: Arc::new(value),
        }
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }
}

impl fmt::Debug for DerivedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedObject")
            .field("digest", &self.digest)
            .finish_non_exhaustive()
    }
}

/// Shared indirection cell behind a volume-handle binding.
///
/// Producer, consumers and the derived-data cache all hold the same cell;
/// the cache may overwrite the content in place.
#[derive(Clone, Default)]
pub struct VolumeCell(Arc<RwLock<Option<DerivedObject>>>);

impl VolumeCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<DerivedObject> {
        self.0.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set(&self, object: DerivedObject) {
        *self.0.write().unwrap_or_else(|e| e.into_inner()) = Some(object);
    }

    pub fn clear(&self) {
        *self.0.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn same_cell(&self, other: &VolumeCell) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Content identity: the digest of the held object.
    pub fn describe(&self) -> String {
        match self.get() {
            Some(obj) => format!("volume:{}", obj.digest()),
            None => "volume:empty".to_string(),
        }
    }
}

impl fmt::Debug for VolumeCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("VolumeCell").field(&self.describe()).finish()
    }
}

/// Type-tagged cell behind a generic binding.
#[derive(Clone)]
pub struct TypedCell {
    type_tag: String,
    value: Arc<RwLock<Option<TypedValue>>>,
}

impl TypedCell {
    pub fn new(type_tag: impl Into<String>) -> Self {
        Self {
            type_tag: type_tag.into(),
            value: Arc::new(RwLock::new(None)),
        }
    }

    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    pub fn get(&self) -> Option<TypedValue> {
        self.value.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Store `value` if its tag matches; hands it back otherwise.
    pub fn set(&self, value: TypedValue) -> Result<(), TypedValue> {
        if value.type_tag() != self.type_tag {
            return Err(value);
        }
        *self.value.write().unwrap_or_else(|e| e.into_inner()) = Some(value);
        Ok(())
    }

    pub fn same_cell(&self, other: &TypedCell) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }
}

impl fmt::Debug for TypedCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedCell")
            .field("type_tag", &self.type_tag)
            .field("filled", &self.get().is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeometryHandle(pub u64);

/// Registry of geometry produced during a compile.
///
/// Handles come from a counter that only ever grows, including across
/// compiles, so a stale handle never aliases a fresh one.
#[derive(Default)]
pub struct GeometryTable {
    next: u64,
    entries: BTreeMap<GeometryHandle, Option<AnyValue>>,
}

pub type SharedGeometryTable = Arc<Mutex<GeometryTable>>;

impl GeometryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty table whose counter continues from `previous`.
    pub fn continuing_from(previous: &GeometryTable) -> Self {
        Self {
            next: previous.next,
            entries: BTreeMap::new(),
        }
    }

    pub fn register(&mut self) -> GeometryHandle {
        let handle = GeometryHandle(self.next);
        self.next += 1;
        self.entries.insert(handle, None);
        handle
    }

    /// Returns false for handles not registered in this table.
    pub fn store(&mut self, handle: GeometryHandle, value: AnyValue) -> bool {
        match self.entries.get_mut(&handle) {
            Some(slot) => {
                *slot = Some(value);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, handle: GeometryHandle) -> Option<AnyValue> {
        self.entries.get(&handle).cloned().flatten()
    }

    pub fn contains(&self, handle: GeometryHandle) -> bool {
        self.entries.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for GeometryTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeometryTable")
            .field("next", &self.next)
            .field("handles", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}
