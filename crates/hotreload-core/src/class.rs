use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::adapters::ClassShape;
use crate::fs::package_of;
use crate::hash::ContentHash;
use crate::registry::SourceUnit;

/// The source version a class's current bytecode was built from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassOrigin {
    pub source_hash: ContentHash,
    pub signature_checksum: Option<u32>,
}

impl ClassOrigin {
    /// Origin of the unit's current derived state; `None` until its source
    /// is loaded
    pub fn of_unit(unit: &SourceUnit, salt: &str) -> Option<Self> {
        Some(Self {
            source_hash: unit.content_hash(salt)?,
            signature_checksum: unit.signature_checksum(),
        })
    }
}

/// A class defined in the running process.
///
/// Identity survives hot swaps: redefinition replaces the bytecode in place.
#[derive(Debug)]
pub struct RuntimeClass {
    name: String,
    package: Option<String>,
    shape: ClassShape,
    bytecode: RwLock<Arc<[u8]>>,
    origin: RwLock<Option<ClassOrigin>>,
    redefinitions: AtomicU32,
}

impl RuntimeClass {
    pub fn new(name: impl Into<String>, shape: ClassShape, bytecode: Arc<[u8]>) -> Self {
        let name = name.into();
        let package = package_of(&name).map(str::to_string);
        Self {
            name,
            package,
            shape,
            bytecode: RwLock::new(bytecode),
            origin: RwLock::new(None),
            redefinitions: AtomicU32::new(0),
        }
    }

    pub fn with_origin(self, origin: ClassOrigin) -> Self {
        *self.origin.write() = Some(origin);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn package(&self) -> Option<&str> {
        self.package.as_deref()
    }

    pub fn supertypes(&self) -> &[String] {
        &self.shape.supertypes
    }

    pub fn annotations(&self) -> &[String] {
        &self.shape.annotations
    }

    pub fn bytecode(&self) -> Arc<[u8]> {
        Arc::clone(&self.bytecode.read())
    }

    pub fn origin(&self) -> Option<ClassOrigin> {
        *self.origin.read()
    }

    pub fn redefinition_count(&self) -> u32 {
        self.redefinitions.load(Ordering::Acquire)
    }

    pub fn is_assignable_to(&self, type_name: &str) -> bool {
        self.name == type_name || self.shape.supertypes.iter().any(|s| s == type_name)
    }

    pub fn has_annotation(&self, annotation: &str) -> bool {
        self.shape.annotations.iter().any(|a| a == annotation)
    }

    pub(crate) fn redefine(&self, bytecode: Arc<[u8]>, origin: Option<ClassOrigin>) {
        *self.bytecode.write() = bytecode;
        if origin.is_some() {
            *self.origin.write() = origin;
        }
        self.redefinitions.fetch_add(1, Ordering::AcqRel);
    }
}

/// Classes defined so far, shared by the loader and the change detector
#[derive(Debug, Default)]
pub struct ClassTable {
    classes: DashMap<String, Arc<RuntimeClass>>,
}

impl ClassTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<RuntimeClass>> {
        self.classes.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn insert(&self, class: Arc<RuntimeClass>) {
        self.classes.insert(class.name.clone(), class);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    /// Snapshot sorted by name
    pub fn all(&self) -> Vec<Arc<RuntimeClass>> {
        let mut classes: Vec<Arc<RuntimeClass>> = self
            .classes
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        classes.sort_by(|a, b| a.name.cmp(&b.name));
        classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}
