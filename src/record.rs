//! Structural record types synthesized for field projections.
//!
//! A selection set such as `{ id name }` over `Person` produces a record type
//! with the ordered signature `[(id, Int32), (name, String)]`. Identical
//! signatures share one [`RecordType`], so the same selection compiled twice
//! (or from two threads at once) yields the same type.

use std::{
    hash::{Hash, Hasher},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use dashmap::DashMap;
use indexmap::IndexMap;
use log::debug;
use once_cell::sync::Lazy;

use crate::types::TypeRef;

/// Ordered (field name, field type) pairs identifying a record type.
pub type RecordSignature = Vec<(String, TypeRef)>;

#[derive(Debug)]
pub struct RecordType {
    id: usize,
    fields: RecordSignature,
}

impl RecordType {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> String {
        format!("Record{}", self.id)
    }

    pub fn fields(&self) -> &[(String, TypeRef)] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|(n, _)| n == name)
    }

    pub fn field_type(&self, name: &str) -> Option<&TypeRef> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }
}

// Two entries with the same signature are interchangeable, whichever id they
// were given.
impl PartialEq for RecordType {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl Eq for RecordType {}

impl Hash for RecordType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.fields.hash(state);
    }
}

/// Grow-only cache of record types keyed by signature.
#[derive(Default)]
pub struct RecordTypeCache {
    types: DashMap<RecordSignature, Arc<RecordType>>,
    next_id: AtomicUsize,
}

static GLOBAL: Lazy<RecordTypeCache> = Lazy::new(RecordTypeCache::new);

impl RecordTypeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide cache shared by every compilation.
    pub fn global() -> &'static RecordTypeCache {
        &GLOBAL
    }

    /// Returns the record type for the given fields, creating it on first use.
    ///
    /// Duplicate names resolve last-write-wins: the later type replaces the
    /// earlier one at the earlier position.
    pub fn get_or_create<I>(&self, fields: I) -> Arc<RecordType>
    where
        I: IntoIterator<Item = (String, TypeRef)>,
    {
        let mut ordered: IndexMap<String, TypeRef> = IndexMap::new();
        for (name, ty) in fields {
            ordered.insert(name, ty);
        }
        let signature: RecordSignature = ordered.into_iter().collect();

        if let Some(existing) = self.types.get(&signature) {
            return Arc::clone(existing.value());
        }

        let entry = self.types.entry(signature.clone()).or_insert_with(|| {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            debug!("synthesized record type Record{} with {} field(s)", id, signature.len());
            Arc::new(RecordType {
                id,
                fields: signature,
            })
        });
        Arc::clone(entry.value())
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IntKind;

    fn person_fields() -> Vec<(String, TypeRef)> {
        vec![
            ("id".to_string(), TypeRef::Int(IntKind::I32)),
            ("name".to_string(), TypeRef::String),
        ]
    }

    #[test]
    fn identical_signatures_share_one_type() {
        let cache = RecordTypeCache::new();
        let a = cache.get_or_create(person_fields());
        let b = cache.get_or_create(person_fields());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn field_order_is_part_of_the_signature() {
        let cache = RecordTypeCache::new();
        let a = cache.get_or_create(person_fields());
        let mut reversed = person_fields();
        reversed.reverse();
        let b = cache.get_or_create(reversed);
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn duplicate_names_keep_the_last_type() {
        let cache = RecordTypeCache::new();
        let record = cache.get_or_create(vec![
            ("name".to_string(), TypeRef::String),
            ("id".to_string(), TypeRef::Int(IntKind::I32)),
            ("name".to_string(), TypeRef::Int(IntKind::I64)),
        ]);
        assert_eq!(record.len(), 2);
        assert_eq!(record.field_index("name"), Some(0));
        assert_eq!(record.field_type("name"), Some(&TypeRef::Int(IntKind::I64)));
    }

    #[test]
    fn concurrent_first_use_yields_one_entry() {
        let cache = Arc::new(RecordTypeCache::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || cache.get_or_create(person_fields()))
            })
            .collect();
        let types: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(cache.len(), 1);
        assert!(types.iter().all(|t| **t == *types[0]));
    }
}
