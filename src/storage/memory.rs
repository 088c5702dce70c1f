use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, PoisonError, RwLock};

use gix_object::Kind;

use super::traits::{ObjectFilter, ObjectSink, ObjectSource, StoredObject};
use crate::error::PackError;
use crate::object::ObjectId;
use crate::pack::{ObjectType, Result};

/// In-memory object store.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    objects: RwLock<HashMap<ObjectId, (ObjectType, Arc<[u8]>)>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a flat object and return its id.
    pub fn insert(&self, kind: Kind, data: &[u8]) -> ObjectId {
        let id = ObjectId::compute(kind, data);
        self.insert_raw(id, ObjectType::from(kind), data);
        id
    }

    /// Store bytes under an arbitrary id and type, deltas included.
    pub fn insert_raw(&self, id: ObjectId, object_type: ObjectType, data: &[u8]) {
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, (object_type, data.into()));
    }

    pub fn get(&self, id: &ObjectId) -> Option<(ObjectType, Arc<[u8]>)> {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored ids in ascending order.
    pub fn ids(&self) -> Vec<ObjectId> {
        let mut ids: Vec<ObjectId> = self
            .objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }
}

impl ObjectSource for MemoryStorage {
    fn object(&self, filter: ObjectFilter, id: &ObjectId) -> Result<StoredObject<'_>> {
        match self.get(id) {
            Some((kind, data)) if filter.accepts(kind) => Ok(StoredObject {
                kind,
                size: data.len() as u64,
                reader: Box::new(Cursor::new(data)),
            }),
            _ => Err(PackError::NotFound(*id)),
        }
    }

    fn contains(&self, id: &ObjectId) -> Result<bool> {
        Ok(self.get(id).is_some())
    }
}

impl ObjectSink for MemoryStorage {
    fn write_object(&self, id: &ObjectId, kind: Kind, data: &[u8]) -> Result<()> {
        self.insert_raw(*id, ObjectType::from(kind), data);
        Ok(())
    }
}
