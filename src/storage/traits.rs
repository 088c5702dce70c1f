use std::fmt;
use std::io::Read;

use gix_object::Kind;

use crate::object::ObjectId;
use crate::pack::{ObjectType, Result};

/// Which object types a lookup accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectFilter {
    Any,
    Only(ObjectType),
}

impl ObjectFilter {
    pub fn accepts(self, object_type: ObjectType) -> bool {
        match self {
            ObjectFilter::Any => true,
            ObjectFilter::Only(wanted) => wanted == object_type,
        }
    }
}

/// An object handed out by a store: its type, declared size and a reader
/// over the raw content.
pub struct StoredObject<'a> {
    pub kind: ObjectType,
    pub size: u64,
    pub reader: Box<dyn Read + 'a>,
}

impl fmt::Debug for StoredObject<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredObject")
            .field("kind", &self.kind)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Read side of a store.
pub trait ObjectSource {
    /// Look up `id`. Fails with `NotFound` when the object is absent or its
    /// type is rejected by `filter`.
    fn object(&self, filter: ObjectFilter, id: &ObjectId) -> Result<StoredObject<'_>>;

    fn contains(&self, id: &ObjectId) -> Result<bool>;
}

/// Write side of a store. Objects may arrive in any order; each write
/// stands on its own.
pub trait ObjectSink {
    fn write_object(&self, id: &ObjectId, kind: Kind, data: &[u8]) -> Result<()>;
}
