//! Git pack format support
//!
//! A pack is a 12-byte header (`PACK`, version, object count), a sequence of
//! zlib-compressed entries, and a trailing SHA-1 over every preceding byte.
//! Entries are either flat objects or deltas against another entry, named by
//! backward offset (OFS) or by object id (REF).
//!
//! Decoding scans the whole stream first, keeping only each entry's
//! compressed bytes, then resolves the delta forest root by root with an
//! explicit work stack, so delta chains of any length resolve without
//! recursion.

use std::fmt;

use gix_object::Kind;

use crate::error::PackError;
use crate::object::ObjectId;

mod cache;
mod decode;
pub mod delta;
mod encode;
mod graph;
mod resolve;
mod scanner;
mod spool;
pub mod varint;
mod writer;

pub use cache::{CacheLimits, CacheStats, ObjectCache};
pub use decode::{decode, DecodeOptions, Decoder, UnpackSummary};
pub use delta::DeltaInstruction;
pub use encode::Encoder;
pub use graph::{DeltaGraph, ObjectInfo};
pub use resolve::{ResolveStats, ResolvedObject};
pub use scanner::{ScannedObject, Scanner};
pub use writer::PackWriter;

pub type Result<T, E = PackError> = std::result::Result<T, E>;

/// Pack signature literal.
pub const SIGNATURE: &[u8; 4] = b"PACK";
/// The only pack version this crate reads and writes.
pub const VERSION: u32 = 2;
/// Signature + version + object count.
pub const HEADER_LEN: usize = 12;
/// Length of the trailing SHA-1.
pub const TRAILER_LEN: usize = 20;

/// Entry type as encoded in the 3-bit field of an entry header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Commit,
    Tree,
    Blob,
    Tag,
    OfsDelta,
    RefDelta,
}

impl ObjectType {
    pub fn code(self) -> u8 {
        match self {
            ObjectType::Commit => 1,
            ObjectType::Tree => 2,
            ObjectType::Blob => 3,
            ObjectType::Tag => 4,
            ObjectType::OfsDelta => 6,
            ObjectType::RefDelta => 7,
        }
    }

    /// Codes 0 and 5 are reserved by the format.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ObjectType::Commit),
            2 => Some(ObjectType::Tree),
            3 => Some(ObjectType::Blob),
            4 => Some(ObjectType::Tag),
            6 => Some(ObjectType::OfsDelta),
            7 => Some(ObjectType::RefDelta),
            _ => None,
        }
    }

    /// The flat object kind, or `None` for delta types.
    pub fn kind(self) -> Option<Kind> {
        match self {
            ObjectType::Commit => Some(Kind::Commit),
            ObjectType::Tree => Some(Kind::Tree),
            ObjectType::Blob => Some(Kind::Blob),
            ObjectType::Tag => Some(Kind::Tag),
            ObjectType::OfsDelta | ObjectType::RefDelta => None,
        }
    }

    pub fn is_delta(self) -> bool {
        self.kind().is_none()
    }
}

impl From<Kind> for ObjectType {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Commit => ObjectType::Commit,
            Kind::Tree => ObjectType::Tree,
            Kind::Blob => ObjectType::Blob,
            Kind::Tag => ObjectType::Tag,
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectType::Commit => "commit",
            ObjectType::Tree => "tree",
            ObjectType::Blob => "blob",
            ObjectType::Tag => "tag",
            ObjectType::OfsDelta => "ofs-delta",
            ObjectType::RefDelta => "ref-delta",
        };
        f.write_str(name)
    }
}

/// Where a delta entry finds its base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaBase {
    /// Absolute offset of the base entry in the same pack.
    Offset(u64),
    /// Object id of the base, possibly outside the pack (thin packs).
    Ref(ObjectId),
}

impl fmt::Display for DeltaBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeltaBase::Offset(offset) => write!(f, "entry at offset {offset}"),
            DeltaBase::Ref(id) => write!(f, "object {id}"),
        }
    }
}

/// Parsed entry kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Non-delta object.
    Base(Kind),
    OfsDelta { base_offset: u64 },
    RefDelta { base_id: ObjectId },
}

impl EntryKind {
    pub fn object_type(&self) -> ObjectType {
        match self {
            EntryKind::Base(kind) => ObjectType::from(*kind),
            EntryKind::OfsDelta { .. } => ObjectType::OfsDelta,
            EntryKind::RefDelta { .. } => ObjectType::RefDelta,
        }
    }

    pub fn delta_base(&self) -> Option<DeltaBase> {
        match self {
            EntryKind::Base(_) => None,
            EntryKind::OfsDelta { base_offset } => Some(DeltaBase::Offset(*base_offset)),
            EntryKind::RefDelta { base_id } => Some(DeltaBase::Ref(*base_id)),
        }
    }
}

/// Header of one pack entry, as read by the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHeader {
    /// Offset of the first header byte from the start of the pack.
    pub offset: u64,
    pub kind: EntryKind,
    /// Declared inflated size. For deltas this is the size of the
    /// instruction stream, not of the resolved object.
    pub size: u64,
    /// Bytes taken by the type+size header and the base reference.
    pub header_len: u64,
}
