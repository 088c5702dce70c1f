use crate::object::ObjectId;
use crate::pack::{DeltaBase, ObjectType};

/// Errors raised while decoding or encoding a pack stream.
///
/// None of these are retried internally: a pack stream is a deterministic
/// byte sequence, so callers that want to retry must re-fetch the stream.
#[derive(Debug, thiserror::Error)]
pub enum PackError {
    #[error("malformed pack header: {0}")]
    MalformedHeader(String),

    #[error("pack stream truncated at offset {offset}")]
    TruncatedStream { offset: u64 },

    #[error("corrupt deflate data in entry at offset {offset}: {reason}")]
    Decompression { offset: u64, reason: String },

    #[error("pack checksum mismatch: trailer {expected}, computed {actual}")]
    ChecksumMismatch { expected: ObjectId, actual: ObjectId },

    #[error("delta base not found: {0}")]
    ReferenceNotFound(DeltaBase),

    #[error("delta base size mismatch: delta expects {expected} bytes, base has {actual}")]
    DeltaBaseSizeMismatch { expected: u64, actual: u64 },

    #[error("delta copy {offset}+{len} exceeds base size {base_size}")]
    DeltaCopyOutOfRange { offset: u64, len: u64, base_size: u64 },

    #[error("delta result length mismatch: expected {expected} bytes, produced {actual}")]
    DeltaLengthMismatch { expected: u64, actual: u64 },

    #[error("invalid delta instruction stream: {0}")]
    InvalidDelta(String),

    #[error("corrupt object at offset {offset}: {reason}")]
    CorruptObject { offset: u64, reason: String },

    #[error("unsupported object type: {0}")]
    UnsupportedObjectType(ObjectType),

    #[error("object not found: {0}")]
    NotFound(ObjectId),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
