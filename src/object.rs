//! Git object identity and loose-object framing

use std::fmt;
use std::str::FromStr;

use gix_object::Kind;
use sha1::{Digest, Sha1};

use crate::error::PackError;

/// Length in bytes of a SHA-1 object id.
pub const ID_LEN: usize = 20;

/// Git SHA-1 object identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; ID_LEN]);

impl ObjectId {
    pub const fn from_bytes(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    /// Compute the id of an object: SHA-1 over `"<kind> <size>\0<data>"`.
    pub fn compute(kind: Kind, data: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(object_header(kind, data.len() as u64));
        hasher.update(data);
        Self::from_digest(hasher)
    }

    pub(crate) fn from_digest(hasher: Sha1) -> Self {
        let mut bytes = [0u8; ID_LEN];
        bytes.copy_from_slice(&hasher.finalize());
        Self(bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

/// A string that is not 40 hex digits.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid object id {input:?}: {source}")]
pub struct ParseObjectIdError {
    input: String,
    source: hex::FromHexError,
}

// `hex::FromHexError` only derives `PartialEq`, but its equality is total.
impl Eq for ParseObjectIdError {}

impl FromStr for ObjectId {
    type Err = ParseObjectIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; ID_LEN];
        hex::decode_to_slice(s, &mut bytes).map_err(|source| ParseObjectIdError {
            input: s.to_string(),
            source,
        })?;
        Ok(Self(bytes))
    }
}

/// Canonical name of an object kind as used in loose headers.
pub fn kind_name(kind: Kind) -> &'static str {
    match kind {
        Kind::Commit => "commit",
        Kind::Tree => "tree",
        Kind::Blob => "blob",
        Kind::Tag => "tag",
    }
}

pub fn parse_kind_name(name: &str) -> Option<Kind> {
    match name {
        "commit" => Some(Kind::Commit),
        "tree" => Some(Kind::Tree),
        "blob" => Some(Kind::Blob),
        "tag" => Some(Kind::Tag),
        _ => None,
    }
}

/// The `"<kind> <size>\0"` prefix hashed in front of every object.
pub fn object_header(kind: Kind, size: u64) -> Vec<u8> {
    format!("{} {}\0", kind_name(kind), size).into_bytes()
}

/// Split a loose object (`"<kind> <size>\0<data>"`) into kind and payload.
pub fn parse_loose(content: &[u8]) -> Result<(Kind, &[u8]), PackError> {
    let corrupt = |reason: String| PackError::CorruptObject { offset: 0, reason };

    let null_pos = content
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| corrupt("no null terminator in loose object header".to_string()))?;

    let header = std::str::from_utf8(&content[..null_pos])
        .map_err(|_| corrupt("invalid UTF-8 in loose object header".to_string()))?;

    let (name, size) = header
        .split_once(' ')
        .ok_or_else(|| corrupt(format!("invalid loose object header: {header}")))?;
    let kind = parse_kind_name(name).ok_or_else(|| corrupt(format!("unknown object type: {name}")))?;
    let size: usize = size
        .parse()
        .map_err(|_| corrupt(format!("invalid loose object size: {size}")))?;

    let data = &content[null_pos + 1..];
    if data.len() != size {
        return Err(corrupt(format!(
            "loose object declares {size} bytes but holds {}",
            data.len()
        )));
    }
    Ok((kind, data))
}
