//! Storage-driven pack encoding.

use std::io::Write;

use flate2::Compression;

use super::writer::PackWriter;
use super::{EntryKind, Result};
use crate::error::PackError;
use crate::object::{kind_name, ObjectId};
use crate::storage::{ObjectFilter, ObjectSource};

/// Writes the objects named by a list of ids as a pack of flat entries.
pub struct Encoder<'a, W: Write, S: ObjectSource + ?Sized> {
    writer: PackWriter<W>,
    source: &'a S,
}

impl<'a, W: Write, S: ObjectSource + ?Sized> Encoder<'a, W, S> {
    pub fn new(writer: W, source: &'a S) -> Self {
        Self {
            writer: PackWriter::new(writer),
            source,
        }
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.writer = self.writer.with_compression(compression);
        self
    }

    /// Encode `ids` in order and return the pack checksum.
    pub fn encode(self, ids: &[ObjectId]) -> Result<ObjectId> {
        self.encode_with(ids, |_, _| {})
    }

    /// Like [`Encoder::encode`], calling `on_entry` with each id and its
    /// size once the entry is written.
    pub fn encode_with<F>(mut self, ids: &[ObjectId], mut on_entry: F) -> Result<ObjectId>
    where
        F: FnMut(&ObjectId, u64),
    {
        let count = u32::try_from(ids.len()).map_err(|_| {
            PackError::MalformedHeader(format!("{} objects exceed the pack count field", ids.len()))
        })?;
        self.writer.write_header(count)?;

        for id in ids {
            let mut stored = self.source.object(ObjectFilter::Any, id)?;
            let kind = stored
                .kind
                .kind()
                .ok_or(PackError::UnsupportedObjectType(stored.kind))?;
            self.writer
                .write_entry_from(EntryKind::Base(kind), stored.size, &mut stored.reader)?;
            tracing::trace!(%id, kind = kind_name(kind), size = stored.size, "encoded object");
            on_entry(id, stored.size);
        }

        let (_, checksum) = self.writer.finish()?;
        tracing::debug!(%checksum, objects = count, "encoded pack");
        Ok(checksum)
    }
}
