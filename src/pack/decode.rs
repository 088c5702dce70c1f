//! Pack decoding entry point.
//!
//! [`Decoder`] is a lazy, single-use iterator over the objects of a pack.
//! The first call to `next` scans the whole stream and verifies the
//! trailer; each later call resolves one more object. After the first
//! error the iterator is finished. Dropping it at any point discards the
//! graph, indices and cache together.

use std::io::Read;

use super::cache::{CacheLimits, ObjectCache};
use super::graph::DeltaGraph;
use super::resolve::{ResolveStats, ResolvedObject, Resolver};
use super::scanner::Scanner;
use super::spool::{Spool, DEFAULT_SPOOL_MEMORY};
use super::Result;
use crate::error::PackError;
use crate::object::ObjectId;
use crate::storage::{ObjectSink, ObjectSource};

/// Decoding knobs.
#[derive(Debug, Clone, Copy)]
pub struct DecodeOptions {
    pub cache: CacheLimits,
    /// Compressed entry bytes held in memory between scan and resolution
    /// before they move to a temporary file.
    pub spool_memory: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            cache: CacheLimits::default(),
            spool_memory: DEFAULT_SPOOL_MEMORY,
        }
    }
}

/// Outcome of [`Decoder::unpack_into`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnpackSummary {
    pub checksum: ObjectId,
    pub objects: u64,
    pub stats: ResolveStats,
}

enum State<'a, R> {
    Unscanned(Scanner<R>),
    Resolving(Resolver<'a>),
    Done,
}

pub struct Decoder<'a, R> {
    state: State<'a, R>,
    options: DecodeOptions,
    external: Option<&'a dyn ObjectSource>,
    checksum: Option<ObjectId>,
    stats: ResolveStats,
    entries: u32,
}

/// Decode a pack stream with default options and no external bases.
pub fn decode<R: Read>(reader: R) -> Decoder<'static, R> {
    Decoder::new(reader, DecodeOptions::default())
}

impl<'a, R: Read> Decoder<'a, R> {
    pub fn new(reader: R, options: DecodeOptions) -> Self {
        Self {
            state: State::Unscanned(Scanner::new(reader)),
            options,
            external: None,
            checksum: None,
            stats: ResolveStats::default(),
            entries: 0,
        }
    }

    /// Accept thin packs: REF deltas whose base is not in the stream are
    /// resolved against `source`.
    pub fn with_external_bases(mut self, source: &'a dyn ObjectSource) -> Self {
        self.external = Some(source);
        self
    }

    /// Trailer checksum, known once the stream has been scanned.
    pub fn checksum(&self) -> Option<ObjectId> {
        self.checksum
    }

    /// Number of entries declared by the pack header, once scanned.
    pub fn entries(&self) -> u32 {
        self.entries
    }

    pub fn stats(&self) -> ResolveStats {
        match &self.state {
            State::Resolving(resolver) => resolver.stats(),
            State::Unscanned(_) | State::Done => self.stats,
        }
    }

    /// Payload bytes held in memory by the delta graph, excluding the
    /// base cache.
    pub fn resident_payload_bytes(&self) -> u64 {
        match &self.state {
            State::Resolving(resolver) => resolver.graph().resident_bytes(),
            State::Unscanned(_) | State::Done => 0,
        }
    }

    /// Entries left in the offset and hash indices; zero for both once
    /// every object has been resolved.
    pub fn live_index_entries(&self) -> (usize, usize) {
        match &self.state {
            State::Resolving(resolver) => resolver.graph().live_index_entries(),
            State::Unscanned(_) | State::Done => (0, 0),
        }
    }

    /// Resolve every object into `sink` and return the trailer checksum.
    ///
    /// Objects written before a failure stay written.
    pub fn unpack_into(mut self, sink: &dyn ObjectSink) -> Result<UnpackSummary> {
        let mut objects = 0u64;
        for object in self.by_ref() {
            let object = object?;
            sink.write_object(&object.id, object.kind, &object.data)?;
            objects += 1;
        }
        let checksum = self.scan_if_needed()?;
        Ok(UnpackSummary {
            checksum,
            objects,
            stats: self.stats(),
        })
    }

    fn scan_if_needed(&mut self) -> Result<ObjectId> {
        if let Some(checksum) = self.checksum {
            return Ok(checksum);
        }
        match std::mem::replace(&mut self.state, State::Done) {
            State::Unscanned(scanner) => {
                let (resolver, checksum) = self.scan(scanner)?;
                self.state = State::Resolving(resolver);
                Ok(checksum)
            }
            other => {
                self.state = other;
                Err(PackError::MalformedHeader(
                    "pack stream abandoned before its trailer".to_string(),
                ))
            }
        }
    }

    fn scan(&mut self, mut scanner: Scanner<R>) -> Result<(Resolver<'a>, ObjectId)> {
        let (version, count) = scanner.header()?;
        self.entries = count;
        tracing::debug!(version, count, "scanning pack");

        let mut graph = DeltaGraph::with_capacity(count as usize);
        let mut spool = Spool::new(self.options.spool_memory);
        // One entry is inflated at a time; only its deflate stream is kept.
        let mut scratch = Vec::new();
        for _ in 0..count {
            let header = scanner.next_object_header()?;
            let start = spool.begin()?;
            let scanned = scanner.next_object_copying(&header, &mut scratch, &mut spool)?;
            graph.add(&header, &scanned, spool.end(start))?;
        }
        let checksum = scanner.checksum()?;
        self.checksum = Some(checksum);

        tracing::info!(
            %checksum,
            objects = count,
            roots = graph.roots().len(),
            bytes = scanner.offset(),
            spooled = spool.bytes(),
            spool_on_disk = spool.on_disk(),
            "scanned pack"
        );
        let resolver = Resolver::new(
            graph,
            spool,
            ObjectCache::new(self.options.cache),
            self.external,
        );
        Ok((resolver, checksum))
    }

    fn step(&mut self) -> Result<Option<ResolvedObject>> {
        if let State::Unscanned(_) = self.state {
            self.scan_if_needed()?;
        }
        let State::Resolving(resolver) = &mut self.state else {
            return Ok(None);
        };
        match resolver.next_object()? {
            Some(object) => Ok(Some(object)),
            None => {
                self.stats = resolver.stats();
                self.state = State::Done;
                Ok(None)
            }
        }
    }
}

impl<'a, R: Read> Iterator for Decoder<'a, R> {
    type Item = Result<ResolvedObject>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.step() {
            Ok(object) => object.map(Ok),
            Err(e) => {
                if let State::Resolving(resolver) = &self.state {
                    self.stats = resolver.stats();
                }
                self.state = State::Done;
                Some(Err(e))
            }
        }
    }
}
