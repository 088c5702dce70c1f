//! Bounded-memory resolution of the delta forest.
//!
//! Roots are visited in scan order. Each root's subtree is walked depth
//! first with an explicit stack of `(node, next_child)` frames, so chain
//! depth costs heap, not call stack. Materialized bases go through the
//! [`ObjectCache`]: a parent's entry is released as its last child is
//! dequeued, and a base evicted early is rebuilt from the nearest cached
//! ancestor, or from the root. Entry payloads are inflated from the spool
//! each time they are needed; only external bases are held in memory.

use std::io::Read;
use std::sync::Arc;

use gix_object::Kind;

use super::cache::{CacheStats, ObjectCache};
use super::delta;
use super::graph::{DeltaGraph, ObjectInfo, Payload};
use super::scanner::adler32;
use super::spool::Spool;
use super::{DeltaBase, Result};
use crate::error::PackError;
use crate::object::ObjectId;
use crate::storage::{ObjectFilter, ObjectSource};

/// A fully materialized object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedObject {
    pub id: ObjectId,
    pub kind: Kind,
    pub data: Arc<[u8]>,
    /// Offset of the entry in the pack.
    pub offset: u64,
    /// CRC32 of the raw entry bytes, as an index writer needs it.
    pub crc32: u32,
}

/// Counters describing a resolution pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveStats {
    /// Bases rebuilt after the cache had evicted them.
    pub rematerializations: u64,
    /// Deepest work stack seen.
    pub peak_depth: usize,
    /// Bases fetched from the external source.
    pub external_bases: u64,
    pub cache: CacheStats,
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    node: usize,
    next_child: usize,
}

pub(crate) struct Resolver<'a> {
    graph: DeltaGraph,
    spool: Spool,
    cache: ObjectCache,
    stack: Vec<Frame>,
    next_root: usize,
    external: Option<&'a dyn ObjectSource>,
    stats: ResolveStats,
}

impl<'a> Resolver<'a> {
    pub(crate) fn new(
        graph: DeltaGraph,
        spool: Spool,
        cache: ObjectCache,
        external: Option<&'a dyn ObjectSource>,
    ) -> Self {
        Self {
            graph,
            spool,
            cache,
            stack: Vec::new(),
            next_root: 0,
            external,
            stats: ResolveStats::default(),
        }
    }

    pub(crate) fn stats(&self) -> ResolveStats {
        ResolveStats {
            cache: self.cache.stats(),
            ..self.stats
        }
    }

    pub(crate) fn graph(&self) -> &DeltaGraph {
        &self.graph
    }

    /// Resolve and return the next object, or `None` when every entry of
    /// the pack has been produced.
    pub(crate) fn next_object(&mut self) -> Result<Option<ResolvedObject>> {
        loop {
            if let Some(&Frame { node, next_child }) = self.stack.last() {
                let children = &self.graph.node(node).children;
                if next_child == children.len() {
                    self.stack.pop();
                    self.cache.release(node);
                    self.graph.node_mut(node).payload = Payload::Released;
                    continue;
                }

                let child = children[next_child];
                let last = next_child + 1 == children.len();
                if let Some(frame) = self.stack.last_mut() {
                    frame.next_child += 1;
                }

                let base = self.base_bytes(node)?;
                if last {
                    self.cache.release(node);
                }
                return self.visit_delta(node, child, &base).map(Some);
            }

            if let Some(&root) = self.graph.roots().get(self.next_root) {
                self.next_root += 1;
                return self.visit_root(root).map(Some);
            }

            match self.graph.next_pending() {
                Some((id, _)) => self.fetch_external(id)?,
                None => return Ok(None),
            }
        }
    }

    fn visit_root(&mut self, index: usize) -> Result<ResolvedObject> {
        self.graph.retire(index);
        let payload = self.load_payload(index)?;
        let node = self.graph.node(index);
        verify_payload(node, &payload)?;

        let kind = node.resolved_kind.ok_or_else(|| PackError::CorruptObject {
            offset: node.offset,
            reason: "flat entry without a kind".to_string(),
        })?;
        let id = node.id.unwrap_or_else(|| ObjectId::compute(kind, &payload));
        let (offset, crc32) = (node.offset, node.crc32);

        self.graph.attach_pending(index, &id);
        self.enter(index, &payload);

        tracing::debug!(%id, offset, "resolved base object");
        Ok(ResolvedObject {
            id,
            kind,
            data: payload,
            offset,
            crc32,
        })
    }

    fn visit_delta(&mut self, parent: usize, index: usize, base: &[u8]) -> Result<ResolvedObject> {
        self.graph.retire(index);
        let kind = self.graph.node(parent).resolved_kind.ok_or_else(|| PackError::CorruptObject {
            offset: self.graph.node(parent).offset,
            reason: "delta base resolved without a kind".to_string(),
        })?;

        let payload = self.load_payload(index)?;
        let node = self.graph.node(index);
        verify_payload(node, &payload)?;

        let data: Arc<[u8]> = delta::apply(base, &payload)?.into();
        let id = ObjectId::compute(kind, &data);
        let (offset, crc32) = (node.offset, node.crc32);

        let node = self.graph.node_mut(index);
        node.id = Some(id);
        node.resolved_kind = Some(kind);

        self.graph.attach_pending(index, &id);
        self.enter(index, &data);

        tracing::trace!(%id, offset, parent, "resolved delta");
        Ok(ResolvedObject {
            id,
            kind,
            data,
            offset,
            crc32,
        })
    }

    /// Push a frame for a node with dependents, or release its payload.
    fn enter(&mut self, index: usize, data: &Arc<[u8]>) {
        if self.graph.node(index).children.is_empty() {
            self.graph.node_mut(index).payload = Payload::Released;
            return;
        }
        self.cache.insert(index, data.clone());
        self.stack.push(Frame {
            node: index,
            next_child: 0,
        });
        self.stats.peak_depth = self.stats.peak_depth.max(self.stack.len());
    }

    /// Bytes of `index`, rebuilt from the closest available ancestor when
    /// the cache no longer holds them.
    fn base_bytes(&mut self, index: usize) -> Result<Arc<[u8]>> {
        if let Some(data) = self.cache.get(index) {
            return Ok(data);
        }

        let mut chain = Vec::new();
        let mut current = index;
        let mut data = loop {
            match self.graph.node(current).parent {
                None => break self.load_payload(current)?,
                Some(parent) => {
                    chain.push(current);
                    current = parent;
                    if let Some(data) = self.cache.get(current) {
                        break data;
                    }
                }
            }
        };

        for &link in chain.iter().rev() {
            let payload = self.load_payload(link)?;
            data = delta::apply(&data, &payload)?.into();
        }

        tracing::debug!(node = index, depth = chain.len(), "rebuilt evicted base");
        self.stats.rematerializations += 1;
        self.cache.insert(index, data.clone());
        Ok(data)
    }

    /// Payload of `index`, inflated from the spool or held in memory.
    fn load_payload(&mut self, index: usize) -> Result<Arc<[u8]>> {
        let node = self.graph.node(index);
        match &node.payload {
            Payload::Spooled(extent) => Ok(self
                .spool
                .inflate(*extent, node.size, node.offset)?
                .into()),
            Payload::Resident(data) => Ok(data.clone()),
            Payload::Released => Err(PackError::CorruptObject {
                offset: node.offset,
                reason: "payload released before its dependents were resolved".to_string(),
            }),
        }
    }

    /// Satisfy deltas waiting for `id` from the external source.
    fn fetch_external(&mut self, id: ObjectId) -> Result<()> {
        let missing = || PackError::ReferenceNotFound(DeltaBase::Ref(id));
        let source = self.external.ok_or_else(missing)?;

        let mut stored = match source.object(ObjectFilter::Any, &id) {
            Ok(stored) => stored,
            Err(PackError::NotFound(_)) => return Err(missing()),
            Err(e) => return Err(e),
        };
        let kind = stored
            .kind
            .kind()
            .ok_or(PackError::UnsupportedObjectType(stored.kind))?;

        let mut data = Vec::with_capacity(stored.size.min(1 << 24) as usize);
        stored.reader.read_to_end(&mut data)?;
        if ObjectId::compute(kind, &data) != id {
            return Err(PackError::CorruptObject {
                offset: 0,
                reason: format!("external base {id} does not match its id"),
            });
        }

        let data: Arc<[u8]> = data.into();
        let index = self.graph.add_external(id, kind, data.clone());
        self.stats.external_bases += 1;
        tracing::debug!(%id, waiting = self.graph.node(index).children.len(), "using external delta base");
        self.enter(index, &data);
        Ok(())
    }
}

/// Check the inflated payload against what the stream recorded for it:
/// the declared size and the zlib Adler-32.
///
/// The entry CRC32 is not checked here. It is computed over the raw bytes
/// as they are read, and a pack stream carries no second copy of it to
/// compare with (only an index file does), so it is passed through to
/// [`ResolvedObject::crc32`] instead.
fn verify_payload(node: &ObjectInfo, payload: &[u8]) -> Result<()> {
    if node.external {
        return Ok(());
    }
    if payload.len() as u64 != node.size {
        return Err(PackError::CorruptObject {
            offset: node.offset,
            reason: format!(
                "header declares {} bytes, payload inflated to {}",
                node.size,
                payload.len()
            ),
        });
    }
    let computed = adler32(payload);
    if computed != node.adler32 {
        return Err(PackError::CorruptObject {
            offset: node.offset,
            reason: format!(
                "payload checksum {computed:08x} does not match recorded {:08x}",
                node.adler32
            ),
        });
    }
    Ok(())
}
