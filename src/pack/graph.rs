//! Delta forest built while scanning.
//!
//! Nodes live in an arena addressed by index, in scan order. Each delta
//! node has exactly one parent; each node keeps its children in an ordered
//! list. A base always precedes its deltas in scan order, so the forest
//! cannot contain cycles.
//!
//! Invariants:
//! - `by_offset` and `by_hash` only hold nodes not yet dequeued for
//!   resolution; `retire` removes a node from both.
//! - a REF delta is only attached to a base with a smaller index. Until
//!   then it waits in `pending_refs` under the base id.

use std::collections::HashMap;
use std::sync::Arc;

use gix_object::Kind;

use super::scanner::ScannedObject;
use super::spool::Extent;
use super::{DeltaBase, EntryKind, ObjectHeader, Result};
use crate::error::PackError;
use crate::object::ObjectId;

/// Descriptor of one pack entry.
#[derive(Debug)]
pub struct ObjectInfo {
    pub offset: u64,
    /// Raw entry length, header included.
    pub length: u64,
    pub kind: EntryKind,
    /// Declared inflated size of the payload.
    pub size: u64,
    pub crc32: u32,
    pub adler32: u32,
    /// Known at scan time for flat entries, at resolution for deltas.
    pub id: Option<ObjectId>,
    /// Flat kind, inherited from the root for deltas once resolved.
    pub resolved_kind: Option<Kind>,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub(crate) payload: Payload,
    /// Base object fetched from outside the pack; never emitted.
    pub external: bool,
}

/// Where a node's content (flat) or instruction stream (delta) lives.
#[derive(Debug, Clone)]
pub enum Payload {
    /// Compressed in the spool, inflated on demand.
    Spooled(Extent),
    /// Held in memory; only external bases, until their subtree is done.
    Resident(Arc<[u8]>),
    Released,
}

impl ObjectInfo {
    pub fn is_delta(&self) -> bool {
        !matches!(self.kind, EntryKind::Base(_))
    }
}

/// Entries reserved ahead of scanning at most.
pub const MAX_PREALLOCATED: usize = 4096;

#[derive(Debug, Default)]
pub struct DeltaGraph {
    nodes: Vec<ObjectInfo>,
    by_offset: HashMap<u64, usize>,
    by_hash: HashMap<ObjectId, usize>,
    pending_refs: HashMap<ObjectId, Vec<usize>>,
    /// Flat entries in scan order.
    roots: Vec<usize>,
}

impl DeltaGraph {
    /// Preallocate for `count` entries. The count comes from an untrusted
    /// header, so only up to [`MAX_PREALLOCATED`] is reserved up front.
    pub fn with_capacity(count: usize) -> Self {
        let count = count.min(MAX_PREALLOCATED);
        Self {
            nodes: Vec::with_capacity(count),
            by_offset: HashMap::with_capacity(count),
            by_hash: HashMap::with_capacity(count),
            pending_refs: HashMap::new(),
            roots: Vec::new(),
        }
    }

    /// Add a scanned entry, linking it to its base when the base is known.
    pub fn add(
        &mut self,
        header: &ObjectHeader,
        scanned: &ScannedObject,
        extent: Extent,
    ) -> Result<usize> {
        let index = self.nodes.len();

        let parent = match header.kind {
            EntryKind::Base(_) => None,
            EntryKind::OfsDelta { base_offset } => {
                let base = self
                    .by_offset
                    .get(&base_offset)
                    .copied()
                    .ok_or(PackError::ReferenceNotFound(DeltaBase::Offset(base_offset)))?;
                Some(base)
            }
            EntryKind::RefDelta { base_id } => match self.by_hash.get(&base_id) {
                Some(&base) => Some(base),
                None => {
                    self.pending_refs.entry(base_id).or_default().push(index);
                    None
                }
            },
        };

        if let Some(parent) = parent {
            self.nodes[parent].children.push(index);
        }

        self.nodes.push(ObjectInfo {
            offset: header.offset,
            length: scanned.length,
            kind: header.kind,
            size: header.size,
            crc32: scanned.crc32,
            adler32: scanned.adler32,
            id: scanned.id,
            resolved_kind: match header.kind {
                EntryKind::Base(kind) => Some(kind),
                EntryKind::OfsDelta { .. } | EntryKind::RefDelta { .. } => None,
            },
            parent,
            children: Vec::new(),
            payload: Payload::Spooled(extent),
            external: false,
        });

        self.by_offset.insert(header.offset, index);
        if let Some(id) = scanned.id {
            self.by_hash.insert(id, index);
        }
        if matches!(header.kind, EntryKind::Base(_)) {
            self.roots.push(index);
        }
        Ok(index)
    }

    /// Add a base fetched from outside the pack. It becomes a root whose
    /// children are all deltas waiting for `id`.
    pub(crate) fn add_external(&mut self, id: ObjectId, kind: Kind, data: Arc<[u8]>) -> usize {
        let index = self.nodes.len();
        let children = self.pending_refs.remove(&id).unwrap_or_default();
        for &child in &children {
            self.nodes[child].parent = Some(index);
        }
        self.nodes.push(ObjectInfo {
            offset: u64::MAX,
            length: 0,
            kind: EntryKind::Base(kind),
            size: data.len() as u64,
            crc32: 0,
            adler32: 0,
            id: Some(id),
            resolved_kind: Some(kind),
            parent: None,
            children,
            payload: Payload::Resident(data),
            external: true,
        });
        index
    }

    /// Attach deltas waiting for `id` to `base`. Only deltas scanned after
    /// `base` qualify. Returns how many were attached.
    pub(crate) fn attach_pending(&mut self, base: usize, id: &ObjectId) -> usize {
        let Some(waiting) = self.pending_refs.get_mut(id) else {
            return 0;
        };
        let (later, earlier): (Vec<usize>, Vec<usize>) =
            waiting.iter().partition(|&&child| child > base);
        if earlier.is_empty() {
            self.pending_refs.remove(id);
        } else {
            *waiting = earlier;
        }

        for &child in &later {
            self.nodes[child].parent = Some(base);
        }
        let attached = later.len();
        self.nodes[base].children.extend(later);
        attached
    }

    /// Remove a node from both lookup indices.
    pub(crate) fn retire(&mut self, index: usize) {
        let node = &self.nodes[index];
        if self.by_offset.get(&node.offset) == Some(&index) {
            self.by_offset.remove(&node.offset);
        }
        if let Some(id) = node.id {
            if self.by_hash.get(&id) == Some(&index) {
                self.by_hash.remove(&id);
            }
        }
    }

    /// Id of some base still awaited by a pending delta, lowest waiting
    /// index first.
    pub(crate) fn next_pending(&self) -> Option<(ObjectId, usize)> {
        self.pending_refs
            .iter()
            .filter_map(|(id, waiting)| waiting.iter().min().map(|&first| (*id, first)))
            .min_by_key(|&(_, first)| first)
    }

    pub fn node(&self, index: usize) -> &ObjectInfo {
        &self.nodes[index]
    }

    pub(crate) fn node_mut(&mut self, index: usize) -> &mut ObjectInfo {
        &mut self.nodes[index]
    }

    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Entries still present in the offset and hash indices.
    pub fn live_index_entries(&self) -> (usize, usize) {
        (self.by_offset.len(), self.by_hash.len())
    }

    /// Payload bytes held in memory by graph nodes.
    pub fn resident_bytes(&self) -> u64 {
        self.nodes
            .iter()
            .map(|node| match &node.payload {
                Payload::Resident(data) => data.len() as u64,
                Payload::Spooled(_) | Payload::Released => 0,
            })
            .sum()
    }

    pub fn pending_ref_count(&self) -> usize {
        self.pending_refs.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXTENT: Extent = Extent { start: 0, len: 0 };

    fn header(offset: u64, kind: EntryKind) -> ObjectHeader {
        ObjectHeader {
            offset,
            kind,
            size: 1,
            header_len: 1,
        }
    }

    fn scanned(id: Option<ObjectId>) -> ScannedObject {
        ScannedObject {
            id,
            crc32: 0,
            adler32: 0,
            length: 10,
        }
    }

    #[test]
    fn test_ofs_link() {
        let mut graph = DeltaGraph::default();
        let root_id = ObjectId::compute(Kind::Blob, b"a");
        let root = graph
            .add(&header(12, EntryKind::Base(Kind::Blob)), &scanned(Some(root_id)), EXTENT)
            .unwrap();
        let child = graph
            .add(
                &header(22, EntryKind::OfsDelta { base_offset: 12 }),
                &scanned(None),
                EXTENT,
            )
            .unwrap();

        assert_eq!(graph.node(child).parent, Some(root));
        assert_eq!(graph.node(root).children, vec![child]);
        assert_eq!(graph.roots(), &[root]);
        assert_eq!(graph.live_index_entries(), (2, 1));

        graph.retire(root);
        graph.retire(child);
        assert_eq!(graph.live_index_entries(), (0, 0));
    }

    #[test]
    fn test_ofs_unknown_offset() {
        let mut graph = DeltaGraph::default();
        let err = graph
            .add(
                &header(40, EntryKind::OfsDelta { base_offset: 12 }),
                &scanned(None),
                EXTENT,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            PackError::ReferenceNotFound(DeltaBase::Offset(12))
        ));
    }

    #[test]
    fn test_ref_pending_then_attached() {
        let mut graph = DeltaGraph::default();
        let wanted = ObjectId::compute(Kind::Blob, b"later");

        let early = graph
            .add(
                &header(12, EntryKind::RefDelta { base_id: wanted }),
                &scanned(None),
                EXTENT,
            )
            .unwrap();
        let base = graph
            .add(&header(40, EntryKind::Base(Kind::Blob)), &scanned(Some(wanted)), EXTENT)
            .unwrap();
        // Forward reference: stays pending.
        assert_eq!(graph.node(early).parent, None);
        assert_eq!(graph.attach_pending(base, &wanted), 0);
        assert_eq!(graph.pending_ref_count(), 1);

        let late = graph
            .add(
                &header(60, EntryKind::RefDelta { base_id: wanted }),
                &scanned(None),
                EXTENT,
            )
            .unwrap();
        // Known base: linked at scan time.
        assert_eq!(graph.node(late).parent, Some(base));
        assert_eq!(graph.next_pending(), Some((wanted, early)));
    }

    #[test]
    fn test_external_base_adopts_pending() {
        let mut graph = DeltaGraph::default();
        let outside = ObjectId::compute(Kind::Blob, b"outside");
        let delta = graph
            .add(
                &header(12, EntryKind::RefDelta { base_id: outside }),
                &scanned(None),
                EXTENT,
            )
            .unwrap();

        let base = graph.add_external(outside, Kind::Blob, Arc::from(&b"outside"[..]));
        assert!(graph.node(base).external);
        assert_eq!(graph.node(base).children, vec![delta]);
        assert_eq!(graph.node(delta).parent, Some(base));
        assert_eq!(graph.pending_ref_count(), 0);
        assert_eq!(graph.resident_bytes(), 7);

        graph.node_mut(base).payload = Payload::Released;
        assert_eq!(graph.resident_bytes(), 0);
    }

    #[test]
    fn test_declared_count_does_not_drive_allocation() {
        let graph = DeltaGraph::with_capacity(u32::MAX as usize);
        assert!(graph.nodes.capacity() < 2 * MAX_PREALLOCATED);
        assert!(graph.is_empty());
    }
}
