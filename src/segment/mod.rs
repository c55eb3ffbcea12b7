//! Segments: addressable output buffers.
//!
//! A segment is one contiguous run of rendered output plus an ordered list
//! of child segments standing in for nested suspensions. Together the
//! chunk list and child list reproduce exactly the document order of the
//! subtree: each child records the chunk index at which it splices.
//!
//! Segments live in an arena owned by the request; parent/child links are
//! plain indices, so there are no ownership cycles to manage.

use crate::boundary::BoundaryId;
use crate::chunk::Chunk;

/// Arena handle for a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentId(u32);

impl SegmentId {
    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Lifecycle of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SegmentStatus {
    /// Still being rendered (or waiting on a suspended task).
    #[default]
    Pending,
    /// Fully rendered, not yet serialized.
    Completed,
    /// Serialized to the sink.
    Flushed,
    /// Recorded as a hole for a later resumed pass.
    Postponed,
}

/// One addressable output buffer.
#[derive(Debug)]
pub struct Segment {
    pub(crate) status: SegmentStatus,
    /// Wire id, assigned lazily the first time the segment must be
    /// referenced out-of-band.
    pub(crate) public_id: Option<u64>,
    /// Chunk index in the parent at which this segment splices.
    pub(crate) index: usize,
    pub(crate) chunks: Vec<Chunk>,
    /// Child segments in document order.
    pub(crate) children: Vec<SegmentId>,
    /// Set when this slot is a suspense boundary's fallback position.
    pub(crate) boundary: Option<BoundaryId>,
    /// Whether the position this segment belongs to has been serialized,
    /// making the segment itself eligible for out-of-band emission.
    pub(crate) parent_flushed: bool,
    /// Whether the last thing pushed was a text node.
    pub(crate) last_pushed_text: bool,
    /// Whether this segment begins in the middle of adjacent text.
    pub(crate) text_embedded: bool,
}

impl Segment {
    pub(crate) fn new(index: usize, boundary: Option<BoundaryId>, text_embedded: bool) -> Self {
        Self {
            status: SegmentStatus::Pending,
            public_id: None,
            index,
            chunks: Vec::new(),
            children: Vec::new(),
            boundary,
            parent_flushed: false,
            last_pushed_text: false,
            text_embedded,
        }
    }

    /// Total bytes of literal output in this segment (children excluded).
    pub(crate) fn byte_len(&self) -> usize {
        self.chunks.iter().map(Chunk::len).sum()
    }

    pub(crate) fn push_chunk(&mut self, chunk: Chunk) {
        if !chunk.is_empty() {
            self.chunks.push(chunk);
        }
    }
}

/// Request-owned storage for all segments.
#[derive(Debug, Default)]
pub struct SegmentArena {
    segments: Vec<Segment>,
}

impl SegmentArena {
    pub(crate) fn insert(&mut self, segment: Segment) -> SegmentId {
        let id = SegmentId(u32::try_from(self.segments.len()).unwrap_or(u32::MAX));
        self.segments.push(segment);
        id
    }

    pub(crate) fn get(&self, id: SegmentId) -> &Segment {
        &self.segments[id.index()]
    }

    pub(crate) fn get_mut(&mut self, id: SegmentId) -> &mut Segment {
        &mut self.segments[id.index()]
    }

    pub(crate) fn len(&self) -> usize {
        self.segments.len()
    }
}
