//! Boundaries: suspension points with independent completion.
//!
//! A boundary owns the bookkeeping for one suspense point: how many tasks
//! are still rendering its content, which completed segments are waiting to
//! be serialized, how large its output is (which decides inline versus
//! out-of-band emission), the resource hints hoisted out of its subtree,
//! and, if it failed, the diagnostics forwarded to the client so it can
//! re-render the subtree itself.

use crate::segment::SegmentId;
use crate::task::TaskId;
use crate::tree::KeyStep;
use std::borrow::Cow;
use std::collections::HashSet;

/// Arena handle for a boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundaryId(u32);

impl BoundaryId {
    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Lifecycle of a boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoundaryStatus {
    /// Content still has pending tasks (or recorded holes).
    #[default]
    Pending,
    /// Content finished without error.
    Completed,
    /// Content failed or was aborted; the client re-renders this subtree.
    ClientRendered,
}

/// A resource discovered during rendering that wants to be hoisted ahead of
/// the content that needs it.
///
/// The markup is opaque to the core; the key deduplicates request-wide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceHint {
    /// Dedupe key, e.g. `"style:/app.css"`.
    pub key: String,
    /// The hint's markup, emitted verbatim.
    pub markup: Cow<'static, str>,
}

impl ResourceHint {
    /// Create a hint.
    pub fn new(key: impl Into<String>, markup: impl Into<Cow<'static, str>>) -> Self {
        Self {
            key: key.into(),
            markup: markup.into(),
        }
    }
}

/// One suspension point's bookkeeping.
#[derive(Debug)]
pub struct Boundary {
    pub(crate) status: BoundaryStatus,
    /// Wire id of the placeholder (`B:` namespace), assigned at flush.
    pub(crate) placeholder_id: Option<u64>,
    /// Wire id reserved for the content root's out-of-band container
    /// (`S:` namespace). Kept on the boundary because flattening may hoist
    /// a different segment into the root position.
    pub(crate) content_root_id: Option<u64>,
    /// Root segment of the content tree.
    pub(crate) content_root: SegmentId,
    /// Tasks still rendering content.
    pub(crate) pending_tasks: usize,
    /// Content segments finished but not yet serialized.
    pub(crate) completed_segments: Vec<SegmentId>,
    /// Bytes of completed content, used against the outlining threshold.
    pub(crate) byte_size: usize,
    /// Fallback tasks, aborted wholesale once content completes.
    pub(crate) fallback_tasks: HashSet<TaskId>,
    /// Whether the boundary's position has been serialized.
    pub(crate) parent_flushed: bool,
    /// Hints hoisted out of this boundary's content.
    pub(crate) hints: Vec<ResourceHint>,
    /// Identity path of the suspense node, recorded for resumable passes.
    pub(crate) key_steps: Vec<KeyStep>,
    /// Keeps the boundary pending across a prerender even when its task
    /// counter drains: a postponed hole lives inside.
    pub(crate) postponed: bool,
    pub(crate) error_digest: Option<String>,
    pub(crate) error_message: Option<String>,
    pub(crate) error_stack: Option<String>,
}

impl Boundary {
    pub(crate) fn new(content_root: SegmentId, key_steps: Vec<KeyStep>) -> Self {
        Self {
            status: BoundaryStatus::Pending,
            placeholder_id: None,
            content_root_id: None,
            content_root,
            pending_tasks: 0,
            completed_segments: Vec::new(),
            byte_size: 0,
            fallback_tasks: HashSet::new(),
            parent_flushed: false,
            hints: Vec::new(),
            key_steps,
            postponed: false,
            error_digest: None,
            error_message: None,
            error_stack: None,
        }
    }
}

/// Request-owned storage for all boundaries.
#[derive(Debug, Default)]
pub struct BoundaryArena {
    boundaries: Vec<Boundary>,
}

impl BoundaryArena {
    pub(crate) fn insert(&mut self, boundary: Boundary) -> BoundaryId {
        let id = BoundaryId(u32::try_from(self.boundaries.len()).unwrap_or(u32::MAX));
        self.boundaries.push(boundary);
        id
    }

    pub(crate) fn get(&self, id: BoundaryId) -> &Boundary {
        &self.boundaries[id.index()]
    }

    pub(crate) fn get_mut(&mut self, id: BoundaryId) -> &mut Boundary {
        &mut self.boundaries[id.index()]
    }

    pub(crate) fn iter_ids(&self) -> impl Iterator<Item = BoundaryId> + '_ {
        (0..self.boundaries.len()).map(|i| BoundaryId(i as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::{Segment, SegmentArena};

    #[test]
    fn new_boundaries_start_pending() {
        let mut segments = SegmentArena::default();
        let root = segments.insert(Segment::new(0, None, false));
        let boundary = Boundary::new(root, Vec::new());
        assert_eq!(boundary.status, BoundaryStatus::Pending);
        assert_eq!(boundary.pending_tasks, 0);
        assert!(boundary.placeholder_id.is_none());
        assert!(!boundary.postponed);
    }

    #[test]
    fn hints_compare_by_key_and_markup() {
        let a = ResourceHint::new("style:x", "<style></style>");
        let b = ResourceHint::new("style:x", "<style></style>");
        assert_eq!(a, b);
    }

    #[test]
    fn arena_iterates_every_id() {
        let mut segments = SegmentArena::default();
        let mut arena = BoundaryArena::default();
        for _ in 0..3 {
            let root = segments.insert(Segment::new(0, None, false));
            arena.insert(Boundary::new(root, Vec::new()));
        }
        assert_eq!(arena.iter_ids().count(), 3);
    }
}
