//! Tasks: schedulable units of depth-first traversal.
//!
//! A task carries everything needed to (re)render one position of the
//! tree: the node itself, the identity path, the deterministic-id context,
//! the format context, and the segment it writes into. Replay tasks from a
//! resumed pass carry no segment; their traversal is matched against
//! recorded identity paths instead of buffered.
//!
//! Tasks are owned by a slab-style arena. A running task is taken out of
//! its slot; a suspension puts a *new* task in a new slot, so a stale ping
//! for a finished task simply finds nothing.

use crate::boundary::BoundaryId;
use crate::evaluate::AwaitLog;
use crate::format::FormatContext;
use crate::request::replay::ReplayCursor;
use crate::segment::SegmentId;
use crate::tree::{KeyPath, Node, TreeContext};

/// Arena handle for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u32);

impl TaskId {
    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }

    pub(crate) const fn from_index(index: u32) -> Self {
        Self(index)
    }
}

/// One schedulable traversal step.
#[derive(Debug)]
pub struct Task {
    pub(crate) id: TaskId,
    /// The node this task renders when it runs.
    pub(crate) node: Node,
    /// Position within the parent's children; −1 outside arrays.
    pub(crate) child_index: i32,
    /// Identity path, stable across passes.
    pub(crate) key_path: KeyPath,
    /// Deterministic-id context.
    pub(crate) tree_context: TreeContext,
    /// Ambient format state.
    pub(crate) format: FormatContext,
    /// Output buffer; `None` for replay bookkeeping tasks.
    pub(crate) segment: Option<SegmentId>,
    /// Enclosing boundary; `None` at the document root.
    pub(crate) boundary: Option<BoundaryId>,
    /// When rendering a boundary's fallback: that boundary. The whole set
    /// is softly aborted once the content completes.
    pub(crate) fallback_of: Option<BoundaryId>,
    /// Dependency values already obtained by earlier attempts.
    pub(crate) await_log: AwaitLog,
    /// Replay matching state for resumed passes.
    pub(crate) replay: Option<ReplayCursor>,
}

/// Slab of tasks with slot reuse.
#[derive(Debug, Default)]
pub struct TaskArena {
    slots: Vec<Option<Task>>,
    free: Vec<u32>,
    live: usize,
}

impl TaskArena {
    /// Insert a task, assigning its id.
    pub(crate) fn insert(&mut self, mut task: Task) -> TaskId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let id = TaskId(index);
            task.id = id;
            self.slots[id.index()] = Some(task);
            return id;
        }
        let id = TaskId(u32::try_from(self.slots.len()).unwrap_or(u32::MAX));
        task.id = id;
        self.slots.push(Some(task));
        id
    }

    /// Remove a task for running (or discarding). Stale ids yield `None`.
    pub(crate) fn take(&mut self, id: TaskId) -> Option<Task> {
        let task = self.slots.get_mut(id.index())?.take()?;
        self.free.push(id.index() as u32);
        self.live -= 1;
        Some(task)
    }

    /// Number of live tasks.
    pub(crate) const fn len(&self) -> usize {
        self.live
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_task() -> Task {
        Task {
            id: TaskId(0),
            node: Node::empty(),
            child_index: -1,
            key_path: KeyPath::root(),
            tree_context: TreeContext::root(),
            format: FormatContext::root(),
            segment: None,
            boundary: None,
            fallback_of: None,
            await_log: AwaitLog::default(),
            replay: None,
        }
    }

    #[test]
    fn insert_assigns_the_slot_id() {
        let mut arena = TaskArena::default();
        let id = arena.insert(blank_task());
        let task = arena.take(id).unwrap();
        assert_eq!(task.id, id);
        assert_eq!(arena.len(), 0);
    }

    #[test]
    fn stale_ids_find_nothing() {
        let mut arena = TaskArena::default();
        let id = arena.insert(blank_task());
        assert!(arena.take(id).is_some());
        assert!(arena.take(id).is_none());
    }

    #[test]
    fn freed_slots_are_reused() {
        let mut arena = TaskArena::default();
        let a = arena.insert(blank_task());
        arena.take(a);
        let b = arena.insert(blank_task());
        assert_eq!(a.index(), b.index());
        assert_eq!(arena.len(), 1);
    }
}
