//! The work loop: cooperative, single-threaded, depth-first.
//!
//! [`Request::perform_work`] drains the ready queue once per invocation.
//! Each task renders its node depth-first into its segment. Suspension is
//! handled *in place*: when a child's evaluation reports an unsettled
//! dependency, a replacement task bound to a new child segment is spawned
//! at the current position and the loop continues with the next sibling.
//! Siblings are therefore scheduled in document order but may complete in
//! any order. Application errors unwind the current task only and land in
//! boundary-granular handling.

use super::{Request, RequestStatus};
use crate::boundary::{Boundary, BoundaryId, BoundaryStatus};
use crate::chunk::Chunk;
use crate::error::{RenderError, RenderResult};
use crate::evaluate::{AwaitLog, EvalContext, Evaluation};
use crate::format::FormatFlags;
use crate::segment::{Segment, SegmentId, SegmentStatus};
use crate::task::{Task, TaskId};
use crate::tree::{
    ComponentRef, Dependency, DependencyPoll, Element, KeyOrIndex, Node, SuspenseNode,
};
use std::borrow::Cow;
use tracing::{debug, trace};

impl Request {
    /// Drain the ready queue, running each task to completion or
    /// suspension. Pings that arrive while the pass runs are serviced in
    /// the same pass.
    pub fn perform_work(&mut self) {
        if matches!(self.status, RequestStatus::Fatal | RequestStatus::Closed) {
            self.drain_pings();
            self.ready.clear();
            return;
        }
        loop {
            self.drain_pings();
            let Some(id) = self.ready.pop_front() else { break };
            self.run_task(id);
        }
    }

    fn run_task(&mut self, id: TaskId) {
        // Stale ids (aborted or already-run tasks) find an empty slot.
        let Some(mut task) = self.tasks.take(id) else {
            return;
        };
        self.abortable.remove(&id);
        if let Some(fb) = task.fallback_of {
            self.boundaries.get_mut(fb).fallback_tasks.remove(&id);
        }
        trace!(task = ?id, node = %task.node.shape(), "running task");
        let node = task.node.clone();
        match self.render_node(&mut task, &node, 0) {
            Ok(()) => self.complete_task(task),
            Err(err) => self.errored_task(task, err),
        }
    }

    fn complete_task(&mut self, task: Task) {
        if let Some(segment) = task.segment {
            self.complete_segment(task.boundary, segment);
        }
        self.finish_task(task.boundary, task.segment);
    }

    /// An application error unwound this task (§7 taxonomy 2 and 3).
    fn errored_task(&mut self, task: Task, err: RenderError) {
        match task.boundary {
            None => {
                self.report_error(&err, &task.key_path);
                self.pending_root_tasks = self.pending_root_tasks.saturating_sub(1);
                self.fatal(err);
                self.task_retired();
            }
            Some(boundary) => {
                let digest = self.report_error(&err, &task.key_path);
                self.client_render_boundary(
                    boundary,
                    digest,
                    Some(err.to_string()),
                    Some(task.key_path.display()),
                );
                let b = self.boundaries.get_mut(boundary);
                b.pending_tasks = b.pending_tasks.saturating_sub(1);
                self.task_retired();
            }
        }
    }

    /// Mark a segment completed and charge its bytes to the owning
    /// boundary's outlining estimate.
    pub(crate) fn complete_segment(&mut self, boundary: Option<BoundaryId>, segment: SegmentId) {
        let byte_len = {
            let seg = self.segments.get_mut(segment);
            if seg.status == SegmentStatus::Pending {
                seg.status = SegmentStatus::Completed;
            }
            seg.byte_len()
        };
        if let Some(b) = boundary {
            self.boundaries.get_mut(b).byte_size += byte_len;
        }
    }

    /// Completion propagation: decrement the owning counter and queue
    /// whatever became flushable.
    pub(crate) fn finish_task(&mut self, boundary: Option<BoundaryId>, segment: Option<SegmentId>) {
        match boundary {
            None => {
                self.pending_root_tasks = self.pending_root_tasks.saturating_sub(1);
                if let Some(seg) = segment {
                    // A detached slot completing after the shell (resumed
                    // holes and their inner segments) streams out-of-band.
                    let s = self.segments.get(seg);
                    if self.shell_flushed
                        && s.parent_flushed
                        && s.status == SegmentStatus::Completed
                        && s.public_id.is_some()
                        && Some(seg) != self.root_segment
                    {
                        self.completed_slots.push(seg);
                    }
                }
            }
            Some(bid) => {
                let (status, pending, postponed) = {
                    let b = self.boundaries.get_mut(bid);
                    b.pending_tasks = b.pending_tasks.saturating_sub(1);
                    (b.status, b.pending_tasks, b.postponed)
                };
                if status == BoundaryStatus::ClientRendered {
                    // Output is discarded; the client re-renders.
                } else if pending == 0 {
                    if postponed {
                        // Holes inside keep the boundary open for a resumed
                        // pass; its fallback stays up.
                    } else {
                        if status == BoundaryStatus::Pending {
                            self.boundaries.get_mut(bid).status = BoundaryStatus::Completed;
                        }
                        if let Some(seg) = segment {
                            let flushable = {
                                let s = self.segments.get(seg);
                                s.parent_flushed && s.status == SegmentStatus::Completed
                            };
                            if flushable {
                                self.queue_completed_segment(bid, seg);
                            }
                        }
                        if self.boundaries.get(bid).parent_flushed {
                            self.completed_boundaries.push(bid);
                        }
                        self.abort_fallback_tasks(bid);
                    }
                } else if let Some(seg) = segment {
                    let flushable = {
                        let s = self.segments.get(seg);
                        s.parent_flushed && s.status == SegmentStatus::Completed
                    };
                    if flushable {
                        self.queue_completed_segment(bid, seg);
                        let b = self.boundaries.get(bid);
                        if b.completed_segments.len() == 1 && b.parent_flushed && !b.postponed {
                            self.partial_boundaries.push(bid);
                        }
                    }
                }
            }
        }
        self.task_retired();
    }

    /// Queue a completed segment for out-of-band flushing, flattening
    /// single-child passthrough segments: a segment with no literal
    /// content and exactly one plain child hoists the child in its place.
    pub(crate) fn queue_completed_segment(&mut self, boundary: BoundaryId, segment: SegmentId) {
        let hoist = {
            let seg = self.segments.get(segment);
            if seg.chunks.is_empty() && seg.children.len() == 1 {
                let child_id = seg.children[0];
                let child = self.segments.get(child_id);
                (child.boundary.is_none() && child.public_id.is_none()).then_some(child_id)
            } else {
                None
            }
        };
        match hoist {
            Some(child_id) => {
                let (public_id, index, embedded) = {
                    let seg = self.segments.get(segment);
                    (seg.public_id, seg.index, seg.text_embedded)
                };
                {
                    let child = self.segments.get_mut(child_id);
                    child.public_id = public_id;
                    child.index = index;
                    // The child now stands in for a queued position.
                    child.parent_flushed = true;
                    child.text_embedded = child.text_embedded || embedded;
                }
                if self.segments.get(child_id).status == SegmentStatus::Completed {
                    self.queue_completed_segment(boundary, child_id);
                }
            }
            None => self
                .boundaries
                .get_mut(boundary)
                .completed_segments
                .push(segment),
        }
    }

    /// Soft-abort a completed boundary's fallback work: the fallback will
    /// never be shown, so its tasks are retired without output.
    fn abort_fallback_tasks(&mut self, boundary: BoundaryId) {
        let ids: Vec<TaskId> = {
            let b = self.boundaries.get_mut(boundary);
            b.fallback_tasks.drain().collect()
        };
        for id in ids {
            self.abortable.remove(&id);
            if let Some(task) = self.tasks.take(id) {
                trace!(task = ?id, "retiring unused fallback task");
                self.finish_task(task.boundary, None);
            }
        }
    }

    // ---- depth-first node rendering -------------------------------------

    pub(crate) fn render_node(
        &mut self,
        task: &mut Task,
        node: &Node,
        depth: usize,
    ) -> RenderResult<()> {
        if depth >= self.options.max_render_depth {
            // Deep synchronous recursion becomes an implicit suspension
            // point instead of a stack overflow.
            self.spawn_deferred(task, node.clone());
            return Ok(());
        }
        if task.segment.is_none() && task.replay.is_some() {
            return self.replay_node(task, node, depth);
        }
        match node {
            Node::Empty => Ok(()),
            Node::Text(text) => {
                self.push_text(task, text);
                Ok(())
            }
            Node::Raw(markup) => {
                self.push_raw(task, markup);
                Ok(())
            }
            Node::Element(element) => self.render_element(task, element, depth),
            Node::Fragment(children) => self.render_children(task, children, depth),
            Node::Keyed(key, child) => {
                let saved_path = task.key_path.clone();
                task.key_path = saved_path.child(None, KeyOrIndex::Key(key.clone()));
                let result = self.render_node(task, child, depth + 1);
                task.key_path = saved_path;
                result
            }
            Node::Suspense(suspense) => self.render_suspense(task, suspense, depth),
            Node::Component(component) => {
                let component = ComponentRef::clone(component);
                self.render_component(task, &component, node, depth)
            }
            Node::Async(dependency) => match dependency.poll() {
                DependencyPoll::Resolved(resolved) => self.render_node(task, &resolved, depth + 1),
                DependencyPoll::Failed(err) => Err(err),
                DependencyPoll::Pending => {
                    self.spawn_suspended(
                        task,
                        node.clone(),
                        dependency.clone(),
                        AwaitLog::default(),
                    );
                    Ok(())
                }
            },
        }
    }

    pub(crate) fn render_children(
        &mut self,
        task: &mut Task,
        children: &[Node],
        depth: usize,
    ) -> RenderResult<()> {
        match children.len() {
            0 => Ok(()),
            1 => {
                let saved_index = task.child_index;
                task.child_index = 0;
                let result = self.render_node(task, &children[0], depth + 1);
                task.child_index = saved_index;
                result
            }
            total => {
                let saved_tree = task.tree_context.clone();
                let saved_index = task.child_index;
                let mut result = Ok(());
                for (i, child) in children.iter().enumerate() {
                    task.child_index = i32::try_from(i).unwrap_or(i32::MAX);
                    task.tree_context = saved_tree.push(total as u32, i as u32);
                    result = self.render_node(task, child, depth + 1);
                    if result.is_err() {
                        break;
                    }
                }
                task.tree_context = saved_tree;
                task.child_index = saved_index;
                result
            }
        }
    }

    fn render_element(
        &mut self,
        task: &mut Task,
        element: &Element,
        depth: usize,
    ) -> RenderResult<()> {
        let mut open = Vec::with_capacity(16 + element.tag.len());
        self.dialect.push_open_tag(&mut open, &task.format, element);
        if let Some(seg_id) = task.segment {
            let seg = self.segments.get_mut(seg_id);
            seg.push_chunk(Chunk::from(open));
            seg.last_pushed_text = false;
        }
        if self.dialect.is_void_element(&element.tag) {
            return Ok(());
        }

        let saved_format = task.format.clone();
        let saved_path = task.key_path.clone();
        task.format = self.dialect.child_context(&saved_format, element);
        task.key_path = saved_path.child(Some(&*element.tag), KeyOrIndex::Index(task.child_index));
        let result = self.render_children(task, &element.children, depth);
        task.format = saved_format;
        task.key_path = saved_path;
        result?;

        let mut close = Vec::with_capacity(3 + element.tag.len());
        self.dialect.push_close_tag(&mut close, &task.format, &element.tag);
        if let Some(seg_id) = task.segment {
            let seg = self.segments.get_mut(seg_id);
            seg.push_chunk(Chunk::from(close));
            seg.last_pushed_text = false;
        }
        Ok(())
    }

    fn push_text(&mut self, task: &mut Task, text: &Cow<'static, str>) {
        if text.is_empty() {
            return;
        }
        let Some(seg_id) = task.segment else { return };
        let separator = self.dialect.text_separator();
        let escaped = self.dialect.escape_text(text);
        // Clean static text passes through as a borrowed chunk.
        let chunk = match text {
            Cow::Borrowed(original) if matches!(&escaped, Cow::Borrowed(_)) => {
                Chunk::from_static(original.as_bytes())
            }
            _ => Chunk::owned(escaped.into_owned().into_bytes()),
        };
        let seg = self.segments.get_mut(seg_id);
        if seg.last_pushed_text {
            seg.push_chunk(Chunk::from_static(separator));
        }
        seg.push_chunk(chunk);
        seg.last_pushed_text = true;
    }

    fn push_raw(&mut self, task: &mut Task, markup: &Cow<'static, str>) {
        if markup.is_empty() {
            return;
        }
        let Some(seg_id) = task.segment else { return };
        let chunk = match markup {
            Cow::Borrowed(original) => Chunk::from_static(original.as_bytes()),
            Cow::Owned(owned) => Chunk::owned(owned.clone().into_bytes()),
        };
        let seg = self.segments.get_mut(seg_id);
        seg.push_chunk(chunk);
        seg.last_pushed_text = false;
    }

    fn render_component(
        &mut self,
        task: &mut Task,
        component: &ComponentRef,
        node: &Node,
        depth: usize,
    ) -> RenderResult<()> {
        let saved_path = task.key_path.clone();
        task.key_path =
            saved_path.child(Some(component.name()), KeyOrIndex::Index(task.child_index));
        task.await_log.reset();

        let mut hints = Vec::new();
        let evaluation = {
            let mut cx = EvalContext {
                tree_context: &task.tree_context,
                key_path: &task.key_path,
                identifier_prefix: &self.options.identifier_prefix,
                await_log: &mut task.await_log,
                hints: &mut hints,
                resumable: self.tracked.is_some(),
                local_ids: 0,
            };
            component.evaluate(&mut cx)
        };
        self.route_hints(task.boundary, hints);

        match evaluation {
            Ok(Evaluation::Children(child)) => {
                let result = self.render_node(task, &child, depth + 1);
                task.key_path = saved_path;
                result
            }
            Ok(Evaluation::Suspended(dependency)) => {
                task.key_path = saved_path;
                let log = std::mem::take(&mut task.await_log);
                self.spawn_suspended(task, node.clone(), dependency, log);
                Ok(())
            }
            Ok(Evaluation::Postponed) => {
                let result = self.postpone(task);
                task.key_path = saved_path;
                result
            }
            Err(err) => {
                task.key_path = saved_path;
                Err(err)
            }
        }
    }

    /// Record a postponed hole (prerender passes only).
    fn postpone(&mut self, task: &mut Task) -> RenderResult<()> {
        if self.tracked.is_none() {
            return Err(RenderError::render(
                "component postponed outside a prerender pass",
            ));
        }
        match task.boundary {
            Some(bid) => {
                // The whole boundary becomes the resume unit: it stays
                // pending so the shell carries its fallback.
                self.boundaries.get_mut(bid).postponed = true;
                if let Some(tracked) = self.tracked.as_mut() {
                    if !tracked.boundaries.contains(&bid) {
                        tracked.boundaries.push(bid);
                    }
                }
                debug!("boundary postponed for a resumed pass");
                Ok(())
            }
            None => {
                let Some(parent) = task.segment else {
                    return Err(RenderError::render(
                        "component postponed during a resumed pass",
                    ));
                };
                let hole = self.new_child_segment(parent);
                self.segments.get_mut(hole).status = SegmentStatus::Postponed;
                let steps = task.key_path.steps();
                if let Some(tracked) = self.tracked.as_mut() {
                    tracked.holes.push(super::replay::SegmentHole {
                        steps,
                        segment: hole,
                    });
                }
                debug!("segment postponed for a resumed pass");
                Ok(())
            }
        }
    }

    fn render_suspense(
        &mut self,
        task: &mut Task,
        suspense: &SuspenseNode,
        depth: usize,
    ) -> RenderResult<()> {
        let Some(parent_segment) = task.segment else {
            return Ok(());
        };
        let saved_path = task.key_path.clone();
        task.key_path = saved_path.child(Some("Suspense"), KeyOrIndex::Index(task.child_index));

        // Content renders into a detached root; the slot in the parent
        // holds the fallback and points at the boundary. The root flushes
        // through the boundary's own queue, so it counts as placed.
        let content_root = self.segments.insert(Segment::new(0, None, false));
        self.segments.get_mut(content_root).parent_flushed = true;
        let bid = self
            .boundaries
            .insert(Boundary::new(content_root, task.key_path.steps()));
        let fallback_slot = self.new_child_segment(parent_segment);
        self.segments.get_mut(fallback_slot).boundary = Some(bid);

        // Render the content now, within this task, against the new
        // boundary. Suspensions inside attach to it.
        let saved_boundary = task.boundary;
        let saved_segment = task.segment;
        task.boundary = Some(bid);
        task.segment = Some(content_root);
        let content_result = self.render_node(task, &suspense.content, depth + 1);
        task.boundary = saved_boundary;
        task.segment = saved_segment;

        match content_result {
            Ok(()) => {
                self.complete_segment(Some(bid), content_root);
                if self.segments.get(content_root).status == SegmentStatus::Completed
                    && !self.boundaries.get(bid).postponed
                {
                    self.queue_completed_segment(bid, content_root);
                }
                let b = self.boundaries.get(bid);
                if b.pending_tasks == 0 && b.status == BoundaryStatus::Pending && !b.postponed {
                    self.boundaries.get_mut(bid).status = BoundaryStatus::Completed;
                    task.key_path = saved_path;
                    // Content finished synchronously: the fallback is never
                    // scheduled at all.
                    return Ok(());
                }
            }
            Err(err) => {
                let digest = self.report_error(&err, &task.key_path);
                self.client_render_boundary(
                    bid,
                    digest,
                    Some(err.to_string()),
                    Some(task.key_path.display()),
                );
            }
        }

        // The fallback renders as its own task, under the parent scope.
        let fallback_task = Task {
            id: TaskId::from_index(0),
            node: suspense.fallback.clone(),
            child_index: task.child_index,
            key_path: saved_path.child(Some("Fallback"), KeyOrIndex::Index(task.child_index)),
            tree_context: task.tree_context.clone(),
            format: task.format.clone().with_flags(FormatFlags::FALLBACK),
            segment: Some(fallback_slot),
            boundary: saved_boundary,
            fallback_of: Some(bid),
            await_log: AwaitLog::default(),
            replay: None,
        };
        let fallback_id = self.register_task(fallback_task, saved_boundary);
        self.ready.push_back(fallback_id);
        task.key_path = saved_path;
        Ok(())
    }

    // ---- task spawning --------------------------------------------------

    /// A child segment of `parent` spliced at the current chunk position.
    pub(crate) fn new_child_segment(&mut self, parent: SegmentId) -> SegmentId {
        let (index, embedded) = {
            let p = self.segments.get_mut(parent);
            let index = p.chunks.len();
            let embedded = p.last_pushed_text;
            p.last_pushed_text = false;
            (index, embedded)
        };
        let id = self.segments.insert(Segment::new(index, None, embedded));
        self.segments.get_mut(parent).children.push(id);
        id
    }

    /// Replace the current position with a fresh task that resumes when
    /// `dependency` settles. Replay tasks keep their cursor and stay
    /// unbuffered.
    pub(super) fn spawn_suspended(
        &mut self,
        task: &Task,
        node: Node,
        dependency: Dependency,
        await_log: AwaitLog,
    ) {
        let segment = task.segment.map(|parent| self.new_child_segment(parent));
        let new_task = Task {
            id: TaskId::from_index(0),
            node,
            child_index: task.child_index,
            key_path: task.key_path.clone(),
            tree_context: task.tree_context.clone(),
            format: task.format.clone(),
            segment,
            boundary: task.boundary,
            fallback_of: task.fallback_of,
            await_log,
            replay: task.replay.clone(),
        };
        let id = self.register_task(new_task, task.boundary);
        dependency.subscribe(id, self.ping_tx.clone());
        debug!(task = ?id, "subtree suspended on a dependency");
    }

    /// Respawn a subtree as its own immediately-ready task.
    fn spawn_deferred(&mut self, task: &Task, node: Node) {
        let segment = task.segment.map(|parent| self.new_child_segment(parent));
        let new_task = Task {
            id: TaskId::from_index(0),
            node,
            child_index: task.child_index,
            key_path: task.key_path.clone(),
            tree_context: task.tree_context.clone(),
            format: task.format.clone(),
            segment,
            boundary: task.boundary,
            fallback_of: task.fallback_of,
            await_log: AwaitLog::default(),
            replay: task.replay.clone(),
        };
        let id = self.register_task(new_task, task.boundary);
        self.ready.push_back(id);
        trace!(task = ?id, "deep subtree rescheduled");
    }

    /// Spawn an immediately-ready task with explicit placement. Used by
    /// resumed passes to materialize recorded slots.
    pub(crate) fn spawn_ready_at(
        &mut self,
        task: &Task,
        node: Node,
        segment: Option<SegmentId>,
        boundary: Option<BoundaryId>,
        key_path: crate::tree::KeyPath,
    ) -> TaskId {
        let new_task = Task {
            id: TaskId::from_index(0),
            node,
            child_index: task.child_index,
            key_path,
            tree_context: task.tree_context.clone(),
            format: task.format.clone(),
            segment,
            boundary,
            fallback_of: None,
            await_log: AwaitLog::default(),
            replay: None,
        };
        let id = self.register_task(new_task, boundary);
        self.ready.push_back(id);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::HtmlDialect;
    use crate::request::{RenderCallbacks, RenderOptions};
    use crate::tree::Element;

    fn request_for(node: Node) -> Request {
        Request::new(
            node,
            RenderOptions::default(),
            Box::new(HtmlDialect),
            RenderCallbacks::new(),
        )
    }

    fn root_bytes(request: &Request) -> Vec<u8> {
        let root = request.root_segment.expect("root segment");
        request
            .segments
            .get(root)
            .chunks
            .iter()
            .flat_map(|c| c.as_bytes().to_vec())
            .collect()
    }

    #[test]
    fn sync_tree_renders_into_the_root_segment() {
        let node = Node::from(
            Element::new("div")
                .attr("class", "app")
                .child("hello")
                .child(Element::new("br")),
        );
        let mut request = request_for(node);
        request.perform_work();
        assert_eq!(request.pending_tasks(), 0);
        assert_eq!(
            String::from_utf8(root_bytes(&request)).unwrap(),
            "<div class=\"app\">hello<br></div>"
        );
    }

    #[test]
    fn adjacent_text_nodes_get_a_separator() {
        let node = Node::fragment(vec![Node::text("a"), Node::text("b"), Node::text("c")]);
        let mut request = request_for(node);
        request.perform_work();
        assert_eq!(
            String::from_utf8(root_bytes(&request)).unwrap(),
            "a<!-- -->b<!-- -->c"
        );
    }

    #[test]
    fn elements_break_text_adjacency() {
        let node = Node::fragment(vec![
            Node::text("a"),
            Element::new("i").child("x").into(),
            Node::text("b"),
        ]);
        let mut request = request_for(node);
        request.perform_work();
        assert_eq!(
            String::from_utf8(root_bytes(&request)).unwrap(),
            "a<i>x</i>b"
        );
    }

    #[test]
    fn text_is_escaped_and_raw_is_not() {
        let node = Node::fragment(vec![
            Node::text("1 < 2"),
            Node::raw("<script>let x = 1 < 2;</script>"),
        ]);
        let mut request = request_for(node);
        request.perform_work();
        assert_eq!(
            String::from_utf8(root_bytes(&request)).unwrap(),
            "1 &lt; 2<script>let x = 1 < 2;</script>"
        );
    }

    #[test]
    fn components_expand_in_place() {
        let node = Node::from(Element::new("main").child(Node::component(
            |_: &mut EvalContext<'_>| {
                Ok(Evaluation::Children(Node::from(
                    Element::new("p").child("inner"),
                )))
            },
        )));
        let mut request = request_for(node);
        request.perform_work();
        assert_eq!(
            String::from_utf8(root_bytes(&request)).unwrap(),
            "<main><p>inner</p></main>"
        );
    }

    #[test]
    fn deep_recursion_respawns_instead_of_overflowing() {
        // Build a tree far deeper than the depth limit.
        let mut node = Node::text("leaf");
        for _ in 0..2_000 {
            node = Element::new("div").child(node).into();
        }
        let mut request = request_for(node);
        request.perform_work();
        assert_eq!(request.pending_tasks(), 0);
        let root = request.root_segment.unwrap();
        // The subtree landed in nested child segments rather than one flat
        // chunk list.
        assert!(!request.segments.get(root).children.is_empty());
    }

    #[test]
    fn pending_async_child_suspends_without_blocking_siblings() {
        let (dep, _handle) = Dependency::new();
        let node = Node::fragment(vec![
            Node::text("before"),
            Node::awaiting(dep),
            Node::text("after"),
        ]);
        let mut request = request_for(node);
        request.perform_work();
        // Root task completed; the suspended child holds one pending task.
        assert_eq!(request.pending_tasks(), 1);
        let bytes = String::from_utf8(root_bytes(&request)).unwrap();
        assert!(bytes.contains("before"));
        assert!(bytes.contains("after"));
    }

    #[test]
    fn resolved_dependency_renders_inline() {
        let node = Node::awaiting(Dependency::resolved(Node::text("ready")));
        let mut request = request_for(node);
        request.perform_work();
        assert_eq!(request.pending_tasks(), 0);
        assert_eq!(String::from_utf8(root_bytes(&request)).unwrap(), "ready");
    }

    #[test]
    fn sync_suspense_content_skips_the_fallback() {
        let node = Node::suspense(Node::text("loading"), Node::text("content"));
        let mut request = request_for(node);
        request.perform_work();
        assert_eq!(request.pending_tasks(), 0);
        // The boundary completed synchronously; no fallback task ran, so
        // its slot segment holds no chunks.
        let root = request.root_segment.unwrap();
        let slot = request.segments.get(root).children[0];
        assert!(request.segments.get(slot).chunks.is_empty());
        let bid = request.segments.get(slot).boundary.unwrap();
        assert_eq!(
            request.boundaries.get(bid).status,
            BoundaryStatus::Completed
        );
    }

    #[test]
    fn suspended_suspense_content_schedules_the_fallback() {
        let (dep, _handle) = Dependency::new();
        let node = Node::suspense(Node::text("loading"), Node::awaiting(dep));
        let mut request = request_for(node);
        request.perform_work();
        // One suspended content task remains.
        assert_eq!(request.pending_tasks(), 1);
        let root = request.root_segment.unwrap();
        let slot = request.segments.get(root).children[0];
        let slot_text: Vec<u8> = request
            .segments
            .get(slot)
            .chunks
            .iter()
            .flat_map(|c| c.as_bytes().to_vec())
            .collect();
        assert_eq!(slot_text, b"loading");
    }

    #[test]
    fn component_error_at_root_is_fatal() {
        let node = Node::component(|_: &mut EvalContext<'_>| {
            Err::<Evaluation, _>(RenderError::render("boom"))
        });
        let mut request = request_for(node);
        request.perform_work();
        assert_eq!(request.status(), RequestStatus::Fatal);
    }

    #[test]
    fn component_error_inside_boundary_client_renders_it() {
        let failing = Node::component(|_: &mut EvalContext<'_>| {
            Err::<Evaluation, _>(RenderError::render("boom"))
        });
        let node = Node::suspense(Node::text("loading"), failing);
        let mut request = request_for(node);
        request.perform_work();
        assert_eq!(request.status(), RequestStatus::Working);
        assert_eq!(request.pending_tasks(), 0);
        let root = request.root_segment.unwrap();
        let slot = request.segments.get(root).children[0];
        let bid = request.segments.get(slot).boundary.unwrap();
        assert_eq!(
            request.boundaries.get(bid).status,
            BoundaryStatus::ClientRendered
        );
        assert!(request
            .boundaries
            .get(bid)
            .error_message
            .as_deref()
            .unwrap()
            .contains("boom"));
    }

    #[test]
    fn await_log_lets_multi_await_components_progress() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let (dep_a, handle_a) = Dependency::new();
        let (dep_b, handle_b) = Dependency::new();
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_seen = Arc::clone(&attempts);
        let (da, db) = (dep_a.clone(), dep_b.clone());
        let component = move |cx: &mut EvalContext<'_>| {
            attempts_seen.fetch_add(1, Ordering::SeqCst);
            let Some(a) = cx.wait(&da)? else {
                return Ok(Evaluation::Suspended(da.clone()));
            };
            let Some(b) = cx.wait(&db)? else {
                return Ok(Evaluation::Suspended(db.clone()));
            };
            Ok(Evaluation::Children(Node::fragment(vec![a, b])))
        };
        let mut request = request_for(Node::component(component));
        request.perform_work();
        assert_eq!(request.pending_tasks(), 1);

        handle_a.resolve(Node::text("one"));
        request.perform_work();
        assert_eq!(request.pending_tasks(), 1);

        handle_b.resolve(Node::text("two"));
        request.perform_work();
        assert_eq!(request.pending_tasks(), 0);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
