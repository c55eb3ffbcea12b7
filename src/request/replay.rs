//! Resumable rendering: postponed holes, recorded replay trees, and the
//! resumed pass that fills them.
//!
//! A prerender pass records two kinds of holes. A component postponing
//! *outside* any boundary leaves a segment hole: the shell carries a
//! placeholder and the resumed pass streams the segment into it. A
//! component postponing *inside* a boundary makes the whole boundary the
//! resume unit: the prerender keeps it pending (its fallback ships with the
//! shell), and the resumed pass re-renders the content and completes it
//! out-of-band.
//!
//! The resumed pass walks the same tree with replay tasks that buffer
//! nothing; they match recorded children by name and key/index and only
//! materialize real segments at recorded slots. A shape mismatch downgrades
//! the recorded boundaries beneath it to client-rendered rather than risk
//! emitting mismatched output.

use super::{Request, RequestStatus};
use crate::boundary::{Boundary, BoundaryId};
use crate::dialect::Dialect;
use crate::error::{RenderError, RenderResult};
use crate::evaluate::{AwaitLog, EvalContext, Evaluation};
use crate::format::FormatContext;
use crate::request::{RenderCallbacks, RenderOptions};
use crate::segment::{Segment, SegmentId};
use crate::task::{Task, TaskId};
use crate::tree::{
    ComponentRef, DependencyPoll, Element, KeyOrIndex, KeyPath, KeyStep, Node, SuspenseNode,
    TreeContext,
};
use serde::{Deserialize, Serialize};
use std::rc::Rc;
use tracing::{debug, warn};

/// Ids a resumed pass needs to finish a postponed boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayBoundary {
    /// Wire id of the placeholder shipped with the prerendered shell.
    pub placeholder_id: u64,
    /// Wire id reserved for the content's root segment.
    pub content_root_id: u64,
}

/// One recorded position in the replay tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayNode {
    /// Element tag / component name at this step; `None` for key wrappers.
    pub name: Option<String>,
    /// Key or index discriminator at this step.
    pub entry: KeyOrIndex,
    /// Recorded steps beneath this one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ReplayNode>,
    /// Wire id of a segment hole at this position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hole: Option<u64>,
    /// Boundary resume ids when this position is a postponed suspense.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boundary: Option<ReplayBoundary>,
}

impl ReplayNode {
    fn root() -> Self {
        Self {
            name: None,
            entry: KeyOrIndex::Index(-1),
            children: Vec::new(),
            hole: None,
            boundary: None,
        }
    }

    fn for_step(step: &KeyStep) -> Self {
        Self {
            name: step.name.clone(),
            entry: step.entry.clone(),
            children: Vec::new(),
            hole: None,
            boundary: None,
        }
    }
}

/// Everything a later process needs to finish a prerendered document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostponedState {
    /// Recorded replay tree, rooted at the document root.
    pub replay: ReplayNode,
    /// First wire id the resumed pass may allocate.
    pub next_segment_id: u64,
    /// Identifier prefix the prerender used; the resumed pass must match it
    /// so deterministic ids line up.
    pub identifier_prefix: String,
}

/// Prerender-side bookkeeping of recorded holes.
#[derive(Debug, Default)]
pub(crate) struct TrackedPostpones {
    pub(crate) holes: Vec<SegmentHole>,
    pub(crate) boundaries: Vec<BoundaryId>,
}

/// One recorded segment hole.
#[derive(Debug)]
pub(crate) struct SegmentHole {
    pub(crate) steps: Vec<KeyStep>,
    pub(crate) segment: SegmentId,
}

/// Runtime (shareable) form of the replay tree.
#[derive(Debug)]
pub(crate) struct ReplayTree {
    pub(crate) name: Option<String>,
    pub(crate) entry: KeyOrIndex,
    pub(crate) children: Vec<Rc<ReplayTree>>,
    pub(crate) hole: Option<u64>,
    pub(crate) boundary: Option<ReplayBoundary>,
}

/// A position in the replay tree carried by a replay task.
pub(crate) type ReplayCursor = Rc<ReplayTree>;

impl ReplayTree {
    fn from_node(node: ReplayNode) -> Rc<Self> {
        Rc::new(Self {
            name: node.name,
            entry: node.entry,
            children: node.children.into_iter().map(Self::from_node).collect(),
            hole: node.hole,
            boundary: node.boundary,
        })
    }

    fn shape(&self) -> String {
        match &self.name {
            Some(name) => format!("element <{name}>"),
            None => "keyed slot".into(),
        }
    }
}

enum ReplayAction {
    /// Nothing recorded here: the prerender finished this subtree.
    Skip,
    /// Keep matching beneath this recorded step.
    Descend(ReplayCursor),
    /// A recorded segment hole: render for real into the recorded id.
    FillHole(ReplayCursor),
    /// A recorded postponed boundary: re-render its content.
    ResumeBoundary(ReplayCursor),
    /// Same position, different shape.
    Mismatch(ReplayCursor),
}

fn match_replay_child(cursor: &ReplayTree, name: Option<&str>, entry: &KeyOrIndex) -> ReplayAction {
    for child in &cursor.children {
        if child.entry != *entry {
            continue;
        }
        if child.name.as_deref() != name {
            return ReplayAction::Mismatch(Rc::clone(child));
        }
        if child.hole.is_some() {
            return ReplayAction::FillHole(Rc::clone(child));
        }
        if child.boundary.is_some() {
            return ReplayAction::ResumeBoundary(Rc::clone(child));
        }
        return ReplayAction::Descend(Rc::clone(child));
    }
    ReplayAction::Skip
}

fn collect_boundaries(cursor: &ReplayTree, out: &mut Vec<ReplayBoundary>) {
    if let Some(boundary) = cursor.boundary {
        out.push(boundary);
    }
    for child in &cursor.children {
        collect_boundaries(child, out);
    }
}

fn contains_holes(cursor: &ReplayTree) -> bool {
    cursor.hole.is_some() || cursor.children.iter().any(|c| contains_holes(c))
}

/// Build the serializable state out of a settled prerender request.
pub(crate) fn build_postponed_state(request: Request) -> Option<PostponedState> {
    let tracked = request.tracked.as_ref()?;
    let mut root = ReplayNode::root();
    for hole in &tracked.holes {
        let Some(public_id) = request.segments.get(hole.segment).public_id else {
            warn!("postponed segment was never flushed; dropping its hole");
            continue;
        };
        insert_path(&mut root, &hole.steps).hole = Some(public_id);
    }
    for &bid in &tracked.boundaries {
        let b = request.boundaries.get(bid);
        let (Some(placeholder_id), Some(content_root_id)) = (b.placeholder_id, b.content_root_id)
        else {
            warn!("postponed boundary was never flushed; dropping it");
            continue;
        };
        insert_path(&mut root, &b.key_steps).boundary = Some(ReplayBoundary {
            placeholder_id,
            content_root_id,
        });
    }
    Some(PostponedState {
        replay: root,
        next_segment_id: request.peek_next_id(),
        identifier_prefix: request.options.identifier_prefix.clone(),
    })
}

fn insert_path<'a>(mut node: &'a mut ReplayNode, steps: &[KeyStep]) -> &'a mut ReplayNode {
    for step in steps {
        let position = node
            .children
            .iter()
            .position(|c| c.entry == step.entry && c.name == step.name);
        let index = match position {
            Some(i) => i,
            None => {
                node.children.push(ReplayNode::for_step(step));
                node.children.len() - 1
            }
        };
        node = &mut node.children[index];
    }
    node
}

impl Request {
    /// Create a resumed pass that finishes the holes a prerender recorded.
    ///
    /// `root` must be the same logical tree the prerender walked. The shell
    /// was already delivered by the prerendered document, so this request
    /// produces only out-of-band fragments.
    pub fn resume(
        root: Node,
        state: PostponedState,
        mut options: RenderOptions,
        dialect: Box<dyn Dialect>,
        callbacks: RenderCallbacks,
    ) -> Self {
        options.identifier_prefix.clone_from(&state.identifier_prefix);
        let mut request = Self::empty(options, dialect, callbacks);
        request.status = RequestStatus::ShellSent;
        request.shell_flushed = true;
        request.set_next_id(state.next_segment_id);

        let task = Task {
            id: TaskId::from_index(0),
            node: root,
            child_index: -1,
            key_path: KeyPath::root(),
            tree_context: TreeContext::root(),
            format: FormatContext::root(),
            segment: None,
            boundary: None,
            fallback_of: None,
            await_log: AwaitLog::default(),
            replay: Some(ReplayTree::from_node(state.replay)),
        };
        let id = request.register_task(task, None);
        request.ready.push_back(id);
        request
    }

    // ---- replay traversal -----------------------------------------------

    /// Render dispatch for replay tasks: match, don't buffer.
    pub(crate) fn replay_node(
        &mut self,
        task: &mut Task,
        node: &Node,
        depth: usize,
    ) -> RenderResult<()> {
        match node {
            // Static output already reached the client in the prerender.
            Node::Empty | Node::Text(_) | Node::Raw(_) => Ok(()),
            Node::Fragment(children) => self.render_children(task, children, depth),
            Node::Keyed(key, child) => self.replay_keyed(task, key, child, depth),
            Node::Element(element) => self.replay_element(task, element, depth),
            Node::Component(component) => {
                let component = ComponentRef::clone(component);
                self.replay_component(task, &component, node, depth)
            }
            Node::Suspense(suspense) => self.replay_suspense(task, suspense, depth),
            Node::Async(dependency) => match dependency.poll() {
                DependencyPoll::Resolved(resolved) => self.replay_node(task, &resolved, depth + 1),
                DependencyPoll::Failed(err) => Err(err),
                DependencyPoll::Pending => {
                    self.spawn_suspended(task, node.clone(), dependency.clone(), AwaitLog::default());
                    Ok(())
                }
            },
        }
    }

    fn replay_keyed(
        &mut self,
        task: &mut Task,
        key: &str,
        child: &Node,
        depth: usize,
    ) -> RenderResult<()> {
        let Some(cursor) = task.replay.clone() else {
            return Ok(());
        };
        let entry = KeyOrIndex::Key(key.to_owned());
        match match_replay_child(&cursor, None, &entry) {
            ReplayAction::Skip => Ok(()),
            ReplayAction::Mismatch(recorded) => {
                self.replay_mismatch(task, &recorded, node_shape_of_keyed(key));
                Ok(())
            }
            ReplayAction::FillHole(recorded) => self.fill_hole(task, child, &recorded),
            ReplayAction::Descend(recorded) | ReplayAction::ResumeBoundary(recorded) => {
                let saved_path = task.key_path.clone();
                task.key_path = saved_path.child(None, entry);
                let saved_replay = task.replay.replace(Rc::clone(&recorded));
                let result = self.replay_node(task, child, depth + 1);
                task.replay = saved_replay;
                task.key_path = saved_path;
                if let Err(err) = result {
                    self.replay_failed(task, &recorded, err);
                }
                Ok(())
            }
        }
    }

    fn replay_element(
        &mut self,
        task: &mut Task,
        element: &Element,
        depth: usize,
    ) -> RenderResult<()> {
        let Some(cursor) = task.replay.clone() else {
            return Ok(());
        };
        let entry = KeyOrIndex::Index(task.child_index);
        match match_replay_child(&cursor, Some(&*element.tag), &entry) {
            ReplayAction::Skip => Ok(()),
            ReplayAction::Mismatch(recorded) => {
                self.replay_mismatch(task, &recorded, format!("element <{}>", element.tag));
                Ok(())
            }
            ReplayAction::FillHole(recorded) => {
                let node = Node::Element(Box::new(element.clone()));
                self.fill_hole(task, &node, &recorded)
            }
            ReplayAction::Descend(recorded) | ReplayAction::ResumeBoundary(recorded) => {
                let saved_path = task.key_path.clone();
                let saved_format = task.format.clone();
                task.key_path =
                    saved_path.child(Some(&*element.tag), KeyOrIndex::Index(task.child_index));
                task.format = self.dialect.child_context(&saved_format, element);
                let saved_replay = task.replay.replace(Rc::clone(&recorded));
                let result = self.render_children(task, &element.children, depth);
                task.replay = saved_replay;
                task.format = saved_format;
                task.key_path = saved_path;
                if let Err(err) = result {
                    self.replay_failed(task, &recorded, err);
                }
                Ok(())
            }
        }
    }

    fn replay_component(
        &mut self,
        task: &mut Task,
        component: &ComponentRef,
        node: &Node,
        depth: usize,
    ) -> RenderResult<()> {
        let Some(cursor) = task.replay.clone() else {
            return Ok(());
        };
        let entry = KeyOrIndex::Index(task.child_index);
        let recorded = match match_replay_child(&cursor, Some(component.name()), &entry) {
            ReplayAction::Skip => return Ok(()),
            ReplayAction::Mismatch(recorded) => {
                self.replay_mismatch(task, &recorded, format!("component {}", component.name()));
                return Ok(());
            }
            ReplayAction::FillHole(recorded) => return self.fill_hole(task, node, &recorded),
            ReplayAction::Descend(recorded) | ReplayAction::ResumeBoundary(recorded) => recorded,
        };

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
                resumable: false,
                local_ids: 0,
            };
            component.evaluate(&mut cx)
        };
        self.route_hints(task.boundary, hints);

        match evaluation {
            Ok(Evaluation::Children(child)) => {
                let saved_replay = task.replay.replace(Rc::clone(&recorded));
                let result = self.replay_node(task, &child, depth + 1);
                task.replay = saved_replay;
                task.key_path = saved_path;
                if let Err(err) = result {
                    self.replay_failed(task, &recorded, err);
                }
                Ok(())
            }
            Ok(Evaluation::Suspended(dependency)) => {
                task.key_path = saved_path;
                // The dependency pings a fresh replay task for this node.
                let log = std::mem::take(&mut task.await_log);
                self.spawn_suspended(task, node.clone(), dependency, log);
                Ok(())
            }
            Ok(Evaluation::Postponed) => {
                task.key_path = saved_path;
                let err = RenderError::render("component postponed during a resumed pass");
                self.replay_failed(task, &recorded, err);
                Ok(())
            }
            Err(err) => {
                task.key_path = saved_path;
                self.replay_failed(task, &recorded, err);
                Ok(())
            }
        }
    }

    fn replay_suspense(
        &mut self,
        task: &mut Task,
        suspense: &SuspenseNode,
        depth: usize,
    ) -> RenderResult<()> {
        let Some(cursor) = task.replay.clone() else {
            return Ok(());
        };
        let entry = KeyOrIndex::Index(task.child_index);
        match match_replay_child(&cursor, Some("Suspense"), &entry) {
            ReplayAction::Skip => Ok(()),
            ReplayAction::Mismatch(recorded) => {
                self.replay_mismatch(task, &recorded, "suspense".to_owned());
                Ok(())
            }
            ReplayAction::FillHole(recorded) => {
                let node = Node::Suspense(Box::new(suspense.clone()));
                self.fill_hole(task, &node, &recorded)
            }
            ReplayAction::ResumeBoundary(recorded) => self.resume_boundary(task, suspense, &recorded),
            ReplayAction::Descend(recorded) => {
                // A recorded path passes through this boundary's content.
                let saved_path = task.key_path.clone();
                task.key_path = saved_path.child(Some("Suspense"), entry);
                let saved_replay = task.replay.replace(Rc::clone(&recorded));
                let result = self.replay_node(task, &suspense.content, depth + 1);
                task.replay = saved_replay;
                task.key_path = saved_path;
                if let Err(err) = result {
                    self.replay_failed(task, &recorded, err);
                }
                Ok(())
            }
        }
    }

    /// Materialize a recorded segment hole: render `node` for real into a
    /// segment carrying the recorded wire id.
    fn fill_hole(&mut self, task: &Task, node: &Node, recorded: &ReplayCursor) -> RenderResult<()> {
        let Some(hole_id) = recorded.hole else {
            return Ok(());
        };
        debug!(id = hole_id, "filling postponed segment");
        let segment = self.segments.insert(Segment::new(0, None, false));
        {
            let s = self.segments.get_mut(segment);
            s.public_id = Some(hole_id);
            s.parent_flushed = true;
        }
        self.spawn_ready_at(
            task,
            node.clone(),
            Some(segment),
            task.boundary,
            task.key_path.clone(),
        );
        Ok(())
    }

    /// Materialize a recorded postponed boundary and re-render its content.
    fn resume_boundary(
        &mut self,
        task: &Task,
        suspense: &SuspenseNode,
        recorded: &ReplayCursor,
    ) -> RenderResult<()> {
        let Some(ids) = recorded.boundary else {
            return Ok(());
        };
        debug!(id = ids.placeholder_id, "resuming postponed boundary");
        let content_root = self.segments.insert(Segment::new(0, None, false));
        self.segments.get_mut(content_root).parent_flushed = true;
        let content_path = task
            .key_path
            .child(Some("Suspense"), KeyOrIndex::Index(task.child_index));
        let bid = self
            .boundaries
            .insert(Boundary::new(content_root, content_path.steps()));
        {
            let b = self.boundaries.get_mut(bid);
            b.placeholder_id = Some(ids.placeholder_id);
            b.content_root_id = Some(ids.content_root_id);
            b.parent_flushed = true;
        }
        // The fallback is already on the client; only content renders.
        self.spawn_ready_at(
            task,
            suspense.content.clone(),
            Some(content_root),
            Some(bid),
            content_path,
        );
        Ok(())
    }

    /// A replay subtree failed (mismatch, evaluator error, or postpone):
    /// downgrade every boundary recorded beneath it to client-rendered.
    fn replay_failed(&mut self, task: &Task, recorded: &ReplayCursor, err: RenderError) {
        let digest = self.report_error(&err, &task.key_path);
        let mut boundaries = Vec::new();
        collect_boundaries(recorded, &mut boundaries);
        if contains_holes(recorded) {
            // A bare slot has no fallback to hand to the client; the
            // document can never be completed.
            self.fatal(err.clone());
            return;
        }
        warn!(
            boundaries = boundaries.len(),
            %err,
            "replay subtree failed; client-rendering its recorded boundaries"
        );
        for ids in boundaries {
            let content_root = self.segments.insert(Segment::new(0, None, false));
            let bid = self.boundaries.insert(Boundary::new(content_root, Vec::new()));
            {
                let b = self.boundaries.get_mut(bid);
                b.placeholder_id = Some(ids.placeholder_id);
                b.parent_flushed = true;
            }
            self.client_render_boundary(
                bid,
                digest.clone(),
                Some(err.to_string()),
                Some(task.key_path.display()),
            );
        }
    }

    fn replay_mismatch(&mut self, task: &Task, recorded: &ReplayCursor, found: String) {
        let err = RenderError::ReplayMismatch {
            path: task.key_path.display(),
            expected: recorded.shape(),
            found,
        };
        self.replay_failed(task, recorded, err);
    }

}

fn node_shape_of_keyed(key: &str) -> String {
    format!("keyed [{key}]")
}
