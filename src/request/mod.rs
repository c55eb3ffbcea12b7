//! The request: one whole rendering session.
//!
//! A request exclusively owns every task, segment, and boundary created
//! under it. It is driven from a single thread: [`Request::perform_work`]
//! drains the ready queue, [`Request::flush`] serializes whatever has
//! completed, and [`Request::abort`] cancels what is still pending.
//! Dependency producers on other threads reach the request only through
//! the ping channel.

pub(crate) mod replay;
mod work;

use crate::boundary::{BoundaryArena, BoundaryId, BoundaryStatus, ResourceHint};
use crate::dialect::Dialect;
use crate::error::{RenderError, RenderResult};
use crate::evaluate::AwaitLog;
use crate::format::FormatContext;
use crate::segment::{Segment, SegmentArena, SegmentId};
use crate::sink::Sink;
use crate::task::{Task, TaskArena, TaskId};
use crate::tree::{KeyPath, Node, TreeContext};
use crossbeam_channel::{unbounded, Receiver, Sender};
use replay::{PostponedState, TrackedPostpones};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Lifecycle of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    /// Rendering; the shell has not been serialized yet.
    Working,
    /// The shell has been accepted by the sink; later completions stream
    /// out-of-band.
    ShellSent,
    /// All work finished and the sink was told to end.
    Closed,
    /// An unrecoverable error occurred; the sink was destroyed.
    Fatal,
}

/// Tunables for a rendering session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderOptions {
    /// Byte threshold above which a completed boundary is streamed
    /// out-of-band even when it finishes before the shell, bounding shell
    /// size. A latency/size heuristic, not a law.
    pub progressive_chunk_size: usize,
    /// Prefix prepended to every wire id and deterministic id, so several
    /// sessions can share one document.
    pub identifier_prefix: String,
    /// Synchronous recursion depth at which a subtree is respawned as its
    /// own task instead of growing the call stack.
    pub max_render_depth: usize,
    /// Coalescing view size of the writer, in bytes.
    pub writer_view_size: usize,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            progressive_chunk_size: 12_800,
            identifier_prefix: String::new(),
            max_render_depth: 256,
            writer_view_size: crate::chunk::DEFAULT_VIEW_SIZE,
        }
    }
}

/// Context handed to the error-reporting hook.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// Identity path of the failing position.
    pub path: String,
}

type ShellCallback = Box<dyn FnMut()>;
type ErrorCallback = Box<dyn FnMut(&RenderError)>;
type ReportCallback = Box<dyn FnMut(&RenderError, &ErrorContext) -> Option<String>>;

/// Lifecycle callbacks surfaced to the caller.
#[derive(Default)]
pub struct RenderCallbacks {
    on_shell_ready: Option<ShellCallback>,
    on_shell_error: Option<ErrorCallback>,
    on_all_ready: Option<ShellCallback>,
    on_fatal_error: Option<ErrorCallback>,
    on_error: Option<ReportCallback>,
}

impl RenderCallbacks {
    /// No callbacks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once, after the complete shell has been accepted by the sink.
    pub fn on_shell_ready(mut self, f: impl FnMut() + 'static) -> Self {
        self.on_shell_ready = Some(Box::new(f));
        self
    }

    /// Called when the request fails before the shell could be sent.
    pub fn on_shell_error(mut self, f: impl FnMut(&RenderError) + 'static) -> Self {
        self.on_shell_error = Some(Box::new(f));
        self
    }

    /// Called once, when no pending work remains.
    pub fn on_all_ready(mut self, f: impl FnMut() + 'static) -> Self {
        self.on_all_ready = Some(Box::new(f));
        self
    }

    /// Called on any unrecoverable failure.
    pub fn on_fatal_error(mut self, f: impl FnMut(&RenderError) + 'static) -> Self {
        self.on_fatal_error = Some(Box::new(f));
        self
    }

    /// Reporting hook for every recoverable error. May return a digest
    /// string forwarded to the client in place of the raw error.
    pub fn on_error(
        mut self,
        f: impl FnMut(&RenderError, &ErrorContext) -> Option<String> + 'static,
    ) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }
}

impl std::fmt::Debug for RenderCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderCallbacks")
            .field("on_shell_ready", &self.on_shell_ready.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish_non_exhaustive()
    }
}

/// One rendering session.
pub struct Request {
    pub(crate) status: RequestStatus,
    pub(crate) options: RenderOptions,
    pub(crate) dialect: Box<dyn Dialect>,
    callbacks: RenderCallbacks,

    pub(crate) segments: SegmentArena,
    pub(crate) boundaries: BoundaryArena,
    pub(crate) tasks: TaskArena,

    pub(crate) ready: VecDeque<TaskId>,
    pub(crate) ping_tx: Sender<TaskId>,
    ping_rx: Receiver<TaskId>,
    pub(crate) abortable: HashSet<TaskId>,

    pub(crate) all_pending_tasks: usize,
    pub(crate) pending_root_tasks: usize,

    next_segment_id: u64,
    pub(crate) root_segment: Option<SegmentId>,

    pub(crate) completed_boundaries: Vec<BoundaryId>,
    pub(crate) partial_boundaries: Vec<BoundaryId>,
    pub(crate) client_rendered_boundaries: Vec<BoundaryId>,
    pub(crate) completed_slots: Vec<SegmentId>,

    hoisted_hints: Vec<ResourceHint>,
    hint_keys: HashSet<String>,

    pub(crate) shell_flushed: bool,
    shell_ready_fired: bool,
    all_ready_fired: bool,

    pub(crate) sent_segment_instruction: bool,
    pub(crate) sent_boundary_instruction: bool,
    pub(crate) sent_client_render_instruction: bool,

    pub(crate) tracked: Option<TrackedPostpones>,
    pub(crate) fatal_error: Option<RenderError>,
}

impl Request {
    /// Create a streaming render of `root`.
    pub fn new(
        root: Node,
        options: RenderOptions,
        dialect: Box<dyn Dialect>,
        callbacks: RenderCallbacks,
    ) -> Self {
        let mut request = Self::empty(options, dialect, callbacks);
        let root_segment = request
            .segments
            .insert(Segment::new(0, None, false));
        request.segments.get_mut(root_segment).parent_flushed = true;
        request.root_segment = Some(root_segment);

        let task = Task {
            id: TaskId::from_index(0),
            node: root,
            child_index: -1,
            key_path: KeyPath::root(),
            tree_context: TreeContext::root(),
            format: FormatContext::root(),
            segment: Some(root_segment),
            boundary: None,
            fallback_of: None,
            await_log: AwaitLog::default(),
            replay: None,
        };
        let id = request.register_task(task, None);
        request.ready.push_back(id);
        request
    }

    /// Create a prerender: like [`Request::new`], but components may
    /// postpone, and the finished request yields a [`PostponedState`].
    pub fn prerender(
        root: Node,
        options: RenderOptions,
        dialect: Box<dyn Dialect>,
        callbacks: RenderCallbacks,
    ) -> Self {
        let mut request = Self::new(root, options, dialect, callbacks);
        request.tracked = Some(TrackedPostpones::default());
        request
    }

    fn empty(
        options: RenderOptions,
        dialect: Box<dyn Dialect>,
        callbacks: RenderCallbacks,
    ) -> Self {
        let (ping_tx, ping_rx) = unbounded();
        Self {
            status: RequestStatus::Working,
            options,
            dialect,
            callbacks,
            segments: SegmentArena::default(),
            boundaries: BoundaryArena::default(),
            tasks: TaskArena::default(),
            ready: VecDeque::new(),
            ping_tx,
            ping_rx,
            abortable: HashSet::new(),
            all_pending_tasks: 0,
            pending_root_tasks: 0,
            next_segment_id: 0,
            root_segment: None,
            completed_boundaries: Vec::new(),
            partial_boundaries: Vec::new(),
            client_rendered_boundaries: Vec::new(),
            completed_slots: Vec::new(),
            hoisted_hints: Vec::new(),
            hint_keys: HashSet::new(),
            shell_flushed: false,
            shell_ready_fired: false,
            all_ready_fired: false,
            sent_segment_instruction: false,
            sent_boundary_instruction: false,
            sent_client_render_instruction: false,
            tracked: None,
            fatal_error: None,
        }
    }

    /// Current lifecycle state.
    pub const fn status(&self) -> RequestStatus {
        self.status
    }

    /// The session's options.
    pub const fn options(&self) -> &RenderOptions {
        &self.options
    }

    /// Number of tasks still pending (running, queued, or suspended).
    pub const fn pending_tasks(&self) -> usize {
        self.all_pending_tasks
    }

    /// Drive the request to completion against `sink`, blocking on the
    /// ping channel between work passes.
    ///
    /// Convenience driver for demos and synchronous callers; interactive
    /// transports call [`Request::perform_work`] and [`Request::flush`]
    /// themselves.
    pub fn run_to_completion(&mut self, sink: &mut dyn Sink) -> RenderResult<()> {
        const STALL_LIMIT: Duration = Duration::from_secs(30);
        loop {
            self.perform_work();
            self.flush(sink)?;
            match self.status {
                RequestStatus::Closed => return Ok(()),
                RequestStatus::Fatal => {
                    return Err(self
                        .fatal_error
                        .clone()
                        .unwrap_or_else(|| RenderError::render("request failed")));
                }
                RequestStatus::Working | RequestStatus::ShellSent => {}
            }
            match self.ping_rx.recv_timeout(STALL_LIMIT) {
                Ok(task) => self.ready.push_back(task),
                Err(_) => {
                    let err = RenderError::render(format!(
                        "render stalled: {} tasks still pending after {STALL_LIMIT:?}",
                        self.all_pending_tasks
                    ));
                    self.fatal(err.clone());
                    self.flush(sink).ok();
                    return Err(err);
                }
            }
        }
    }

    /// Cancel all pending work.
    ///
    /// Every still-pending task's boundary becomes client-rendered (a
    /// pending root task fails the request instead), and output that
    /// already completed is preserved: the next flush still emits it.
    pub fn abort(&mut self, reason: impl Into<String>) {
        let reason = RenderError::Aborted(reason.into());
        let ids: Vec<TaskId> = self.abortable.drain().collect();
        debug!(aborted = ids.len(), "aborting request");
        for id in ids {
            if let Some(task) = self.tasks.take(id) {
                self.abort_task(task, &reason);
            }
        }
        self.ready.clear();
    }

    fn abort_task(&mut self, task: Task, reason: &RenderError) {
        match task.boundary {
            None => {
                self.pending_root_tasks = self.pending_root_tasks.saturating_sub(1);
                if !self.shell_flushed {
                    self.report_error(reason, &task.key_path);
                    self.fatal(reason.clone());
                }
            }
            Some(boundary) => {
                let digest = self.report_error(reason, &task.key_path);
                self.client_render_boundary(
                    boundary,
                    digest,
                    Some(reason.to_string()),
                    Some(task.key_path.display()),
                );
                let b = self.boundaries.get_mut(boundary);
                b.pending_tasks = b.pending_tasks.saturating_sub(1);
            }
        }
        self.task_retired();
    }

    /// Mark `boundary` client-rendered and queue its instruction if its
    /// position has already been serialized.
    pub(crate) fn client_render_boundary(
        &mut self,
        boundary: BoundaryId,
        digest: Option<String>,
        message: Option<String>,
        stack: Option<String>,
    ) {
        let b = self.boundaries.get_mut(boundary);
        if b.status == BoundaryStatus::ClientRendered {
            return;
        }
        warn!(?digest, "boundary falling back to client render");
        b.status = BoundaryStatus::ClientRendered;
        b.error_digest = digest;
        b.error_message = message;
        b.error_stack = stack;
        b.completed_segments.clear();
        if b.parent_flushed {
            self.client_rendered_boundaries.push(boundary);
        }
    }

    /// Run the error-reporting hook, returning the digest for the client.
    pub(crate) fn report_error(
        &mut self,
        err: &RenderError,
        key_path: &KeyPath,
    ) -> Option<String> {
        let context = ErrorContext {
            path: key_path.display(),
        };
        match self.callbacks.on_error.as_mut() {
            Some(hook) => hook(err, &context),
            None => None,
        }
    }

    /// Transition to the fatal state. The next flush destroys the sink.
    pub(crate) fn fatal(&mut self, err: RenderError) {
        if matches!(self.status, RequestStatus::Fatal | RequestStatus::Closed) {
            return;
        }
        error!(%err, "fatal render error");
        if !self.shell_flushed {
            if let Some(hook) = self.callbacks.on_shell_error.as_mut() {
                hook(&err);
            }
        }
        if let Some(hook) = self.callbacks.on_fatal_error.as_mut() {
            hook(&err);
        }
        self.status = RequestStatus::Fatal;
        self.fatal_error = Some(err);
    }

    /// One task finished or was aborted; fire `on_all_ready` at zero.
    pub(crate) fn task_retired(&mut self) {
        self.all_pending_tasks = self.all_pending_tasks.saturating_sub(1);
        if self.all_pending_tasks == 0 && !self.all_ready_fired {
            self.all_ready_fired = true;
            if let Some(hook) = self.callbacks.on_all_ready.as_mut() {
                hook();
            }
        }
    }

    pub(crate) fn fire_shell_ready(&mut self) {
        if self.shell_ready_fired {
            return;
        }
        self.shell_ready_fired = true;
        debug!("shell accepted by sink");
        if let Some(hook) = self.callbacks.on_shell_ready.as_mut() {
            hook();
        }
    }

    /// Register a spawned task against the pending counters.
    pub(crate) fn register_task(&mut self, task: Task, boundary: Option<BoundaryId>) -> TaskId {
        self.all_pending_tasks += 1;
        match boundary {
            None => self.pending_root_tasks += 1,
            Some(b) => self.boundaries.get_mut(b).pending_tasks += 1,
        }
        let fallback_of = task.fallback_of;
        let id = self.tasks.insert(task);
        self.abortable.insert(id);
        if let Some(fb) = fallback_of {
            self.boundaries.get_mut(fb).fallback_tasks.insert(id);
        }
        id
    }

    /// Assign (or fetch) a segment's wire id.
    pub(crate) fn segment_public_id(&mut self, segment: SegmentId) -> u64 {
        if let Some(id) = self.segments.get(segment).public_id {
            return id;
        }
        let id = self.take_next_id();
        self.segments.get_mut(segment).public_id = Some(id);
        id
    }

    /// Assign (or fetch) a boundary's placeholder wire id.
    pub(crate) fn boundary_placeholder_id(&mut self, boundary: BoundaryId) -> u64 {
        if let Some(id) = self.boundaries.get(boundary).placeholder_id {
            return id;
        }
        let id = self.take_next_id();
        self.boundaries.get_mut(boundary).placeholder_id = Some(id);
        id
    }

    /// Assign (or fetch) the wire id reserved for a boundary's content
    /// root container.
    pub(crate) fn boundary_content_id(&mut self, boundary: BoundaryId) -> u64 {
        if let Some(id) = self.boundaries.get(boundary).content_root_id {
            return id;
        }
        let id = self.take_next_id();
        self.boundaries.get_mut(boundary).content_root_id = Some(id);
        id
    }

    pub(crate) fn take_next_id(&mut self) -> u64 {
        let id = self.next_segment_id;
        self.next_segment_id += 1;
        id
    }

    pub(crate) const fn peek_next_id(&self) -> u64 {
        self.next_segment_id
    }

    pub(crate) fn set_next_id(&mut self, next: u64) {
        self.next_segment_id = next;
    }

    /// Route hints raised during one evaluation, deduplicating by key.
    pub(crate) fn route_hints(&mut self, boundary: Option<BoundaryId>, hints: Vec<ResourceHint>) {
        for hint in hints {
            if !self.hint_keys.insert(hint.key.clone()) {
                continue;
            }
            match boundary {
                // Hints inside a boundary travel with its fragment once the
                // shell is out; before that they hoist to the shell.
                Some(b) if self.shell_flushed => self.boundaries.get_mut(b).hints.push(hint),
                _ => self.hoisted_hints.push(hint),
            }
        }
    }

    pub(crate) fn take_hoisted_hints(&mut self) -> Vec<ResourceHint> {
        std::mem::take(&mut self.hoisted_hints)
    }

    /// Whether a drained queue state allows closing the stream.
    pub(crate) fn can_close(&self) -> bool {
        self.all_pending_tasks == 0
            && self.ready.is_empty()
            && self.completed_boundaries.is_empty()
            && self.client_rendered_boundaries.is_empty()
            && self.completed_slots.is_empty()
            && self.partial_boundaries.iter().all(|&b| {
                self.boundaries.get(b).completed_segments.is_empty()
            })
    }

    /// Drain pings that arrived since the last pass into the ready queue.
    pub(crate) fn drain_pings(&mut self) {
        while let Ok(task) = self.ping_rx.try_recv() {
            self.ready.push_back(task);
        }
    }

    /// Extract the recorded holes after a prerender pass has settled and
    /// flushed. Returns `None` for plain render requests.
    pub fn into_postponed_state(self) -> Option<PostponedState> {
        replay::build_postponed_state(self)
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("status", &self.status)
            .field("pending_tasks", &self.all_pending_tasks)
            .field("pending_root_tasks", &self.pending_root_tasks)
            .field("segments", &self.segments.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::HtmlDialect;

    #[test]
    fn new_requests_start_working_with_one_root_task() {
        let request = Request::new(
            Node::text("hi"),
            RenderOptions::default(),
            Box::new(HtmlDialect),
            RenderCallbacks::new(),
        );
        assert_eq!(request.status(), RequestStatus::Working);
        assert_eq!(request.pending_tasks(), 1);
        assert_eq!(request.pending_root_tasks, 1);
        assert!(request.root_segment.is_some());
    }

    #[test]
    fn options_default_to_the_documented_tunables() {
        let options = RenderOptions::default();
        assert_eq!(options.progressive_chunk_size, 12_800);
        assert_eq!(options.max_render_depth, 256);
        assert!(options.identifier_prefix.is_empty());
    }

    #[test]
    fn wire_ids_are_sequential_and_sticky() {
        let mut request = Request::new(
            Node::empty(),
            RenderOptions::default(),
            Box::new(HtmlDialect),
            RenderCallbacks::new(),
        );
        let seg = request.segments.insert(Segment::new(0, None, false));
        let first = request.segment_public_id(seg);
        let again = request.segment_public_id(seg);
        assert_eq!(first, again);
        let seg2 = request.segments.insert(Segment::new(0, None, false));
        assert_ne!(request.segment_public_id(seg2), first);
    }

    #[test]
    fn hints_dedupe_by_key() {
        let mut request = Request::new(
            Node::empty(),
            RenderOptions::default(),
            Box::new(HtmlDialect),
            RenderCallbacks::new(),
        );
        request.route_hints(
            None,
            vec![
                ResourceHint::new("a", "<link a>"),
                ResourceHint::new("a", "<link a>"),
                ResourceHint::new("b", "<link b>"),
            ],
        );
        assert_eq!(request.take_hoisted_hints().len(), 2);
    }
}
