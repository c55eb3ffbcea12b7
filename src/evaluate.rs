//! The component-evaluation seam.
//!
//! User components implement [`Evaluate`]; the work loop calls them once
//! per task attempt. Evaluation is explicit about suspension: instead of an
//! unwinding control-flow trick, an evaluator *returns*
//! [`Evaluation::Suspended`] and is retried when the dependency settles.
//! The [`EvalContext`] gives evaluators the ambient facilities that must
//! stay consistent across retries and passes: an await log, deterministic
//! ids, and resource hints.

use crate::boundary::ResourceHint;
use crate::error::RenderResult;
use crate::tree::{Dependency, DependencyPoll, KeyPath, Node, TreeContext};

/// What one evaluation attempt produced.
#[derive(Debug)]
pub enum Evaluation {
    /// Render these children in place of the component.
    Children(Node),
    /// The component needs this dependency before it can produce children.
    ///
    /// The task is retried after the dependency settles; values already
    /// obtained through [`EvalContext::wait`] are replayed from the log.
    Suspended(Dependency),
    /// In a prerender pass: record this slot and finish it in a later
    /// resumed pass. Outside prerender this is an application error.
    Postponed,
}

/// A user component.
pub trait Evaluate {
    /// Component name used in identity paths and diagnostics.
    fn name(&self) -> &str {
        "anonymous"
    }

    /// Produce children for this position, or report suspension.
    ///
    /// Must be safe to call again for the same position: retries after
    /// suspension and replays during a resumed pass both re-invoke it.
    fn evaluate(&self, cx: &mut EvalContext<'_>) -> RenderResult<Evaluation>;
}

impl<F> Evaluate for F
where
    F: Fn(&mut EvalContext<'_>) -> RenderResult<Evaluation>,
{
    fn evaluate(&self, cx: &mut EvalContext<'_>) -> RenderResult<Evaluation> {
        self(cx)
    }
}

/// Record of dependency values a task already obtained.
///
/// A retried evaluation replays the log in call order instead of
/// re-polling, so an evaluator that awaits several values in sequence makes
/// forward progress across retries.
#[derive(Debug, Default)]
pub struct AwaitLog {
    resolved: Vec<Node>,
    cursor: usize,
}

impl AwaitLog {
    /// Rewind to the start of the log for a fresh attempt.
    pub(crate) fn reset(&mut self) {
        self.cursor = 0;
    }

    fn replay_next(&mut self) -> Option<Node> {
        let node = self.resolved.get(self.cursor)?.clone();
        self.cursor += 1;
        Some(node)
    }

    fn record(&mut self, node: Node) {
        self.resolved.push(node);
        self.cursor = self.resolved.len();
    }
}

/// Ambient facilities handed to an evaluator for one attempt.
pub struct EvalContext<'a> {
    pub(crate) tree_context: &'a TreeContext,
    pub(crate) key_path: &'a KeyPath,
    pub(crate) identifier_prefix: &'a str,
    pub(crate) await_log: &'a mut AwaitLog,
    pub(crate) hints: &'a mut Vec<ResourceHint>,
    pub(crate) resumable: bool,
    pub(crate) local_ids: u32,
}

impl EvalContext<'_> {
    /// Obtain a dependency's value, or report that it is still pending.
    ///
    /// `Ok(None)` means the evaluator should return
    /// [`Evaluation::Suspended`] with the same dependency. Values resolved
    /// in earlier attempts are replayed from the log.
    pub fn wait(&mut self, dependency: &Dependency) -> RenderResult<Option<Node>> {
        if let Some(node) = self.await_log.replay_next() {
            return Ok(Some(node));
        }
        match dependency.poll() {
            DependencyPoll::Resolved(node) => {
                self.await_log.record(node.clone());
                Ok(Some(node))
            }
            DependencyPoll::Pending => Ok(None),
            DependencyPoll::Failed(err) => Err(err),
        }
    }

    /// A deterministic id for this position in the tree.
    ///
    /// Stable across retries, and across a prerender and its resumed pass,
    /// because it derives from the tree path rather than a shared counter.
    /// Repeated calls within one component get distinct suffixes.
    pub fn deterministic_id(&mut self) -> String {
        let mut id = format!(
            "{}r{}",
            self.identifier_prefix,
            self.tree_context.to_base32()
        );
        if self.local_ids > 0 {
            id.push('h');
            id.push_str(&self.local_ids.to_string());
        }
        self.local_ids += 1;
        id
    }

    /// Queue a resource hint for hoisting.
    ///
    /// Hints raised before the shell flush with the shell; hints raised
    /// inside a late boundary are emitted ahead of that boundary's
    /// out-of-band fragment. Duplicate keys are dropped request-wide.
    pub fn enqueue_hint(&mut self, hint: ResourceHint) {
        self.hints.push(hint);
    }

    /// Whether [`Evaluation::Postponed`] is accepted in this pass.
    pub const fn can_postpone(&self) -> bool {
        self.resumable
    }

    /// The identity path of this component, for diagnostics.
    pub fn key_path(&self) -> &KeyPath {
        self.key_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::KeyOrIndex;

    fn with_context<R>(f: impl FnOnce(&mut EvalContext<'_>) -> R) -> (R, Vec<ResourceHint>) {
        let tree_context = TreeContext::root().push(2, 1);
        let key_path = KeyPath::root().child(Some("App"), KeyOrIndex::Index(0));
        let mut await_log = AwaitLog::default();
        let mut hints = Vec::new();
        let result = {
            let mut cx = EvalContext {
                tree_context: &tree_context,
                key_path: &key_path,
                identifier_prefix: "pg-",
                await_log: &mut await_log,
                hints: &mut hints,
                resumable: false,
                local_ids: 0,
            };
            f(&mut cx)
        };
        (result, hints)
    }

    #[test]
    fn wait_replays_the_log_before_polling() {
        let (dep, handle) = Dependency::new();
        let tree_context = TreeContext::root();
        let key_path = KeyPath::root();
        let mut await_log = AwaitLog::default();
        let mut hints = Vec::new();

        // First attempt: pending.
        {
            let mut cx = EvalContext {
                tree_context: &tree_context,
                key_path: &key_path,
                identifier_prefix: "",
                await_log: &mut await_log,
                hints: &mut hints,
                resumable: false,
                local_ids: 0,
            };
            assert!(cx.wait(&dep).unwrap().is_none());
        }

        handle.resolve(Node::text("value"));

        // Second attempt: resolved and recorded.
        await_log.reset();
        {
            let mut cx = EvalContext {
                tree_context: &tree_context,
                key_path: &key_path,
                identifier_prefix: "",
                await_log: &mut await_log,
                hints: &mut hints,
                resumable: false,
                local_ids: 0,
            };
            assert!(cx.wait(&dep).unwrap().is_some());
        }

        // Third attempt replays from the log even without the dependency.
        await_log.reset();
        {
            let mut cx = EvalContext {
                tree_context: &tree_context,
                key_path: &key_path,
                identifier_prefix: "",
                await_log: &mut await_log,
                hints: &mut hints,
                resumable: false,
                local_ids: 0,
            };
            let replayed = cx.wait(&Dependency::new().0).unwrap();
            assert!(matches!(replayed, Some(Node::Text(text)) if &*text == "value"));
        }
    }

    #[test]
    fn deterministic_ids_carry_prefix_and_local_suffix() {
        let ((first, second), _) = with_context(|cx| (cx.deterministic_id(), cx.deterministic_id()));
        assert!(first.starts_with("pg-r"));
        assert_ne!(first, second);
        assert!(second.contains('h'));
    }

    #[test]
    fn hints_accumulate_in_order() {
        let (_, hints) = with_context(|cx| {
            cx.enqueue_hint(ResourceHint::new("font:inter", "<link rel=\"preload\">"));
            cx.enqueue_hint(ResourceHint::new("style:main", "<style>.a{}</style>"));
        });
        assert_eq!(hints.len(), 2);
        assert_eq!(hints[0].key, "font:inter");
    }

    #[test]
    fn closures_are_components() {
        let component = |_cx: &mut EvalContext<'_>| Ok(Evaluation::Children(Node::text("hi")));
        let node = Node::component(component);
        assert!(node.shape().starts_with("component"));
    }
}
