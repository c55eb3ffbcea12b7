//! Identity key paths.
//!
//! Every named position in the tree gets a `KeyPath` entry: element tags,
//! component names, suspense points, and explicit keys. The path is stable
//! across passes, so a resumed render can find the same logical slot, and
//! diagnostics can name where an error happened.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::rc::Rc;

/// One entry's discriminator: an explicit key or a positional index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyOrIndex {
    /// An explicit, caller-supplied key.
    Key(String),
    /// Position within the parent's children (−1 outside arrays).
    Index(i32),
}

/// One flattened step of a key path, as recorded in resumable state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyStep {
    /// Element tag or component name; `None` for a bare key wrapper.
    pub name: Option<String>,
    /// Key or index discriminator.
    pub entry: KeyOrIndex,
}

struct KeyNode {
    parent: KeyPath,
    step: KeyStep,
}

/// A persistent (shared-tail) identity path.
///
/// Cloning is cheap; descending allocates one node.
#[derive(Clone, Default)]
pub struct KeyPath(Option<Rc<KeyNode>>);

impl KeyPath {
    /// The empty path at the document root.
    pub const fn root() -> Self {
        Self(None)
    }

    /// Path extended by one step.
    pub fn child(&self, name: Option<&str>, entry: KeyOrIndex) -> Self {
        Self(Some(Rc::new(KeyNode {
            parent: self.clone(),
            step: KeyStep {
                name: name.map(str::to_owned),
                entry,
            },
        })))
    }

    /// Whether this is the root path.
    pub fn is_root(&self) -> bool {
        self.0.is_none()
    }

    /// The flattened steps, root first.
    pub fn steps(&self) -> Vec<KeyStep> {
        let mut steps = Vec::new();
        let mut cursor = self;
        while let Some(node) = &cursor.0 {
            steps.push(node.step.clone());
            cursor = &node.parent;
        }
        steps.reverse();
        steps
    }

    /// Human-readable rendering, used in diagnostics.
    pub fn display(&self) -> String {
        let steps = self.steps();
        if steps.is_empty() {
            return "<root>".into();
        }
        let mut out = String::new();
        for (i, step) in steps.iter().enumerate() {
            if i > 0 {
                out.push_str(" > ");
            }
            match (&step.name, &step.entry) {
                (Some(name), KeyOrIndex::Index(index)) => {
                    let _ = write!(out, "{name}[{index}]");
                }
                (Some(name), KeyOrIndex::Key(key)) => {
                    let _ = write!(out, "{name}[key={key}]");
                }
                (None, KeyOrIndex::Key(key)) => {
                    let _ = write!(out, "[key={key}]");
                }
                (None, KeyOrIndex::Index(index)) => {
                    let _ = write!(out, "[{index}]");
                }
            }
        }
        out
    }
}

impl std::fmt::Debug for KeyPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyPath({})", self.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_path_is_empty() {
        let path = KeyPath::root();
        assert!(path.is_root());
        assert!(path.steps().is_empty());
        assert_eq!(path.display(), "<root>");
    }

    #[test]
    fn steps_come_back_root_first() {
        let path = KeyPath::root()
            .child(Some("div"), KeyOrIndex::Index(0))
            .child(Some("Item"), KeyOrIndex::Key("a".into()));
        let steps = path.steps();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].name.as_deref(), Some("div"));
        assert_eq!(steps[1].entry, KeyOrIndex::Key("a".into()));
    }

    #[test]
    fn display_is_readable() {
        let path = KeyPath::root()
            .child(Some("ul"), KeyOrIndex::Index(1))
            .child(None, KeyOrIndex::Key("row-7".into()))
            .child(Some("li"), KeyOrIndex::Index(0));
        assert_eq!(path.display(), "ul[1] > [key=row-7] > li[0]");
    }

    #[test]
    fn clones_share_tails() {
        let base = KeyPath::root().child(Some("div"), KeyOrIndex::Index(0));
        let a = base.child(Some("a"), KeyOrIndex::Index(0));
        let b = base.child(Some("b"), KeyOrIndex::Index(1));
        assert_eq!(a.steps()[0], b.steps()[0]);
    }
}
