//! The node model: a closed sum type over everything the renderer can walk.
//!
//! The tree is a *description*, not a live document: elements carry a tag
//! from an external vocabulary, components are opaque evaluators invoked
//! through the [`Evaluate`] seam, and async slots are [`Dependency`] cells
//! that settle into more tree. Nodes are cheap to clone (shared evaluator
//! handles, copy-on-write strings) because suspended subtrees are retried
//! from their node.

use super::Dependency;
use crate::evaluate::Evaluate;
use std::borrow::Cow;
use std::sync::Arc;

/// Shared handle to a user-supplied component evaluator.
pub type ComponentRef = Arc<dyn Evaluate + Send + Sync>;

/// A renderable tree description.
#[derive(Clone)]
pub enum Node {
    /// Nothing. Renders no output.
    Empty,
    /// Literal text, escaped by the dialect at emit time.
    Text(Cow<'static, str>),
    /// Pre-escaped markup, emitted verbatim.
    Raw(Cow<'static, str>),
    /// An element from the dialect's vocabulary.
    Element(Box<Element>),
    /// An ordered sequence of children.
    Fragment(Vec<Node>),
    /// An explicit identity key wrapped around a child.
    Keyed(String, Box<Node>),
    /// A suspension point with fallback content.
    Suspense(Box<SuspenseNode>),
    /// A user component, evaluated through the collaborator seam.
    Component(ComponentRef),
    /// A value that may not have settled yet.
    Async(Dependency),
}

impl Node {
    /// Literal text.
    pub fn text(text: impl Into<Cow<'static, str>>) -> Self {
        Self::Text(text.into())
    }

    /// Pre-escaped markup.
    pub fn raw(markup: impl Into<Cow<'static, str>>) -> Self {
        Self::Raw(markup.into())
    }

    /// The empty node.
    pub const fn empty() -> Self {
        Self::Empty
    }

    /// A fragment of children.
    pub fn fragment(children: impl Into<Vec<Node>>) -> Self {
        Self::Fragment(children.into())
    }

    /// A keyed child.
    pub fn keyed(key: impl Into<String>, child: Node) -> Self {
        Self::Keyed(key.into(), Box::new(child))
    }

    /// A suspension point.
    pub fn suspense(fallback: Node, content: Node) -> Self {
        Self::Suspense(Box::new(SuspenseNode { fallback, content }))
    }

    /// A component node.
    pub fn component(component: impl Evaluate + Send + Sync + 'static) -> Self {
        Self::Component(Arc::new(component))
    }

    /// An async slot.
    pub fn awaiting(dependency: Dependency) -> Self {
        Self::Async(dependency)
    }

    /// Short description of the node's shape, used in diagnostics and
    /// replay matching.
    pub fn shape(&self) -> String {
        match self {
            Self::Empty => "empty".into(),
            Self::Text(_) => "text".into(),
            Self::Raw(_) => "raw markup".into(),
            Self::Element(el) => format!("element <{}>", el.tag),
            Self::Fragment(_) => "fragment".into(),
            Self::Keyed(key, _) => format!("keyed [{key}]"),
            Self::Suspense(_) => "suspense".into(),
            Self::Component(component) => format!("component {}", component.name()),
            Self::Async(_) => "async".into(),
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Text(text) => write!(f, "Text({text:?})"),
            Self::Raw(markup) => write!(f, "Raw({markup:?})"),
            Self::Element(el) => write!(f, "Element(<{}> x{})", el.tag, el.children.len()),
            Self::Fragment(children) => write!(f, "Fragment(x{})", children.len()),
            Self::Keyed(key, child) => write!(f, "Keyed({key:?}, {child:?})"),
            Self::Suspense(_) => f.write_str("Suspense"),
            Self::Component(component) => write!(f, "Component({})", component.name()),
            Self::Async(dep) => write!(f, "Async({dep:?})"),
        }
    }
}

impl From<Element> for Node {
    fn from(element: Element) -> Self {
        Self::Element(Box::new(element))
    }
}

impl From<&'static str> for Node {
    fn from(text: &'static str) -> Self {
        Self::text(text)
    }
}

impl From<String> for Node {
    fn from(text: String) -> Self {
        Self::text(text)
    }
}

/// One attribute on an element. `value: None` is a boolean attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Attribute name, taken verbatim.
    pub name: Cow<'static, str>,
    /// Attribute value, escaped by the dialect; `None` for boolean form.
    pub value: Option<Cow<'static, str>>,
}

/// An element node.
#[derive(Debug, Clone)]
pub struct Element {
    /// Tag name from the dialect's vocabulary.
    pub tag: Cow<'static, str>,
    /// Attributes in declaration order.
    pub attributes: Vec<Attribute>,
    /// Child nodes in document order.
    pub children: Vec<Node>,
}

impl Element {
    /// An element with no attributes or children.
    pub fn new(tag: impl Into<Cow<'static, str>>) -> Self {
        Self {
            tag: tag.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Add an attribute.
    pub fn attr(
        mut self,
        name: impl Into<Cow<'static, str>>,
        value: impl Into<Cow<'static, str>>,
    ) -> Self {
        self.attributes.push(Attribute {
            name: name.into(),
            value: Some(value.into()),
        });
        self
    }

    /// Add a boolean attribute.
    pub fn flag(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.attributes.push(Attribute {
            name: name.into(),
            value: None,
        });
        self
    }

    /// Add a child node.
    pub fn child(mut self, child: impl Into<Node>) -> Self {
        self.children.push(child.into());
        self
    }

    /// Add several children.
    pub fn children(mut self, children: impl IntoIterator<Item = Node>) -> Self {
        self.children.extend(children);
        self
    }

    /// Look up an attribute value by name.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attr| attr.name == name)
            .and_then(|attr| attr.value.as_deref())
    }
}

/// The two subtrees of a suspension point.
#[derive(Debug, Clone)]
pub struct SuspenseNode {
    /// Shown while the content is pending (or when it fails without
    /// client-side recovery disabled).
    pub fallback: Node,
    /// The real content, rendered into a detached segment tree.
    pub content: Node,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_builder_accumulates() {
        let el = Element::new("a")
            .attr("href", "/docs")
            .flag("download")
            .child("read me");
        assert_eq!(el.tag, "a");
        assert_eq!(el.attribute("href"), Some("/docs"));
        assert_eq!(el.attributes[1].value, None);
        assert_eq!(el.children.len(), 1);
    }

    #[test]
    fn shapes_name_the_variant() {
        assert_eq!(Node::text("x").shape(), "text");
        assert_eq!(Node::from(Element::new("div")).shape(), "element <div>");
        assert_eq!(Node::keyed("k", Node::empty()).shape(), "keyed [k]");
        assert_eq!(
            Node::suspense(Node::empty(), Node::empty()).shape(),
            "suspense"
        );
    }

    #[test]
    fn nodes_clone_cheaply() {
        let node = Node::fragment(vec![Node::text("a"), Element::new("b").into()]);
        let copy = node.clone();
        assert_eq!(copy.shape(), node.shape());
    }
}
