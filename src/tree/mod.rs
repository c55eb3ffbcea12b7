//! The component tree: nodes, identity paths, deterministic-id contexts,
//! and asynchronous dependencies.

mod context;
mod dependency;
mod key;
mod node;

pub use context::TreeContext;
pub use dependency::{Dependency, DependencyHandle, DependencyPoll};
pub use key::{KeyOrIndex, KeyPath, KeyStep};
pub use node::{Attribute, ComponentRef, Element, Node, SuspenseNode};
