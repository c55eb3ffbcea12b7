//! # Rill
//!
//! A progressive streaming markup renderer with out-of-order suspense.
//!
//! Rill turns a recursively nested, possibly-asynchronous component tree
//! into a progressively-flushed byte stream. Slow subtrees suspend behind
//! fallbacks, complete in any order, and are stitched back into their
//! reserved document positions: inline while the shell is still being
//! built, or as out-of-band patch fragments once it has been sent.
//!
//! ## Core Concepts
//!
//! - **Tasks**: cooperative, single-threaded units of depth-first traversal
//! - **Segments**: addressable output buffers spliced in document order
//! - **Boundaries**: suspension points that complete independently
//! - **Flush protocol**: shell first, then self-contained patch fragments
//! - **Postponed mode**: record holes in one pass, fill them in a later one
//!
//! ## Example
//!
//! ```rust
//! use rill::{
//!     BufferSink, Dependency, Element, HtmlDialect, Node, RenderCallbacks,
//!     RenderOptions, Request,
//! };
//!
//! let (content, handle) = Dependency::new();
//! let page = Node::from(
//!     Element::new("main")
//!         .child(Node::suspense(Node::text("loading..."), Node::awaiting(content))),
//! );
//!
//! let mut request = Request::new(
//!     page,
//!     RenderOptions::default(),
//!     Box::new(HtmlDialect),
//!     RenderCallbacks::new(),
//! );
//! let mut sink = BufferSink::new();
//!
//! // Shell: fallback inline, content pending.
//! request.perform_work();
//! request.flush(&mut sink).unwrap();
//!
//! // The slow subtree settles; its fragment patches the placeholder.
//! handle.resolve(Node::text("ready"));
//! request.perform_work();
//! request.flush(&mut sink).unwrap();
//! assert!(sink.is_ended());
//! ```

pub mod boundary;
pub mod chunk;
pub mod dialect;
pub mod error;
pub mod evaluate;
pub mod flush;
pub mod format;
pub mod request;
pub mod segment;
pub mod sink;
pub mod task;
pub mod tree;

// Re-exports for convenience
pub use boundary::{BoundaryStatus, ResourceHint};
pub use chunk::{Chunk, ChunkWriter};
pub use dialect::{Dialect, HtmlDialect};
pub use error::{RenderError, RenderResult};
pub use evaluate::{EvalContext, Evaluate, Evaluation};
pub use format::{FormatContext, FormatFlags, InsertionMode};
pub use request::replay::{PostponedState, ReplayBoundary, ReplayNode};
pub use request::{ErrorContext, RenderCallbacks, RenderOptions, Request, RequestStatus};
pub use segment::SegmentStatus;
pub use sink::{BufferSink, IoSink, Sink, ThrottledSink};
pub use tree::{
    Attribute, Dependency, DependencyHandle, DependencyPoll, Element, KeyOrIndex, KeyPath,
    KeyStep, Node, SuspenseNode, TreeContext,
};
