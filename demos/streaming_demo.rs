//! Streaming demo: out-of-order boundary completion over a live stream.
//!
//! Two suspense boundaries resolve on timer threads in *reverse* order;
//! the shell ships immediately with both fallbacks, and each patch
//! fragment lands as its content settles. Scheduler decisions are logged
//! to stderr; the markup stream goes to stdout.

use rill::{
    Dependency, Element, HtmlDialect, IoSink, Node, RenderCallbacks, RenderOptions, Request,
};
use std::time::Duration;

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(std::io::stderr)
        .init();

    let (fast, fast_handle) = Dependency::new();
    let (slow, slow_handle) = Dependency::new();

    let page = Node::from(
        Element::new("html").child(
            Element::new("body")
                .child(Element::new("h1").child("Dashboard"))
                .child(Node::suspense(
                    Node::from(Element::new("p").child("loading profile...")),
                    Node::awaiting(slow),
                ))
                .child(Node::suspense(
                    Node::from(Element::new("p").child("loading feed...")),
                    Node::awaiting(fast),
                )),
        ),
    );

    // The *second* boundary resolves first; the stream still patches each
    // one into its own reserved slot.
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(150));
        fast_handle.resolve(Node::from(Element::new("section").child("feed is here")));
    });
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(400));
        slow_handle.resolve(Node::from(Element::new("section").child("profile is here")));
    });

    let mut request = Request::new(
        page,
        RenderOptions::default(),
        Box::new(HtmlDialect),
        RenderCallbacks::new()
            .on_shell_ready(|| eprintln!("--- shell ready ---"))
            .on_all_ready(|| eprintln!("--- all ready ---")),
    );

    let mut sink = IoSink::new(std::io::stdout());
    match request.run_to_completion(&mut sink) {
        Ok(()) => eprintln!("\n--- stream closed ---"),
        Err(err) => eprintln!("\n--- render failed: {err} ---"),
    }
}
