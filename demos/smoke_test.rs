//! Smoke test: render a small synchronous document to stdout.

use rill::{BufferSink, Element, HtmlDialect, Node, RenderCallbacks, RenderOptions, Request};

fn main() {
    println!("Rill Smoke Test");
    println!("===============");
    println!();

    let page = Node::from(
        Element::new("html").child(
            Element::new("body")
                .child(Element::new("h1").child("Hello, stream"))
                .child(
                    Element::new("ul")
                        .child(Element::new("li").child("tasks"))
                        .child(Element::new("li").child("segments"))
                        .child(Element::new("li").child("boundaries")),
                ),
        ),
    );

    let mut request = Request::new(
        page,
        RenderOptions::default(),
        Box::new(HtmlDialect),
        RenderCallbacks::new(),
    );
    let mut sink = BufferSink::new();
    request.perform_work();
    request.flush(&mut sink).expect("flush");

    println!("status: {:?}", request.status());
    println!("bytes:  {}", sink.as_bytes().len());
    println!();
    println!("{}", sink.as_str());
}
