//! Render benchmark: measure full-pipeline throughput on synchronous trees.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rill::{BufferSink, Element, HtmlDialect, Node, RenderCallbacks, RenderOptions, Request};

/// A wide, shallow list document.
fn wide_tree(items: usize) -> Node {
    let mut list = Element::new("ul");
    for i in 0..items {
        list = list.child(
            Element::new("li")
                .attr("class", "row")
                .child(format!("item number {i}")),
        );
    }
    Node::from(Element::new("html").child(Element::new("body").child(list)))
}

/// A deeply nested document.
fn deep_tree(depth: usize) -> Node {
    let mut node = Node::text("leaf");
    for _ in 0..depth {
        node = Element::new("div").child(node).into();
    }
    node
}

fn render_to_sink(node: Node) -> usize {
    let mut request = Request::new(
        node,
        RenderOptions::default(),
        Box::new(HtmlDialect),
        RenderCallbacks::new(),
    );
    let mut sink = BufferSink::new();
    request.perform_work();
    request.flush(&mut sink).expect("flush");
    sink.as_bytes().len()
}

fn bench_wide_trees(c: &mut Criterion) {
    let mut group = c.benchmark_group("render_wide");
    for items in [100usize, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(items), &items, |b, &items| {
            b.iter(|| render_to_sink(black_box(wide_tree(items))));
        });
    }
    group.finish();
}

fn bench_deep_trees(c: &mut Criterion) {
    let mut group = c.benchmark_group("render_deep");
    for depth in [64usize, 512, 4_096] {
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            b.iter(|| render_to_sink(black_box(deep_tree(depth))));
        });
    }
    group.finish();
}

fn bench_suspense_resolution(c: &mut Criterion) {
    c.bench_function("render_100_boundaries_out_of_order", |b| {
        b.iter(|| {
            let mut handles = Vec::new();
            let mut children = Vec::new();
            for i in 0..100 {
                let (dep, handle) = rill::Dependency::new();
                handles.push(handle);
                children.push(Node::suspense(
                    Node::text("..."),
                    Node::awaiting(dep),
                ));
                children.push(Node::text(format!("static {i}")));
            }
            let mut request = Request::new(
                Node::fragment(children),
                RenderOptions::default(),
                Box::new(HtmlDialect),
                RenderCallbacks::new(),
            );
            let mut sink = BufferSink::new();
            request.perform_work();
            request.flush(&mut sink).expect("flush");
            // Resolve in reverse order, then drain.
            for handle in handles.into_iter().rev() {
                handle.resolve(Node::text("done"));
            }
            request.perform_work();
            request.flush(&mut sink).expect("flush");
            black_box(sink.as_bytes().len())
        });
    });
}

criterion_group!(
    benches,
    bench_wide_trees,
    bench_deep_trees,
    bench_suspense_resolution
);
criterion_main!(benches);
