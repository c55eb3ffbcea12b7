//! The output seam: an abstract byte sink with backpressure reporting.
//!
//! The renderer never assumes buffering capacity beyond one outstanding
//! chunk. `write` follows push-stream semantics: the chunk is always
//! consumed, and the returned flag tells the caller whether it should keep
//! sending (`true`) or pause until the transport drains (`false`).

use crate::error::RenderError;
use std::io::{self, Write};

/// Destination for rendered output.
pub trait Sink {
    /// Accept one chunk of output.
    ///
    /// Returns `Ok(false)` when the transport wants the producer to pause;
    /// the chunk itself is still consumed. `Err` is a fatal transport
    /// failure.
    fn write(&mut self, chunk: &[u8]) -> io::Result<bool>;

    /// Signal that no further output will be produced.
    fn end(&mut self);

    /// Tear down the transport after a fatal error.
    fn destroy(&mut self, error: &RenderError);
}

/// In-memory sink that accepts everything. Used by tests and demos.
#[derive(Debug, Default)]
pub struct BufferSink {
    data: Vec<u8>,
    ended: bool,
    destroyed: Option<String>,
}

impl BufferSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Everything written so far, lossily decoded.
    pub fn as_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }

    /// Whether `end` has been called.
    pub const fn is_ended(&self) -> bool {
        self.ended
    }

    /// The error message passed to `destroy`, if any.
    pub fn destroy_reason(&self) -> Option<&str> {
        self.destroyed.as_deref()
    }
}

impl Sink for BufferSink {
    fn write(&mut self, chunk: &[u8]) -> io::Result<bool> {
        self.data.extend_from_slice(chunk);
        Ok(true)
    }

    fn end(&mut self) {
        self.ended = true;
    }

    fn destroy(&mut self, error: &RenderError) {
        self.destroyed = Some(error.to_string());
    }
}

/// Sink that accepts a budget of chunks before signalling backpressure.
///
/// Chunks past the budget are still consumed (push-stream semantics), but
/// the producer is told to pause. Tests refill the budget between flushes
/// to model the transport draining.
#[derive(Debug, Default)]
pub struct ThrottledSink {
    inner: BufferSink,
    budget: usize,
}

impl ThrottledSink {
    /// Create a sink that accepts `budget` chunks before pausing.
    pub fn with_budget(budget: usize) -> Self {
        Self {
            inner: BufferSink::new(),
            budget,
        }
    }

    /// Grant the producer more chunk acceptances.
    pub fn refill(&mut self, budget: usize) {
        self.budget = budget;
    }

    /// Everything written so far.
    pub fn as_bytes(&self) -> &[u8] {
        self.inner.as_bytes()
    }

    /// Everything written so far, lossily decoded.
    pub fn as_str(&self) -> std::borrow::Cow<'_, str> {
        self.inner.as_str()
    }

    /// Whether `end` has been called.
    pub const fn is_ended(&self) -> bool {
        self.inner.is_ended()
    }
}

impl Sink for ThrottledSink {
    fn write(&mut self, chunk: &[u8]) -> io::Result<bool> {
        self.inner.data.extend_from_slice(chunk);
        if self.budget > 0 {
            self.budget -= 1;
        }
        Ok(self.budget > 0)
    }

    fn end(&mut self) {
        self.inner.end();
    }

    fn destroy(&mut self, error: &RenderError) {
        self.inner.destroy(error);
    }
}

/// Adapter from any [`std::io::Write`] to a [`Sink`].
///
/// Always reports acceptance; backpressure is whatever blocking behaviour
/// the wrapped writer has.
#[derive(Debug)]
pub struct IoSink<W: Write> {
    writer: W,
}

impl<W: Write> IoSink<W> {
    /// Wrap a writer.
    pub const fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Recover the wrapped writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Sink for IoSink<W> {
    fn write(&mut self, chunk: &[u8]) -> io::Result<bool> {
        self.writer.write_all(chunk)?;
        Ok(true)
    }

    fn end(&mut self) {
        let _ = self.writer.flush();
    }

    fn destroy(&mut self, _error: &RenderError) {
        let _ = self.writer.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_sink_collects_chunks() {
        let mut sink = BufferSink::new();
        assert!(sink.write(b"hello ").unwrap());
        assert!(sink.write(b"world").unwrap());
        assert_eq!(sink.as_bytes(), b"hello world");
        assert!(!sink.is_ended());
        sink.end();
        assert!(sink.is_ended());
    }

    #[test]
    fn throttled_sink_signals_backpressure_but_consumes() {
        let mut sink = ThrottledSink::with_budget(2);
        assert!(sink.write(b"a").unwrap());
        // Budget exhausted by this write: chunk consumed, producer told to pause.
        assert!(!sink.write(b"b").unwrap());
        assert!(!sink.write(b"c").unwrap());
        assert_eq!(sink.as_bytes(), b"abc");

        sink.refill(5);
        assert!(sink.write(b"d").unwrap());
        assert_eq!(sink.as_bytes(), b"abcd");
    }

    #[test]
    fn destroy_records_the_error() {
        let mut sink = BufferSink::new();
        sink.destroy(&RenderError::render("boom"));
        assert!(sink.destroy_reason().unwrap().contains("boom"));
    }

    #[test]
    fn io_sink_forwards_to_writer() {
        let mut sink = IoSink::new(Vec::new());
        assert!(sink.write(b"xyz").unwrap());
        assert_eq!(sink.into_inner(), b"xyz");
    }
}
