//! `ChunkWriter`: coalescing writer between the flush pass and the sink.
//!
//! Small writes accumulate in a fixed-size view and reach the sink as one
//! chunk; writes larger than the view bypass it. The writer tracks the
//! sink's acceptance flag so the flush pass can stop between boundaries
//! instead of buffering unbounded output.

use super::Chunk;
use crate::error::RenderError;
use crate::sink::Sink;

/// Default view size, in bytes.
pub const DEFAULT_VIEW_SIZE: usize = 2048;

/// Coalescing writer over a [`Sink`].
pub struct ChunkWriter<'a> {
    sink: &'a mut dyn Sink,
    view: Vec<u8>,
    view_size: usize,
    accepting: bool,
    fatal: Option<RenderError>,
    bytes_written: u64,
}

impl<'a> ChunkWriter<'a> {
    /// Create a writer with the default view size.
    pub fn new(sink: &'a mut dyn Sink) -> Self {
        Self::with_view_size(sink, DEFAULT_VIEW_SIZE)
    }

    /// Create a writer with a custom view size.
    pub fn with_view_size(sink: &'a mut dyn Sink, view_size: usize) -> Self {
        let view_size = view_size.max(64);
        Self {
            sink,
            view: Vec::with_capacity(view_size),
            view_size,
            accepting: true,
            fatal: None,
            bytes_written: 0,
        }
    }

    /// Write raw bytes, coalescing into the view.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        if self.fatal.is_some() {
            return;
        }
        if bytes.len() >= self.view_size {
            // Oversized chunk: flush what we have, then send it directly.
            self.flush_view();
            self.push_to_sink_copy(bytes);
            return;
        }
        if self.view.len() + bytes.len() > self.view_size {
            self.flush_view();
        }
        self.view.extend_from_slice(bytes);
    }

    /// Write a chunk.
    pub fn write_chunk(&mut self, chunk: &Chunk) {
        self.write_bytes(chunk.as_bytes());
    }

    /// Write a string.
    pub fn write_str(&mut self, text: &str) {
        self.write_bytes(text.as_bytes());
    }

    /// Write an id in the stable lowercase-hex form used on the wire.
    pub fn write_hex(&mut self, id: u64) {
        let mut buf = [0u8; 16];
        let mut i = buf.len();
        let mut value = id;
        loop {
            i -= 1;
            let digit = (value & 0xf) as u8;
            buf[i] = if digit < 10 {
                b'0' + digit
            } else {
                b'a' + (digit - 10)
            };
            value >>= 4;
            if value == 0 {
                break;
            }
        }
        self.write_bytes(&buf[i..]);
    }

    /// Push any coalesced bytes to the sink.
    pub fn flush_view(&mut self) {
        if self.view.is_empty() || self.fatal.is_some() {
            return;
        }
        let view = std::mem::take(&mut self.view);
        self.push_to_sink_copy(&view);
        self.view = view;
        self.view.clear();
    }

    fn push_to_sink_copy(&mut self, bytes: &[u8]) {
        match self.sink.write(bytes) {
            Ok(accepted) => {
                self.bytes_written += bytes.len() as u64;
                if !accepted {
                    self.accepting = false;
                }
            }
            Err(err) => {
                self.accepting = false;
                self.fatal = Some(RenderError::from(err));
            }
        }
    }

    /// Whether the sink is still asking for more output.
    ///
    /// Once false, callers should finish the unit they are writing and stop;
    /// anything already handed to `write_*` has been or will be delivered.
    pub const fn accepting(&self) -> bool {
        self.accepting
    }

    /// Take the fatal transport error, if one occurred.
    pub fn take_fatal(&mut self) -> Option<RenderError> {
        self.fatal.take()
    }

    /// Total bytes pushed to the sink so far (excludes the unflushed view).
    pub const fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{BufferSink, ThrottledSink};

    /// Sink that records chunk sizes as delivered.
    #[derive(Default)]
    struct CountingSink {
        chunks: Vec<usize>,
        data: Vec<u8>,
    }

    impl Sink for CountingSink {
        fn write(&mut self, chunk: &[u8]) -> std::io::Result<bool> {
            self.chunks.push(chunk.len());
            self.data.extend_from_slice(chunk);
            Ok(true)
        }
        fn end(&mut self) {}
        fn destroy(&mut self, _error: &RenderError) {}
    }

    #[test]
    fn small_writes_coalesce_into_one_sink_chunk() {
        let mut sink = CountingSink::default();
        {
            let mut writer = ChunkWriter::with_view_size(&mut sink, 64);
            for _ in 0..10 {
                writer.write_bytes(b"ab");
            }
            writer.flush_view();
        }
        assert_eq!(sink.chunks, vec![20]);
        assert_eq!(sink.data.len(), 20);
    }

    #[test]
    fn oversized_chunks_bypass_the_view() {
        let mut sink = CountingSink::default();
        let big = vec![b'x'; 200];
        {
            let mut writer = ChunkWriter::with_view_size(&mut sink, 64);
            writer.write_bytes(b"pre");
            writer.write_bytes(&big);
            writer.write_bytes(b"post");
            writer.flush_view();
        }
        // "pre" flushed first so ordering is preserved, then the big chunk,
        // then the coalesced tail.
        assert_eq!(sink.chunks, vec![3, 200, 4]);
        assert!(sink.data.starts_with(b"pre"));
        assert!(sink.data.ends_with(b"post"));
    }

    #[test]
    fn view_overflow_flushes_before_appending() {
        let mut sink = CountingSink::default();
        {
            let mut writer = ChunkWriter::with_view_size(&mut sink, 64);
            writer.write_bytes(&[b'a'; 40]);
            writer.write_bytes(&[b'b'; 40]);
            writer.flush_view();
        }
        assert_eq!(sink.chunks, vec![40, 40]);
    }

    #[test]
    fn backpressure_latches_accepting_flag() {
        let mut sink = ThrottledSink::with_budget(1);
        let mut writer = ChunkWriter::with_view_size(&mut sink, 64);
        assert!(writer.accepting());
        writer.write_bytes(&[b'x'; 100]);
        assert!(!writer.accepting());
        // Further writes still go through: acceptance is advisory.
        writer.write_bytes(&[b'y'; 100]);
        assert_eq!(writer.bytes_written(), 200);
    }

    #[test]
    fn hex_ids_are_lowercase_and_stable() {
        let mut sink = BufferSink::new();
        {
            let mut writer = ChunkWriter::new(&mut sink);
            writer.write_hex(0);
            writer.write_str(",");
            writer.write_hex(10);
            writer.write_str(",");
            writer.write_hex(0xdead_beef);
            writer.flush_view();
        }
        assert_eq!(sink.as_bytes(), b"0,a,deadbeef");
    }

    #[test]
    fn chunk_variants_write_identically() {
        let mut sink = BufferSink::new();
        {
            let mut writer = ChunkWriter::new(&mut sink);
            writer.write_chunk(&Chunk::from_static(b"<b>"));
            writer.write_chunk(&Chunk::owned(b"hi".to_vec()));
            writer.flush_view();
        }
        assert_eq!(sink.as_bytes(), b"<b>hi");
    }
}
