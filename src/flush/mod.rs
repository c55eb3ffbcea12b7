//! The flush pass: serializing completed work in document order.
//!
//! The first flush walks the root segment tree (the shell), emitting
//! literal chunks, inlining small completed boundaries, and leaving
//! placeholder markup where content is still pending. Later flushes drain
//! the queues of boundaries and detached segments that completed after the
//! shell, each as a self-contained out-of-band fragment plus a patch
//! instruction. Every queue drain is idempotent under backpressure: if the
//! sink stops accepting mid-list, the written prefix is removed and the
//! rest stays queued untouched for the next call.

pub(crate) mod wire;

use crate::boundary::{BoundaryId, BoundaryStatus};
use crate::chunk::ChunkWriter;
use crate::error::{RenderError, RenderResult};
use crate::request::{Request, RequestStatus};
use crate::segment::{SegmentId, SegmentStatus};
use crate::sink::Sink;
use tracing::debug;

impl Request {
    /// Serialize everything that is ready into `sink`.
    ///
    /// Call after [`Request::perform_work`], and again whenever the sink
    /// signals that it has drained capacity.
    pub fn flush(&mut self, sink: &mut dyn Sink) -> RenderResult<()> {
        match self.status {
            RequestStatus::Closed => return Ok(()),
            RequestStatus::Fatal => {
                let err = self
                    .fatal_error
                    .clone()
                    .unwrap_or_else(|| RenderError::render("request failed"));
                sink.destroy(&err);
                return Err(err);
            }
            RequestStatus::Working | RequestStatus::ShellSent => {}
        }

        let view_size = self.options.writer_view_size;
        let (close, fatal) = {
            let mut writer = ChunkWriter::with_view_size(sink, view_size);
            let close = self.flush_queues(&mut writer);
            writer.flush_view();
            (close, writer.take_fatal())
        };
        if let Some(err) = fatal {
            self.fatal(err.clone());
            sink.destroy(&err);
            return Err(err);
        }
        if close {
            sink.end();
            self.status = RequestStatus::Closed;
            debug!("stream complete");
        }
        Ok(())
    }

    /// Returns whether the stream can be closed.
    fn flush_queues(&mut self, w: &mut ChunkWriter<'_>) -> bool {
        // 1. The shell: the whole root segment tree, fallbacks included.
        if self.shell_flushed {
            for hint in self.take_hoisted_hints() {
                w.write_str(&hint.markup);
            }
        } else {
            if self.pending_root_tasks > 0 {
                return false;
            }
            for hint in self.take_hoisted_hints() {
                w.write_str(&hint.markup);
            }
            if let Some(root) = self.root_segment {
                self.flush_subtree(root, w);
            }
            self.shell_flushed = true;
            if self.status == RequestStatus::Working {
                self.status = RequestStatus::ShellSent;
            }
            self.fire_shell_ready();
        }

        // 2. Boundaries the client must take over.
        let mut written = 0;
        while written < self.client_rendered_boundaries.len() {
            if !w.accepting() {
                break;
            }
            let bid = self.client_rendered_boundaries[written];
            self.flush_client_render_instruction(bid, w);
            written += 1;
        }
        self.client_rendered_boundaries.drain(..written);
        if !w.accepting() {
            return false;
        }

        // 3. Completed boundaries. Outlining nested completed boundaries
        // appends to this queue mid-loop; reading by index picks them up,
        // so a fragment always lands after the fragments it depends on.
        let mut written = 0;
        while written < self.completed_boundaries.len() {
            if !w.accepting() {
                break;
            }
            let bid = self.completed_boundaries[written];
            self.flush_completed_boundary(bid, w);
            written += 1;
        }
        self.completed_boundaries.drain(..written);
        if !w.accepting() {
            return false;
        }

        // 4. Detached segments from a resumed pass.
        let mut written = 0;
        while written < self.completed_slots.len() {
            if !w.accepting() {
                break;
            }
            let segment = self.completed_slots[written];
            self.flush_detached_segment(segment, w);
            written += 1;
        }
        self.completed_slots.drain(..written);
        if !w.accepting() {
            return false;
        }

        // 5. Partially completed boundaries stream their finished pieces.
        let mut written = 0;
        while written < self.partial_boundaries.len() {
            if !w.accepting() {
                break;
            }
            let bid = self.partial_boundaries[written];
            if !self.flush_partial_boundary(bid, w) {
                break;
            }
            written += 1;
        }
        self.partial_boundaries.drain(..written);

        w.accepting() && self.can_close()
    }

    /// Serialize one segment subtree inline, splicing children at their
    /// recorded positions and reserving placeholders for pending ones.
    fn flush_subtree(&mut self, id: SegmentId, w: &mut ChunkWriter<'_>) {
        let (chunks, children, embedded) = {
            let seg = self.segments.get_mut(id);
            if seg.status == SegmentStatus::Flushed {
                return;
            }
            seg.status = SegmentStatus::Flushed;
            seg.parent_flushed = true;
            (
                std::mem::take(&mut seg.chunks),
                seg.children.clone(),
                seg.text_embedded,
            )
        };
        if embedded {
            w.write_bytes(self.dialect.text_separator());
        }
        let mut cursor = 0usize;
        for child in children {
            let splice_at = self.segments.get(child).index.min(chunks.len());
            while cursor < splice_at {
                w.write_chunk(&chunks[cursor]);
                cursor += 1;
            }
            self.flush_child(child, w);
        }
        while cursor < chunks.len() {
            w.write_chunk(&chunks[cursor]);
            cursor += 1;
        }
    }

    fn flush_child(&mut self, id: SegmentId, w: &mut ChunkWriter<'_>) {
        if let Some(bid) = self.segments.get(id).boundary {
            self.flush_boundary_slot(id, bid, w);
            return;
        }
        match self.segments.get(id).status {
            SegmentStatus::Completed | SegmentStatus::Flushed => self.flush_subtree(id, w),
            SegmentStatus::Pending | SegmentStatus::Postponed => {
                // Reserve the spot; the segment arrives out-of-band later.
                let public_id = self.segment_public_id(id);
                let prefix = self.options.identifier_prefix.clone();
                wire::write_placeholder(w, &prefix, public_id);
                self.segments.get_mut(id).parent_flushed = true;
            }
        }
    }

    /// Serialize a suspense boundary's slot: inline content, inline
    /// fallback with a placeholder, or a client-render marker, depending on
    /// the boundary's state and size.
    fn flush_boundary_slot(&mut self, slot: SegmentId, bid: BoundaryId, w: &mut ChunkWriter<'_>) {
        self.boundaries.get_mut(bid).parent_flushed = true;
        let status = self.boundaries.get(bid).status;
        match status {
            BoundaryStatus::ClientRendered => {
                let digest = self.boundaries.get(bid).error_digest.clone();
                wire::write_client_rendered_open(w, digest.as_deref());
                // The fallback still renders, so something shows before the
                // client takes over.
                self.flush_subtree(slot, w);
                w.write_bytes(wire::MARKER_END);
            }
            BoundaryStatus::Completed
                if self.boundaries.get(bid).byte_size <= self.options.progressive_chunk_size =>
            {
                let hints = std::mem::take(&mut self.boundaries.get_mut(bid).hints);
                for hint in hints {
                    w.write_str(&hint.markup);
                }
                let content_root = self.boundaries.get(bid).content_root;
                w.write_bytes(wire::MARKER_COMPLETED);
                self.flush_subtree(content_root, w);
                w.write_bytes(wire::MARKER_END);
                self.boundaries.get_mut(bid).completed_segments.clear();
            }
            BoundaryStatus::Completed | BoundaryStatus::Pending => {
                // Pending content, or completed content large enough that
                // inlining it would bloat the shell: ship the fallback now
                // and the content as its own fragment.
                let placeholder = self.boundary_placeholder_id(bid);
                self.boundary_content_id(bid);
                let prefix = self.options.identifier_prefix.clone();
                wire::write_pending_open(w, &prefix, placeholder);
                self.flush_subtree(slot, w);
                w.write_bytes(wire::MARKER_END);
                let b = self.boundaries.get(bid);
                if status == BoundaryStatus::Completed {
                    self.completed_boundaries.push(bid);
                } else if !b.postponed
                    && !b.completed_segments.is_empty()
                    && !self.partial_boundaries.contains(&bid)
                {
                    self.partial_boundaries.push(bid);
                }
            }
        }
    }

    /// One out-of-band fragment for a fully completed boundary: hints, the
    /// remaining content segments, then the reveal instruction.
    fn flush_completed_boundary(&mut self, bid: BoundaryId, w: &mut ChunkWriter<'_>) {
        let hints = std::mem::take(&mut self.boundaries.get_mut(bid).hints);
        for hint in hints {
            w.write_str(&hint.markup);
        }
        let segments = std::mem::take(&mut self.boundaries.get_mut(bid).completed_segments);
        for segment in segments {
            self.flush_queued_segment(bid, segment, w);
        }
        let placeholder = self.boundary_placeholder_id(bid);
        let content_id = self.boundary_content_id(bid);
        let prefix = self.options.identifier_prefix.clone();
        let first = !self.sent_boundary_instruction;
        self.sent_boundary_instruction = true;
        wire::write_boundary_instruction(w, first, &prefix, placeholder, content_id);
    }

    /// Stream the finished pieces of a still-pending boundary. Returns
    /// whether every queued segment was written.
    fn flush_partial_boundary(&mut self, bid: BoundaryId, w: &mut ChunkWriter<'_>) -> bool {
        let hints = std::mem::take(&mut self.boundaries.get_mut(bid).hints);
        for hint in hints {
            w.write_str(&hint.markup);
        }
        let mut written = 0;
        while written < self.boundaries.get(bid).completed_segments.len() {
            if !w.accepting() {
                break;
            }
            let segment = self.boundaries.get(bid).completed_segments[written];
            self.flush_queued_segment(bid, segment, w);
            written += 1;
        }
        let segments = &mut self.boundaries.get_mut(bid).completed_segments;
        segments.drain(..written);
        segments.is_empty()
    }

    /// Write one queued content segment as an out-of-band container.
    ///
    /// A segment with no assigned id is the boundary's content root: its
    /// container carries the id the reveal instruction will reference, and
    /// needs no instruction of its own.
    fn flush_queued_segment(&mut self, bid: BoundaryId, id: SegmentId, w: &mut ChunkWriter<'_>) {
        if self.segments.get(id).status == SegmentStatus::Flushed {
            return;
        }
        let prefix = self.options.identifier_prefix.clone();
        match self.segments.get(id).public_id {
            None => {
                let container = self.boundary_content_id(bid);
                self.segments.get_mut(id).public_id = Some(container);
                wire::write_container_open(w, &prefix, container);
                self.flush_subtree(id, w);
                wire::write_container_close(w);
            }
            Some(public_id) => {
                wire::write_container_open(w, &prefix, public_id);
                self.flush_subtree(id, w);
                wire::write_container_close(w);
                let first = !self.sent_segment_instruction;
                self.sent_segment_instruction = true;
                wire::write_segment_instruction(w, first, &prefix, public_id);
            }
        }
    }

    /// A detached slot from a resumed pass: container plus instruction.
    fn flush_detached_segment(&mut self, id: SegmentId, w: &mut ChunkWriter<'_>) {
        if self.segments.get(id).status == SegmentStatus::Flushed {
            return;
        }
        let Some(public_id) = self.segments.get(id).public_id else {
            return;
        };
        let prefix = self.options.identifier_prefix.clone();
        wire::write_container_open(w, &prefix, public_id);
        self.flush_subtree(id, w);
        wire::write_container_close(w);
        let first = !self.sent_segment_instruction;
        self.sent_segment_instruction = true;
        wire::write_segment_instruction(w, first, &prefix, public_id);
    }

    /// Tell the client to take over one boundary.
    fn flush_client_render_instruction(&mut self, bid: BoundaryId, w: &mut ChunkWriter<'_>) {
        let placeholder = self.boundary_placeholder_id(bid);
        let prefix = self.options.identifier_prefix.clone();
        let (digest, message, stack) = {
            let b = self.boundaries.get(bid);
            (
                b.error_digest.clone(),
                b.error_message.clone(),
                b.error_stack.clone(),
            )
        };
        let first = !self.sent_client_render_instruction;
        self.sent_client_render_instruction = true;
        wire::write_client_render_instruction(
            w,
            first,
            &prefix,
            placeholder,
            digest.as_deref(),
            message.as_deref(),
            stack.as_deref(),
        );
    }
}
