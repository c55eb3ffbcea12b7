//! Wire format of the streaming protocol.
//!
//! Boundary regions are delimited by comment markers the client runtime
//! walks; placeholders and out-of-band containers are keyed by hex ids in
//! three namespaces (`B:` boundary placeholders, `S:` segment containers,
//! `P:` segment placeholders). Each completion instruction ships its
//! function body once per stream, before first use. The payloads are
//! opaque to callers.

use crate::chunk::ChunkWriter;

/// Opens a boundary region whose content is still pending.
pub(crate) const MARKER_PENDING: &[u8] = b"<!--$?-->";
/// Opens a boundary region whose content is inlined, complete.
pub(crate) const MARKER_COMPLETED: &[u8] = b"<!--$-->";
/// Opens a boundary region the client must render itself.
pub(crate) const MARKER_CLIENT_RENDERED: &[u8] = b"<!--$!-->";
/// Closes any boundary region.
pub(crate) const MARKER_END: &[u8] = b"<!--/$-->";

/// Moves a completed segment into its placeholder:
/// `$RS(containerId, placeholderId)`.
const SEGMENT_FN: &[u8] = b"$RS=function(a,b){a=document.getElementById(a);b=document.getElementById(b);for(a.parentNode.removeChild(a);a.firstChild;)b.parentNode.insertBefore(a.firstChild,b);b.parentNode.removeChild(b)};";

/// Reveals a completed boundary: `$RC(boundaryId, contentId)` removes the
/// fallback between the boundary markers and splices the content in.
const BOUNDARY_FN: &[u8] = b"$RC=function(b,c,e){c=document.getElementById(c);c.parentNode.removeChild(c);var a=document.getElementById(b);if(a){b=a.previousSibling;if(e)b.data=\"$!\",a.setAttribute(\"data-dgst\",e);else{e=b.parentNode;a=b.nextSibling;var f=0;do{if(a&&8===a.nodeType){var d=a.data;if(\"/$\"===d)if(0===f)break;else f--;else\"$\"!==d&&\"$?\"!==d&&\"$!\"!==d||f++}d=a.nextSibling;e.removeChild(a);a=d}while(a);for(;c.firstChild;)e.insertBefore(c.firstChild,a);b.data=\"$\"}b._retry&&b._retry()};";

/// Tells the client to discard a placeholder and render the subtree
/// itself: `$RX(boundaryId, digest, message, stack)`.
const CLIENT_RENDER_FN: &[u8] = b"$RX=function(b,c,d,e){var a=document.getElementById(b);a&&(b=a.previousSibling,b.data=\"$!\",a=a.dataset,c&&(a.dgst=c),d&&(a.msg=d),e&&(a.stck=e),b._retry&&b._retry())};";

/// `<template id="{prefix}P:{hex}"></template>`: reserves a spot for a
/// segment that will arrive out-of-band.
pub(crate) fn write_placeholder(w: &mut ChunkWriter<'_>, prefix: &str, id: u64) {
    w.write_bytes(b"<template id=\"");
    w.write_str(prefix);
    w.write_bytes(b"P:");
    w.write_hex(id);
    w.write_bytes(b"\"></template>");
}

/// `<!--$?--><template id="{prefix}B:{hex}"></template>`: opens a pending
/// boundary region; the fallback follows.
pub(crate) fn write_pending_open(w: &mut ChunkWriter<'_>, prefix: &str, id: u64) {
    w.write_bytes(MARKER_PENDING);
    w.write_bytes(b"<template id=\"");
    w.write_str(prefix);
    w.write_bytes(b"B:");
    w.write_hex(id);
    w.write_bytes(b"\"></template>");
}

/// `<!--$!-->` with an optional digest template for diagnostics.
pub(crate) fn write_client_rendered_open(w: &mut ChunkWriter<'_>, digest: Option<&str>) {
    w.write_bytes(MARKER_CLIENT_RENDERED);
    if let Some(digest) = digest {
        w.write_bytes(b"<template data-dgst=\"");
        write_attribute_value(w, digest);
        w.write_bytes(b"\"></template>");
    }
}

/// `<div hidden id="{prefix}S:{hex}">`: opens an out-of-band container.
pub(crate) fn write_container_open(w: &mut ChunkWriter<'_>, prefix: &str, id: u64) {
    w.write_bytes(b"<div hidden id=\"");
    w.write_str(prefix);
    w.write_bytes(b"S:");
    w.write_hex(id);
    w.write_bytes(b"\">");
}

/// Closes an out-of-band container.
pub(crate) fn write_container_close(w: &mut ChunkWriter<'_>) {
    w.write_bytes(b"</div>");
}

/// `<script>$RS("{prefix}S:{hex}","{prefix}P:{hex}")</script>`.
pub(crate) fn write_segment_instruction(
    w: &mut ChunkWriter<'_>,
    first: bool,
    prefix: &str,
    id: u64,
) {
    w.write_bytes(b"<script>");
    if first {
        w.write_bytes(SEGMENT_FN);
    }
    w.write_bytes(b"$RS(\"");
    w.write_str(prefix);
    w.write_bytes(b"S:");
    w.write_hex(id);
    w.write_bytes(b"\",\"");
    w.write_str(prefix);
    w.write_bytes(b"P:");
    w.write_hex(id);
    w.write_bytes(b"\")</script>");
}

/// `<script>$RC("{prefix}B:{hex}","{prefix}S:{hex}")</script>`.
pub(crate) fn write_boundary_instruction(
    w: &mut ChunkWriter<'_>,
    first: bool,
    prefix: &str,
    boundary_id: u64,
    content_id: u64,
) {
    w.write_bytes(b"<script>");
    if first {
        w.write_bytes(BOUNDARY_FN);
    }
    w.write_bytes(b"$RC(\"");
    w.write_str(prefix);
    w.write_bytes(b"B:");
    w.write_hex(boundary_id);
    w.write_bytes(b"\",\"");
    w.write_str(prefix);
    w.write_bytes(b"S:");
    w.write_hex(content_id);
    w.write_bytes(b"\")</script>");
}

/// `<script>$RX("{prefix}B:{hex}", digest?, message?, stack?)</script>`.
pub(crate) fn write_client_render_instruction(
    w: &mut ChunkWriter<'_>,
    first: bool,
    prefix: &str,
    boundary_id: u64,
    digest: Option<&str>,
    message: Option<&str>,
    stack: Option<&str>,
) {
    w.write_bytes(b"<script>");
    if first {
        w.write_bytes(CLIENT_RENDER_FN);
    }
    w.write_bytes(b"$RX(\"");
    w.write_str(prefix);
    w.write_bytes(b"B:");
    w.write_hex(boundary_id);
    w.write_bytes(b"\"");
    // Trailing args are written only as far as they carry data.
    let args = [digest, message, stack];
    let last = args.iter().rposition(Option::is_some);
    if let Some(last) = last {
        for arg in &args[..=last] {
            w.write_bytes(b",");
            write_js_string(w, arg.unwrap_or(""));
        }
    }
    w.write_bytes(b")</script>");
}

/// Quote a string for inclusion inside an inline instruction script.
///
/// `<` is escaped so a payload can never close the surrounding script tag.
fn write_js_string(w: &mut ChunkWriter<'_>, value: &str) {
    w.write_bytes(b"\"");
    for ch in value.chars() {
        match ch {
            '\\' => w.write_bytes(b"\\\\"),
            '"' => w.write_bytes(b"\\\""),
            '<' => w.write_bytes(b"\\u003c"),
            '\n' => w.write_bytes(b"\\n"),
            '\r' => w.write_bytes(b"\\r"),
            '\u{2028}' => w.write_bytes(b"\\u2028"),
            '\u{2029}' => w.write_bytes(b"\\u2029"),
            other => {
                let mut buf = [0u8; 4];
                w.write_bytes(other.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    w.write_bytes(b"\"");
}

/// Escape a value destined for a double-quoted wire attribute.
fn write_attribute_value(w: &mut ChunkWriter<'_>, value: &str) {
    for ch in value.chars() {
        match ch {
            '&' => w.write_bytes(b"&amp;"),
            '<' => w.write_bytes(b"&lt;"),
            '"' => w.write_bytes(b"&quot;"),
            other => {
                let mut buf = [0u8; 4];
                w.write_bytes(other.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
}
