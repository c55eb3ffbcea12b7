//! The markup-dialect seam: vocabulary, escaping, and format transitions.
//!
//! The core knows how to traverse, buffer, and stitch; what a tag *means*
//! (whether it self-closes, how text must be escaped near it, which
//! insertion mode its children enter) belongs to the dialect. A reference
//! [`HtmlDialect`] ships with the crate so demos and tests run without an
//! external vocabulary implementation.

use crate::format::{FormatContext, FormatFlags, InsertionMode};
use crate::tree::{Attribute, Element};
use std::borrow::Cow;

/// Markup vocabulary and encoding rules.
///
/// Escaping methods are pure; the core may call them any number of times
/// for the same input.
pub trait Dialect {
    /// Escape a text node for safe emission.
    fn escape_text<'a>(&self, text: &'a str) -> Cow<'a, str>;

    /// Escape an attribute value for safe emission inside double quotes.
    fn escape_attribute<'a>(&self, value: &'a str) -> Cow<'a, str>;

    /// Whether `tag` self-closes (no children, no close tag).
    fn is_void_element(&self, tag: &str) -> bool;

    /// The format context an element's children render under.
    fn child_context(&self, parent: &FormatContext, element: &Element) -> FormatContext;

    /// Separator emitted between adjacent text nodes so client-side
    /// stitching can tell them apart.
    fn text_separator(&self) -> &'static [u8] {
        b"<!-- -->"
    }

    /// Serialize an element's open tag.
    ///
    /// The default writes `<tag` followed by each attribute in declaration
    /// order; dialects override this to inject vocabulary-specific
    /// attributes.
    fn push_open_tag(&self, out: &mut Vec<u8>, cx: &FormatContext, element: &Element) {
        let _ = cx;
        out.push(b'<');
        out.extend_from_slice(element.tag.as_bytes());
        for attr in &element.attributes {
            self.push_attribute(out, attr);
        }
        out.push(b'>');
    }

    /// Serialize a close tag.
    fn push_close_tag(&self, out: &mut Vec<u8>, cx: &FormatContext, tag: &str) {
        let _ = cx;
        out.extend_from_slice(b"</");
        out.extend_from_slice(tag.as_bytes());
        out.push(b'>');
    }

    /// Serialize one attribute (leading space included).
    fn push_attribute(&self, out: &mut Vec<u8>, attr: &Attribute) {
        out.push(b' ');
        out.extend_from_slice(attr.name.as_bytes());
        if let Some(value) = &attr.value {
            out.extend_from_slice(b"=\"");
            out.extend_from_slice(self.escape_attribute(value).as_bytes());
            out.push(b'"');
        }
    }
}

/// Reference HTML dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlDialect;

impl HtmlDialect {
    const VOID_ELEMENTS: &'static [&'static str] = &[
        "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
        "track", "wbr",
    ];
}

impl Dialect for HtmlDialect {
    fn escape_text<'a>(&self, text: &'a str) -> Cow<'a, str> {
        escape(text, false)
    }

    fn escape_attribute<'a>(&self, value: &'a str) -> Cow<'a, str> {
        escape(value, true)
    }

    fn is_void_element(&self, tag: &str) -> bool {
        Self::VOID_ELEMENTS.contains(&tag)
    }

    fn child_context(&self, parent: &FormatContext, element: &Element) -> FormatContext {
        match &*element.tag {
            "select" => parent
                .with_mode(InsertionMode::Html)
                .with_selected_value(element.attribute("value").map(str::to_owned)),
            "svg" => parent.with_mode(InsertionMode::Svg),
            "math" => parent.with_mode(InsertionMode::MathMl),
            "noscript" => parent.with_flags(FormatFlags::NOSCRIPT),
            "picture" => parent.with_flags(FormatFlags::PICTURE),
            "table" => parent.with_mode(InsertionMode::Table),
            "thead" | "tbody" | "tfoot" => parent.with_mode(InsertionMode::TableBody),
            "tr" => parent.with_mode(InsertionMode::TableRow),
            "colgroup" => parent.with_mode(InsertionMode::ColGroup),
            "foreignObject" if parent.insertion_mode == InsertionMode::Svg => {
                parent.with_mode(InsertionMode::Html)
            }
            _ => match parent.insertion_mode {
                InsertionMode::Root => parent.with_mode(InsertionMode::Html),
                // Table sub-modes reset once we are inside a cell.
                InsertionMode::Table | InsertionMode::TableBody | InsertionMode::TableRow
                    if matches!(&*element.tag, "td" | "th" | "caption") =>
                {
                    parent.with_mode(InsertionMode::Html)
                }
                _ => parent.with_selected_value(None),
            },
        }
    }

    fn push_open_tag(&self, out: &mut Vec<u8>, cx: &FormatContext, element: &Element) {
        out.push(b'<');
        out.extend_from_slice(element.tag.as_bytes());
        for attr in &element.attributes {
            self.push_attribute(out, attr);
        }
        // An option whose value matches the enclosing select marks itself.
        if element.tag == "option" {
            if let (Some(selected), Some(value)) =
                (cx.selected_value.as_deref(), element.attribute("value"))
            {
                if selected == value {
                    out.extend_from_slice(b" selected=\"\"");
                }
            }
        }
        out.push(b'>');
    }
}

fn escape(input: &str, attribute: bool) -> Cow<'_, str> {
    let needs_escape = |b: u8| matches!(b, b'&' | b'<' | b'>') || (attribute && b == b'"');
    let Some(first) = input.bytes().position(needs_escape) else {
        return Cow::Borrowed(input);
    };
    let mut out = String::with_capacity(input.len() + 8);
    out.push_str(&input[..first]);
    for ch in input[first..].chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            other => out.push(other),
        }
    }
    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_escaping_covers_the_metacharacters() {
        let dialect = HtmlDialect;
        assert_eq!(dialect.escape_text("a < b & c > d"), "a &lt; b &amp; c &gt; d");
        // Clean text borrows.
        assert!(matches!(dialect.escape_text("plain"), Cow::Borrowed(_)));
    }

    #[test]
    fn attribute_escaping_adds_quotes() {
        let dialect = HtmlDialect;
        assert_eq!(dialect.escape_attribute("say \"hi\""), "say &quot;hi&quot;");
        assert_eq!(dialect.escape_text("say \"hi\""), "say \"hi\"");
    }

    #[test]
    fn void_elements() {
        let dialect = HtmlDialect;
        assert!(dialect.is_void_element("br"));
        assert!(dialect.is_void_element("img"));
        assert!(!dialect.is_void_element("div"));
    }

    #[test]
    fn open_tags_serialize_attributes_in_order() {
        let dialect = HtmlDialect;
        let el = Element::new("a").attr("href", "/x?a=1&b=2").flag("download");
        let mut out = Vec::new();
        dialect.push_open_tag(&mut out, &FormatContext::root(), &el);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "<a href=\"/x?a=1&amp;b=2\" download>"
        );
    }

    #[test]
    fn matching_option_marks_itself_selected() {
        let dialect = HtmlDialect;
        let select = Element::new("select").attr("value", "b");
        let cx = dialect.child_context(&FormatContext::root(), &select);
        assert_eq!(cx.selected_value.as_deref(), Some("b"));

        let mut out = Vec::new();
        dialect.push_open_tag(&mut out, &cx, &Element::new("option").attr("value", "b"));
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "<option value=\"b\" selected=\"\">"
        );

        let mut out = Vec::new();
        dialect.push_open_tag(&mut out, &cx, &Element::new("option").attr("value", "a"));
        assert_eq!(String::from_utf8(out).unwrap(), "<option value=\"a\">");
    }

    #[test]
    fn noscript_scope_survives_nesting() {
        let dialect = HtmlDialect;
        let root = FormatContext::root();
        let noscript = dialect.child_context(&root, &Element::new("noscript"));
        assert!(noscript.flags.contains(FormatFlags::NOSCRIPT));
        let inner = dialect.child_context(&noscript, &Element::new("span"));
        assert!(inner.flags.contains(FormatFlags::NOSCRIPT));
    }

    #[test]
    fn table_modes_nest_and_reset() {
        let dialect = HtmlDialect;
        let root = FormatContext::root();
        let table = dialect.child_context(&root, &Element::new("table"));
        assert_eq!(table.insertion_mode, InsertionMode::Table);
        let body = dialect.child_context(&table, &Element::new("tbody"));
        assert_eq!(body.insertion_mode, InsertionMode::TableBody);
        let row = dialect.child_context(&body, &Element::new("tr"));
        assert_eq!(row.insertion_mode, InsertionMode::TableRow);
        let cell = dialect.child_context(&row, &Element::new("td"));
        assert_eq!(cell.insertion_mode, InsertionMode::Html);
    }
}
