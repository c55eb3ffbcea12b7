//! Format context: the small value type threaded down the tree.
//!
//! A `FormatContext` tells the renderer *where in the document* it is, so
//! children serialize correctly: table sections reject stray text, foreign
//! content (SVG/MathML) changes tag semantics, and a `<select>` ancestor
//! carries the selected value so matching options can mark themselves.
//! Contexts are propagated down by value and never shared.

use bitflags::bitflags;

/// Markup insertion mode.
///
/// Which mode a child enters is decided by the dialect collaborator; the
/// core only threads the value through the traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InsertionMode {
    /// At the document root, before any content.
    #[default]
    Root,
    /// Ordinary flow content.
    Html,
    /// Inside an `<svg>` subtree.
    Svg,
    /// Inside a `<math>` subtree.
    MathMl,
    /// Directly inside a `<table>`.
    Table,
    /// Inside `<thead>`/`<tbody>`/`<tfoot>`.
    TableBody,
    /// Inside a `<tr>`.
    TableRow,
    /// Inside a `<colgroup>`.
    ColGroup,
}

bitflags! {
    /// Ambient scope bits carried alongside the insertion mode.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FormatFlags: u8 {
        /// Inside a `<noscript>` subtree.
        const NOSCRIPT = 0b0000_0001;
        /// Inside a suspense fallback subtree.
        const FALLBACK = 0b0000_0010;
        /// Inside a `<picture>` element.
        const PICTURE = 0b0000_0100;
    }
}

/// Ambient formatting state for one position in the tree.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FormatContext {
    /// Current insertion mode.
    pub insertion_mode: InsertionMode,
    /// Value of the nearest enclosing `<select>`, if any.
    pub selected_value: Option<String>,
    /// Ambient scope bits.
    pub flags: FormatFlags,
}

impl FormatContext {
    /// The context at the document root.
    pub fn root() -> Self {
        Self::default()
    }

    /// Same context with a different insertion mode.
    ///
    /// Leaving the root mode or entering foreign/table content drops the
    /// selected value: it only applies to direct option children.
    pub fn with_mode(&self, insertion_mode: InsertionMode) -> Self {
        Self {
            insertion_mode,
            selected_value: None,
            flags: self.flags,
        }
    }

    /// Same context with a selected value (entering a `<select>`).
    pub fn with_selected_value(&self, value: Option<String>) -> Self {
        Self {
            insertion_mode: self.insertion_mode,
            selected_value: value,
            flags: self.flags,
        }
    }

    /// Same context with additional scope bits.
    pub fn with_flags(&self, flags: FormatFlags) -> Self {
        Self {
            insertion_mode: self.insertion_mode,
            selected_value: self.selected_value.clone(),
            flags: self.flags | flags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_context_defaults() {
        let cx = FormatContext::root();
        assert_eq!(cx.insertion_mode, InsertionMode::Root);
        assert!(cx.selected_value.is_none());
        assert!(cx.flags.is_empty());
    }

    #[test]
    fn with_mode_drops_selected_value() {
        let cx = FormatContext::root()
            .with_selected_value(Some("a".into()))
            .with_mode(InsertionMode::Table);
        assert_eq!(cx.insertion_mode, InsertionMode::Table);
        assert!(cx.selected_value.is_none());
    }

    #[test]
    fn flags_accumulate() {
        let cx = FormatContext::root()
            .with_flags(FormatFlags::NOSCRIPT)
            .with_flags(FormatFlags::FALLBACK);
        assert!(cx.flags.contains(FormatFlags::NOSCRIPT | FormatFlags::FALLBACK));
        // Mode changes keep scope bits.
        let cx = cx.with_mode(InsertionMode::Svg);
        assert!(cx.flags.contains(FormatFlags::NOSCRIPT));
    }
}
