//! Error taxonomy for the renderer.
//!
//! Suspension is *not* an error: it is an explicit result variant consumed
//! entirely inside the work loop. Everything here is either an application
//! error surfaced by a node evaluator, an abort, a replay mismatch during a
//! resumed pass, or a transport failure.

/// Convenience alias used throughout the crate.
pub type RenderResult<T> = Result<T, RenderError>;

/// Errors produced while rendering or flushing.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// An application error thrown by a node evaluator.
    #[error("render error: {0}")]
    Render(String),

    /// The request was aborted by the caller.
    #[error("render aborted: {0}")]
    Aborted(String),

    /// A resumed pass found a different node shape than the recorded one.
    #[error("replay mismatch at {path}: expected {expected}, found {found}")]
    ReplayMismatch {
        /// Identity path of the slot that failed to match.
        path: String,
        /// Node shape recorded by the prerender pass.
        expected: String,
        /// Node shape found during the resumed pass.
        found: String,
    },

    /// The sink failed while accepting output.
    #[error("sink error: {0}")]
    Sink(String),
}

impl RenderError {
    /// An application error with the given message.
    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }

    /// An abort with the given reason.
    pub fn aborted(msg: impl Into<String>) -> Self {
        Self::Aborted(msg.into())
    }

    /// Whether this error came from the transport layer.
    pub const fn is_sink(&self) -> bool {
        matches!(self, Self::Sink(_))
    }
}

impl From<std::io::Error> for RenderError {
    fn from(err: std::io::Error) -> Self {
        Self::Sink(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(
            RenderError::render("x")
                .to_string()
                .contains("render error:")
        );
        assert!(
            RenderError::aborted("x")
                .to_string()
                .contains("render aborted:")
        );
        assert!(
            RenderError::Sink("x".into())
                .to_string()
                .contains("sink error:")
        );
    }

    #[test]
    fn replay_mismatch_names_the_slot() {
        let err = RenderError::ReplayMismatch {
            path: "Page[0] > Item[2]".into(),
            expected: "element <li>".into(),
            found: "text".into(),
        };
        let text = err.to_string();
        assert!(text.contains("Item[2]"));
        assert!(text.contains("element <li>"));
        assert!(text.contains("text"));
    }

    #[test]
    fn io_errors_convert_to_sink_errors() {
        let io = std::io::Error::other("pipe closed");
        let err = RenderError::from(io);
        assert!(err.is_sink());
        assert!(err.to_string().contains("pipe closed"));
    }
}
