use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

/// Selector text that does not match the selector grammar.
///
/// Carries the full text as source code so the offending segment can be
/// rendered with a label.
#[derive(Error, Diagnostic, Debug, Clone, PartialEq, Eq)]
#[error("malformed selector `{selector}`: {reason}")]
#[diagnostic(code(flake_selector::malformed))]
pub struct MalformedSelectorError {
    #[source_code]
    pub selector: String,
    pub reason: String,
    #[label("here")]
    pub span: SourceSpan,
}

impl MalformedSelectorError {
    pub(crate) fn new(selector: &str, reason: impl ToString, start: usize, len: usize) -> Self {
        let start = start.min(selector.len());
        let len = len.min(selector.len() - start);
        Self {
            selector: selector.to_string(),
            reason: reason.to_string(),
            span: (start, len).into(),
        }
    }

    /// Error for a selector assembled from segments rather than parsed from text.
    pub(crate) fn structural(reason: impl ToString) -> Self {
        Self {
            selector: String::new(),
            reason: reason.to_string(),
            span: (0, 0).into(),
        }
    }

    /// Byte offset of the offending segment.
    pub fn offset(&self) -> usize {
        self.span.offset()
    }
}
