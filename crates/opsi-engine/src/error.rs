//! Engine error types with source-annotated diagnostics

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

/// Main engine error type
#[derive(Error, Debug, Diagnostic)]
pub enum EngineError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Template(#[from] TemplateError),
}

/// Error kind for categorizing template errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum TemplateErrorKind {
    UndefinedVariable,
    SyntaxError,
    Other,
}

/// Template error pointing into the control file
#[derive(Error, Debug, Diagnostic, Clone)]
#[error("{message}")]
#[diagnostic(code(opsi::template::resolve))]
pub struct TemplateError {
    /// Error message
    pub message: String,

    /// Error kind for categorization
    pub kind: TemplateErrorKind,

    /// Control file source
    #[source_code]
    pub src: NamedSource<String>,

    /// Error location in source
    #[label("error occurred here")]
    pub span: Option<SourceSpan>,

    /// Suggestion for fixing the error
    #[help]
    pub suggestion: Option<String>,
}

impl TemplateError {
    /// Create a template error from a MiniJinja error
    pub fn from_minijinja(err: minijinja::Error, template_name: &str, template_source: &str) -> Self {
        let kind = match err.kind() {
            minijinja::ErrorKind::SyntaxError => TemplateErrorKind::SyntaxError,
            minijinja::ErrorKind::UndefinedError => TemplateErrorKind::UndefinedVariable,
            _ => TemplateErrorKind::Other,
        };

        let message = match err.detail() {
            Some(detail) => match kind {
                TemplateErrorKind::SyntaxError => format!("syntax error in placeholder: {detail}"),
                _ => detail.to_string(),
            },
            None => err.to_string(),
        };

        let span = err
            .line()
            .and_then(|line| calculate_span(template_source, line));

        let suggestion = match kind {
            TemplateErrorKind::SyntaxError => Some(
                "Placeholders are written as {{.key}} or {{ key }}; check for an unclosed `{{`"
                    .to_string(),
            ),
            _ => None,
        };

        Self {
            message,
            kind,
            src: NamedSource::new(template_name, template_source.to_string()),
            span,
            suggestion,
        }
    }

    /// Error for a placeholder naming a key that has no override
    pub fn undefined(
        name: &str,
        template_name: &str,
        template_source: &str,
        line: Option<usize>,
        suggestion: Option<String>,
    ) -> Self {
        Self {
            message: format!("undefined variable `{name}`"),
            kind: TemplateErrorKind::UndefinedVariable,
            src: NamedSource::new(template_name, template_source.to_string()),
            span: line.and_then(|line| calculate_span(template_source, line)),
            suggestion,
        }
    }

    /// Get the error kind
    pub fn kind(&self) -> TemplateErrorKind {
        self.kind
    }
}

/// Calculate the source span for a given line number
fn calculate_span(source: &str, line_num: usize) -> Option<SourceSpan> {
    let mut offset = 0;

    for (idx, line) in source.split_inclusive('\n').enumerate() {
        if idx + 1 == line_num {
            let len = line.trim_end_matches(['\r', '\n']).len();
            return Some(SourceSpan::new(offset.into(), len));
        }
        offset += line.len();
    }

    None
}

pub type Result<T> = std::result::Result<T, EngineError>;
