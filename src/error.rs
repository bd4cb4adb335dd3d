use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

use crate::scanner::token::Span;

// ============= Static errors (scan / parse / resolve / compile) =============

#[derive(Error, Debug, Diagnostic)]
pub enum CompileError {
    #[error("scan error: {message}")]
    #[diagnostic(code(lox::scan))]
    Scan {
        message: String,
        #[label("here")]
        span: SourceSpan,
        #[source_code]
        src: miette::NamedSource<String>,
    },

    #[error("parse error: {message}")]
    #[diagnostic(code(lox::parse))]
    Parse {
        message: String,
        #[label("here")]
        span: SourceSpan,
        #[source_code]
        src: miette::NamedSource<String>,
    },

    #[error("resolution error: {message}")]
    #[diagnostic(code(lox::resolve))]
    Resolve {
        message: String,
        #[label("here")]
        span: SourceSpan,
        #[source_code]
        src: miette::NamedSource<String>,
    },

    #[error("compile error: {message}")]
    #[diagnostic(code(lox::compile))]
    Compile {
        message: String,
        #[label("here")]
        span: SourceSpan,
        #[source_code]
        src: miette::NamedSource<String>,
    },
}

impl CompileError {
    pub fn scan(message: impl Into<String>, span: Span) -> Self {
        Self::Scan {
            message: message.into(),
            span: span.into(),
            src: miette::NamedSource::new("input", String::new()),
        }
    }

    pub fn parse(message: impl Into<String>, span: Span) -> Self {
        Self::Parse {
            message: message.into(),
            span: span.into(),
            src: miette::NamedSource::new("input", String::new()),
        }
    }

    pub fn resolve(message: impl Into<String>, span: Span) -> Self {
        Self::Resolve {
            message: message.into(),
            span: span.into(),
            src: miette::NamedSource::new("input", String::new()),
        }
    }

    pub fn compile(message: impl Into<String>, span: Span) -> Self {
        Self::Compile {
            message: message.into(),
            span: span.into(),
            src: miette::NamedSource::new("input", String::new()),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Scan { message, .. }
            | Self::Parse { message, .. }
            | Self::Resolve { message, .. }
            | Self::Compile { message, .. } => message,
        }
    }

    pub fn span(&self) -> SourceSpan {
        match self {
            Self::Scan { span, .. }
            | Self::Parse { span, .. }
            | Self::Resolve { span, .. }
            | Self::Compile { span, .. } => *span,
        }
    }

    /// Attach source code for fancy miette diagnostics
    pub fn with_source_code(self, name: impl Into<String>, source: impl Into<String>) -> Self {
        let src = miette::NamedSource::new(name.into(), source.into());
        match self {
            Self::Scan { message, span, .. } => Self::Scan { message, span, src },
            Self::Parse { message, span, .. } => Self::Parse { message, span, src },
            Self::Resolve { message, span, .. } => Self::Resolve { message, span, src },
            Self::Compile { message, span, .. } => Self::Compile { message, span, src },
        }
    }

    /// Render in the canonical reporting form:
    /// `[line N] Error at '<lexeme>': <message>`, or `at end` for a
    /// zero-length span at EOF.
    pub fn report(&self, source: &str) -> String {
        let span = self.span();
        let offset = span.offset();
        let line = offset_to_line(source, offset);
        let at = if span.len() == 0 || offset >= source.len() {
            "at end".to_string()
        } else {
            let end = (offset + span.len()).min(source.len());
            format!("at '{}'", &source[offset..end])
        };
        format!("[line {line}] Error {at}: {}", self.message())
    }
}

// ============= Runtime errors =============

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("{message}")]
    Error {
        message: String,
        line: Option<usize>,
    },

    #[error("return")]
    Return {
        value: crate::interpreter::value::Value,
    },
}

impl RuntimeError {
    /// Create a runtime error without a source location (REPL, unit tests)
    pub fn new(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            line: None,
        }
    }

    /// Create a runtime error pinned to a source line
    pub fn at_line(message: impl Into<String>, line: usize) -> Self {
        Self::Error {
            message: message.into(),
            line: Some(line),
        }
    }

    /// Render in the canonical reporting form: `<message>\n[line N]`.
    /// Only call this for the Error variant, not Return.
    pub fn report(&self) -> String {
        match self {
            Self::Error {
                message,
                line: Some(line),
            } => format!("{message}\n[line {line}]"),
            Self::Error { message, line: None } => message.clone(),
            // Should never be reported as an error
            Self::Return { .. } => "unexpected return".to_string(),
        }
    }

    pub fn line(&self) -> Option<usize> {
        match self {
            Self::Error { line, .. } => *line,
            Self::Return { .. } => None,
        }
    }

    /// Check if this is a return value (for control flow)
    pub fn is_return(&self) -> bool {
        matches!(self, Self::Return { .. })
    }

    /// Extract return value if this is a Return variant
    pub fn into_return_value(self) -> Option<crate::interpreter::value::Value> {
        match self {
            Self::Return { value } => Some(value),
            _ => None,
        }
    }
}

/// Calculate 1-based line number from a byte offset in source
pub fn offset_to_line(source: &str, offset: usize) -> usize {
    source[..offset.min(source.len())]
        .bytes()
        .filter(|&b| b == b'\n')
        .count()
        + 1
}

// ============= Tests =============
