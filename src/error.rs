//! Error types for parsing, compiling, loading and rendering templates

use std::path::PathBuf;

use ariadne::{Color, Label, Report, ReportKind, Source};
use thiserror::Error;

use crate::parser::lexer::Token;

/// Byte range in source text
pub type Span = std::ops::Range<usize>;

/// Errors that can occur anywhere in the template lifecycle
#[derive(Debug, Error)]
pub enum Error {
    /// No search directory holds a regular file with this name
    #[error("template not found: {name}")]
    NotFound { name: String },

    /// The template extends a base but was built without a loader
    #[error("template {filename} extends {base:?} but has no loader to resolve it")]
    NoLoader { filename: String, base: String },

    /// The loader that created the template has been dropped
    #[error("template {filename} extends {base:?} but its loader no longer exists")]
    LoaderDropped { filename: String, base: String },

    /// A template (indirectly) extends itself
    #[error("circular template inheritance: {chain}")]
    InheritanceCycle { chain: String },

    /// Source was released without a memoized tree to fall back on
    #[error("source of template {filename} is no longer available")]
    SourceUnavailable { filename: String },

    /// Error reading a template file
    #[error("error reading template file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error during parsing
    #[error("parse errors: {}", format_parse_errors(.0))]
    Parse(Vec<ParseError>),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Exec(#[from] ExecError),
}

impl From<Vec<ParseError>> for Error {
    fn from(errors: Vec<ParseError>) -> Self {
        Error::Parse(errors)
    }
}

fn format_parse_errors(errors: &[ParseError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("Parse error at {span:?}: {message}")]
    Syntax {
        span: Span,
        message: String,
        expected: Vec<String>,
    },
}

impl ParseError {
    /// Build a syntax error with no expectation list
    pub fn custom(span: Span, message: impl Into<String>) -> Self {
        ParseError::Syntax {
            span,
            message: message.into(),
            expected: Vec::new(),
        }
    }

    pub fn span(&self) -> &Span {
        match self {
            ParseError::Syntax { span, .. } => span,
        }
    }

    /// Format the error with source context using ariadne
    pub fn format(&self, source: &str, filename: &str) -> String {
        let mut buf = Vec::new();
        match self {
            ParseError::Syntax {
                span,
                message,
                expected,
            } => {
                let expected_str = if expected.is_empty() {
                    String::new()
                } else {
                    format!("\nExpected: {}", expected.join(", "))
                };

                let written = Report::build(ReportKind::Error, filename, span.start)
                    .with_message(message)
                    .with_label(
                        Label::new((filename, span.clone()))
                            .with_message(format!("{}{}", message, expected_str))
                            .with_color(Color::Red),
                    )
                    .finish()
                    .write((filename, Source::from(source)), &mut buf);
                if written.is_err() {
                    return self.to_string();
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl<'a> From<chumsky::error::Rich<'a, Token>> for ParseError {
    fn from(err: chumsky::error::Rich<'a, Token>) -> Self {
        use chumsky::error::RichReason;

        let message = match err.reason() {
            RichReason::ExpectedFound { found, .. } => {
                let found_str = match found {
                    Some(tok) => format_token(tok),
                    None => "end of input".to_string(),
                };
                format!("Unexpected {}", found_str)
            }
            RichReason::Custom(msg) => msg.to_string(),
        };

        let expected: Vec<String> = err
            .expected()
            .filter_map(|e| match e {
                chumsky::error::RichPattern::Token(tok) => Some(format_token(tok)),
                chumsky::error::RichPattern::Label(label) => Some(label.to_string()),
                chumsky::error::RichPattern::EndOfInput => Some("end of input".to_string()),
                chumsky::error::RichPattern::Identifier(s) => Some(format!("identifier '{}'", s)),
                chumsky::error::RichPattern::Any => Some("any token".to_string()),
                chumsky::error::RichPattern::SomethingElse => None,
            })
            .collect();

        ParseError::Syntax {
            span: err.span().into_range(),
            message,
            expected,
        }
    }
}

/// Format a token for human-readable error messages
fn format_token(tok: &Token) -> String {
    match tok {
        Token::Ident(s) => format!("identifier '{}'", s),
        Token::String(s) => format!("string \"{}\"", s),
        Token::Int(n) => format!("number {}", n),
        Token::Float(n) => format!("number {}", n),
        Token::True => "keyword 'true'".to_string(),
        Token::False => "keyword 'false'".to_string(),
        Token::None => "keyword 'none'".to_string(),
        Token::And => "keyword 'and'".to_string(),
        Token::Or => "keyword 'or'".to_string(),
        Token::Not => "keyword 'not'".to_string(),
        Token::In => "keyword 'in'".to_string(),
        Token::EqEq => "'=='".to_string(),
        Token::NotEq => "'!='".to_string(),
        Token::LessOrEqual => "'<='".to_string(),
        Token::GreaterOrEqual => "'>='".to_string(),
        Token::Less => "'<'".to_string(),
        Token::Greater => "'>'".to_string(),
        Token::Plus => "'+'".to_string(),
        Token::Minus => "'-'".to_string(),
        Token::Pipe => "'|'".to_string(),
        Token::ParenOpen => "'('".to_string(),
        Token::ParenClose => "')'".to_string(),
        Token::BracketOpen => "'['".to_string(),
        Token::BracketClose => "']'".to_string(),
        Token::Comma => "','".to_string(),
        Token::Dot => "'.'".to_string(),
    }
}

/// Errors raised while turning a tree into a procedure
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CompileError {
    #[error("{filename}: unknown filter '{name}' at {span:?}")]
    UnknownFilter {
        filename: String,
        name: String,
        span: Span,
    },
}

/// Errors raised while executing a compiled procedure
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExecError {
    #[error("undefined variable '{name}'")]
    Undefined { name: String },

    #[error("{type_name} has no attribute '{name}'")]
    MissingAttribute { type_name: &'static str, name: String },

    #[error("index {index} out of range")]
    IndexOutOfRange { index: String },

    #[error("{type_name} is not callable")]
    NotCallable { type_name: &'static str },

    #[error("{type_name} is not iterable")]
    NotIterable { type_name: &'static str },

    #[error("unsupported operand types for {op}: {left} and {right}")]
    UnsupportedOperands {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },

    #[error("{0}")]
    Type(String),

    #[error("{function}(): {message}")]
    Builtin {
        function: &'static str,
        message: String,
    },

    #[error("unknown filter '{name}'")]
    UnknownFilter { name: String },

    #[error("'@+{name}' used outside of an element")]
    AttributeOutsideElement { name: String },

    #[error("procedure did not publish a rendering context under '{name}'")]
    MissingContext { name: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_includes_filename_and_message() {
        let err = ParseError::custom(6..9, "Unexpected character");
        let report = err.format("hello $$$ world", "page.mint");
        assert!(report.contains("page.mint"));
        assert!(report.contains("Unexpected character"));
    }

    #[test]
    fn test_parse_errors_are_joined() {
        let err = Error::Parse(vec![
            ParseError::custom(0..1, "first"),
            ParseError::custom(2..3, "second"),
        ]);
        assert_eq!(
            err.to_string(),
            "parse errors: Parse error at 0..1: first; Parse error at 2..3: second"
        );
    }

    #[test]
    fn test_not_found_names_template() {
        let err = Error::NotFound {
            name: "missing.tpl".to_string(),
        };
        assert_eq!(err.to_string(), "template not found: missing.tpl");
    }
}
