//! Lexer for mint expressions using logos
//!
//! Expressions appear inside `{{ }}` interpolations and in the headers of
//! `#if`, `#elif` and `#for` directives. Block structure is handled by the
//! line parser in [`super::block`], never by this lexer.

use logos::Logos;

/// Byte range in source text
pub type Span = std::ops::Range<usize>;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
pub enum Token {
    // Keywords
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("none")]
    None,
    #[token("and")]
    And,
    #[token("or")]
    Or,
    #[token("not")]
    Not,
    #[token("in")]
    In,

    // Comparison operators (longer first)
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<=")]
    LessOrEqual,
    #[token(">=")]
    GreaterOrEqual,
    #[token("<")]
    Less,
    #[token(">")]
    Greater,

    // Arithmetic
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,

    // Filter pipe
    #[token("|")]
    Pipe,

    // Delimiters
    #[token("(")]
    ParenOpen,
    #[token(")")]
    ParenClose,
    #[token("[")]
    BracketOpen,
    #[token("]")]
    BracketClose,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,

    // Literals - identifiers must come after keywords
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string(), priority = 1)]
    Ident(String),

    #[regex(r#""([^"\\]|\\.)*""#, |lex| unescape(lex.slice()))]
    #[regex(r#"'([^'\\]|\\.)*'"#, |lex| unescape(lex.slice()))]
    String(String),

    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    #[regex(r"[0-9]+\.[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),
}

/// Strip the surrounding quotes and resolve backslash escapes
fn unescape(quoted: &str) -> String {
    let inner = &quoted[1..quoted.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Lex input string into tokens with spans.
///
/// Spans are shifted by `offset` so they point into the whole template
/// source rather than into the expression fragment. The first character
/// logos cannot match is reported as an error span.
pub fn lex(input: &str, offset: usize) -> Result<Vec<(Token, Span)>, Span> {
    Token::lexer(input)
        .spanned()
        .map(|(tok, span)| {
            let shifted = span.start + offset..span.end + offset;
            tok.map(|t| (t, shifted.clone())).map_err(|()| shifted)
        })
        .collect()
}
