//! Expression parser implementation using chumsky

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;

use crate::error::ParseError;
use crate::parser::ast::*;
use crate::parser::lexer::{lex, Token};

/// Trailing operation on an expression: `.name`, `[index]` or `(args)`
#[derive(Debug, Clone)]
enum Postfix {
    Attr(String),
    Index(Expr),
    Call(Vec<Expr>),
}

/// Parse a single expression.
///
/// `offset` is the byte position of `input` inside the template source;
/// every span in the result (and in errors) is relative to the whole source.
pub fn parse_expression(input: &str, offset: usize) -> Result<Expr, Vec<ParseError>> {
    let tokens = tokenize(input, offset)?;
    let eoi = offset + input.len();

    let token_stream = Stream::from_iter(tokens).map((eoi..eoi).into(), |(t, s): (_, _)| (t, s));

    expr_parser()
        .then_ignore(end())
        .parse(token_stream)
        .into_result()
        .map_err(|errs| errs.into_iter().map(|e| e.into()).collect())
}

/// Parse the header of a `#for` directive: `name in expr`
pub fn parse_for_header(input: &str, offset: usize) -> Result<(String, Expr), Vec<ParseError>> {
    let tokens = tokenize(input, offset)?;
    let eoi = offset + input.len();

    let token_stream = Stream::from_iter(tokens).map((eoi..eoi).into(), |(t, s): (_, _)| (t, s));

    select! { Token::Ident(s) => s }
        .labelled("loop variable")
        .then_ignore(just(Token::In))
        .then(expr_parser())
        .then_ignore(end())
        .parse(token_stream)
        .into_result()
        .map_err(|errs| errs.into_iter().map(|e| e.into()).collect())
}

fn tokenize(input: &str, offset: usize) -> Result<Vec<(Token, SimpleSpan)>, Vec<ParseError>> {
    match lex(input, offset) {
        Ok(tokens) => Ok(tokens
            .into_iter()
            .map(|(tok, span)| (tok, span.into()))
            .collect()),
        Err(span) => Err(vec![ParseError::custom(span, "Unexpected character")]),
    }
}

/// Helper to extract span range from chumsky's MapExtra
fn span_range(e: &impl chumsky::span::Span<Offset = usize>) -> std::ops::Range<usize> {
    e.start()..e.end()
}

fn binary(left: Expr, (op, right): (BinaryOp, Expr)) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn expr_parser<'a, I>() -> impl Parser<'a, I, Expr, extra::Err<Rich<'a, Token>>> + Clone
where
    I: ValueInput<'a, Token = Token, Span = SimpleSpan>,
{
    recursive(|expr| {
        let identifier = select! {
            Token::Ident(s) => s,
        }
        .labelled("identifier");

        let literal = select! {
            Token::None => Literal::None,
            Token::True => Literal::Bool(true),
            Token::False => Literal::Bool(false),
            Token::Int(n) => Literal::Int(n),
            Token::Float(f) => Literal::Float(f),
            Token::String(s) => Literal::String(s),
        }
        .map(Expr::Literal);

        // Comma separated expressions, shared by list literals and call arguments
        let items = expr
            .clone()
            .separated_by(just(Token::Comma))
            .allow_trailing()
            .collect::<Vec<_>>();

        let list = items
            .clone()
            .delimited_by(just(Token::BracketOpen), just(Token::BracketClose))
            .map(Expr::List);

        let atom = choice((
            literal,
            identifier.clone().map(Expr::Var),
            list,
            expr.clone()
                .delimited_by(just(Token::ParenOpen), just(Token::ParenClose)),
        ));

        let postfix = choice((
            just(Token::Dot)
                .ignore_then(identifier.clone())
                .map(Postfix::Attr),
            expr.clone()
                .delimited_by(just(Token::BracketOpen), just(Token::BracketClose))
                .map(Postfix::Index),
            items
                .clone()
                .delimited_by(just(Token::ParenOpen), just(Token::ParenClose))
                .map(Postfix::Call),
        ));

        // a.b[0](x)
        let access = atom
            .foldl(postfix.repeated(), |target, op| match op {
                Postfix::Attr(name) => Expr::Attr {
                    target: Box::new(target),
                    name,
                },
                Postfix::Index(index) => Expr::Index {
                    target: Box::new(target),
                    index: Box::new(index),
                },
                Postfix::Call(args) => Expr::Call {
                    callee: Box::new(target),
                    args,
                },
            })
            .boxed();

        let unary = choice((
            just(Token::Not).to(UnaryOp::Not),
            just(Token::Minus).to(UnaryOp::Neg),
        ))
        .repeated()
        .foldr(access, |op, operand| Expr::Unary {
            op,
            operand: Box::new(operand),
        })
        .boxed();

        let sum = unary
            .clone()
            .foldl(
                choice((
                    just(Token::Plus).to(BinaryOp::Add),
                    just(Token::Minus).to(BinaryOp::Sub),
                ))
                .then(unary)
                .repeated(),
                binary,
            )
            .boxed();

        let comparison = sum
            .clone()
            .foldl(
                choice((
                    just(Token::EqEq).to(BinaryOp::Eq),
                    just(Token::NotEq).to(BinaryOp::NotEq),
                    just(Token::LessOrEqual).to(BinaryOp::LessOrEqual),
                    just(Token::GreaterOrEqual).to(BinaryOp::GreaterOrEqual),
                    just(Token::Less).to(BinaryOp::Less),
                    just(Token::Greater).to(BinaryOp::Greater),
                    just(Token::In).to(BinaryOp::In),
                ))
                .then(sum)
                .repeated(),
                binary,
            )
            .boxed();

        let conjunction = comparison
            .clone()
            .foldl(
                just(Token::And)
                    .to(BinaryOp::And)
                    .then(comparison)
                    .repeated(),
                binary,
            )
            .boxed();

        let disjunction = conjunction
            .clone()
            .foldl(
                just(Token::Or)
                    .to(BinaryOp::Or)
                    .then(conjunction)
                    .repeated(),
                binary,
            )
            .boxed();

        // Filters bind loosest: `a or b | upper` filters the whole disjunction
        let filter = identifier
            .map_with(|name, e| Spanned::new(name, span_range(&e.span())))
            .then(
                items
                    .delimited_by(just(Token::ParenOpen), just(Token::ParenClose))
                    .or_not(),
            );

        disjunction
            .foldl(
                just(Token::Pipe).ignore_then(filter).repeated(),
                |input, (name, args)| Expr::Filter {
                    input: Box::new(input),
                    name,
                    args: args.unwrap_or_default(),
                },
            )
            .boxed()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Expr {
        Expr::Var(name.to_string())
    }

    fn int(n: i64) -> Expr {
        Expr::Literal(Literal::Int(n))
    }

    #[test]
    fn test_parse_variable() {
        assert_eq!(parse_expression("name", 0).expect("Should parse"), var("name"));
    }

    #[test]
    fn test_parse_literals() {
        assert_eq!(
            parse_expression(r#"["a", 1, 2.5, true, none]"#, 0).expect("Should parse"),
            Expr::List(vec![
                Expr::Literal(Literal::String("a".to_string())),
                int(1),
                Expr::Literal(Literal::Float(2.5)),
                Expr::Literal(Literal::Bool(true)),
                Expr::Literal(Literal::None),
            ])
        );
    }

    #[test]
    fn test_parse_attribute_index_and_call() {
        let expr = parse_expression("join(user.tags[0], sep)", 0).expect("Should parse");
        match expr {
            Expr::Call { callee, args } => {
                assert_eq!(*callee, var("join"));
                assert_eq!(args.len(), 2);
                match &args[0] {
                    Expr::Index { target, index } => {
                        assert_eq!(
                            **target,
                            Expr::Attr {
                                target: Box::new(var("user")),
                                name: "tags".to_string()
                            }
                        );
                        assert_eq!(**index, int(0));
                    }
                    other => panic!("Expected Index, got {:?}", other),
                }
            }
            other => panic!("Expected Call, got {:?}", other),
        }
    }

    #[test]
    fn test_precedence_and_binds_tighter_than_or() {
        let expr = parse_expression("a or b and c", 0).expect("Should parse");
        match expr {
            Expr::Binary { op, left, right } => {
                assert_eq!(op, BinaryOp::Or);
                assert_eq!(*left, var("a"));
                assert!(matches!(
                    *right,
                    Expr::Binary {
                        op: BinaryOp::And,
                        ..
                    }
                ));
            }
            other => panic!("Expected Binary, got {:?}", other),
        }
    }

    #[test]
    fn test_comparison_over_sum() {
        let expr = parse_expression("count + 1 >= limit", 0).expect("Should parse");
        match expr {
            Expr::Binary { op, left, .. } => {
                assert_eq!(op, BinaryOp::GreaterOrEqual);
                assert!(matches!(
                    *left,
                    Expr::Binary {
                        op: BinaryOp::Add,
                        ..
                    }
                ));
            }
            other => panic!("Expected Binary, got {:?}", other),
        }
    }

    #[test]
    fn test_unary_not_and_negation() {
        assert_eq!(
            parse_expression("not -x", 0).expect("Should parse"),
            Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(Expr::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(var("x")),
                }),
            }
        );
    }

    #[test]
    fn test_filter_chain_with_arguments() {
        let expr = parse_expression("items | join(', ') | upper", 12).expect("Should parse");
        match expr {
            Expr::Filter { input, name, args } => {
                assert_eq!(name.node, "upper");
                assert_eq!(name.span, 33..38);
                assert!(args.is_empty());
                match *input {
                    Expr::Filter { name, args, .. } => {
                        assert_eq!(name.node, "join");
                        assert_eq!(args.len(), 1);
                    }
                    other => panic!("Expected inner Filter, got {:?}", other),
                }
            }
            other => panic!("Expected Filter, got {:?}", other),
        }
    }

    #[test]
    fn test_for_header() {
        let (var_name, iterable) = parse_for_header("item in items", 0).expect("Should parse");
        assert_eq!(var_name, "item");
        assert_eq!(iterable, var("items"));
    }

    #[test]
    fn test_for_header_requires_in() {
        assert!(parse_for_header("item items", 0).is_err());
    }

    #[test]
    fn test_unexpected_token_error_has_span() {
        let errs = parse_expression("a +", 5).unwrap_err();
        assert!(!errs.is_empty());
        match &errs[0] {
            ParseError::Syntax { span, .. } => {
                // Points at the dangling operator or past it, never before the fragment
                assert!(span.start >= 6, "{span:?}");
                assert!(span.end <= 8, "{span:?}");
            }
        }
    }

    #[test]
    fn test_empty_expression_is_error() {
        assert!(parse_expression("  ", 0).is_err());
    }

    #[test]
    fn test_lexer_error_is_reported() {
        let errs = parse_expression("a $ b", 0).unwrap_err();
        match &errs[0] {
            ParseError::Syntax { span, message, .. } => {
                assert_eq!(*span, 2..3);
                assert_eq!(message, "Unexpected character");
            }
        }
    }
}
