//! Procedure executor
//!
//! Runs a compiled [`Procedure`] against a [`Namespace`] and publishes the
//! resulting [`RenderContext`](crate::runtime::RenderContext) under
//! [`CONTEXT_NAME`].

use indexmap::IndexMap;

use crate::compiler::{Op, Procedure};
use crate::error::ExecError;
use crate::parser::{BinaryOp, Expr, Literal, Piece, UnaryOp};
use crate::runtime::builtins;
use crate::runtime::namespace::Namespace;
use crate::runtime::output::{escape_html, OutputBuilder};
use crate::runtime::value::Value;
use crate::runtime::CONTEXT_NAME;

/// Active `#for` loop
struct LoopFrame {
    var: String,
    items: std::vec::IntoIter<Value>,
    /// Binding of `var` before the loop started
    shadowed: Option<Value>,
}

/// Execute `procedure`, publishing its output into `namespace`
pub fn execute(procedure: &Procedure, namespace: &mut Namespace) -> Result<(), ExecError> {
    let ops = procedure.ops();
    let mut out = OutputBuilder::default();
    let mut loops: Vec<LoopFrame> = Vec::new();
    let mut pc = 0;

    while let Some(op) = ops.get(pc) {
        pc += 1;
        match op {
            Op::Static(text) => out.push_text(text.clone()),
            Op::Text(pieces) => out.push_text(render_pieces(pieces, namespace)?),
            Op::Open { tag, attrs } => {
                let mut values = IndexMap::new();
                for attr in attrs {
                    values.insert(attr.name.clone(), render_pieces(&attr.value, namespace)?);
                }
                out.open(tag, values);
            }
            Op::Close => out.close(),
            Op::SetAttr(attr) => {
                let value = render_pieces(&attr.value, namespace)?;
                out.set_attr(&attr.name, value)?;
            }
            Op::Branch {
                condition,
                otherwise,
            } => {
                if !eval(condition, namespace)?.is_truthy() {
                    pc = *otherwise;
                }
            }
            Op::Jump(target) => pc = *target,
            Op::Iterate {
                var,
                iterable,
                exit,
            } => {
                let mut items = eval(iterable, namespace)?.iter_items()?.into_iter();
                match items.next() {
                    None => pc = *exit,
                    Some(first) => {
                        let shadowed = namespace.set(var.clone(), first);
                        loops.push(LoopFrame {
                            var: var.clone(),
                            items,
                            shadowed,
                        });
                    }
                }
            }
            Op::Next { body } => {
                let Some(frame) = loops.last_mut() else {
                    return Err(ExecError::Type("loop advanced outside of a loop".to_string()));
                };
                match frame.items.next() {
                    Some(item) => {
                        namespace.set(frame.var.clone(), item);
                        pc = *body;
                    }
                    None => {
                        if let Some(frame) = loops.pop() {
                            match frame.shadowed {
                                Some(value) => {
                                    namespace.set(frame.var, value);
                                }
                                None => {
                                    namespace.remove(&frame.var);
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    namespace.publish(CONTEXT_NAME, out.finish());
    Ok(())
}

/// Interpolate pieces; values are HTML-escaped unless they are markup
pub(crate) fn render_pieces(pieces: &[Piece], namespace: &Namespace) -> Result<String, ExecError> {
    let mut out = String::new();
    for piece in pieces {
        match piece {
            Piece::Literal(text) => out.push_str(text),
            Piece::Expr(expr) => match eval(expr, namespace)? {
                Value::Markup(markup) => out.push_str(&markup),
                value => out.push_str(&escape_html(&value.to_string())),
            },
        }
    }
    Ok(out)
}

/// Evaluate an expression
pub fn eval(expr: &Expr, namespace: &Namespace) -> Result<Value, ExecError> {
    match expr {
        Expr::Literal(literal) => Ok(match literal {
            Literal::None => Value::Null,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Int(n) => Value::Int(*n),
            Literal::Float(x) => Value::Float(*x),
            Literal::String(s) => Value::Str(s.clone()),
        }),
        Expr::Var(name) => namespace
            .get(name)
            .cloned()
            .ok_or_else(|| ExecError::Undefined { name: name.clone() }),
        Expr::List(items) => Ok(Value::List(
            items
                .iter()
                .map(|item| eval(item, namespace))
                .collect::<Result<_, _>>()?,
        )),
        Expr::Attr { target, name } => match eval(target, namespace)? {
            Value::Map(mut map) => map.shift_remove(name).ok_or_else(|| ExecError::MissingAttribute {
                type_name: "map",
                name: name.clone(),
            }),
            other => Err(ExecError::MissingAttribute {
                type_name: other.type_name(),
                name: name.clone(),
            }),
        },
        Expr::Index { target, index } => {
            let target = eval(target, namespace)?;
            let index = eval(index, namespace)?;
            get_item(target, index)
        }
        Expr::Call { callee, args } => {
            let callee = eval(callee, namespace)?;
            let args = args
                .iter()
                .map(|arg| eval(arg, namespace))
                .collect::<Result<Vec<_>, _>>()?;
            match callee {
                Value::Function(function) => function.call(&args),
                other => Err(ExecError::NotCallable {
                    type_name: other.type_name(),
                }),
            }
        }
        Expr::Unary { op, operand } => {
            let value = eval(operand, namespace)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
                UnaryOp::Neg => match value {
                    Value::Int(n) => n
                        .checked_neg()
                        .map(Value::Int)
                        .ok_or_else(|| ExecError::Type("integer overflow".to_string())),
                    Value::Float(x) => Ok(Value::Float(-x)),
                    other => Err(ExecError::Type(format!(
                        "bad operand type for unary -: {}",
                        other.type_name()
                    ))),
                },
            }
        }
        Expr::Binary { op, left, right } => {
            let left = eval(left, namespace)?;
            match op {
                BinaryOp::And if !left.is_truthy() => Ok(left),
                BinaryOp::Or if left.is_truthy() => Ok(left),
                BinaryOp::And | BinaryOp::Or => eval(right, namespace),
                _ => binary(*op, left, eval(right, namespace)?),
            }
        }
        Expr::Filter { input, name, args } => {
            let Some(function) = builtins::lookup(&name.node) else {
                return Err(ExecError::UnknownFilter {
                    name: name.node.clone(),
                });
            };
            let mut values = Vec::with_capacity(args.len() + 1);
            values.push(eval(input, namespace)?);
            for arg in args {
                values.push(eval(arg, namespace)?);
            }
            function.call(&values)
        }
    }
}

fn binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, ExecError> {
    let unsupported = |left: &Value, right: &Value| ExecError::UnsupportedOperands {
        op: op.symbol(),
        left: left.type_name(),
        right: right.type_name(),
    };
    match op {
        BinaryOp::Add => match (left, right) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_add(b)
                .map(Value::Int)
                .ok_or_else(|| ExecError::Type("integer overflow".to_string())),
            (Value::Int(a), Value::Float(b)) => Ok(Value::Float(a as f64 + b)),
            (Value::Float(a), Value::Int(b)) => Ok(Value::Float(a + b as f64)),
            (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a + b)),
            (Value::Markup(a), Value::Markup(b)) => Ok(Value::Markup(a + &b)),
            (Value::Str(a) | Value::Markup(a), Value::Str(b) | Value::Markup(b)) => {
                Ok(Value::Str(a + &b))
            }
            (Value::List(mut a), Value::List(b)) => {
                a.extend(b);
                Ok(Value::List(a))
            }
            (left, right) => Err(unsupported(&left, &right)),
        },
        BinaryOp::Sub => match (left, right) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_sub(b)
                .map(Value::Int)
                .ok_or_else(|| ExecError::Type("integer overflow".to_string())),
            (Value::Int(a), Value::Float(b)) => Ok(Value::Float(a as f64 - b)),
            (Value::Float(a), Value::Int(b)) => Ok(Value::Float(a - b as f64)),
            (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a - b)),
            (left, right) => Err(unsupported(&left, &right)),
        },
        BinaryOp::Eq => Ok(Value::Bool(left.loose_eq(&right))),
        BinaryOp::NotEq => Ok(Value::Bool(!left.loose_eq(&right))),
        BinaryOp::Less | BinaryOp::LessOrEqual | BinaryOp::Greater | BinaryOp::GreaterOrEqual => {
            let Some(ordering) = left.compare(&right) else {
                return Err(unsupported(&left, &right));
            };
            Ok(Value::Bool(match op {
                BinaryOp::Less => ordering.is_lt(),
                BinaryOp::LessOrEqual => ordering.is_le(),
                BinaryOp::Greater => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        BinaryOp::In => right.contains(&left).map(Value::Bool),
        // Short-circuited by the caller
        BinaryOp::And | BinaryOp::Or => Err(unsupported(&left, &right)),
    }
}

fn get_item(target: Value, index: Value) -> Result<Value, ExecError> {
    match (target, index) {
        (Value::List(mut items), Value::Int(i)) => match position(items.len(), i) {
            Some(pos) => Ok(items.swap_remove(pos)),
            None => Err(ExecError::IndexOutOfRange {
                index: i.to_string(),
            }),
        },
        (Value::Str(s), Value::Int(i)) => {
            let chars: Vec<char> = s.chars().collect();
            match position(chars.len(), i) {
                Some(pos) => Ok(Value::Str(chars[pos].to_string())),
                None => Err(ExecError::IndexOutOfRange {
                    index: i.to_string(),
                }),
            }
        }
        (Value::Map(mut map), Value::Str(key)) => {
            map.shift_remove(&key)
                .ok_or_else(|| ExecError::IndexOutOfRange { index: key })
        }
        (target, index) => Err(ExecError::Type(format!(
            "{} indices must be valid keys, not {}",
            target.type_name(),
            index.type_name()
        ))),
    }
}

/// Resolve a possibly negative index against `len`
fn position(len: usize, index: i64) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let pos = if index < 0 { index + len } else { index };
    if (0..len).contains(&pos) {
        usize::try_from(pos).ok()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::parser::{parse, parse_expression, Slots};
    use crate::runtime::value::Context;
    use pretty_assertions::assert_eq;

    fn run(source: &str, ctx: Context) -> Result<String, ExecError> {
        let parsed = parse(source, 4, &Slots::new()).expect("Should parse");
        let procedure = compile(&parsed.tree, "test.mint").expect("Should compile");
        let mut namespace = Namespace::with_builtins();
        namespace.extend(ctx);
        execute(&procedure, &mut namespace)?;
        let output = namespace
            .take_published(CONTEXT_NAME)
            .expect("Should publish output");
        let mut buffer = String::new();
        output.render(&mut buffer);
        Ok(buffer)
    }

    fn eval_str(source: &str, ctx: Context) -> Result<Value, ExecError> {
        let expr = parse_expression(source, 0).expect("Should parse");
        let mut namespace = Namespace::with_builtins();
        namespace.extend(ctx);
        eval(&expr, &namespace)
    }

    #[test]
    fn test_interpolation_escapes_values() {
        let out = run("Hello, {{ name }}", Context::new().with("name", "<World>")).expect("Should render");
        assert_eq!(out, "Hello, &lt;World&gt;");
    }

    #[test]
    fn test_raw_filter_skips_escaping() {
        let out = run("{{ html | raw }}", Context::new().with("html", "<b>hi</b>")).expect("Should render");
        assert_eq!(out, "<b>hi</b>");
    }

    #[test]
    fn test_element_with_interpolated_attribute() {
        let ctx = Context::new().with("url", "/a?x=1&y=2");
        let out = run("@a.href({{ url }}) link\n", ctx).expect("Should render");
        assert_eq!(out, r#"<a href="/a?x=1&amp;y=2">link</a>"#);
    }

    #[test]
    fn test_conditional_branches() {
        let source = "#if n > 1:\n    many\n#elif n == 1:\n    one\n#else:\n    none\n";
        assert_eq!(run(source, Context::new().with("n", 5)).as_deref(), Ok("many"));
        assert_eq!(run(source, Context::new().with("n", 1)).as_deref(), Ok("one"));
        assert_eq!(run(source, Context::new().with("n", 0)).as_deref(), Ok("none"));
    }

    #[test]
    fn test_loop_restores_shadowed_binding() {
        let source = "@ul\n    #for x in items:\n        @li {{ x }}\n{{ x }}\n";
        let ctx = Context::new()
            .with("items", vec!["a", "b"])
            .with("x", "outer");
        let out = run(source, ctx).expect("Should render");
        assert_eq!(out, "<ul><li>a</li><li>b</li></ul>outer");
    }

    #[test]
    fn test_loop_variable_is_removed_after_loop() {
        let source = "#for x in range(2):\n    {{ x }}\n{{ x }}\n";
        assert_eq!(
            run(source, Context::new()),
            Err(ExecError::Undefined {
                name: "x".to_string()
            })
        );
    }

    #[test]
    fn test_empty_loop_skips_body() {
        let source = "#for x in items:\n    {{ x }}\ndone\n";
        let out = run(source, Context::new().with("items", Vec::<Value>::new())).expect("Should render");
        assert_eq!(out, "done");
    }

    #[test]
    fn test_nested_loops() {
        let source = "#for a in [1, 2]:\n    #for b in ['x', 'y']:\n        {{ a }}{{ b }}\n";
        let out = run(source, Context::new()).expect("Should render");
        assert_eq!(out, "1x\n1y\n2x\n2y");
    }

    #[test]
    fn test_set_attr_appends_class() {
        let source = "@li.class(item)\n    #if active:\n        @+class(active)\n    entry\n";
        let out = run(source, Context::new().with("active", true)).expect("Should render");
        assert_eq!(out, r#"<li class="item active">entry</li>"#);
    }

    #[test]
    fn test_attribute_values_quote_safely() {
        let source = "@a.title(say \"hi\" to {{ who }}) x\n";
        let out = run(source, Context::new().with("who", "\"Bo\" & co")).expect("Should render");
        assert_eq!(
            out,
            r#"<a title="say &quot;hi&quot; to &quot;Bo&quot; &amp; co">x</a>"#
        );
    }

    #[test]
    fn test_and_or_return_operands() {
        assert_eq!(eval_str("'' or 'default'", Context::new()), Ok(Value::from("default")));
        assert_eq!(eval_str("0 and missing", Context::new()), Ok(Value::Int(0)));
        assert_eq!(eval_str("1 and 2", Context::new()), Ok(Value::Int(2)));
    }

    #[test]
    fn test_arithmetic_and_concatenation() {
        assert_eq!(eval_str("1 + 2 - 4", Context::new()), Ok(Value::Int(-1)));
        assert_eq!(eval_str("1 + 0.5", Context::new()), Ok(Value::Float(1.5)));
        assert_eq!(eval_str("'a' + 'b'", Context::new()), Ok(Value::from("ab")));
        assert_eq!(eval_str("[1] + [2]", Context::new()), Ok(Value::from(vec![1, 2])));
        assert!(matches!(
            eval_str("1 + 'a'", Context::new()),
            Err(ExecError::UnsupportedOperands { op: "+", .. })
        ));
    }

    #[test]
    fn test_membership() {
        assert_eq!(eval_str("2 in [1, 2]", Context::new()), Ok(Value::Bool(true)));
        assert_eq!(eval_str("'ell' in 'hello'", Context::new()), Ok(Value::Bool(true)));
        assert_eq!(eval_str("not (3 in [1, 2])", Context::new()), Ok(Value::Bool(true)));
    }

    #[test]
    fn test_attribute_and_index_access() {
        let mut user = IndexMap::new();
        user.insert("name".to_string(), Value::from("Ada"));
        user.insert("tags".to_string(), Value::from(vec!["x", "y", "z"]));
        let ctx = Context::new().with("user", user);

        assert_eq!(eval_str("user.name", ctx.clone()), Ok(Value::from("Ada")));
        assert_eq!(eval_str("user.tags[-1]", ctx.clone()), Ok(Value::from("z")));
        assert_eq!(eval_str("user['name']", ctx.clone()), Ok(Value::from("Ada")));
        assert_eq!(
            eval_str("user.tags[3]", ctx.clone()),
            Err(ExecError::IndexOutOfRange {
                index: "3".to_string()
            })
        );
        assert_eq!(
            eval_str("user.age", ctx),
            Err(ExecError::MissingAttribute {
                type_name: "map",
                name: "age".to_string()
            })
        );
    }

    #[test]
    fn test_calls_and_filters() {
        assert_eq!(eval_str("len('abc')", Context::new()), Ok(Value::Int(3)));
        assert_eq!(
            eval_str("names | join(', ') | upper", Context::new().with("names", vec!["a", "b"])),
            Ok(Value::from("A, B"))
        );
        assert_eq!(
            eval_str("name()", Context::new().with("name", "x")),
            Err(ExecError::NotCallable { type_name: "string" })
        );
    }

    #[test]
    fn test_caller_binding_shadows_builtin_but_not_filter() {
        let ctx = Context::new().with("len", "shadowed").with("xs", vec![1, 2]);
        assert_eq!(eval_str("len", ctx.clone()), Ok(Value::from("shadowed")));
        assert_eq!(eval_str("xs | len", ctx), Ok(Value::Int(2)));
    }

    #[test]
    fn test_undefined_variable() {
        assert_eq!(
            run("{{ nobody }}", Context::new()),
            Err(ExecError::Undefined {
                name: "nobody".to_string()
            })
        );
    }

    #[test]
    fn test_set_attr_outside_element() {
        assert!(matches!(
            run("@+class(x)\n", Context::new()),
            Err(ExecError::AttributeOutsideElement { .. })
        ));
    }
}
