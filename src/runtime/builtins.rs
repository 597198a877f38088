//! Built-in functions
//!
//! Every builtin is bound in the default namespace under its name and can
//! also be used as a filter (`value | name(args)`), in which case the
//! filtered value is passed as the first argument. Caller bindings shadow
//! the namespace entries but never the filters.

use crate::error::ExecError;
use crate::runtime::output::escape_html;
use crate::runtime::value::{Function, Value};

pub const BUILTINS: &[Function] = &[
    Function::new("upper", upper),
    Function::new("lower", lower),
    Function::new("title", title),
    Function::new("trim", trim),
    Function::new("length", length),
    Function::new("len", length),
    Function::new("join", join),
    Function::new("range", range),
    Function::new("escape", escape),
    Function::new("raw", raw),
    Function::new("safe", raw),
    Function::new("str", string),
    Function::new("first", first),
    Function::new("last", last),
];

/// Look up a builtin by name
pub fn lookup(name: &str) -> Option<Function> {
    BUILTINS.iter().find(|f| f.name() == name).copied()
}

/// Default namespace bindings
pub fn defaults() -> impl Iterator<Item = (&'static str, Value)> {
    BUILTINS.iter().map(|f| (f.name(), Value::Function(*f)))
}

fn arity(function: &'static str, args: &[Value], min: usize, max: usize) -> Result<(), ExecError> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            format!("{}", min)
        } else {
            format!("{} to {}", min, max)
        };
        return Err(ExecError::Builtin {
            function,
            message: format!("expected {} arguments, got {}", expected, args.len()),
        });
    }
    Ok(())
}

/// Apply a text transformation, keeping markup as markup
fn map_text(
    function: &'static str,
    args: &[Value],
    f: impl Fn(&str) -> String,
) -> Result<Value, ExecError> {
    arity(function, args, 1, 1)?;
    Ok(match &args[0] {
        Value::Markup(s) => Value::Markup(f(s)),
        other => Value::Str(f(&other.to_string())),
    })
}

fn upper(args: &[Value]) -> Result<Value, ExecError> {
    map_text("upper", args, str::to_uppercase)
}

fn lower(args: &[Value]) -> Result<Value, ExecError> {
    map_text("lower", args, str::to_lowercase)
}

fn title(args: &[Value]) -> Result<Value, ExecError> {
    map_text("title", args, |s| {
        s.split(' ')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(c) => c.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                    None => String::new(),
                }
            })
            .collect::<Vec<String>>()
            .join(" ")
    })
}

fn trim(args: &[Value]) -> Result<Value, ExecError> {
    map_text("trim", args, |s| s.trim().to_string())
}

fn length(args: &[Value]) -> Result<Value, ExecError> {
    arity("length", args, 1, 1)?;
    let n = match &args[0] {
        Value::Str(s) | Value::Markup(s) => s.chars().count(),
        Value::List(items) => items.len(),
        Value::Map(map) => map.len(),
        other => {
            return Err(ExecError::Builtin {
                function: "length",
                message: format!("{} has no length", other.type_name()),
            })
        }
    };
    Ok(Value::from(n))
}

fn join(args: &[Value]) -> Result<Value, ExecError> {
    arity("join", args, 1, 2)?;
    let separator = match args.get(1) {
        Some(sep) => sep.to_string(),
        None => String::new(),
    };
    match &args[0] {
        Value::List(items) => Ok(Value::Str(
            items
                .iter()
                .map(|item| item.to_string())
                .collect::<Vec<_>>()
                .join(&separator),
        )),
        other => Err(ExecError::Builtin {
            function: "join",
            message: format!("expected a list, got {}", other.type_name()),
        }),
    }
}

/// Largest list `range` will build
pub const MAX_RANGE: i64 = 1_000_000;

fn range(args: &[Value]) -> Result<Value, ExecError> {
    arity("range", args, 1, 2)?;
    let bound = |value: &Value| match value {
        Value::Int(n) => Ok(*n),
        other => Err(ExecError::Builtin {
            function: "range",
            message: format!("expected an int, got {}", other.type_name()),
        }),
    };
    let (start, end) = match args {
        [end] => (0, bound(end)?),
        [start, end] => (bound(start)?, bound(end)?),
        _ => unreachable!("arity checked"),
    };
    // A reversed range is empty; an overflowing span counts as too long
    let len = end.checked_sub(start).unwrap_or(i64::MAX).max(0);
    if len > MAX_RANGE {
        return Err(ExecError::Builtin {
            function: "range",
            message: format!("range of {len} items exceeds the limit of {MAX_RANGE}"),
        });
    }
    Ok(Value::List((start..end).map(Value::Int).collect()))
}

fn escape(args: &[Value]) -> Result<Value, ExecError> {
    arity("escape", args, 1, 1)?;
    Ok(match &args[0] {
        Value::Markup(s) => Value::Markup(s.clone()),
        other => Value::Markup(escape_html(&other.to_string())),
    })
}

fn raw(args: &[Value]) -> Result<Value, ExecError> {
    arity("raw", args, 1, 1)?;
    Ok(Value::Markup(args[0].to_string()))
}

fn string(args: &[Value]) -> Result<Value, ExecError> {
    arity("str", args, 1, 1)?;
    Ok(Value::Str(args[0].to_string()))
}

fn first(args: &[Value]) -> Result<Value, ExecError> {
    arity("first", args, 1, 1)?;
    Ok(args[0].iter_items()?.into_iter().next().unwrap_or_default())
}

fn last(args: &[Value]) -> Result<Value, ExecError> {
    arity("last", args, 1, 1)?;
    Ok(args[0].iter_items()?.pop().unwrap_or_default())
}
