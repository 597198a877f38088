//! Tree types produced by the mint parser
//!
//! A [`Tree`] is what the compiler consumes. Slot nodes stay in the tree
//! after inheritance has been resolved so that a memoized tree can still be
//! re-resolved against a different set of overrides.

use indexmap::IndexMap;

/// Byte range in source text
pub type Span = std::ops::Range<usize>;

/// Tree node with source location
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Self { node, span }
    }
}

/// Named slot bodies, in declaration order
pub type Slots = IndexMap<String, Vec<Node>>;

/// Literal values that can be written directly in an expression
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Eq,
    NotEq,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    In,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Less => "<",
            BinaryOp::LessOrEqual => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterOrEqual => ">=",
            BinaryOp::In => "in",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }
}

/// Expression inside `{{ }}` or a directive header
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Var(String),
    List(Vec<Expr>),
    Attr {
        target: Box<Expr>,
        name: String,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `input | name(args)`; the name is resolved against the builtin table at compile time
    Filter {
        input: Box<Expr>,
        name: Spanned<String>,
        args: Vec<Expr>,
    },
}

/// Part of an interpolated string
#[derive(Debug, Clone, PartialEq)]
pub enum Piece {
    Literal(String),
    Expr(Expr),
}

impl Piece {
    pub fn is_literal(&self) -> bool {
        matches!(self, Piece::Literal(_))
    }
}

/// Element attribute; the value may interpolate expressions
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub value: Vec<Piece>,
}

/// One `#if`/`#elif` arm
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub condition: Expr,
    pub body: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// A text line
    Text(Vec<Piece>),
    /// `@tag.attr(value) inline text`
    Element {
        tag: String,
        attrs: Vec<Attribute>,
        children: Vec<Node>,
    },
    /// `@+attr(value)`, applied to the enclosing element
    SetAttr(Attribute),
    If {
        branches: Vec<Branch>,
        otherwise: Option<Vec<Node>>,
    },
    For {
        var: String,
        iterable: Expr,
        body: Vec<Node>,
    },
    /// `#def name:`, an overridable region
    Slot { name: String, body: Vec<Node> },
}

/// Fully resolved template tree
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

impl Tree {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    /// Build a tree from raw nodes, substituting slot bodies from `overrides`
    pub fn resolve(nodes: &[Node], overrides: &Slots) -> Self {
        Self {
            nodes: apply_slots(nodes, overrides, &mut Vec::new()),
        }
    }

    /// Re-resolve a tree that was resolved without overrides.
    ///
    /// For a template without a base this gives the same tree a fresh parse
    /// with `overrides` would. Extending templates carry their slots in
    /// [`Parsed::slots`] instead and must go through their base.
    pub fn with_overrides(&self, overrides: &Slots) -> Self {
        if overrides.is_empty() {
            return self.clone();
        }
        Self::resolve(&self.nodes, overrides)
    }

    /// Body of the first slot called `name`, searched depth first
    #[cfg(test)]
    pub(crate) fn slot(&self, name: &str) -> Option<&[Node]> {
        find_slot(&self.nodes, name)
    }
}

/// Output of one run of the parsing collaborator
#[derive(Debug, Clone, PartialEq)]
pub struct Parsed {
    /// Tree with overrides applied (meaningless when `base` is set)
    pub tree: Tree,
    /// `#base:` target, if the template extends another one
    pub base: Option<Spanned<String>>,
    /// Slots to hand to the base: this template's `#def`s merged under the incoming overrides
    pub slots: Slots,
}

/// Layer `overrides` on top of a template's declared slots; overrides win
pub fn layer_slots(mut declared: Slots, overrides: &Slots) -> Slots {
    for (name, body) in overrides {
        declared.insert(name.clone(), body.clone());
    }
    declared
}

/// Replace slot bodies by their overrides, recursively.
///
/// `active` holds the slots currently being expanded; a slot is never
/// substituted inside its own override.
fn apply_slots(nodes: &[Node], overrides: &Slots, active: &mut Vec<String>) -> Vec<Node> {
    nodes
        .iter()
        .map(|node| match node {
            Node::Slot { name, body } => {
                let chosen = match overrides.get(name) {
                    Some(replacement) if !active.contains(name) => replacement,
                    _ => body,
                };
                active.push(name.clone());
                let body = apply_slots(chosen, overrides, active);
                active.pop();
                Node::Slot {
                    name: name.clone(),
                    body,
                }
            }
            Node::Element {
                tag,
                attrs,
                children,
            } => Node::Element {
                tag: tag.clone(),
                attrs: attrs.clone(),
                children: apply_slots(children, overrides, active),
            },
            Node::If {
                branches,
                otherwise,
            } => Node::If {
                branches: branches
                    .iter()
                    .map(|b| Branch {
                        condition: b.condition.clone(),
                        body: apply_slots(&b.body, overrides, active),
                    })
                    .collect(),
                otherwise: otherwise
                    .as_ref()
                    .map(|body| apply_slots(body, overrides, active)),
            },
            Node::For {
                var,
                iterable,
                body,
            } => Node::For {
                var: var.clone(),
                iterable: iterable.clone(),
                body: apply_slots(body, overrides, active),
            },
            Node::Text(_) | Node::SetAttr(_) => node.clone(),
        })
        .collect()
}

#[cfg(test)]
fn children_of(node: &Node) -> Vec<&[Node]> {
    match node {
        Node::Slot { body, .. } | Node::For { body, .. } => vec![body.as_slice()],
        Node::Element { children, .. } => vec![children.as_slice()],
        Node::If {
            branches,
            otherwise,
        } => {
            let mut all: Vec<&[Node]> = branches.iter().map(|b| b.body.as_slice()).collect();
            if let Some(body) = otherwise {
                all.push(body);
            }
            all
        }
        Node::Text(_) | Node::SetAttr(_) => Vec::new(),
    }
}

#[cfg(test)]
fn find_slot<'a>(nodes: &'a [Node], name: &str) -> Option<&'a [Node]> {
    for node in nodes {
        if let Node::Slot { name: n, body } = node {
            if n == name {
                return Some(body);
            }
        }
        if let Some(found) = children_of(node)
            .into_iter()
            .find_map(|children| find_slot(children, name))
        {
            return Some(found);
        }
    }
    None
}
