//! Compiler: flattens a resolved [`Tree`] into a jump-linked [`Procedure`]
//!
//! Control flow is lowered to explicit jumps so that the executor is a
//! single loop over a program counter. Slots disappear here; their bodies
//! are inlined where they stand in the tree.

use crate::error::CompileError;
use crate::parser::{Attribute, Branch, Expr, Node, Piece, Tree};
use crate::runtime::builtins;

/// One executor instruction
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Text with nothing to interpolate
    Static(String),
    /// Text with interpolations
    Text(Vec<Piece>),
    Open { tag: String, attrs: Vec<Attribute> },
    Close,
    SetAttr(Attribute),
    /// Continue when `condition` holds, otherwise jump to `otherwise`
    Branch { condition: Expr, otherwise: usize },
    Jump(usize),
    /// Start a loop over `iterable`; jump to `exit` when it is empty
    Iterate {
        var: String,
        iterable: Expr,
        exit: usize,
    },
    /// Advance the innermost loop; jump back to `body` while items remain
    Next { body: usize },
}

/// Compiled form of a template
#[derive(Debug, Clone, PartialEq)]
pub struct Procedure {
    filename: String,
    ops: Vec<Op>,
}

impl Procedure {
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }
}

/// Compile a tree into a procedure tagged with `filename`
pub fn compile(tree: &Tree, filename: &str) -> Result<Procedure, CompileError> {
    let mut compiler = Compiler {
        filename,
        ops: Vec::new(),
    };
    compiler.nodes(&tree.nodes)?;
    Ok(Procedure {
        filename: filename.to_string(),
        ops: compiler.ops,
    })
}

struct Compiler<'a> {
    filename: &'a str,
    ops: Vec<Op>,
}

impl Compiler<'_> {
    fn emit(&mut self, op: Op) -> usize {
        self.ops.push(op);
        self.ops.len() - 1
    }

    fn here(&self) -> usize {
        self.ops.len()
    }

    fn nodes(&mut self, nodes: &[Node]) -> Result<(), CompileError> {
        for node in nodes {
            self.node(node)?;
        }
        Ok(())
    }

    fn node(&mut self, node: &Node) -> Result<(), CompileError> {
        match node {
            Node::Text(pieces) => {
                self.pieces(pieces)?;
                if pieces.iter().all(Piece::is_literal) {
                    let text = pieces
                        .iter()
                        .map(|piece| match piece {
                            Piece::Literal(s) => s.as_str(),
                            Piece::Expr(_) => "",
                        })
                        .collect();
                    self.emit(Op::Static(text));
                } else {
                    self.emit(Op::Text(pieces.clone()));
                }
            }
            Node::Element {
                tag,
                attrs,
                children,
            } => {
                for attr in attrs {
                    self.pieces(&attr.value)?;
                }
                self.emit(Op::Open {
                    tag: tag.clone(),
                    attrs: attrs.clone(),
                });
                self.nodes(children)?;
                self.emit(Op::Close);
            }
            Node::SetAttr(attr) => {
                self.pieces(&attr.value)?;
                self.emit(Op::SetAttr(attr.clone()));
            }
            Node::If {
                branches,
                otherwise,
            } => self.conditional(branches, otherwise.as_deref())?,
            Node::For {
                var,
                iterable,
                body,
            } => {
                self.check_filters(iterable)?;
                let start = self.emit(Op::Iterate {
                    var: var.clone(),
                    iterable: iterable.clone(),
                    exit: 0,
                });
                self.nodes(body)?;
                self.emit(Op::Next { body: start + 1 });
                let exit = self.here();
                if let Op::Iterate { exit: target, .. } = &mut self.ops[start] {
                    *target = exit;
                }
            }
            Node::Slot { body, .. } => self.nodes(body)?,
        }
        Ok(())
    }

    fn conditional(&mut self, branches: &[Branch], otherwise: Option<&[Node]>) -> Result<(), CompileError> {
        let mut exits = Vec::new();
        for branch in branches {
            self.check_filters(&branch.condition)?;
            let test = self.emit(Op::Branch {
                condition: branch.condition.clone(),
                otherwise: 0,
            });
            self.nodes(&branch.body)?;
            exits.push(self.emit(Op::Jump(0)));
            let next = self.here();
            if let Op::Branch { otherwise, .. } = &mut self.ops[test] {
                *otherwise = next;
            }
        }
        if let Some(body) = otherwise {
            self.nodes(body)?;
        }
        let end = self.here();
        for exit in exits {
            self.ops[exit] = Op::Jump(end);
        }
        Ok(())
    }

    fn pieces(&self, pieces: &[Piece]) -> Result<(), CompileError> {
        for piece in pieces {
            if let Piece::Expr(expr) = piece {
                self.check_filters(expr)?;
            }
        }
        Ok(())
    }

    fn check_filters(&self, expr: &Expr) -> Result<(), CompileError> {
        match expr {
            Expr::Literal(_) | Expr::Var(_) => Ok(()),
            Expr::List(items) => items.iter().try_for_each(|item| self.check_filters(item)),
            Expr::Attr { target, .. } => self.check_filters(target),
            Expr::Index { target, index } => {
                self.check_filters(target)?;
                self.check_filters(index)
            }
            Expr::Call { callee, args } => {
                self.check_filters(callee)?;
                args.iter().try_for_each(|arg| self.check_filters(arg))
            }
            Expr::Unary { operand, .. } => self.check_filters(operand),
            Expr::Binary { left, right, .. } => {
                self.check_filters(left)?;
                self.check_filters(right)
            }
            Expr::Filter { input, name, args } => {
                if builtins::lookup(&name.node).is_none() {
                    return Err(CompileError::UnknownFilter {
                        filename: self.filename.to_string(),
                        name: name.node.clone(),
                        span: name.span.clone(),
                    });
                }
                self.check_filters(input)?;
                args.iter().try_for_each(|arg| self.check_filters(arg))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse, Slots};

    fn compile_source(source: &str) -> Result<Procedure, CompileError> {
        let parsed = parse(source, 4, &Slots::new()).expect("Should parse");
        compile(&parsed.tree, "test.mint")
    }

    #[test]
    fn test_literal_text_is_static() {
        let procedure = compile_source("hello\nworld {{ name }}\n").expect("Should compile");
        assert_eq!(procedure.filename(), "test.mint");
        assert_eq!(procedure.ops()[0], Op::Static("hello".to_string()));
        assert!(matches!(procedure.ops()[1], Op::Text(_)));
    }

    #[test]
    fn test_if_chain_jumps() {
        let source = "#if a:\n    A\n#elif b:\n    B\n#else:\n    C\n";
        let ops = compile_source(source).expect("Should compile").ops().to_vec();
        // 0 Branch(a) 1 A 2 Jump 3 Branch(b) 4 B 5 Jump 6 C
        assert_eq!(ops.len(), 7);
        assert!(matches!(ops[0], Op::Branch { otherwise: 3, .. }));
        assert!(matches!(ops[3], Op::Branch { otherwise: 6, .. }));
        assert_eq!(ops[2], Op::Jump(7));
        assert_eq!(ops[5], Op::Jump(7));
        assert_eq!(ops[6], Op::Static("C".to_string()));
    }

    #[test]
    fn test_for_loop_links_body_and_exit() {
        let ops = compile_source("#for x in xs:\n    {{ x }}\nafter\n")
            .expect("Should compile")
            .ops()
            .to_vec();
        assert!(matches!(ops[0], Op::Iterate { exit: 3, .. }));
        assert_eq!(ops[2], Op::Next { body: 1 });
        assert_eq!(ops[3], Op::Static("after".to_string()));
    }

    #[test]
    fn test_slots_are_inlined() {
        let ops = compile_source("@main\n    #def body:\n        X\n")
            .expect("Should compile")
            .ops()
            .to_vec();
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[1], Op::Static("X".to_string()));
        assert_eq!(ops[2], Op::Close);
    }

    #[test]
    fn test_unknown_filter_is_rejected() {
        let err = compile_source("@p\n    {{ name | shout }}\n").unwrap_err();
        let CompileError::UnknownFilter {
            filename,
            name,
            span,
        } = err;
        assert_eq!(filename, "test.mint");
        assert_eq!(name, "shout");
        assert_eq!(&"@p\n    {{ name | shout }}\n"[span], "shout");
    }

    #[test]
    fn test_unknown_filter_in_attribute_is_rejected() {
        assert!(compile_source("@a.href({{ url | nope }})\n").is_err());
        assert!(compile_source("@a.href({{ url | lower }})\n").is_ok());
    }
}
