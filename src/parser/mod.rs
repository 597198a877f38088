//! Parser for the mint template language
//!
//! [`parse`] is the only entry point the template lifecycle relies on: it
//! takes source text, the indentation width and the slot overrides coming
//! from a child template, and reports the resolved tree together with the
//! inheritance metadata.

pub mod ast;
pub mod block;
mod grammar;
pub mod lexer;

pub use ast::*;
pub use grammar::{parse_expression, parse_for_header};

use crate::error::ParseError;

/// Parse template source.
///
/// For a template without `#base`, the returned tree has `overrides`
/// applied to its slots and `slots` lists the slots it declares. For an
/// extending template, `slots` holds its top-level `#def`s with the
/// incoming overrides layered on top, ready to be handed to the base; the
/// tree then only contains those `#def` nodes.
pub fn parse(source: &str, indent: usize, overrides: &Slots) -> Result<Parsed, Vec<ParseError>> {
    let doc = block::parse_document(source, indent)?;
    let declared = doc.top_level_slots();

    match doc.base {
        None => Ok(Parsed {
            tree: Tree::resolve(&doc.nodes, overrides),
            base: None,
            slots: declared,
        }),
        Some(base) => Ok(Parsed {
            tree: Tree::new(doc.nodes),
            base: Some(base),
            slots: layer_slots(declared, overrides),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Node {
        Node::Text(vec![Piece::Literal(s.to_string())])
    }

    #[test]
    fn test_parse_base_applies_overrides() {
        let mut overrides = Slots::new();
        overrides.insert("body".to_string(), vec![text("Y")]);

        let parsed = parse("#def body:\n    X\n", 4, &overrides).expect("Should parse");
        assert!(parsed.base.is_none());
        assert_eq!(parsed.tree.slot("body"), Some(&[text("Y")][..]));
        // Declared slots keep their own defaults
        assert_eq!(parsed.slots.get("body"), Some(&vec![text("X")]));
    }

    #[test]
    fn test_parse_child_merges_incoming_overrides() {
        let mut overrides = Slots::new();
        overrides.insert("title".to_string(), vec![text("grandchild title")]);
        overrides.insert("footer".to_string(), vec![text("grandchild footer")]);

        let source = "#base: base.mint\n#def title:\n    child title\n#def body:\n    child body\n";
        let parsed = parse(source, 4, &overrides).expect("Should parse");

        assert_eq!(parsed.base.map(|b| b.node), Some("base.mint".to_string()));
        let names: Vec<_> = parsed.slots.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["title", "body", "footer"]);
        assert_eq!(parsed.slots["title"], vec![text("grandchild title")]);
        assert_eq!(parsed.slots["body"], vec![text("child body")]);
    }

    #[test]
    fn test_parse_is_deterministic() {
        let source = "@ul\n    #for x in xs:\n        @li {{ x }}\n";
        let first = parse(source, 4, &Slots::new()).expect("Should parse");
        let second = parse(source, 4, &Slots::new()).expect("Should parse");
        assert_eq!(first, second);
    }
}
