//! Line parser: turns indentation-structured source into nodes
//!
//! Each non-blank line is one construct. A line's children are the lines
//! below it indented by exactly one more level. Expressions found in text,
//! attribute values and directive headers are handed to [`super::grammar`].

use std::collections::HashMap;

use crate::error::{ParseError, Span};
use crate::parser::ast::*;
use crate::parser::grammar::{parse_expression, parse_for_header};

/// Tags that never have a closing tag or children
pub const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

type Result<T> = std::result::Result<T, Vec<ParseError>>;

/// A source line with its nested lines
#[derive(Debug)]
struct Line<'a> {
    level: usize,
    text: &'a str,
    /// Byte offset of `text` in the source
    offset: usize,
    children: Vec<Line<'a>>,
}

impl Line<'_> {
    fn span(&self) -> Span {
        self.offset..self.offset + self.text.len()
    }
}

/// Raw parse output: nodes before slot resolution plus the `#base` target
#[derive(Debug)]
pub struct Document {
    pub nodes: Vec<Node>,
    pub base: Option<Spanned<String>>,
}

impl Document {
    /// Top-level `#def` blocks, in order
    pub fn top_level_slots(&self) -> Slots {
        self.nodes
            .iter()
            .filter_map(|node| match node {
                Node::Slot { name, body } => Some((name.clone(), body.clone())),
                _ => None,
            })
            .collect()
    }
}

/// Parse source text into a [`Document`]
pub fn parse_document(source: &str, indent: usize) -> Result<Document> {
    let flat = split_lines(source, indent.max(1))?;
    let mut pos = 0;
    let roots = nest(&flat, &mut pos, 0)?;

    let base = find_base(&roots)?;
    let mut builder = Builder {
        extending: base.is_some(),
        slots_seen: HashMap::new(),
    };
    let nodes = builder.nodes(&roots, true)?;
    Ok(Document { nodes, base })
}

/// Split source into lines with their indentation level, skipping blank lines
fn split_lines(source: &str, indent: usize) -> Result<Vec<Line<'_>>> {
    let mut lines = Vec::new();
    let mut offset = 0;

    for raw in source.split_inclusive('\n') {
        let line_start = offset;
        offset += raw.len();

        let content = raw.trim_end_matches(['\n', '\r']);
        if content.trim().is_empty() {
            continue;
        }

        let leading = content.len() - content.trim_start_matches([' ', '\t']).len();
        if let Some(tab) = content[..leading].find('\t') {
            let at = line_start + tab;
            return Err(vec![ParseError::custom(
                at..at + 1,
                "Tabs are not allowed in indentation",
            )]);
        }
        if leading % indent != 0 {
            return Err(vec![ParseError::custom(
                line_start..line_start + leading,
                format!(
                    "Indentation of {} spaces is not a multiple of {}",
                    leading, indent
                ),
            )]);
        }

        lines.push(Line {
            level: leading / indent,
            text: &content[leading..],
            offset: line_start + leading,
            children: Vec::new(),
        });
    }
    Ok(lines)
}

/// Move lines at `level` (with their deeper children) out of `flat`
fn nest<'a>(flat: &[Line<'a>], pos: &mut usize, level: usize) -> Result<Vec<Line<'a>>> {
    let mut out = Vec::new();
    while *pos < flat.len() && flat[*pos].level >= level {
        let line = &flat[*pos];
        if line.level > level {
            return Err(vec![ParseError::custom(line.span(), "Unexpected indent")]);
        }
        *pos += 1;

        let children = match flat.get(*pos) {
            Some(next) if next.level == level + 1 => nest(flat, pos, level + 1)?,
            Some(next) if next.level > level + 1 => {
                return Err(vec![ParseError::custom(next.span(), "Unexpected indent")]);
            }
            _ => Vec::new(),
        };

        out.push(Line {
            level: line.level,
            text: line.text,
            offset: line.offset,
            children,
        });
    }
    Ok(out)
}

/// Locate the `#base:` declaration; it may only appear once, at the top level
fn find_base(roots: &[Line<'_>]) -> Result<Option<Spanned<String>>> {
    let mut base = None;
    for line in roots {
        let Some(rest) = directive_rest(line.text, "base") else {
            continue;
        };
        let Some(name) = rest.trim_start().strip_prefix(':') else {
            return Err(vec![ParseError::custom(line.span(), "Expected ':' after #base")]);
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(vec![ParseError::custom(
                line.span(),
                "#base requires a template name",
            )]);
        }
        if !line.children.is_empty() {
            return Err(vec![ParseError::custom(
                line.children[0].span(),
                "#base cannot have nested content",
            )]);
        }
        if base.is_some() {
            return Err(vec![ParseError::custom(line.span(), "Duplicate #base declaration")]);
        }
        base = Some(Spanned::new(name.to_string(), line.span()));
    }
    Ok(base)
}

/// Text after `#name` when `text` is that directive
fn directive_rest<'a>(text: &'a str, name: &str) -> Option<&'a str> {
    let rest = text.strip_prefix('#')?.strip_prefix(name)?;
    match rest.chars().next() {
        Some(c) if c.is_alphanumeric() || c == '_' => None,
        _ => Some(rest),
    }
}

/// Name of the directive on a `#...` line
fn directive_name(text: &str) -> &str {
    let rest = &text[1..];
    let end = rest
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    &rest[..end]
}

/// Split `#if expr:` style headers into the expression text and its offset
fn header_expression<'a>(line: &Line<'a>, directive: &str) -> Result<(&'a str, usize)> {
    let skip = 1 + directive.len();
    let rest = &line.text[skip..];
    let Some(body) = rest.trim_end().strip_suffix(':') else {
        return Err(vec![ParseError::custom(
            line.span(),
            format!("Expected ':' at the end of #{}", directive),
        )]);
    };
    let trimmed = body.trim_start();
    let offset = line.offset + skip + (body.len() - trimmed.len());
    Ok((trimmed.trim_end(), offset))
}

struct Builder {
    extending: bool,
    slots_seen: HashMap<String, Span>,
}

impl Builder {
    fn nodes(&mut self, lines: &[Line<'_>], top_level: bool) -> Result<Vec<Node>> {
        let mut nodes: Vec<Node> = Vec::new();

        for line in lines {
            let text = line.text;

            if text.starts_with("--") {
                continue;
            }

            if text.starts_with('#') {
                let name = directive_name(text);
                match name {
                    "base" if top_level => continue,
                    "base" => {
                        return Err(vec![ParseError::custom(
                            line.span(),
                            "#base is only allowed at the top level",
                        )]);
                    }
                    "elif" | "else" => {
                        self.attach_branch(line, name, &mut nodes)?;
                        continue;
                    }
                    _ => {}
                }
                let node = self.directive(line, name)?;
                if top_level && self.extending && !matches!(node, Node::Slot { .. }) {
                    return Err(vec![self.outside_slot(line)]);
                }
                nodes.push(node);
                continue;
            }

            if top_level && self.extending {
                return Err(vec![self.outside_slot(line)]);
            }

            if let Some(rest) = text.strip_prefix("@+") {
                if !line.children.is_empty() {
                    return Err(vec![ParseError::custom(
                        line.children[0].span(),
                        "Attribute lines cannot have nested content",
                    )]);
                }
                let (attr, consumed) = parse_attribute(rest, line.offset + 2)?;
                if !rest[consumed..].trim().is_empty() {
                    let at = line.offset + 2 + consumed;
                    return Err(vec![ParseError::custom(
                        at..line.offset + text.len(),
                        "Unexpected text after attribute",
                    )]);
                }
                nodes.push(Node::SetAttr(attr));
                continue;
            }

            if let Some(rest) = text.strip_prefix('@') {
                nodes.push(self.element(line, rest)?);
                continue;
            }

            let (literal, offset) = match text.strip_prefix('\\') {
                Some(rest) => (rest, line.offset + 1),
                None => (text, line.offset),
            };
            if !line.children.is_empty() {
                return Err(vec![ParseError::custom(
                    line.children[0].span(),
                    "Text lines cannot have nested content",
                )]);
            }
            nodes.push(Node::Text(interpolate(literal, offset)?));
        }

        Ok(nodes)
    }

    fn outside_slot(&self, line: &Line<'_>) -> ParseError {
        ParseError::custom(
            line.span(),
            "Only #def blocks may appear at the top level of a template that uses #base",
        )
    }

    fn directive(&mut self, line: &Line<'_>, name: &str) -> Result<Node> {
        match name {
            "def" => {
                let (slot, _) = header_expression(line, "def")?;
                let valid = !slot.is_empty()
                    && slot
                        .chars()
                        .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.');
                if !valid {
                    return Err(vec![ParseError::custom(
                        line.span(),
                        format!("Invalid slot name '{}'", slot),
                    )]);
                }
                if let Some(first) = self.slots_seen.get(slot) {
                    return Err(vec![ParseError::custom(
                        line.span(),
                        format!("Slot '{}' is already defined at {:?}", slot, first),
                    )]);
                }
                self.slots_seen.insert(slot.to_string(), line.span());
                let body = self.nodes(&line.children, false)?;
                Ok(Node::Slot {
                    name: slot.to_string(),
                    body,
                })
            }
            "if" => {
                let (expr, offset) = header_expression(line, "if")?;
                let condition = parse_expression(expr, offset)?;
                let body = self.nodes(&line.children, false)?;
                Ok(Node::If {
                    branches: vec![Branch { condition, body }],
                    otherwise: None,
                })
            }
            "for" => {
                let (header, offset) = header_expression(line, "for")?;
                let (var, iterable) = parse_for_header(header, offset)?;
                let body = self.nodes(&line.children, false)?;
                Ok(Node::For {
                    var,
                    iterable,
                    body,
                })
            }
            other => Err(vec![ParseError::custom(
                line.span(),
                format!("Unknown directive '#{}'", other),
            )]),
        }
    }

    /// Attach an `#elif`/`#else` line to the `#if` node right before it
    fn attach_branch(&mut self, line: &Line<'_>, name: &str, nodes: &mut [Node]) -> Result<()> {
        let Some(Node::If {
            branches,
            otherwise,
        }) = nodes.last_mut()
        else {
            return Err(vec![ParseError::custom(
                line.span(),
                format!("#{} without a preceding #if", name),
            )]);
        };
        if otherwise.is_some() {
            return Err(vec![ParseError::custom(
                line.span(),
                format!("#{} after #else", name),
            )]);
        }

        if name == "else" {
            let (rest, _) = header_expression(line, "else")?;
            if !rest.is_empty() {
                return Err(vec![ParseError::custom(
                    line.span(),
                    "#else does not take a condition",
                )]);
            }
            *otherwise = Some(self.nodes(&line.children, false)?);
        } else {
            let (expr, offset) = header_expression(line, "elif")?;
            let condition = parse_expression(expr, offset)?;
            let body = self.nodes(&line.children, false)?;
            branches.push(Branch { condition, body });
        }
        Ok(())
    }

    fn element(&mut self, line: &Line<'_>, rest: &str) -> Result<Node> {
        let start = line.offset + 1;
        let tag_len = rest
            .find(|c: char| !(c.is_alphanumeric() || c == '-' || c == '_' || c == ':'))
            .unwrap_or(rest.len());
        if tag_len == 0 {
            return Err(vec![ParseError::custom(
                line.span(),
                "Expected a tag name after '@'",
            )]);
        }
        let tag = rest[..tag_len].to_string();

        let mut attrs = Vec::new();
        let mut pos = tag_len;
        while rest[pos..].starts_with('.') {
            let (attr, consumed) = parse_attribute(&rest[pos + 1..], start + pos + 1)?;
            attrs.push(attr);
            pos += 1 + consumed;
        }

        let mut children = Vec::new();
        let tail = &rest[pos..];
        if let Some(inline) = tail.strip_prefix(' ') {
            let trimmed = inline.trim_start();
            if !trimmed.is_empty() {
                let offset = start + pos + 1 + (inline.len() - trimmed.len());
                children.push(Node::Text(interpolate(trimmed, offset)?));
            }
        } else if !tail.is_empty() {
            let at = start + pos;
            return Err(vec![ParseError::custom(
                at..at + tail.len(),
                format!("Unexpected '{}' after element", tail),
            )]);
        }

        children.extend(self.nodes(&line.children, false)?);
        if VOID_TAGS.contains(&tag.as_str())
            && children.iter().any(|c| !matches!(c, Node::SetAttr(_)))
        {
            return Err(vec![ParseError::custom(
                line.span(),
                format!("<{}> is a void element and cannot have content", tag),
            )]);
        }
        Ok(Node::Element {
            tag,
            attrs,
            children,
        })
    }
}

/// Parse `name(value)`; returns the attribute and the number of bytes consumed
fn parse_attribute(text: &str, offset: usize) -> Result<(Attribute, usize)> {
    let name_len = text
        .find(|c: char| !(c.is_alphanumeric() || c == '-' || c == '_' || c == ':'))
        .unwrap_or(text.len());
    if name_len == 0 {
        return Err(vec![ParseError::custom(
            offset..offset + 1,
            "Expected an attribute name",
        )]);
    }
    if !text[name_len..].starts_with('(') {
        let at = offset + name_len;
        return Err(vec![ParseError::custom(
            at..at + 1,
            "Expected '(' after attribute name",
        )]);
    }

    let value_start = name_len + 1;
    let value_len = closing_paren(&text[value_start..]).ok_or_else(|| {
        vec![ParseError::custom(
            offset..offset + text.len(),
            "Unclosed '(' in attribute",
        )]
    })?;
    let value = interpolate(
        &text[value_start..value_start + value_len],
        offset + value_start,
    )?;

    Ok((
        Attribute {
            name: text[..name_len].to_string(),
            value,
        },
        value_start + value_len + 1,
    ))
}

/// Position of the `)` closing an attribute value, skipping `{{ }}` regions
fn closing_paren(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = 0;
    while i < text.len() {
        let rest = &text[i..];
        if rest.starts_with("{{") {
            i += 2 + rest[2..].find("}}")? + 2;
            continue;
        }
        let c = rest.chars().next()?;
        match c {
            '(' => depth += 1,
            ')' if depth == 0 => return Some(i),
            ')' => depth -= 1,
            _ => {}
        }
        i += c.len_utf8();
    }
    None
}

/// Split text into literal pieces and `{{ expr }}` interpolations
fn interpolate(text: &str, offset: usize) -> Result<Vec<Piece>> {
    let mut pieces = Vec::new();
    let mut rest = text;
    let mut pos = offset;

    while let Some(open) = rest.find("{{") {
        if open > 0 {
            pieces.push(Piece::Literal(rest[..open].to_string()));
        }
        let inner_start = open + 2;
        let Some(close) = rest[inner_start..].find("}}") else {
            let at = pos + open;
            return Err(vec![ParseError::custom(at..at + 2, "Unclosed '{{'")]);
        };
        let inner = &rest[inner_start..inner_start + close];
        pieces.push(Piece::Expr(parse_expression(inner, pos + inner_start)?));

        let consumed = inner_start + close + 2;
        rest = &rest[consumed..];
        pos += consumed;
    }
    if !rest.is_empty() {
        pieces.push(Piece::Literal(rest.to_string()));
    }
    Ok(pieces)
}
