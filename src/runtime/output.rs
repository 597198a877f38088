//! Rendering context: the structured output a procedure produces
//!
//! Executing a procedure builds a [`RenderContext`]; turning it into text
//! is a separate step so the caller decides which buffer receives it.

use indexmap::IndexMap;

use crate::error::ExecError;
use crate::parser::block::VOID_TAGS;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Fragment {
    /// Text ready for output (interpolated values already escaped)
    Text(String),
    Element(Element),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Element {
    pub tag: String,
    pub attrs: IndexMap<String, String>,
    pub children: Vec<Fragment>,
}

impl Element {
    pub fn is_void(&self) -> bool {
        VOID_TAGS.contains(&self.tag.as_str())
    }
}

/// Output of one procedure execution
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderContext {
    fragments: Vec<Fragment>,
}

impl RenderContext {
    /// Write the rendered output into `out`
    pub fn render(&self, out: &mut String) {
        write_fragments(&self.fragments, out);
    }
}

fn write_fragments(fragments: &[Fragment], out: &mut String) {
    let mut previous_text = false;
    for fragment in fragments {
        match fragment {
            Fragment::Text(text) => {
                // Consecutive text lines keep their line break
                if previous_text {
                    out.push('\n');
                }
                out.push_str(text);
                previous_text = true;
            }
            Fragment::Element(element) => {
                write_element(element, out);
                previous_text = false;
            }
        }
    }
}

fn write_element(element: &Element, out: &mut String) {
    out.push('<');
    out.push_str(&element.tag);
    for (name, value) in &element.attrs {
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        // Interpolated parts are escaped already; literal text may still hold quotes
        out.push_str(&value.replace('"', "&quot;"));
        out.push('"');
    }
    out.push('>');
    if element.is_void() {
        return;
    }
    write_fragments(&element.children, out);
    out.push_str("</");
    out.push_str(&element.tag);
    out.push('>');
}

/// Escape text for use in HTML content and attribute values
pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Incrementally assembles a [`RenderContext`] while a procedure runs
#[derive(Debug, Default)]
pub(crate) struct OutputBuilder {
    root: Vec<Fragment>,
    open: Vec<Element>,
}

impl OutputBuilder {
    fn current(&mut self) -> &mut Vec<Fragment> {
        match self.open.last_mut() {
            Some(element) => &mut element.children,
            None => &mut self.root,
        }
    }

    pub fn push_text(&mut self, text: String) {
        self.current().push(Fragment::Text(text));
    }

    pub fn open(&mut self, tag: &str, attrs: IndexMap<String, String>) {
        self.open.push(Element {
            tag: tag.to_string(),
            attrs,
            children: Vec::new(),
        });
    }

    pub fn close(&mut self) {
        if let Some(element) = self.open.pop() {
            self.current().push(Fragment::Element(element));
        }
    }

    /// Set an attribute on the innermost open element.
    ///
    /// `class` values accumulate separated by spaces; other attributes are replaced.
    pub fn set_attr(&mut self, name: &str, value: String) -> Result<(), ExecError> {
        let Some(element) = self.open.last_mut() else {
            return Err(ExecError::AttributeOutsideElement {
                name: name.to_string(),
            });
        };
        match element.attrs.get_mut(name) {
            Some(existing) if name == "class" && !existing.is_empty() => {
                existing.push(' ');
                existing.push_str(&value);
            }
            _ => {
                element.attrs.insert(name.to_string(), value);
            }
        }
        Ok(())
    }

    pub fn finish(mut self) -> RenderContext {
        while !self.open.is_empty() {
            self.close();
        }
        RenderContext {
            fragments: self.root,
        }
    }
}
