//! Tolerant HTML → well-formed XHTML.
//!
//! Descriptions come from a rich-text editor and from pasted web pages:
//! unclosed `<p>`, bare `<br>`, Word's `<o:p>` tags, attributes such as
//! `@click` and stray control characters all show up. The html5ever parser
//! behind kuchiki repairs the tree the way a browser would, and this module
//! writes that tree back out as namespace-correct XML so the document
//! backends (and usvg, for diagrams) can parse it strictly.

use kuchiki::traits::TendrilSink;
use kuchiki::{Attribute, ElementData, ExpandedName, NodeData, NodeRef};

const XHTML_NS: &str = "http://www.w3.org/1999/xhtml";
const SVG_NS: &str = "http://www.w3.org/2000/svg";
const XLINK_NS: &str = "http://www.w3.org/1999/xlink";
const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";
const XMLNS_NS: &str = "http://www.w3.org/2000/xmlns/";

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Parse `html` leniently and serialise the whole document as XHTML.
pub fn to_xhtml(html: &str) -> String {
    let document = kuchiki::parse_html().one(html);
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    write_node(&document, "", &mut out);
    out
}

/// Serialise one element and its subtree as a standalone XML fragment.
pub fn serialize_element(node: &NodeRef) -> String {
    let mut out = String::new();
    write_node(node, "", &mut out);
    out
}

fn write_node(node: &NodeRef, parent_ns: &str, out: &mut String) {
    match node.data() {
        NodeData::Element(el) => write_element(node, el, parent_ns, out),
        NodeData::Text(text) => escape_text(&text.borrow(), out),
        NodeData::Document(_) | NodeData::DocumentFragment => {
            for child in node.children() {
                write_node(&child, parent_ns, out);
            }
        }
        // Comments, doctypes and processing instructions are dropped.
        _ => {}
    }
}

fn write_element(node: &NodeRef, el: &ElementData, parent_ns: &str, out: &mut String) {
    let tag: &str = &el.name.local;
    let ns: &str = &el.name.ns;

    // Prefixed or malformed tag names cannot be declared; keep the content.
    if tag.contains(':') || !is_xml_name(tag) {
        for child in node.children() {
            write_node(&child, parent_ns, out);
        }
        return;
    }

    out.push('<');
    out.push_str(tag);

    let mut written: Vec<String> = Vec::new();
    if ns != parent_ns {
        push_attr(out, "xmlns", ns);
        if ns == SVG_NS {
            push_attr(out, "xmlns:xlink", XLINK_NS);
            written.push("xmlns:xlink".to_string());
        }
    }

    for (name, attr) in el.attributes.borrow().map.iter() {
        let Some(qualified) = attribute_name(name, attr) else {
            continue;
        };
        if written.contains(&qualified) {
            continue;
        }
        push_attr(out, &qualified, &attr.value);
        written.push(qualified);
    }

    let is_void = ns == XHTML_NS && VOID_ELEMENTS.contains(&tag);
    if is_void || (ns != XHTML_NS && node.first_child().is_none()) {
        out.push_str(" />");
        return;
    }

    out.push('>');
    for child in node.children() {
        write_node(&child, ns, out);
    }
    out.push_str("</");
    out.push_str(tag);
    out.push('>');
}

fn attribute_name(name: &ExpandedName, _attr: &Attribute) -> Option<String> {
    let local: &str = &name.local;
    let ns: &str = &name.ns;
    let qualified = match ns {
        "" if local.contains(':') || local == "xmlns" => return None,
        "" => local.to_string(),
        XLINK_NS => format!("xlink:{local}"),
        XML_NS => format!("xml:{local}"),
        XMLNS_NS if local == "xmlns" => return None,
        XMLNS_NS => format!("xmlns:{local}"),
        _ => return None,
    };
    is_xml_name(&qualified).then_some(qualified)
}

fn push_attr(out: &mut String, name: &str, value: &str) {
    out.push(' ');
    out.push_str(name);
    out.push_str("=\"");
    escape_attr(value, out);
    out.push('"');
}

pub(crate) fn is_xml_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
}

/// XML 1.0 forbids most C0 controls even when escaped.
fn is_xml_char(c: char) -> bool {
    matches!(c, '\u{9}' | '\u{A}' | '\u{D}') || (c >= '\u{20}' && c != '\u{FFFE}' && c != '\u{FFFF}')
}

pub(crate) fn escape_text(text: &str, out: &mut String) {
    for c in text.chars().filter(|c| is_xml_char(*c)) {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
}

pub(crate) fn escape_attr(value: &str, out: &mut String) {
    for c in value.chars().filter(|c| is_xml_char(*c)) {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\n' => out.push_str("&#10;"),
            _ => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parses(xml: &str) -> bool {
        roxmltree::Document::parse(xml).is_ok()
    }

    #[test]
    fn repairs_unclosed_markup() {
        let xhtml = to_xhtml("<p>one<br>two<img src=a.png><table><tr><td>1<td>2</table><p>three");
        assert!(parses(&xhtml), "not well-formed: {xhtml}");
        assert!(xhtml.contains("<br />"));
        assert!(xhtml.contains("<img src=\"a.png\" />"));
        assert!(xhtml.contains("<html xmlns=\"http://www.w3.org/1999/xhtml\">"));
    }

    #[test]
    fn drops_undeclared_prefixes_and_bad_attributes() {
        let xhtml = to_xhtml(r#"<p class="MsoNormal" o:spid="1" @click="x">Hi<o:p></o:p></p>"#);
        assert!(parses(&xhtml), "not well-formed: {xhtml}");
        assert!(xhtml.contains("class=\"MsoNormal\""));
        assert!(!xhtml.contains("o:spid"));
        assert!(!xhtml.contains("@click"));
        assert!(xhtml.contains(">Hi</p>"));
    }

    #[test]
    fn entities_and_controls_survive() {
        let xhtml = to_xhtml("<p>a &nbsp;&amp; b \u{1}c &lt;d&gt;</p>");
        assert!(parses(&xhtml), "not well-formed: {xhtml}");
        assert!(xhtml.contains("a \u{a0}&amp; b c &lt;d&gt;"));
    }

    #[test]
    fn inline_svg_gets_its_namespace() {
        let xhtml = to_xhtml(
            r##"<div><svg viewBox="0 0 4 4"><use xlink:href="#a"/><rect width="4" height="4"/></svg></div>"##,
        );
        assert!(parses(&xhtml), "not well-formed: {xhtml}");
        assert!(xhtml.contains("<svg xmlns=\"http://www.w3.org/2000/svg\""));
        assert!(xhtml.contains("viewBox=\"0 0 4 4\""));
        assert!(xhtml.contains("xlink:href=\"#a\""));
        assert!(xhtml.contains("<rect height=\"4\" width=\"4\" />") || xhtml.contains("<rect width=\"4\" height=\"4\" />"));
    }

    #[test]
    fn empty_input_is_still_a_document() {
        let xhtml = to_xhtml("");
        assert!(parses(&xhtml));
        assert!(xhtml.contains("<body></body>"));
    }
}
