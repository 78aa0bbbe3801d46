//! Standalone XHTML page backend, the intermediate form of PDF exports.
//!
//! Injected chunks are already well-formed XHTML documents; flattening copies
//! the source text of their `<body>` children verbatim into one page.

use crate::error::ExportError;
use crate::pipeline::compose::DocumentBackend;
use crate::pipeline::xhtml::escape_text;

const PAGE_STYLE: &str = "body{font-family:sans-serif;font-size:11pt;line-height:1.4}\
img{max-width:100%}table{border-collapse:collapse}td,th{padding:2px 4px}";

/// Collects headings and fragments into a single XHTML page.
#[derive(Debug, Default)]
pub struct HtmlBackend {
    title: Option<String>,
    body: String,
    pending: Vec<String>,
}

impl HtmlBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

impl DocumentBackend for HtmlBackend {
    fn push_heading(&mut self, level: u8, text: &str) -> Result<(), ExportError> {
        self.flatten()?;
        // HTML stops at h6; deeper levels share it.
        let tag = format!("h{}", level.clamp(1, 6));
        self.body.push('<');
        self.body.push_str(&tag);
        self.body.push_str(&format!(" class=\"level-{level}\">"));
        escape_text(text.trim(), &mut self.body);
        self.body.push_str("</");
        self.body.push_str(&tag);
        self.body.push('>');
        Ok(())
    }

    fn inject_chunk(&mut self, xhtml: String) -> Result<(), ExportError> {
        self.pending.push(xhtml);
        Ok(())
    }

    fn flatten(&mut self) -> Result<(), ExportError> {
        for chunk in std::mem::take(&mut self.pending) {
            let doc = roxmltree::Document::parse(&chunk).map_err(|e| {
                ExportError::Composition(format!("injected chunk is not well-formed: {e}"))
            })?;
            let Some(body) = doc
                .descendants()
                .find(|n| n.is_element() && n.tag_name().name() == "body")
            else {
                continue;
            };
            if let (Some(first), Some(last)) = (body.first_child(), body.last_child()) {
                self.body
                    .push_str(&chunk[first.range().start..last.range().end]);
            }
        }
        Ok(())
    }

    fn save(mut self) -> Result<Vec<u8>, ExportError> {
        self.flatten()?;
        let mut page = String::from(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<!DOCTYPE html>\n\
             <html xmlns=\"http://www.w3.org/1999/xhtml\"><head><meta charset=\"UTF-8\" />",
        );
        if let Some(title) = &self.title {
            page.push_str("<title>");
            escape_text(title, &mut page);
            page.push_str("</title>");
        }
        page.push_str("<style>");
        page.push_str(PAGE_STYLE);
        page.push_str("</style></head><body>");
        page.push_str(&self.body);
        page.push_str("</body></html>");
        Ok(page.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::compose::DocumentBuilder;

    #[test]
    fn page_is_well_formed_and_ordered() {
        let bytes = DocumentBuilder::new(HtmlBackend::new().with_title("T & C"))
            .append_heading("First", 1)
            .unwrap()
            .append_fragment("<p>one<br>two", None)
            .unwrap()
            .append_heading("Deep", 8)
            .unwrap()
            .append_fragment("<table><tr><td>x</table>", None)
            .unwrap()
            .finish()
            .unwrap();
        let page = String::from_utf8(bytes).unwrap();
        let opt = roxmltree::ParsingOptions {
            allow_dtd: true,
            ..Default::default()
        };
        roxmltree::Document::parse_with_options(&page, opt).expect("well-formed page");
        assert!(page.contains("<title>T &amp; C</title>"));
        let first = page.find("<h1 class=\"level-1\">First</h1>").unwrap();
        let one = page.find("<p>one<br />two</p>").unwrap();
        let deep = page.find("<h6 class=\"level-8\">Deep</h6>").unwrap();
        let table = page.find("<table>").unwrap();
        assert!(first < one && one < deep && deep < table);
    }

    #[test]
    fn empty_page() {
        let bytes = DocumentBuilder::new(HtmlBackend::new()).finish().unwrap();
        let page = String::from_utf8(bytes).unwrap();
        assert!(page.ends_with("<body></body></html>"));
    }
}
