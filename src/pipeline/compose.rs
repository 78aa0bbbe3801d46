//! Incremental document composition.
//!
//! [`DocumentBuilder`] owns one output document and appends to it in reading
//! order. Each call consumes the builder and returns it, so a composition
//! step that fails leaves nothing half-appended for a caller to save.
//!
//! The output format is a [`DocumentBackend`]: a DOCX package
//! ([`crate::pipeline::docx::DocxBackend`]) or a standalone HTML page that is
//! later handed to the PDF renderer ([`crate::pipeline::html::HtmlBackend`]).

use crate::config::MAX_HEADING_LEVEL;
use crate::error::ExportError;
use crate::pipeline::xhtml::to_xhtml;
use tracing::trace;

/// Primitive operations of an output document.
pub trait DocumentBackend {
    /// Append a heading paragraph at `level` (1–9).
    fn push_heading(&mut self, level: u8, text: &str) -> Result<(), ExportError>;

    /// Queue one well-formed XHTML document for insertion.
    fn inject_chunk(&mut self, xhtml: String) -> Result<(), ExportError>;

    /// Convert queued chunks into native content, in queue order.
    fn flatten(&mut self) -> Result<(), ExportError>;

    /// Serialise the finished document.
    fn save(self) -> Result<Vec<u8>, ExportError>;
}

/// Appends fragments and headings to a document in order.
#[derive(Debug)]
pub struct DocumentBuilder<B: DocumentBackend> {
    backend: B,
    sections: usize,
}

impl<B: DocumentBackend> DocumentBuilder<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            sections: 0,
        }
    }

    /// Append an HTML fragment, optionally preceded by a heading.
    ///
    /// The fragment is repaired into XHTML, injected and flattened before
    /// this returns, so content always lands after everything appended
    /// earlier.
    pub fn append_fragment(
        mut self,
        html: &str,
        heading: Option<(&str, u8)>,
    ) -> Result<Self, ExportError> {
        if let Some((text, level)) = heading {
            self = self.append_heading(text, level)?;
        }
        let xhtml = to_xhtml(html);
        trace!("Injecting {} bytes of XHTML", xhtml.len());
        self.backend.inject_chunk(xhtml)?;
        self.backend.flatten()?;
        self.sections += 1;
        Ok(self)
    }

    /// Append a heading paragraph. The level is clamped to 1–9.
    pub fn append_heading(mut self, text: &str, level: u8) -> Result<Self, ExportError> {
        let level = level.clamp(1, MAX_HEADING_LEVEL);
        self.backend.push_heading(level, text)?;
        Ok(self)
    }

    /// Fragments appended so far.
    pub fn sections(&self) -> usize {
        self.sections
    }

    /// Flatten anything still queued and serialise the document.
    pub fn finish(mut self) -> Result<Vec<u8>, ExportError> {
        self.backend.flatten()?;
        self.backend.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records calls so ordering can be asserted.
    #[derive(Debug, Default)]
    struct Recorder {
        log: Vec<String>,
        pending: Vec<String>,
    }

    impl DocumentBackend for Recorder {
        fn push_heading(&mut self, level: u8, text: &str) -> Result<(), ExportError> {
            self.log.push(format!("h{level}:{text}"));
            Ok(())
        }

        fn inject_chunk(&mut self, xhtml: String) -> Result<(), ExportError> {
            if xhtml.contains("FAIL") {
                return Err(ExportError::Composition("rejected".into()));
            }
            self.pending.push(xhtml);
            Ok(())
        }

        fn flatten(&mut self) -> Result<(), ExportError> {
            for chunk in self.pending.drain(..) {
                let doc = roxmltree::Document::parse(&chunk)
                    .map_err(|e| ExportError::Composition(e.to_string()))?;
                let text: String = doc
                    .descendants()
                    .filter(|n| n.is_text())
                    .filter_map(|n| n.text())
                    .collect();
                self.log.push(format!("body:{text}"));
            }
            Ok(())
        }

        fn save(self) -> Result<Vec<u8>, ExportError> {
            Ok(self.log.join("\n").into_bytes())
        }
    }

    #[test]
    fn fragments_land_in_call_order() {
        let out = DocumentBuilder::new(Recorder::default())
            .append_heading("One", 1)
            .unwrap()
            .append_fragment("<p>first", None)
            .unwrap()
            .append_fragment("<p>second</p>", Some(("Two", 2)))
            .unwrap()
            .finish()
            .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "h1:One\nbody:first\nh2:Two\nbody:second"
        );
    }

    #[test]
    fn heading_levels_are_clamped() {
        let out = DocumentBuilder::new(Recorder::default())
            .append_heading("deep", 42)
            .unwrap()
            .append_heading("zero", 0)
            .unwrap()
            .finish()
            .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "h9:deep\nh1:zero");
    }

    #[test]
    fn backend_errors_propagate() {
        let err = DocumentBuilder::new(Recorder::default())
            .append_fragment("<p>FAIL</p>", None)
            .unwrap_err();
        assert!(matches!(err, ExportError::Composition(_)));
    }

    #[test]
    fn sections_are_counted() {
        let b = DocumentBuilder::new(Recorder::default())
            .append_fragment("<p>a</p>", None)
            .unwrap()
            .append_fragment("", None)
            .unwrap();
        assert_eq!(b.sections(), 2);
    }
}
