//! Error types for the docweave library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ExportError`] — **Fatal**: the export cannot produce a faithful
//!   document (no root node, corrupt diagram, serializer failure). Returned
//!   as `Err(ExportError)` from the top-level `export*` functions and never
//!   accompanied by partial output.
//!
//! * [`AssetError`] — **Non-fatal**: one inline image inside a description
//!   could not be fetched. The reference is blanked, the export continues,
//!   and the error is stored in [`crate::output::ExportOutput::asset_errors`]
//!   so callers can report what went missing.
//!
//! Diagrams are primary content and always fail with [`ExportError`]; inline
//! images are best-effort and always fail with [`AssetError`].

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the docweave library.
#[derive(Debug, Error)]
pub enum ExportError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The node list has no node with id `"root"`.
    #[error("Document has no root node (expected a node with id \"root\")")]
    MissingRoot,

    /// A node was reached twice while walking the hierarchy.
    #[error("Cyclic hierarchy: node '{node_id}' is its own ancestor")]
    CyclicHierarchy { node_id: String },

    /// The request payload could not be deserialised.
    #[error("Invalid export request: {0}")]
    InvalidRequest(String),

    // ── Diagram errors ────────────────────────────────────────────────────
    /// A diagram field value is not a JSON list of diagram records.
    #[error("Diagram field '{field_id}' on node '{node_id}' is not a valid diagram list: {reason}")]
    DiagramDecode {
        node_id: String,
        field_id: String,
        reason: String,
    },

    /// The diagram payload carries no `base64,` section.
    #[error("Diagram payload from '{source_ref}' has no base64 section")]
    DiagramFormat { source_ref: String },

    /// Download, decoding or rasterisation of a diagram failed.
    #[error("Failed to resolve diagram '{source_ref}': {reason}")]
    DiagramResolution { source_ref: String, reason: String },

    // ── Output errors ─────────────────────────────────────────────────────
    /// Injecting, flattening or saving document content failed.
    #[error("Document composition failed: {0}")]
    Composition(String),

    /// The external HTML→PDF renderer failed or produced no file.
    #[error("PDF rendering with '{command}' failed: {detail}")]
    PdfRenderFailed { command: String, detail: String },

    /// Could not create the per-export working directory.
    #[error("Failed to create working directory under '{path}': {source}")]
    WorkDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not create or write the output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExportError {
    pub(crate) fn diagram(source_ref: &str, reason: impl ToString) -> Self {
        ExportError::DiagramResolution {
            source_ref: truncate_ref(source_ref),
            reason: reason.to_string(),
        }
    }
}

/// A non-fatal error for a single inline image.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum AssetError {
    /// The request failed (unreachable host, bad URL, HTTP error status).
    #[error("Image '{url}': download failed: {reason}")]
    FetchFailed { url: String, reason: String },

    /// Connecting or reading exceeded the configured timeout.
    #[error("Image '{url}': timed out after {secs}s")]
    Timeout { url: String, secs: u64 },

    /// The response body is not an image.
    #[error("Image '{url}': response is not an image ({content_type})")]
    NotAnImage { url: String, content_type: String },

    /// The bytes could not be persisted in the working directory.
    #[error("Image '{url}': could not be stored: {reason}")]
    WriteFailed { url: String, reason: String },
}

impl AssetError {
    /// The URL of the image that failed.
    pub fn url(&self) -> &str {
        match self {
            AssetError::FetchFailed { url, .. }
            | AssetError::Timeout { url, .. }
            | AssetError::NotAnImage { url, .. }
            | AssetError::WriteFailed { url, .. } => url,
        }
    }
}

/// Diagram data may be a multi-megabyte data URI; keep error messages readable.
pub(crate) fn truncate_ref(source_ref: &str) -> String {
    const MAX: usize = 96;
    if source_ref.len() <= MAX {
        return source_ref.to_string();
    }
    let mut end = MAX;
    while !source_ref.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\u{2026}", &source_ref[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_root_display() {
        let msg = ExportError::MissingRoot.to_string();
        assert!(msg.contains("root"), "got: {msg}");
    }

    #[test]
    fn cyclic_hierarchy_names_node() {
        let e = ExportError::CyclicHierarchy {
            node_id: "n-7".into(),
        };
        assert!(e.to_string().contains("n-7"));
    }

    #[test]
    fn diagram_decode_display() {
        let e = ExportError::DiagramDecode {
            node_id: "a".into(),
            field_id: "f1".into(),
            reason: "expected value".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("f1"));
        assert!(msg.contains("'a'"));
    }

    #[test]
    fn long_diagram_refs_are_truncated() {
        let data = format!("data:image/png;base64,{}", "A".repeat(10_000));
        let e = ExportError::diagram(&data, "boom");
        assert!(e.to_string().len() < 300);
        assert!(e.to_string().contains('\u{2026}'));
    }

    #[test]
    fn asset_error_exposes_url() {
        let e = AssetError::Timeout {
            url: "http://example.com/a.png".into(),
            secs: 5,
        };
        assert_eq!(e.url(), "http://example.com/a.png");
        assert!(e.to_string().contains("5s"));
    }
}
