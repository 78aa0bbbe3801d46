//! Export results and statistics.

use crate::config::ExportFormat;
use crate::error::AssetError;
use serde::{Deserialize, Serialize};

/// Name used when a request carries no usable title.
pub const FALLBACK_FILE_STEM: &str = "export";

/// Result of a successful export.
#[derive(Debug, Clone)]
pub struct ExportOutput {
    /// The finished document.
    pub bytes: Vec<u8>,
    pub format: ExportFormat,
    /// Suggested download name, extension included.
    pub file_name: String,
    pub stats: ExportStats,
    /// Inline images that were dropped, in document order.
    pub asset_errors: Vec<AssetError>,
}

impl ExportOutput {
    /// `Content-Disposition` header value for [`Self::file_name`].
    pub fn content_disposition(&self) -> String {
        content_disposition(&self.file_name)
    }

    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }
}

/// Counters collected during one export.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportStats {
    /// Nodes in the request.
    pub total_nodes: usize,
    /// Nodes reached from the root and written.
    pub exported_nodes: usize,
    /// Nodes whose parent chain never reaches the root.
    pub orphaned_nodes: usize,
    /// Fragments appended to the document.
    pub sections: usize,
    pub images_embedded: usize,
    pub images_failed: usize,
    pub diagrams_embedded: usize,
    /// Size of the finished document.
    pub output_bytes: usize,
    pub total_duration_ms: u64,
}

/// `<stem>.<ext>` with characters that are unsafe in file names replaced.
pub fn suggested_file_name(stem: Option<&str>, format: ExportFormat) -> String {
    let cleaned: String = stem
        .unwrap_or_default()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_matches('.');
    let stem = if cleaned.is_empty() {
        FALLBACK_FILE_STEM
    } else {
        cleaned
    };
    format!("{}.{}", stem, format.extension())
}

/// `attachment` disposition with an RFC 5987 UTF-8 file name.
pub fn content_disposition(file_name: &str) -> String {
    format!("attachment;filename*=utf-8''{}", percent_encode(file_name))
}

/// Percent-encode everything outside RFC 5987 `attr-char`.
fn percent_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for b in value.bytes() {
        let unreserved = b.is_ascii_alphanumeric()
            || matches!(
                b,
                b'!' | b'#' | b'$' | b'&' | b'+' | b'-' | b'.' | b'^' | b'_' | b'`' | b'|' | b'~'
            );
        if unreserved {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names() {
        assert_eq!(
            suggested_file_name(Some("Q3 plan"), ExportFormat::Docx),
            "Q3 plan.docx"
        );
        assert_eq!(
            suggested_file_name(Some("a/b:c"), ExportFormat::Pdf),
            "a_b_c.pdf"
        );
        assert_eq!(suggested_file_name(Some("  "), ExportFormat::Docx), "export.docx");
        assert_eq!(suggested_file_name(None, ExportFormat::Docx), "export.docx");
        assert_eq!(suggested_file_name(Some(".."), ExportFormat::Docx), "export.docx");
    }

    #[test]
    fn disposition_is_percent_encoded() {
        assert_eq!(
            content_disposition("需求 v1.docx"),
            "attachment;filename*=utf-8''%E9%9C%80%E6%B1%82%20v1.docx"
        );
    }

    #[test]
    fn stats_serialise() {
        let stats = ExportStats {
            total_nodes: 3,
            exported_nodes: 2,
            orphaned_nodes: 1,
            ..Default::default()
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["orphaned_nodes"], 1);
    }
}
