//! Configuration types for document export.
//!
//! All export behaviour is controlled through [`ExportConfig`], built via its
//! [`ExportConfigBuilder`]. Defaults reproduce the behaviour of the export
//! service this crate replaces: a 5-second connect timeout, no read timeout,
//! nine heading levels and a 540-unit image width cap.

use crate::error::ExportError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Widest image (in CSS pixels / points) placed into the output document.
pub const DEFAULT_MAX_IMAGE_WIDTH: f32 = 540.0;

/// Deepest heading style the output document defines.
pub const MAX_HEADING_LEVEL: u8 = 9;

/// Configuration for one export.
///
/// # Example
/// ```rust
/// use docweave::{ExportConfig, ExportFormat};
///
/// let config = ExportConfig::builder()
///     .format(ExportFormat::Docx)
///     .connect_timeout_secs(5)
///     .concurrency(8)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExportConfig {
    /// Output format. Default: [`ExportFormat::Docx`].
    pub format: ExportFormat,

    /// TCP connect timeout for every asset request in seconds. Default: 5.
    pub connect_timeout_secs: u64,

    /// Overall per-request timeout in seconds. Default: None (unbounded).
    ///
    /// Without it a single slow origin can stall the whole export; set it
    /// when exports run behind a request deadline.
    pub read_timeout_secs: Option<u64>,

    /// Concurrent inline-image downloads within one description. Default: 4.
    ///
    /// Results are always re-joined in document order, so this never changes
    /// the output, only the wall-clock time.
    pub concurrency: usize,

    /// Deepest heading level emitted. Range: 1–9. Default: 9.
    pub max_heading_level: u8,

    /// Width cap applied to images by the size helper. Default: 540.
    pub max_image_width: f32,

    /// Executable used to turn HTML into PDF. Default: `wkhtmltopdf`.
    pub pdf_command: String,

    /// Arguments placed before the input/output paths. Default:
    /// `--enable-local-file-access` so resolved assets can be read.
    pub pdf_args: Vec<String>,

    /// Directory under which per-export working directories are created.
    /// Default: None (system temp directory).
    pub work_dir_parent: Option<PathBuf>,

    /// Receives per-node events. Default: None.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            format: ExportFormat::default(),
            connect_timeout_secs: 5,
            read_timeout_secs: None,
            concurrency: 4,
            max_heading_level: MAX_HEADING_LEVEL,
            max_image_width: DEFAULT_MAX_IMAGE_WIDTH,
            pdf_command: "wkhtmltopdf".to_string(),
            pdf_args: vec!["--enable-local-file-access".to_string()],
            work_dir_parent: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportConfig")
            .field("format", &self.format)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("read_timeout_secs", &self.read_timeout_secs)
            .field("concurrency", &self.concurrency)
            .field("max_heading_level", &self.max_heading_level)
            .field("max_image_width", &self.max_image_width)
            .field("pdf_command", &self.pdf_command)
            .field("pdf_args", &self.pdf_args)
            .field("work_dir_parent", &self.work_dir_parent)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ExportProgressCallback>"),
            )
            .finish()
    }
}

impl ExportConfig {
    /// Create a new builder for `ExportConfig`.
    pub fn builder() -> ExportConfigBuilder {
        ExportConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExportConfig`].
#[derive(Debug)]
pub struct ExportConfigBuilder {
    config: ExportConfig,
}

impl ExportConfigBuilder {
    pub fn format(mut self, format: ExportFormat) -> Self {
        self.config.format = format;
        self
    }

    pub fn connect_timeout_secs(mut self, secs: u64) -> Self {
        self.config.connect_timeout_secs = secs;
        self
    }

    pub fn read_timeout_secs(mut self, secs: u64) -> Self {
        self.config.read_timeout_secs = Some(secs);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn max_heading_level(mut self, level: u8) -> Self {
        self.config.max_heading_level = level;
        self
    }

    pub fn max_image_width(mut self, width: f32) -> Self {
        self.config.max_image_width = width;
        self
    }

    pub fn pdf_command(mut self, command: impl Into<String>) -> Self {
        self.config.pdf_command = command.into();
        self
    }

    pub fn pdf_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.pdf_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn work_dir_parent(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.work_dir_parent = Some(dir.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExportConfig, ExportError> {
        let c = &self.config;
        if c.connect_timeout_secs == 0 {
            return Err(ExportError::InvalidConfig(
                "Connect timeout must be ≥ 1 second".into(),
            ));
        }
        if c.read_timeout_secs == Some(0) {
            return Err(ExportError::InvalidConfig(
                "Read timeout must be ≥ 1 second when set".into(),
            ));
        }
        if c.max_heading_level == 0 || c.max_heading_level > MAX_HEADING_LEVEL {
            return Err(ExportError::InvalidConfig(format!(
                "Max heading level must be 1–{}, got {}",
                MAX_HEADING_LEVEL, c.max_heading_level
            )));
        }
        if !(c.max_image_width.is_finite() && c.max_image_width > 0.0) {
            return Err(ExportError::InvalidConfig(format!(
                "Max image width must be positive, got {}",
                c.max_image_width
            )));
        }
        if c.format == ExportFormat::Pdf && c.pdf_command.trim().is_empty() {
            return Err(ExportError::InvalidConfig(
                "PDF export needs a renderer command".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Output format of an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// WordprocessingML package. (default)
    #[default]
    Docx,
    /// Composed HTML handed to the external PDF renderer.
    Pdf,
}

impl ExportFormat {
    /// File extension without the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Docx => "docx",
            ExportFormat::Pdf => "pdf",
        }
    }

    /// MIME type of the produced bytes.
    pub fn mime_type(self) -> &'static str {
        match self {
            ExportFormat::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            ExportFormat::Pdf => "application/pdf",
        }
    }

    /// Interpret the free-form `format` field of a request payload.
    pub fn from_request(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "docx" | "word" | "doc" => Some(ExportFormat::Docx),
            "pdf" => Some(ExportFormat::Pdf),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_legacy_service() {
        let c = ExportConfig::default();
        assert_eq!(c.connect_timeout_secs, 5);
        assert_eq!(c.read_timeout_secs, None);
        assert_eq!(c.max_heading_level, 9);
        assert_eq!(c.max_image_width, 540.0);
        assert_eq!(c.format, ExportFormat::Docx);
    }

    #[test]
    fn builder_rejects_zero_timeout() {
        let err = ExportConfig::builder()
            .connect_timeout_secs(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, ExportError::InvalidConfig(_)));
    }

    #[test]
    fn builder_rejects_out_of_range_heading() {
        assert!(ExportConfig::builder().max_heading_level(10).build().is_err());
        assert!(ExportConfig::builder().max_heading_level(0).build().is_err());
        assert!(ExportConfig::builder().max_heading_level(6).build().is_ok());
    }

    #[test]
    fn concurrency_is_at_least_one() {
        let c = ExportConfig::builder().concurrency(0).build().unwrap();
        assert_eq!(c.concurrency, 1);
    }

    #[test]
    fn format_from_request() {
        assert_eq!(ExportFormat::from_request("WORD"), Some(ExportFormat::Docx));
        assert_eq!(ExportFormat::from_request(" pdf "), Some(ExportFormat::Pdf));
        assert_eq!(ExportFormat::from_request("odt"), None);
        assert_eq!(ExportFormat::Pdf.extension(), "pdf");
    }

    #[test]
    fn debug_hides_callback() {
        let c = ExportConfig::builder()
            .progress_callback(std::sync::Arc::new(crate::progress::NoopProgressCallback))
            .build()
            .unwrap();
        let dbg = format!("{c:?}");
        assert!(dbg.contains("<dyn ExportProgressCallback>"));
    }
}
