//! HTML → PDF through an external renderer process.
//!
//! ## Why a process?
//!
//! Faithful HTML layout (CSS tables, web fonts, page breaking) needs a
//! browser engine. `wkhtmltopdf` is invoked as `<command> <args…> <in> <out>`;
//! the trait seam lets tests and embedders substitute another renderer.

use crate::config::ExportConfig;
use crate::error::ExportError;
use std::future::Future;
use std::path::Path;
use tracing::{debug, info, warn};

/// Turns an HTML file into a PDF file.
pub trait PdfRenderer: Send + Sync {
    fn render(
        &self,
        html_path: &Path,
        pdf_path: &Path,
    ) -> impl Future<Output = Result<(), ExportError>> + Send;
}

/// Runs a wkhtmltopdf-compatible command.
#[derive(Debug, Clone)]
pub struct WkHtmlToPdf {
    command: String,
    args: Vec<String>,
}

impl WkHtmlToPdf {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    pub fn from_config(config: &ExportConfig) -> Self {
        Self::new(config.pdf_command.clone(), config.pdf_args.clone())
    }

    fn failed(&self, detail: impl Into<String>) -> ExportError {
        ExportError::PdfRenderFailed {
            command: self.command.clone(),
            detail: detail.into(),
        }
    }
}

impl PdfRenderer for WkHtmlToPdf {
    async fn render(&self, html_path: &Path, pdf_path: &Path) -> Result<(), ExportError> {
        info!(
            "Rendering {} → {} with {}",
            html_path.display(),
            pdf_path.display(),
            self.command
        );
        let output = tokio::process::Command::new(&self.command)
            .args(&self.args)
            .arg(html_path)
            .arg(pdf_path)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| self.failed(format!("could not start: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stdout.trim().is_empty() {
            debug!("{} stdout: {}", self.command, stdout.trim());
        }
        if !output.status.success() {
            warn!("{} stderr: {}", self.command, stderr.trim());
            return Err(self.failed(format!("{}: {}", output.status, tail(&stderr))));
        }
        if !stderr.trim().is_empty() {
            // wkhtmltopdf reports progress on stderr.
            debug!("{} stderr: {}", self.command, stderr.trim());
        }

        match tokio::fs::metadata(pdf_path).await {
            Ok(meta) if meta.len() > 0 => Ok(()),
            Ok(_) => Err(self.failed("output file is empty")),
            Err(_) => Err(self.failed("no output file was produced")),
        }
    }
}

/// Last few lines of renderer output, for error messages.
fn tail(text: &str) -> String {
    let lines: Vec<&str> = text.trim().lines().collect();
    let start = lines.len().saturating_sub(5);
    lines[start..].join(" | ")
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell(script: &str) -> WkHtmlToPdf {
        // `sh -c script` binds the appended paths to $0 and $1.
        WkHtmlToPdf::new("sh", vec!["-c".into(), script.into()])
    }

    #[tokio::test]
    async fn successful_render() {
        let dir = tempfile::tempdir().unwrap();
        let html = dir.path().join("in.html");
        let pdf = dir.path().join("out.pdf");
        std::fs::write(&html, "<html/>").unwrap();
        shell("cp \"$0\" \"$1\"").render(&html, &pdf).await.unwrap();
        assert_eq!(std::fs::read(&pdf).unwrap(), b"<html/>");
    }

    #[tokio::test]
    async fn non_zero_exit_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let html = dir.path().join("in.html");
        std::fs::write(&html, "<html/>").unwrap();
        let err = shell("echo boom >&2; exit 3")
            .render(&html, &dir.path().join("out.pdf"))
            .await
            .unwrap_err();
        match err {
            ExportError::PdfRenderFailed { command, detail } => {
                assert_eq!(command, "sh");
                assert!(detail.contains("boom"), "{detail}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_output_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let html = dir.path().join("in.html");
        std::fs::write(&html, "<html/>").unwrap();
        let err = shell("true")
            .render(&html, &dir.path().join("out.pdf"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no output file"));
    }

    #[tokio::test]
    async fn missing_command_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = WkHtmlToPdf::new("/nonexistent/wkhtmltopdf", Vec::new())
            .render(&dir.path().join("a.html"), &dir.path().join("a.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::PdfRenderFailed { .. }));
    }
}
