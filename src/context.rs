//! Per-export state: working directory, HTTP client and running counters.
//!
//! Every export owns exactly one [`ExportContext`]. It is passed explicitly
//! to the resolver and normaliser instead of living in thread-local or
//! global state, so concurrent exports never share a scratch directory.
//!
//! The working directory is a [`TempDir`], removed when the context is
//! dropped on any exit path of an export.

use crate::config::ExportConfig;
use crate::error::{AssetError, ExportError};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, warn};

/// Exclusive resources and counters of one export.
pub struct ExportContext<'a> {
    pub(crate) config: &'a ExportConfig,
    pub(crate) client: reqwest::Client,
    work_dir: TempDir,
    pub(crate) images_embedded: usize,
    pub(crate) diagrams_embedded: usize,
    pub(crate) asset_errors: Vec<AssetError>,
}

impl<'a> ExportContext<'a> {
    /// Create the working directory and the HTTP client for one export.
    pub fn new(config: &'a ExportConfig) -> Result<Self, ExportError> {
        let parent = config
            .work_dir_parent
            .clone()
            .unwrap_or_else(std::env::temp_dir);

        let work_dir = tempfile::Builder::new()
            .prefix("docweave-")
            .tempdir_in(&parent)
            .map_err(|source| ExportError::WorkDir {
                path: parent.clone(),
                source,
            })?;
        debug!("Working directory: {}", work_dir.path().display());

        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs));
        if let Some(secs) = config.read_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder
            .build()
            .map_err(|e| ExportError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            config,
            client,
            work_dir,
            images_embedded: 0,
            diagrams_embedded: 0,
            asset_errors: Vec::new(),
        })
    }

    pub fn config(&self) -> &ExportConfig {
        self.config
    }

    pub fn work_dir(&self) -> &Path {
        self.work_dir.path()
    }

    /// Reserve a fresh, uniquely named file in the working directory.
    pub fn reserve_file(&self, prefix: &str, extension: &str) -> std::io::Result<PathBuf> {
        let suffix = format!(".{extension}");
        let file = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(&suffix)
            .tempfile_in(self.work_dir.path())?;
        // The directory owns cleanup; the file itself must outlive this call.
        file.into_temp_path().keep().map_err(|e| e.error)
    }

    /// Record a dropped inline image.
    pub(crate) fn record_asset_error(&mut self, error: AssetError) {
        warn!("{}", error);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_asset_error(error.url(), &error.to_string());
        }
        self.asset_errors.push(error);
    }

    /// Remove the working directory now, reporting failures.
    ///
    /// Dropping the context removes it as well, silently.
    pub fn close(self) {
        let path = self.work_dir.path().to_path_buf();
        if let Err(e) = self.work_dir.close() {
            warn!("Failed to remove working directory {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn working_directory_is_removed_on_drop() {
        let parent = tempfile::tempdir().unwrap();
        let config = ExportConfig::builder()
            .work_dir_parent(parent.path())
            .build()
            .unwrap();
        let path = {
            let ctx = ExportContext::new(&config).unwrap();
            let file = ctx.reserve_file("asset-", "png").unwrap();
            std::fs::write(&file, b"x").unwrap();
            assert!(file.starts_with(ctx.work_dir()));
            ctx.work_dir().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn reserved_files_are_unique() {
        let config = ExportConfig::default();
        let ctx = ExportContext::new(&config).unwrap();
        let a = ctx.reserve_file("asset-", "png").unwrap();
        let b = ctx.reserve_file("asset-", "png").unwrap();
        assert_ne!(a, b);
        assert!(a.exists() && b.exists());
        assert_eq!(a.extension().unwrap(), "png");
        let dir = ctx.work_dir().to_path_buf();
        ctx.close();
        assert!(!dir.exists());
    }

    #[test]
    fn missing_parent_is_reported() {
        let config = ExportConfig::builder()
            .work_dir_parent("/definitely/not/here/docweave")
            .build()
            .unwrap();
        assert!(matches!(
            ExportContext::new(&config),
            Err(ExportError::WorkDir { .. })
        ));
    }
}
