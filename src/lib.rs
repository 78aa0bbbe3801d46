//! # docweave
//!
//! Export hierarchical topic trees (mind maps) and knowledge articles to
//! DOCX or PDF.
//!
//! ## Why this crate?
//!
//! Topic trees are stored as a flat list of records that point at their
//! parents, with rich-text descriptions full of remote images and attached
//! architecture diagrams (SVG, PNG or draw.io exports). Turning that into a
//! readable document means rebuilding the hierarchy, mapping depth to
//! heading levels, repairing sloppy HTML, pulling every image onto local
//! disk and rasterising the diagrams before a document engine ever sees
//! them. This crate does all of that in one ordered pass.
//!
//! ## Pipeline Overview
//!
//! ```text
//! FileExport (flat node list)
//!  │
//!  ├─ 1. Tree       group by parent, find "root", reject cycles
//!  ├─ 2. Walk       pre-order DFS, depth → heading level (root has none)
//!  ├─ 3. Normalize  repair HTML, style tables, localise <img> sources
//!  ├─ 4. Diagrams   decode base64 payloads, SVG → PNG via resvg
//!  ├─ 5. Compose    heading + fragments appended in reading order
//!  └─ 6. Output     DOCX package, or XHTML page → external PDF renderer
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docweave::{export, ExportConfig, ExportFormat, FileExport};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let request = FileExport::from_json(&std::fs::read_to_string("map.json")?)?;
//!     let config = ExportConfig::builder().format(ExportFormat::Docx).build()?;
//!     let output = export(&request, &config).await?;
//!     std::fs::write(&output.file_name, &output.bytes)?;
//!     eprintln!(
//!         "{} nodes, {} images ({} dropped)",
//!         output.stats.exported_nodes,
//!         output.stats.images_embedded,
//!         output.asset_errors.len()
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docweave` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! docweave = { version = "0.3", default-features = false }
//! ```
//!
//! ## PDF output
//!
//! PDF exports are composed as a single XHTML page and handed to a
//! `wkhtmltopdf`-compatible executable (see [`ExportConfig::pdf_command`]).
//! Embedders can supply their own [`PdfRenderer`] through the
//! `*_with_renderer` entry points.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod context;
pub mod error;
pub mod export;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod progress;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExportConfig, ExportConfigBuilder, ExportFormat};
pub use error::{AssetError, ExportError};
pub use export::{
    export, export_knowledge, export_knowledge_with_renderer, export_sync, export_to_file,
    export_with_renderer, html_to_pdf, html_to_pdf_with_renderer, write_atomically,
};
pub use model::{FileExport, KnowledgeDoc, Meta, Node, NodeRecord};
pub use output::{ExportOutput, ExportStats};
pub use pipeline::pdf::{PdfRenderer, WkHtmlToPdf};
pub use progress::{ExportProgressCallback, NoopProgressCallback, ProgressCallback};
