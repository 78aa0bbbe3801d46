//! Export entry points.
//!
//! ## Why one pass?
//!
//! The hierarchy is walked once, in reading order, and every node is fully
//! materialised (description images fetched, diagrams rasterised) and
//! appended before the next one starts. The document therefore never needs
//! re-ordering, and memory stays bounded by one node's assets plus the
//! document built so far.
//!
//! Fatal errors abort the export with nothing returned; dropped inline
//! images are reported in [`ExportOutput::asset_errors`].

use crate::config::{ExportConfig, ExportFormat};
use crate::context::ExportContext;
use crate::error::ExportError;
use crate::model::{FileExport, KnowledgeDoc, Node, NodeRecord};
use crate::output::{suggested_file_name, ExportOutput, ExportStats};
use crate::pipeline::compose::{DocumentBackend, DocumentBuilder};
use crate::pipeline::docx::DocxBackend;
use crate::pipeline::html::HtmlBackend;
use crate::pipeline::normalize::{self, ImageMode};
use crate::pipeline::pdf::{PdfRenderer, WkHtmlToPdf};
use crate::pipeline::tree::{Tree, Visit};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Export a file (mind-map) request.
///
/// # Returns
/// `Ok(ExportOutput)` on success, even if some inline images were dropped
/// (check `output.asset_errors`).
///
/// # Errors
/// Returns `Err(ExportError)` for fatal errors:
/// - no `"root"` node, or a cyclic parent chain
/// - a diagram field or diagram payload that cannot be decoded or fetched
/// - document composition or PDF rendering failure
pub async fn export(request: &FileExport, config: &ExportConfig) -> Result<ExportOutput, ExportError> {
    export_with_renderer(request, config, &WkHtmlToPdf::from_config(config)).await
}

/// [`export`] with an explicit PDF renderer.
pub async fn export_with_renderer<R: PdfRenderer>(
    request: &FileExport,
    config: &ExportConfig,
    renderer: &R,
) -> Result<ExportOutput, ExportError> {
    let start = Instant::now();
    let records = request.data.as_slice();
    info!(
        "Starting export: {} nodes → {}",
        records.len(),
        config.format.extension()
    );

    let mut ctx = ExportContext::new(config)?;
    let root_topic = request.root().map(|n| n.topic.as_str());
    let title = request
        .meta
        .name
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .or(root_topic)
        .unwrap_or_default()
        .to_string();

    let (bytes, stats) = match config.format {
        ExportFormat::Docx => {
            let backend = DocxBackend::new(config.max_image_width)
                .with_title(title)
                .with_creator(request.meta.author.clone());
            let (builder, stats) =
                compose_nodes(&mut ctx, records, DocumentBuilder::new(backend)).await?;
            (builder.finish()?, stats)
        }
        ExportFormat::Pdf => {
            let backend = HtmlBackend::new().with_title(title);
            let (builder, stats) =
                compose_nodes(&mut ctx, records, DocumentBuilder::new(backend)).await?;
            let html = builder.finish()?;
            (render_pdf(&ctx, &html, renderer).await?, stats)
        }
    };

    let file_stem = request.data.first().map(|n| n.topic.as_str());
    let file_name = suggested_file_name(file_stem, config.format);
    Ok(finish(ctx, bytes, stats, file_name, start))
}

/// Export a knowledge-base article.
///
/// Images are placed as `file://` references with a bounded size. A blank
/// body yields an empty document.
pub async fn export_knowledge(
    doc: &KnowledgeDoc,
    config: &ExportConfig,
) -> Result<ExportOutput, ExportError> {
    export_knowledge_with_renderer(doc, config, &WkHtmlToPdf::from_config(config)).await
}

/// [`export_knowledge`] with an explicit PDF renderer.
pub async fn export_knowledge_with_renderer<R: PdfRenderer>(
    doc: &KnowledgeDoc,
    config: &ExportConfig,
    renderer: &R,
) -> Result<ExportOutput, ExportError> {
    let start = Instant::now();
    let title = doc.title.as_deref().filter(|t| !t.trim().is_empty());
    info!("Starting knowledge export: {:?}", title.unwrap_or("<untitled>"));

    let mut ctx = ExportContext::new(config)?;
    let mut stats = ExportStats::default();

    let bytes = match config.format {
        ExportFormat::Docx => {
            let mut backend = DocxBackend::new(config.max_image_width);
            if let Some(t) = title {
                backend = backend.with_title(t);
            }
            let builder = compose_article(&mut ctx, doc, DocumentBuilder::new(backend)).await?;
            stats.sections = builder.sections();
            builder.finish()?
        }
        ExportFormat::Pdf => {
            let mut backend = HtmlBackend::new();
            if let Some(t) = title {
                backend = backend.with_title(t);
            }
            let builder = compose_article(&mut ctx, doc, DocumentBuilder::new(backend)).await?;
            stats.sections = builder.sections();
            let html = builder.finish()?;
            render_pdf(&ctx, &html, renderer).await?
        }
    };

    let file_name = suggested_file_name(title, config.format);
    Ok(finish(ctx, bytes, stats, file_name, start))
}

/// Render a standalone HTML document to PDF bytes.
pub async fn html_to_pdf(html: &str, config: &ExportConfig) -> Result<Vec<u8>, ExportError> {
    html_to_pdf_with_renderer(html, config, &WkHtmlToPdf::from_config(config)).await
}

/// [`html_to_pdf`] with an explicit PDF renderer.
pub async fn html_to_pdf_with_renderer<R: PdfRenderer>(
    html: &str,
    config: &ExportConfig,
    renderer: &R,
) -> Result<Vec<u8>, ExportError> {
    let ctx = ExportContext::new(config)?;
    let pdf = render_pdf(&ctx, html.as_bytes(), renderer).await?;
    ctx.close();
    Ok(pdf)
}

/// Export and write the document directly to a file.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn export_to_file(
    request: &FileExport,
    output_path: impl AsRef<Path>,
    config: &ExportConfig,
) -> Result<ExportStats, ExportError> {
    let output = export(request, config).await?;
    write_atomically(output_path.as_ref(), &output.bytes).await?;
    Ok(output.stats)
}

/// Synchronous wrapper around [`export`].
///
/// Creates a temporary tokio runtime internally.
pub fn export_sync(request: &FileExport, config: &ExportConfig) -> Result<ExportOutput, ExportError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ExportError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(export(request, config))
}

/// Write `bytes` to `path` via a sibling temp file and rename.
pub async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), ExportError> {
    let write_failed = |e: std::io::Error| ExportError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_failed)?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    tokio::fs::write(&tmp_path, bytes).await.map_err(write_failed)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_failed)
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Walk the hierarchy and append every reachable node in reading order.
///
/// Only reachable records are ingested, so a malformed field on an orphan
/// never fails the export.
async fn compose_nodes<B: DocumentBackend>(
    ctx: &mut ExportContext<'_>,
    records: &[NodeRecord],
    mut builder: DocumentBuilder<B>,
) -> Result<(DocumentBuilder<B>, ExportStats), ExportError> {
    let tree = Tree::build(records)?;
    let visits: Vec<Visit<NodeRecord>> = tree
        .walk(ctx.config.max_heading_level)
        .collect::<Result<_, _>>()?;
    let nodes: Vec<(Node, Option<u8>)> = visits
        .iter()
        .map(|v| Node::ingest(v.node).map(|node| (node, v.heading)))
        .collect::<Result<_, ExportError>>()?;

    let total = visits.len();
    let orphaned = tree.node_count().saturating_sub(total);
    if orphaned > 0 {
        warn!(
            "{} of {} nodes are not reachable from the root and were skipped",
            orphaned,
            tree.node_count()
        );
    }
    if let Some(ref cb) = ctx.config.progress_callback {
        cb.on_export_start(total);
    }

    for (i, (node, heading)) in nodes.iter().enumerate() {
        let index = i + 1;
        if let Some(ref cb) = ctx.config.progress_callback {
            cb.on_node_start(index, total, &node.topic);
        }
        debug!("Node {}/{} '{}' ({})", index, total, node.topic, node.id);

        if let Some(level) = *heading {
            builder = builder.append_heading(&node.topic, level)?;
        }

        if let Some(description) = node.non_blank_description() {
            let normalized =
                normalize::normalize_description(ctx, description, ImageMode::Plain).await;
            ctx.images_embedded += normalized.images_embedded;
            for e in normalized.asset_errors {
                ctx.record_asset_error(e);
            }
            builder = builder.append_fragment(&normalized.html, None)?;
        }

        if let Some((html, count)) = normalize::diagram_fragment(ctx, node).await? {
            ctx.diagrams_embedded += count;
            builder = builder.append_fragment(&html, None)?;
        }

        if let Some(ref cb) = ctx.config.progress_callback {
            cb.on_node_complete(index, total, &node.topic);
        }
    }

    let stats = ExportStats {
        total_nodes: tree.node_count(),
        exported_nodes: total,
        orphaned_nodes: orphaned,
        sections: builder.sections(),
        ..Default::default()
    };
    Ok((builder, stats))
}

async fn compose_article<B: DocumentBackend>(
    ctx: &mut ExportContext<'_>,
    doc: &KnowledgeDoc,
    builder: DocumentBuilder<B>,
) -> Result<DocumentBuilder<B>, ExportError> {
    let Some(html) = doc.content_html.as_deref().filter(|h| !h.trim().is_empty()) else {
        debug!("Article body is blank; exporting an empty document");
        return Ok(builder);
    };
    let normalized = normalize::normalize_description(ctx, html, ImageMode::Sized).await;
    ctx.images_embedded += normalized.images_embedded;
    for e in normalized.asset_errors {
        ctx.record_asset_error(e);
    }
    builder.append_fragment(&normalized.html, None)
}

/// Write `html` into the working directory and run the renderer on it.
async fn render_pdf<R: PdfRenderer>(
    ctx: &ExportContext<'_>,
    html: &[u8],
    renderer: &R,
) -> Result<Vec<u8>, ExportError> {
    let work_dir_error = |e: std::io::Error| ExportError::WorkDir {
        path: ctx.work_dir().to_path_buf(),
        source: e,
    };
    let html_path = ctx.reserve_file("page-", "html").map_err(work_dir_error)?;
    tokio::fs::write(&html_path, html).await.map_err(work_dir_error)?;
    let pdf_path = html_path.with_extension("pdf");

    renderer.render(&html_path, &pdf_path).await?;
    tokio::fs::read(&pdf_path).await.map_err(work_dir_error)
}

fn finish(
    mut ctx: ExportContext<'_>,
    bytes: Vec<u8>,
    mut stats: ExportStats,
    file_name: String,
    start: Instant,
) -> ExportOutput {
    stats.images_embedded = ctx.images_embedded;
    stats.images_failed = ctx.asset_errors.len();
    stats.diagrams_embedded = ctx.diagrams_embedded;
    stats.output_bytes = bytes.len();
    stats.total_duration_ms = start.elapsed().as_millis() as u64;

    info!(
        "Export complete: {} nodes, {} images ({} failed), {} diagrams, {} bytes, {}ms",
        stats.exported_nodes,
        stats.images_embedded,
        stats.images_failed,
        stats.diagrams_embedded,
        stats.output_bytes,
        stats.total_duration_ms
    );
    if let Some(ref cb) = ctx.config.progress_callback {
        cb.on_export_complete(stats.exported_nodes, bytes.len());
    }

    let format = ctx.config.format;
    let asset_errors = std::mem::take(&mut ctx.asset_errors);
    ctx.close();

    ExportOutput {
        bytes,
        format,
        file_name,
        stats,
        asset_errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn atomic_write_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("doc.docx");
        write_atomically(&path, b"first").await.unwrap();
        write_atomically(&path, b"second").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        assert!(!dir.path().join("out").join("doc.docx.tmp").exists());
    }

    #[tokio::test]
    async fn unwritable_target_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let err = write_atomically(&blocker.join("doc.pdf"), b"x")
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::OutputWriteFailed { .. }));
    }
}
