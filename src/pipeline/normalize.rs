//! Rich-text descriptions and diagram lists → self-contained HTML fragments.
//!
//! ## Why three phases?
//!
//! kuchiki's DOM is reference-counted and not `Send`. Holding it across the
//! image downloads would make every export future `!Send`, which rules out
//! `tokio::spawn` and most web frameworks. The description is therefore
//! parsed twice: once to fix tables and collect image sources, then the
//! downloads run with no DOM alive, then a second parse rewrites the sources.
//! Both parses see the same markup, so images are matched up by position.

use crate::context::ExportContext;
use crate::error::{AssetError, ExportError};
use crate::model::Node;
use crate::pipeline::assets::{self, LocalAsset};
use crate::pipeline::xhtml::escape_attr;
use futures::stream::{self, StreamExt, TryStreamExt};
use kuchiki::traits::TendrilSink;
use kuchiki::NodeRef;
use tracing::debug;

/// Wrapper every fragment is placed in before composition.
pub const HTML_TEMPLATE: &str =
    "<!DOCTYPE html><html><head><meta charset=\"UTF-8\" /></head><body>{body}</body></html>";

/// How inline image references are rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageMode {
    /// Absolute path; the `style` and `width` attributes are dropped.
    Plain,
    /// `file://` URL plus a bounded `width`/`height` pair.
    Sized,
}

/// A normalised fragment plus what happened to its images.
#[derive(Debug, Default)]
pub struct Normalized {
    pub html: String,
    pub images_embedded: usize,
    pub asset_errors: Vec<AssetError>,
}

/// Wrap body markup in [`HTML_TEMPLATE`].
pub fn wrap_document(body: &str) -> String {
    HTML_TEMPLATE.replace("{body}", body)
}

// ── Descriptions ─────────────────────────────────────────────────────────

/// Normalise one description.
///
/// Tables get a visible border, 60 % width and fixed layout; `<colgroup>`
/// elements are removed. Every `<img>` is fetched into the working directory
/// and pointed at the local copy. Failed images get an empty `src`.
pub async fn normalize_description(
    ctx: &ExportContext<'_>,
    html: &str,
    mode: ImageMode,
) -> Normalized {
    let (body, sources) = prepare_description(html);
    if sources.is_empty() {
        return Normalized {
            html: wrap_document(&body),
            ..Default::default()
        };
    }
    debug!("Fetching {} inline images", sources.len());

    let results: Vec<Result<LocalAsset, AssetError>> = stream::iter(sources.iter())
        .map(|src| async move {
            match mode {
                ImageMode::Plain => assets::fetch_image(ctx, src).await,
                ImageMode::Sized => assets::fetch_sized_image(ctx, src).await,
            }
        })
        .buffered(ctx.config.concurrency)
        .collect()
        .await;

    let mut out = Normalized::default();
    let mut rewrites = Vec::with_capacity(results.len());
    for result in results {
        match result {
            Ok(asset) => {
                out.images_embedded += 1;
                rewrites.push(Some(asset));
            }
            Err(e) => {
                out.asset_errors.push(e);
                rewrites.push(None);
            }
        }
    }
    out.html = wrap_document(&rewrite_images(&body, &rewrites, mode));
    out
}

/// Fix table attributes and collect image sources in document order.
fn prepare_description(html: &str) -> (String, Vec<String>) {
    let document = kuchiki::parse_html().one(html);

    if let Ok(tables) = document.select("table") {
        for table in tables {
            {
                let mut attrs = table.attributes.borrow_mut();
                attrs.insert("border", "1".to_string());
                attrs.insert("cellspacing", "0".to_string());
                attrs.insert("width", "60%".to_string());
                attrs.insert("style", "table-layout:fixed;".to_string());
            }
            let colgroups: Vec<NodeRef> = table
                .as_node()
                .descendants()
                .filter(|n| n.as_element().is_some_and(|e| &*e.name.local == "colgroup"))
                .collect();
            for colgroup in colgroups {
                colgroup.detach();
            }
        }
    }

    let sources = images(&document)
        .iter()
        .enumerate()
        .map(|(i, img)| {
            if let Some(el) = img.as_element() {
                el.attributes
                    .borrow_mut()
                    .insert(IMAGE_INDEX_ATTR, i.to_string());
            }
            attr(img, "src").unwrap_or_default()
        })
        .collect();
    (body_html(&document), sources)
}

/// Marks each `<img>` with its position in the source list across the
/// serialise and reparse between the two DOM passes.
const IMAGE_INDEX_ATTR: &str = "data-image-index";

/// Point each `<img>` at its resolved asset.
///
/// Images are matched by [`IMAGE_INDEX_ATTR`]; one without a valid index
/// loses its source.
fn rewrite_images(body: &str, assets: &[Option<LocalAsset>], mode: ImageMode) -> String {
    let document = kuchiki::parse_html().one(body);
    for img in &images(&document) {
        let Some(el) = img.as_element() else { continue };
        let mut attrs = el.attributes.borrow_mut();
        let asset = attrs
            .remove(IMAGE_INDEX_ATTR)
            .and_then(|a| a.value.parse::<usize>().ok())
            .and_then(|i| assets.get(i))
            .and_then(Option::as_ref);
        attrs.remove("style");
        attrs.remove("width");
        match (asset, mode) {
            (None, _) => {
                attrs.insert("src", String::new());
            }
            (Some(asset), ImageMode::Plain) => {
                attrs.insert("src", asset.src());
            }
            (Some(asset), ImageMode::Sized) => {
                attrs.insert("src", asset.file_url());
                if let Some(size) = asset.size {
                    attrs.insert("width", format!("{}", size.width.round()));
                    attrs.insert("height", format!("{}", size.height.round()));
                }
            }
        }
    }
    body_html(&document)
}

fn images(document: &NodeRef) -> Vec<NodeRef> {
    document
        .descendants()
        .filter(|n| n.as_element().is_some_and(|e| &*e.name.local == "img"))
        .collect()
}

fn attr(node: &NodeRef, name: &str) -> Option<String> {
    node.as_element()
        .and_then(|e| e.attributes.borrow().get(name).map(str::to_string))
}

/// Inner HTML of `<body>`.
fn body_html(document: &NodeRef) -> String {
    let Ok(body) = document.select_first("body") else {
        return String::new();
    };
    body.as_node().children().map(|c| c.to_string()).collect()
}

// ── Diagrams ─────────────────────────────────────────────────────────────

/// Build the diagram section of a node: one image paragraph per diagram.
///
/// Returns `Ok(None)` when the node has no diagrams, or all of them are
/// empty. Any diagram that cannot be resolved fails the export.
pub async fn diagram_fragment(
    ctx: &ExportContext<'_>,
    node: &Node,
) -> Result<Option<(String, usize)>, ExportError> {
    let diagrams = node.all_diagrams();
    if diagrams.is_empty() {
        return Ok(None);
    }
    debug!("Node '{}': resolving {} diagrams", node.id, diagrams.len());

    let resolved: Vec<Option<LocalAsset>> = stream::iter(diagrams)
        .map(|d| assets::resolve_diagram(ctx, &d.data))
        .buffered(ctx.config.concurrency)
        .try_collect()
        .await?;

    let mut body = String::new();
    let mut count = 0usize;
    for asset in resolved.into_iter().flatten() {
        body.push_str("<p><img src=\"");
        escape_attr(&asset.src(), &mut body);
        body.push_str("\" /></p>");
        count += 1;
    }
    if count == 0 {
        return Ok(None);
    }
    Ok(Some((wrap_document(&body), count)))
}
