//! Diagram SVG clean-up and rasterisation.
//!
//! Diagram-editor exports wrap text labels in `<switch>` elements: the first
//! alternative is a `<foreignObject>` holding HTML, the last one a plain
//! `<text>` fallback. SVG renderers without HTML support either drop the
//! label or render garbage, so every switch inside a group is replaced by its
//! last alternative before rasterising.
//!
//! The editor also stores its own model in a `content` attribute on the root
//! `<svg>`, and emits `&nbsp;` without declaring it; both are patched here so
//! the strict XML parser behind usvg accepts the source.

use crate::pipeline::xhtml::serialize_element;
use kuchiki::iter::NodeIterator;
use kuchiki::traits::TendrilSink;
use kuchiki::NodeRef;
use once_cell::sync::Lazy;
use resvg::{tiny_skia, usvg};
use std::sync::Arc;
use tracing::debug;

/// Declares the `nbsp` entity some diagram sources use undeclared.
pub const SVG_DOCTYPE: &str = "<!DOCTYPE svg [<!ENTITY nbsp \"&#160;\">]>";

static FONTS: Lazy<Arc<usvg::fontdb::Database>> = Lazy::new(|| {
    let mut db = usvg::fontdb::Database::new();
    db.load_system_fonts();
    debug!("Loaded {} system font faces for diagram text", db.len());
    Arc::new(db)
});

/// Rewrite diagram SVG source into a form usvg can render.
///
/// Replaces grouped `<switch>` elements with their last alternative, escapes
/// the root `content` attribute and prepends [`SVG_DOCTYPE`].
pub fn prepare_svg(source: &str) -> Result<String, String> {
    let document = kuchiki::parse_html().one(source);

    let switches: Vec<NodeRef> = document
        .select("switch")
        .map_err(|_| "invalid selector".to_string())?
        .map(|s| s.as_node().clone())
        .collect();
    let mut replaced = 0usize;
    for switch in switches {
        let in_group = switch
            .parent()
            .and_then(|p| p.as_element().map(|e| &*e.name.local == "g"))
            .unwrap_or(false);
        if !in_group {
            continue;
        }
        if let Some(fallback) = switch.children().elements().last() {
            switch.insert_before(fallback.as_node().clone());
        }
        switch.detach();
        replaced += 1;
    }
    debug!("Replaced {} <switch> elements", replaced);

    let svg = document
        .select_first("svg")
        .map_err(|_| "payload contains no <svg> element".to_string())?;
    {
        let mut attrs = svg.attributes.borrow_mut();
        if let Some(content) = attrs.get_mut("content") {
            *content = escape_content(content);
        }
    }

    Ok(format!("{}{}", SVG_DOCTYPE, serialize_element(svg.as_node())))
}

fn escape_content(content: &str) -> String {
    content
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Render SVG source to PNG bytes at its intrinsic size.
///
/// CPU-bound; call from `spawn_blocking`.
pub fn rasterize(svg: &str) -> Result<Vec<u8>, String> {
    let opt = usvg::Options {
        fontdb: Arc::clone(&FONTS),
        ..Default::default()
    };

    let tree = usvg::Tree::from_str(svg, &opt).map_err(|e| format!("invalid SVG: {e}"))?;
    let size = tree.size().to_int_size();
    let mut pixmap = tiny_skia::Pixmap::new(size.width(), size.height()).ok_or_else(|| {
        format!(
            "cannot allocate a {}x{} pixmap",
            size.width(),
            size.height()
        )
    })?;
    pixmap.fill(tiny_skia::Color::WHITE);
    resvg::render(&tree, tiny_skia::Transform::default(), &mut pixmap.as_mut());

    debug!("Rasterised diagram → {}x{} px", size.width(), size.height());
    pixmap.encode_png().map_err(|e| format!("PNG encoding failed: {e}"))
}
