//! WordprocessingML (.docx) backend.
//!
//! Each injected XHTML chunk is parsed with roxmltree and walked once,
//! emitting `w:p` / `w:tbl` markup into the document body. Images referenced
//! by local path (or `data:` URI) are copied into `word/media` and placed
//! inline, capped at the configured width. Remote URLs are never fetched
//! here; the normaliser has already replaced them with local paths.
//!
//! The package written by [`DocxBackend::save`] is minimal but complete:
//! content types, package and document relationships, `word/document.xml`,
//! `word/styles.xml` (Normal, Heading1–9, ListParagraph) and
//! `docProps/core.xml`.

use crate::error::ExportError;
use crate::pipeline::assets::decode_data_uri;
use crate::pipeline::compose::DocumentBackend;
use crate::pipeline::size::ImageSize;
use crate::pipeline::xhtml::{escape_attr, escape_text};
use image::ImageFormat;
use roxmltree::Node;
use std::collections::HashMap;
use std::io::{Cursor, Seek, Write};
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const NS_W: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";
const NS_R: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const NS_WP: &str = "http://schemas.openxmlformats.org/drawingml/2006/wordprocessingDrawing";
const NS_A: &str = "http://schemas.openxmlformats.org/drawingml/2006/main";
const NS_PIC: &str = "http://schemas.openxmlformats.org/drawingml/2006/picture";

const REL_IMAGE: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships/image";
const REL_HYPERLINK: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/hyperlink";

const XML_DECL: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n";

/// 96 DPI.
const EMU_PER_PX: f32 = 9525.0;
const TWIPS_PER_PX: f32 = 15.0;
/// A4 portrait minus 1-inch margins.
const TEXT_WIDTH_TWIPS: u32 = 9026;
const INDENT_STEP_TWIPS: u32 = 360;
/// HTML caps `colspan` at 1000.
const MAX_COLSPAN: u32 = 1000;
const MAX_GRID_COLUMNS: u32 = 1000;

const HR_PARAGRAPH: &str = "<w:p><w:pPr><w:pBdr><w:bottom w:val=\"single\" w:sz=\"6\" \
     w:space=\"1\" w:color=\"auto\"/></w:pBdr></w:pPr></w:p>";

// ── Backend ──────────────────────────────────────────────────────────────

/// Builds a .docx package in memory.
#[derive(Debug)]
pub struct DocxBackend {
    title: Option<String>,
    creator: Option<String>,
    body: String,
    pending: Vec<String>,
    package: Package,
}

impl DocxBackend {
    /// An empty document whose images are capped at `max_image_width` px.
    pub fn new(max_image_width: f32) -> Self {
        Self {
            title: None,
            creator: None,
            body: String::new(),
            pending: Vec::new(),
            package: Package {
                max_image_width,
                ..Default::default()
            },
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_creator(mut self, creator: impl Into<String>) -> Self {
        self.creator = Some(creator.into());
        self
    }

    fn document_xml(&self) -> String {
        let body = if self.body.is_empty() {
            "<w:p/>"
        } else {
            self.body.as_str()
        };
        format!(
            "{XML_DECL}<w:document xmlns:w=\"{NS_W}\" xmlns:r=\"{NS_R}\" xmlns:wp=\"{NS_WP}\" \
             xmlns:a=\"{NS_A}\" xmlns:pic=\"{NS_PIC}\"><w:body>{body}<w:sectPr>\
             <w:pgSz w:w=\"11906\" w:h=\"16838\"/><w:pgMar w:top=\"1440\" w:right=\"1440\" \
             w:bottom=\"1440\" w:left=\"1440\" w:header=\"708\" w:footer=\"708\" w:gutter=\"0\"/>\
             </w:sectPr></w:body></w:document>"
        )
    }

    fn core_xml(&self) -> String {
        let mut out = format!(
            "{XML_DECL}<cp:coreProperties \
             xmlns:cp=\"http://schemas.openxmlformats.org/package/2006/metadata/core-properties\" \
             xmlns:dc=\"http://purl.org/dc/elements/1.1/\" \
             xmlns:dcterms=\"http://purl.org/dc/terms/\" \
             xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\">"
        );
        if let Some(title) = &self.title {
            out.push_str("<dc:title>");
            escape_text(title, &mut out);
            out.push_str("</dc:title>");
        }
        if let Some(creator) = &self.creator {
            out.push_str("<dc:creator>");
            escape_text(creator, &mut out);
            out.push_str("</dc:creator>");
        }
        out.push_str("</cp:coreProperties>");
        out
    }
}

impl DocumentBackend for DocxBackend {
    fn push_heading(&mut self, level: u8, text: &str) -> Result<(), ExportError> {
        self.flatten()?;
        self.body.push_str("<w:p><w:pPr><w:pStyle w:val=\"Heading");
        self.body.push_str(&level.to_string());
        self.body.push_str("\"/></w:pPr>");
        let text = text.trim();
        if !text.is_empty() {
            self.body.push_str(&text_run(text, RunStyle::default()));
        }
        self.body.push_str("</w:p>");
        Ok(())
    }

    fn inject_chunk(&mut self, xhtml: String) -> Result<(), ExportError> {
        self.pending.push(xhtml);
        Ok(())
    }

    fn flatten(&mut self) -> Result<(), ExportError> {
        for chunk in std::mem::take(&mut self.pending) {
            let doc = roxmltree::Document::parse(&chunk).map_err(|e| {
                ExportError::Composition(format!("injected chunk is not well-formed: {e}"))
            })?;
            let root = doc
                .descendants()
                .find(|n| n.is_element() && n.tag_name().name() == "body")
                .unwrap_or_else(|| doc.root_element());

            let mut converter = Converter::new(&mut self.package);
            let mut para = Paragraph::default();
            converter.children(root, RunStyle::default(), &mut para, &mut self.body);
            converter.flush(&mut para, &mut self.body);
        }
        Ok(())
    }

    fn save(mut self) -> Result<Vec<u8>, ExportError> {
        self.flatten()?;
        debug!(
            "Saving docx: {} bytes of body, {} media parts, {} links",
            self.body.len(),
            self.package.media.len(),
            self.package.links.len()
        );

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

        write_part(&mut zip, "[Content_Types].xml", content_types_xml().as_bytes(), deflated)?;
        write_part(&mut zip, "_rels/.rels", PACKAGE_RELS.as_bytes(), deflated)?;
        write_part(&mut zip, "docProps/core.xml", self.core_xml().as_bytes(), deflated)?;
        write_part(&mut zip, "word/document.xml", self.document_xml().as_bytes(), deflated)?;
        write_part(&mut zip, "word/styles.xml", styles_xml().as_bytes(), deflated)?;
        write_part(
            &mut zip,
            "word/_rels/document.xml.rels",
            self.package.rels_xml().as_bytes(),
            deflated,
        )?;
        for media in &self.package.media {
            let name = format!("word/media/{}", media.file_name);
            write_part(&mut zip, &name, &media.bytes, stored)?;
        }

        let cursor = zip
            .finish()
            .map_err(|e| ExportError::Composition(format!("zip finalisation failed: {e}")))?;
        Ok(cursor.into_inner())
    }
}

fn write_part<W: Write + Seek>(
    zip: &mut ZipWriter<W>,
    name: &str,
    bytes: &[u8],
    options: SimpleFileOptions,
) -> Result<(), ExportError> {
    zip.start_file(name, options)
        .map_err(|e| ExportError::Composition(format!("{name}: {e}")))?;
    zip.write_all(bytes)
        .map_err(|e| ExportError::Composition(format!("{name}: {e}")))
}

// ── Package parts ────────────────────────────────────────────────────────

#[derive(Debug)]
struct Media {
    rel_id: String,
    file_name: String,
    bytes: Vec<u8>,
}

/// Media and hyperlink relationships of `word/document.xml`.
#[derive(Debug, Default)]
struct Package {
    max_image_width: f32,
    media: Vec<Media>,
    media_by_source: HashMap<String, String>,
    links: Vec<(String, String)>,
    drawing_ids: u32,
}

impl Package {
    /// Add an image part, reusing the part when `source` was seen before.
    fn embed(&mut self, source: &str, bytes: Vec<u8>, extension: &str) -> String {
        if let Some(rel_id) = self.media_by_source.get(source) {
            return rel_id.clone();
        }
        let n = self.media.len() + 1;
        let rel_id = format!("rIdImage{n}");
        self.media.push(Media {
            rel_id: rel_id.clone(),
            file_name: format!("image{n}.{extension}"),
            bytes,
        });
        self.media_by_source.insert(source.to_string(), rel_id.clone());
        rel_id
    }

    fn link(&mut self, target: &str) -> String {
        if let Some((rel_id, _)) = self.links.iter().find(|(_, t)| t == target) {
            return rel_id.clone();
        }
        let rel_id = format!("rIdLink{}", self.links.len() + 1);
        self.links.push((rel_id.clone(), target.to_string()));
        rel_id
    }

    fn next_drawing_id(&mut self) -> u32 {
        self.drawing_ids += 1;
        self.drawing_ids
    }

    fn rels_xml(&self) -> String {
        let mut out = format!(
            "{XML_DECL}<Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">\
             <Relationship Id=\"rIdStyles\" \
             Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles\" \
             Target=\"styles.xml\"/>"
        );
        for media in &self.media {
            out.push_str(&format!(
                "<Relationship Id=\"{}\" Type=\"{REL_IMAGE}\" Target=\"media/{}\"/>",
                media.rel_id, media.file_name
            ));
        }
        for (rel_id, target) in &self.links {
            out.push_str(&format!(
                "<Relationship Id=\"{rel_id}\" Type=\"{REL_HYPERLINK}\" Target=\""
            ));
            escape_attr(target, &mut out);
            out.push_str("\" TargetMode=\"External\"/>");
        }
        out.push_str("</Relationships>");
        out
    }
}

const PACKAGE_RELS: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
<Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">\
<Relationship Id=\"rId1\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument\" Target=\"word/document.xml\"/>\
<Relationship Id=\"rId2\" Type=\"http://schemas.openxmlformats.org/package/2006/relationships/metadata/core-properties\" Target=\"docProps/core.xml\"/>\
</Relationships>";

fn content_types_xml() -> String {
    let mut out = format!(
        "{XML_DECL}<Types xmlns=\"http://schemas.openxmlformats.org/package/2006/content-types\">\
         <Default Extension=\"rels\" ContentType=\"application/vnd.openxmlformats-package.relationships+xml\"/>\
         <Default Extension=\"xml\" ContentType=\"application/xml\"/>"
    );
    for (ext, mime) in [
        ("png", "image/png"),
        ("jpeg", "image/jpeg"),
        ("gif", "image/gif"),
        ("bmp", "image/bmp"),
        ("tiff", "image/tiff"),
    ] {
        out.push_str(&format!(
            "<Default Extension=\"{ext}\" ContentType=\"{mime}\"/>"
        ));
    }
    out.push_str(
        "<Override PartName=\"/word/document.xml\" \
         ContentType=\"application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml\"/>\
         <Override PartName=\"/word/styles.xml\" \
         ContentType=\"application/vnd.openxmlformats-officedocument.wordprocessingml.styles+xml\"/>\
         <Override PartName=\"/docProps/core.xml\" \
         ContentType=\"application/vnd.openxmlformats-package.core-properties+xml\"/>\
         </Types>",
    );
    out
}

fn styles_xml() -> String {
    let mut out = format!(
        "{XML_DECL}<w:styles xmlns:w=\"{NS_W}\">\
         <w:docDefaults><w:rPrDefault><w:rPr>\
         <w:rFonts w:ascii=\"Calibri\" w:hAnsi=\"Calibri\" w:eastAsia=\"SimSun\" w:cs=\"Calibri\"/>\
         <w:sz w:val=\"22\"/><w:szCs w:val=\"22\"/></w:rPr></w:rPrDefault>\
         <w:pPrDefault><w:pPr><w:spacing w:after=\"120\" w:line=\"276\" w:lineRule=\"auto\"/>\
         </w:pPr></w:pPrDefault></w:docDefaults>\
         <w:style w:type=\"paragraph\" w:default=\"1\" w:styleId=\"Normal\">\
         <w:name w:val=\"Normal\"/><w:qFormat/></w:style>"
    );
    for level in 1..=9u8 {
        let size = match level {
            1 => 32,
            2 => 28,
            3 => 26,
            4 => 24,
            _ => 22,
        };
        let before = if level == 1 { 360 } else { 240 };
        out.push_str(&format!(
            "<w:style w:type=\"paragraph\" w:styleId=\"Heading{level}\">\
             <w:name w:val=\"heading {level}\"/><w:basedOn w:val=\"Normal\"/>\
             <w:next w:val=\"Normal\"/><w:uiPriority w:val=\"9\"/><w:qFormat/>\
             <w:pPr><w:keepNext/><w:spacing w:before=\"{before}\" w:after=\"120\"/>\
             <w:outlineLvl w:val=\"{}\"/></w:pPr>\
             <w:rPr><w:b/><w:sz w:val=\"{size}\"/><w:szCs w:val=\"{size}\"/></w:rPr></w:style>",
            level - 1
        ));
    }
    out.push_str(
        "<w:style w:type=\"paragraph\" w:styleId=\"ListParagraph\">\
         <w:name w:val=\"List Paragraph\"/><w:basedOn w:val=\"Normal\"/><w:qFormat/>\
         <w:pPr><w:spacing w:after=\"60\"/></w:pPr></w:style></w:styles>",
    );
    out
}

// ── XHTML → WordprocessingML ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
struct RunStyle {
    bold: bool,
    italic: bool,
    underline: bool,
    strike: bool,
    code: bool,
    superscript: bool,
    subscript: bool,
    link: bool,
}

impl RunStyle {
    fn for_tag(mut self, tag: &str) -> Self {
        match tag {
            "b" | "strong" | "th" => self.bold = true,
            "i" | "em" | "cite" | "var" | "dfn" => self.italic = true,
            "u" | "ins" => self.underline = true,
            "s" | "strike" | "del" => self.strike = true,
            "code" | "kbd" | "samp" | "tt" => self.code = true,
            "sup" => self.superscript = true,
            "sub" => self.subscript = true,
            _ => {}
        }
        self
    }

    fn properties(&self) -> String {
        let mut rpr = String::new();
        if self.code {
            rpr.push_str("<w:rFonts w:ascii=\"Consolas\" w:hAnsi=\"Consolas\" w:cs=\"Consolas\"/>");
        }
        if self.bold {
            rpr.push_str("<w:b/>");
        }
        if self.italic {
            rpr.push_str("<w:i/>");
        }
        if self.strike {
            rpr.push_str("<w:strike/>");
        }
        if self.link {
            rpr.push_str("<w:color w:val=\"0563C1\"/>");
        }
        if self.underline || self.link {
            rpr.push_str("<w:u w:val=\"single\"/>");
        }
        if self.superscript {
            rpr.push_str("<w:vertAlign w:val=\"superscript\"/>");
        } else if self.subscript {
            rpr.push_str("<w:vertAlign w:val=\"subscript\"/>");
        }
        if rpr.is_empty() {
            rpr
        } else {
            format!("<w:rPr>{rpr}</w:rPr>")
        }
    }
}

fn text_run(text: &str, style: RunStyle) -> String {
    let mut run = format!("<w:r>{}<w:t xml:space=\"preserve\">", style.properties());
    escape_text(text, &mut run);
    run.push_str("</w:t></w:r>");
    run
}

/// A paragraph being filled with runs.
#[derive(Debug)]
struct Paragraph {
    style: Option<String>,
    indent: u32,
    align: Option<&'static str>,
    /// List marker, emitted before the first run.
    prefix: Option<String>,
    runs: String,
    ends_in_space: bool,
}

impl Default for Paragraph {
    fn default() -> Self {
        Self::new(None, 0, None)
    }
}

impl Paragraph {
    fn new(style: Option<String>, indent: u32, align: Option<&'static str>) -> Self {
        Self {
            style,
            indent,
            align,
            prefix: None,
            runs: String::new(),
            ends_in_space: true,
        }
    }

    fn open(&mut self) {
        if let Some(prefix) = self.prefix.take() {
            self.runs.push_str(&text_run(&prefix, RunStyle::default()));
        }
    }

    fn push_text(&mut self, text: &str, style: RunStyle, preformatted: bool) {
        if preformatted {
            for (i, line) in text.split('\n').enumerate() {
                if i > 0 {
                    self.push_break();
                }
                if !line.is_empty() {
                    self.open();
                    self.runs.push_str(&text_run(line, style));
                }
            }
            self.ends_in_space = text.ends_with(char::is_whitespace);
            return;
        }

        let mut collapsed = String::with_capacity(text.len());
        let mut last_space = self.ends_in_space;
        for c in text.chars() {
            if c.is_whitespace() && c != '\u{a0}' {
                if !last_space {
                    collapsed.push(' ');
                }
                last_space = true;
            } else {
                collapsed.push(c);
                last_space = false;
            }
        }
        if collapsed.is_empty() {
            return;
        }
        self.open();
        self.runs.push_str(&text_run(&collapsed, style));
        self.ends_in_space = last_space;
    }

    fn push_break(&mut self) {
        self.open();
        self.runs.push_str("<w:r><w:br/></w:r>");
        self.ends_in_space = true;
    }

    fn push_run(&mut self, run: &str) {
        self.open();
        self.runs.push_str(run);
        self.ends_in_space = false;
    }

    fn write(&self, out: &mut String) {
        out.push_str("<w:p>");
        if self.style.is_some() || self.indent > 0 || self.align.is_some() {
            out.push_str("<w:pPr>");
            if let Some(style) = &self.style {
                out.push_str(&format!("<w:pStyle w:val=\"{style}\"/>"));
            }
            if self.indent > 0 {
                out.push_str(&format!("<w:ind w:left=\"{}\"/>", self.indent));
            }
            if let Some(align) = self.align {
                out.push_str(&format!("<w:jc w:val=\"{align}\"/>"));
            }
            out.push_str("</w:pPr>");
        }
        out.push_str(&self.runs);
        out.push_str("</w:p>");
    }
}

/// Walks one XHTML tree, appending body markup.
struct Converter<'p> {
    package: &'p mut Package,
    list_depth: u32,
    preformatted: u32,
}

impl<'p> Converter<'p> {
    fn new(package: &'p mut Package) -> Self {
        Self {
            package,
            list_depth: 0,
            preformatted: 0,
        }
    }

    fn flush(&mut self, para: &mut Paragraph, out: &mut String) {
        if !para.runs.is_empty() {
            para.write(out);
            para.runs.clear();
        }
        para.ends_in_space = true;
    }

    fn children(&mut self, node: Node, style: RunStyle, para: &mut Paragraph, out: &mut String) {
        for child in node.children() {
            self.node(child, style, para, out);
        }
    }

    fn node(&mut self, node: Node, style: RunStyle, para: &mut Paragraph, out: &mut String) {
        if node.is_text() {
            if let Some(text) = node.text() {
                para.push_text(text, style, self.preformatted > 0);
            }
            return;
        }
        if !node.is_element() {
            return;
        }

        let tag = node.tag_name().name().to_ascii_lowercase();
        match tag.as_str() {
            "head" | "script" | "style" | "title" | "meta" | "link" | "template" | "noscript" => {}
            "br" => para.push_break(),
            "img" => {
                if let Some(run) = self.image(node) {
                    para.push_run(&run);
                }
            }
            "hr" => {
                self.flush(para, out);
                out.push_str(HR_PARAGRAPH);
            }
            "table" => {
                self.flush(para, out);
                self.table(node, out);
            }
            "ul" | "ol" => {
                self.flush(para, out);
                self.list(node, tag == "ol", style, out);
            }
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let heading = format!("Heading{}", &tag[1..]);
                self.block(node, Some(heading), 0, style, para, out);
            }
            "pre" => {
                self.preformatted += 1;
                self.block(node, None, 0, style.for_tag("code"), para, out);
                self.preformatted -= 1;
            }
            "blockquote" | "dd" => self.block(node, None, 2 * INDENT_STEP_TWIPS, style, para, out),
            "p" | "div" | "section" | "article" | "header" | "footer" | "main" | "nav" | "aside"
            | "address" | "figure" | "figcaption" | "center" | "dl" | "dt" | "li" | "caption"
            | "details" | "summary" | "form" | "fieldset" => {
                self.block(node, None, 0, style, para, out)
            }
            "a" => self.anchor(node, style, para, out),
            _ => self.children(node, style.for_tag(&tag), para, out),
        }
    }

    fn block(
        &mut self,
        node: Node,
        paragraph_style: Option<String>,
        extra_indent: u32,
        style: RunStyle,
        para: &mut Paragraph,
        out: &mut String,
    ) {
        let mut inner = Paragraph::new(
            paragraph_style.or_else(|| para.style.clone()),
            para.indent + extra_indent,
            alignment(node).or(para.align),
        );
        if para.runs.is_empty() {
            inner.prefix = para.prefix.take();
        }
        self.flush(para, out);
        self.children(node, style, &mut inner, out);
        self.flush(&mut inner, out);
    }

    fn list(&mut self, node: Node, ordered: bool, style: RunStyle, out: &mut String) {
        self.list_depth += 1;
        let indent = INDENT_STEP_TWIPS * (self.list_depth + 1);
        let list_style = Some("ListParagraph".to_string());
        let mut number = node
            .attribute("start")
            .and_then(|s| s.trim().parse::<i64>().ok())
            .unwrap_or(1)
            .saturating_sub(1);

        let mut loose = Paragraph::new(list_style.clone(), indent, None);
        for child in node.children() {
            if child.is_element() && child.tag_name().name().eq_ignore_ascii_case("li") {
                self.flush(&mut loose, out);
                number = number.saturating_add(1);
                let mut item = Paragraph::new(list_style.clone(), indent, alignment(child));
                item.prefix = Some(if ordered {
                    format!("{number}. ")
                } else {
                    "\u{2022} ".to_string()
                });
                self.children(child, style, &mut item, out);
                self.flush(&mut item, out);
            } else {
                self.node(child, style, &mut loose, out);
            }
        }
        self.flush(&mut loose, out);
        self.list_depth -= 1;
    }

    fn anchor(&mut self, node: Node, style: RunStyle, para: &mut Paragraph, out: &mut String) {
        let href = node.attribute("href").unwrap_or_default().trim();
        let external = ["http://", "https://", "mailto:"]
            .iter()
            .any(|p| href.to_ascii_lowercase().starts_with(p));
        let text_only = node
            .descendants()
            .skip(1)
            .all(|d| !d.is_element() || is_inline_formatting(d.tag_name().name()));

        if !external || !text_only {
            let mut style = style;
            style.link = external;
            self.children(node, style, para, out);
            return;
        }

        let text: String = node
            .descendants()
            .filter(|d| d.is_text())
            .filter_map(|d| d.text())
            .collect();
        let mut style = style;
        style.link = true;
        para.open();
        let before = para.runs.len();
        para.push_text(&text, style, false);
        if para.runs.len() == before {
            return;
        }
        let runs = para.runs.split_off(before);
        let rel_id = self.package.link(href);
        para.runs
            .push_str(&format!("<w:hyperlink r:id=\"{rel_id}\">{runs}</w:hyperlink>"));
    }

    fn table(&mut self, node: Node, out: &mut String) {
        let rows: Vec<Node> = node
            .children()
            .filter(Node::is_element)
            .flat_map(|child| match child.tag_name().name() {
                "tr" => vec![child],
                "thead" | "tbody" | "tfoot" => child
                    .children()
                    .filter(|r| r.is_element() && r.tag_name().name() == "tr")
                    .collect(),
                _ => Vec::new(),
            })
            .collect();
        let columns = rows
            .iter()
            .map(|r| {
                table_cells(*r)
                    .iter()
                    .map(colspan)
                    .fold(0u32, u32::saturating_add)
            })
            .max()
            .unwrap_or(0)
            .min(MAX_GRID_COLUMNS);
        if columns == 0 {
            return;
        }

        let (width_xml, total_width) = table_width(node.attribute("width"));
        let column_width = (total_width / columns).max(1);
        let bordered = node
            .attribute("border")
            .and_then(|b| b.trim().parse::<u32>().ok())
            .is_some_and(|b| b > 0);
        let fixed = node.attribute("style").is_some_and(|s| {
            s.to_ascii_lowercase()
                .replace(' ', "")
                .contains("table-layout:fixed")
        });

        out.push_str("<w:tbl><w:tblPr>");
        out.push_str(&width_xml);
        if bordered {
            out.push_str("<w:tblBorders>");
            for edge in ["top", "left", "bottom", "right", "insideH", "insideV"] {
                out.push_str(&format!(
                    "<w:{edge} w:val=\"single\" w:sz=\"4\" w:space=\"0\" w:color=\"auto\"/>"
                ));
            }
            out.push_str("</w:tblBorders>");
        }
        if fixed {
            out.push_str("<w:tblLayout w:type=\"fixed\"/>");
        }
        out.push_str("</w:tblPr><w:tblGrid>");
        for _ in 0..columns {
            out.push_str(&format!("<w:gridCol w:w=\"{column_width}\"/>"));
        }
        out.push_str("</w:tblGrid>");

        for row in &rows {
            let row_cells = table_cells(*row);
            if row_cells.is_empty() {
                continue;
            }
            out.push_str("<w:tr>");
            for cell in row_cells {
                let span = colspan(&cell);
                out.push_str(&format!(
                    "<w:tc><w:tcPr><w:tcW w:w=\"{}\" w:type=\"dxa\"/>",
                    column_width.saturating_mul(span)
                ));
                if span > 1 {
                    out.push_str(&format!("<w:gridSpan w:val=\"{span}\"/>"));
                }
                out.push_str("</w:tcPr>");

                let mut content = String::new();
                let mut para = Paragraph::new(None, 0, alignment(cell));
                let style = RunStyle::default().for_tag(cell.tag_name().name());
                self.children(cell, style, &mut para, &mut content);
                self.flush(&mut para, &mut content);
                // A cell must end with a paragraph.
                if content.is_empty() || content.ends_with("</w:tbl>") {
                    content.push_str("<w:p/>");
                }
                out.push_str(&content);
                out.push_str("</w:tc>");
            }
            out.push_str("</w:tr>");
        }
        out.push_str("</w:tbl>");
    }

    fn image(&mut self, node: Node) -> Option<String> {
        let src = node.attribute("src").unwrap_or_default().trim();
        if src.is_empty() {
            return None;
        }
        let bytes = match load_image(src) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Skipping image {}: {}", crate::error::truncate_ref(src), e);
                return None;
            }
        };
        let Some(extension) = media_extension(&bytes) else {
            warn!(
                "Skipping image {}: format cannot be embedded",
                crate::error::truncate_ref(src)
            );
            return None;
        };

        let max_width = self.package.max_image_width;
        let size = ImageSize::from_attributes(node.attribute("width"), node.attribute("height"))
            .or_else(|| ImageSize::probe(&bytes))
            .unwrap_or_else(|| ImageSize::square(max_width))
            .reasonable(max_width);

        let rel_id = self.package.embed(src, bytes, extension);
        let id = self.package.next_drawing_id();
        Some(drawing_run(&rel_id, id, size, node.attribute("alt").unwrap_or_default()))
    }
}

fn table_cells<'a, 'i>(row: Node<'a, 'i>) -> Vec<Node<'a, 'i>> {
    row.children()
        .filter(|c| c.is_element() && matches!(c.tag_name().name(), "td" | "th"))
        .collect()
}

fn is_inline_formatting(tag: &str) -> bool {
    matches!(
        tag,
        "b" | "strong" | "i" | "em" | "u" | "ins" | "s" | "strike" | "del" | "code" | "kbd"
            | "samp" | "tt" | "sup" | "sub" | "span" | "font" | "cite" | "var" | "dfn" | "small"
            | "big" | "mark" | "abbr"
    )
}

/// `colspan` clamped to `1..=MAX_COLSPAN`, as browsers do.
fn colspan(cell: &Node) -> u32 {
    cell.attribute("colspan")
        .and_then(|s| s.trim().parse::<u32>().ok())
        .filter(|n| *n > 0)
        .map_or(1, |n| n.min(MAX_COLSPAN))
}

/// `<w:tblW>` for an HTML `width` attribute, plus the width in twips.
fn table_width(width: Option<&str>) -> (String, u32) {
    let auto = (
        "<w:tblW w:w=\"0\" w:type=\"auto\"/>".to_string(),
        TEXT_WIDTH_TWIPS,
    );
    let Some(raw) = width.map(str::trim) else {
        return auto;
    };
    if let Some(pct) = raw.strip_suffix('%') {
        return match pct.trim().parse::<f32>() {
            Ok(p) if p > 0.0 => {
                let p = p.min(100.0);
                (
                    format!("<w:tblW w:w=\"{}\" w:type=\"pct\"/>", (p * 50.0).round() as u32),
                    (TEXT_WIDTH_TWIPS as f32 * p / 100.0) as u32,
                )
            }
            _ => auto,
        };
    }
    let px = raw.strip_suffix("px").unwrap_or(raw).trim();
    match px.parse::<f32>() {
        Ok(px) if px > 0.0 => {
            let twips = (px * TWIPS_PER_PX) as u32;
            (format!("<w:tblW w:w=\"{twips}\" w:type=\"dxa\"/>"), twips)
        }
        _ => auto,
    }
}

/// `align` attribute or `text-align` declaration → `w:jc` value.
fn alignment(node: Node) -> Option<&'static str> {
    let declared = node
        .attribute("style")
        .and_then(|style| {
            style.split(';').find_map(|decl| {
                let (name, value) = decl.split_once(':')?;
                (name.trim().eq_ignore_ascii_case("text-align")).then(|| value.trim().to_string())
            })
        })
        .or_else(|| node.attribute("align").map(str::to_string))?;
    match declared.to_ascii_lowercase().as_str() {
        "center" => Some("center"),
        "right" => Some("right"),
        "justify" => Some("both"),
        _ => None,
    }
}

fn load_image(src: &str) -> Result<Vec<u8>, String> {
    if let Some(decoded) = decode_data_uri(src) {
        return decoded.map(|(bytes, _)| bytes);
    }
    let lower = src.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return Err("remote image was not resolved".into());
    }
    let path = src.strip_prefix("file://").unwrap_or(src);
    std::fs::read(path).map_err(|e| e.to_string())
}

fn media_extension(bytes: &[u8]) -> Option<&'static str> {
    match image::guess_format(bytes).ok()? {
        ImageFormat::Png => Some("png"),
        ImageFormat::Jpeg => Some("jpeg"),
        ImageFormat::Gif => Some("gif"),
        ImageFormat::Bmp => Some("bmp"),
        ImageFormat::Tiff => Some("tiff"),
        _ => None,
    }
}

fn drawing_run(rel_id: &str, id: u32, size: ImageSize, alt: &str) -> String {
    let cx = (size.width * EMU_PER_PX).round() as i64;
    let cy = (size.height * EMU_PER_PX).round() as i64;
    let mut descr = String::new();
    escape_attr(alt, &mut descr);
    format!(
        "<w:r><w:drawing><wp:inline distT=\"0\" distB=\"0\" distL=\"0\" distR=\"0\">\
         <wp:extent cx=\"{cx}\" cy=\"{cy}\"/><wp:docPr id=\"{id}\" name=\"Picture {id}\" descr=\"{descr}\"/>\
         <wp:cNvGraphicFramePr><a:graphicFrameLocks noChangeAspect=\"1\"/></wp:cNvGraphicFramePr>\
         <a:graphic><a:graphicData uri=\"{NS_PIC}\"><pic:pic>\
         <pic:nvPicPr><pic:cNvPr id=\"{id}\" name=\"Picture {id}\"/><pic:cNvPicPr/></pic:nvPicPr>\
         <pic:blipFill><a:blip r:embed=\"{rel_id}\"/><a:stretch><a:fillRect/></a:stretch></pic:blipFill>\
         <pic:spPr><a:xfrm><a:off x=\"0\" y=\"0\"/><a:ext cx=\"{cx}\" cy=\"{cy}\"/></a:xfrm>\
         <a:prstGeom prst=\"rect\"><a:avLst/></a:prstGeom></pic:spPr>\
         </pic:pic></a:graphicData></a:graphic></wp:inline></w:drawing></w:r>"
    )
}
