//! Asset resolution: inline images and diagrams → files in the working directory.
//!
//! ## Why two error types here?
//!
//! Inline images inside a description are decoration; a dead link must not
//! cost the user the whole document, so [`fetch_image`] fails with an
//! [`AssetError`] and the caller blanks the reference. Diagrams are the
//! content a reader exports the document for, so [`resolve_diagram`] fails
//! with a fatal [`ExportError`].
//!
//! ## Diagram payloads
//!
//! A diagram's `data` is either a `data:` URI or a URL whose body is text
//! containing one. When the text carries a PNG data URI (a raster export, or
//! an SVG with an embedded raster fallback) the PNG is used as-is. Anything
//! else is taken as SVG, cleaned up and rasterised.
//!
//! `data:` URIs are decoded locally and never touch the network.

use crate::context::ExportContext;
use crate::error::{AssetError, ExportError};
use crate::pipeline::size::ImageSize;
use crate::pipeline::svg;
use base64::Engine as _;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;
use tracing::{debug, info};

/// Marks a PNG payload inside diagram text.
pub const PNG_DATA_HEAD: &str = "data:image/png;base64,";

const BASE64_MARKER: &str = "base64,";

static DATA_URI: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^data:([^;,]*)((?:;[^;,]*)*),").unwrap());

/// An asset stored in the working directory.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalAsset {
    pub path: PathBuf,
    /// Display size, when the caller asked for one.
    pub size: Option<ImageSize>,
}

impl LocalAsset {
    /// The absolute path as written into an `src` attribute.
    pub fn src(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    /// The path as a `file://` URL.
    pub fn file_url(&self) -> String {
        format!("file://{}", self.src())
    }
}

// ── Inline images ────────────────────────────────────────────────────────

/// Download (or decode) one inline image into the working directory.
pub async fn fetch_image(ctx: &ExportContext<'_>, url: &str) -> Result<LocalAsset, AssetError> {
    let (bytes, extension) = load_image(ctx, url).await?;
    let path = store(ctx, url, &bytes, &extension).await?;
    Ok(LocalAsset { path, size: None })
}

/// Like [`fetch_image`], additionally computing a bounded display size.
///
/// Images whose dimensions cannot be read are given a square of the
/// configured maximum width.
pub async fn fetch_sized_image(
    ctx: &ExportContext<'_>,
    url: &str,
) -> Result<LocalAsset, AssetError> {
    let max_width = ctx.config.max_image_width;
    let (bytes, extension) = load_image(ctx, url).await?;
    let size = ImageSize::probe(&bytes)
        .unwrap_or_else(|| {
            debug!("Could not probe {}; using {}x{}", url, max_width, max_width);
            ImageSize::square(max_width)
        })
        .reasonable(max_width);
    let path = store(ctx, url, &bytes, &extension).await?;
    Ok(LocalAsset {
        path,
        size: Some(size),
    })
}

async fn load_image(ctx: &ExportContext<'_>, url: &str) -> Result<(Vec<u8>, String), AssetError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(AssetError::FetchFailed {
            url: String::new(),
            reason: "empty image reference".into(),
        });
    }

    let (bytes, content_type) = match decode_data_uri(url) {
        Some(decoded) => decoded.map_err(|reason| AssetError::FetchFailed {
            url: crate::error::truncate_ref(url),
            reason,
        })?,
        None => download(ctx, url).await?,
    };

    match image_extension(&bytes, &content_type) {
        Some(ext) => Ok((bytes, ext)),
        None => Err(AssetError::NotAnImage {
            url: crate::error::truncate_ref(url),
            content_type: if content_type.is_empty() {
                "unknown".into()
            } else {
                content_type
            },
        }),
    }
}

async fn download(ctx: &ExportContext<'_>, url: &str) -> Result<(Vec<u8>, String), AssetError> {
    debug!("Downloading image: {}", url);
    let timeout_secs = ctx
        .config
        .read_timeout_secs
        .unwrap_or(ctx.config.connect_timeout_secs);
    let fail = |e: reqwest::Error| {
        if e.is_timeout() {
            AssetError::Timeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            AssetError::FetchFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    };

    let response = ctx.client.get(url).send().await.map_err(fail)?;
    if !response.status().is_success() {
        return Err(AssetError::FetchFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let bytes = response.bytes().await.map_err(fail)?;
    Ok((bytes.to_vec(), content_type))
}

/// File extension for image bytes, or `None` if they are not an image.
///
/// Magic bytes win over the declared type.
fn image_extension(bytes: &[u8], content_type: &str) -> Option<String> {
    if let Ok(format) = image::guess_format(bytes) {
        return format.extensions_str().first().map(|e| e.to_string());
    }
    let mime = content_type.split(';').next().unwrap_or_default().trim();
    let subtype = mime.strip_prefix("image/")?;
    Some(match subtype {
        "svg+xml" => "svg".to_string(),
        other => other
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .collect::<String>(),
    })
    .filter(|e| !e.is_empty())
}

async fn store(
    ctx: &ExportContext<'_>,
    url: &str,
    bytes: &[u8],
    extension: &str,
) -> Result<PathBuf, AssetError> {
    let write_failed = |e: std::io::Error| AssetError::WriteFailed {
        url: crate::error::truncate_ref(url),
        reason: e.to_string(),
    };
    let path = ctx.reserve_file("image-", extension).map_err(write_failed)?;
    tokio::fs::write(&path, bytes).await.map_err(write_failed)?;
    debug!("Stored {} bytes → {}", bytes.len(), path.display());
    Ok(path)
}

// ── Data URIs ────────────────────────────────────────────────────────────

/// Decode a `data:` URI into `(bytes, media type)`.
///
/// Returns `None` when `uri` is not a data URI at all.
pub fn decode_data_uri(uri: &str) -> Option<Result<(Vec<u8>, String), String>> {
    let caps = DATA_URI.captures(uri)?;
    let media_type = caps
        .get(1)
        .map(|m| m.as_str().trim().to_ascii_lowercase())
        .unwrap_or_default();
    let is_base64 = caps
        .get(2)
        .map(|m| {
            m.as_str()
                .split(';')
                .any(|p| p.trim().eq_ignore_ascii_case("base64"))
        })
        .unwrap_or(false);
    let payload = &uri[caps.get(0).map(|m| m.end()).unwrap_or(0)..];

    let bytes = if is_base64 {
        decode_base64(payload)
    } else {
        Ok(percent_decode(payload))
    };
    Some(bytes.map(|b| (b, media_type)))
}

/// Decode base64, ignoring whitespace and missing padding.
fn decode_base64(payload: &str) -> Result<Vec<u8>, String> {
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let trimmed = compact.trim_end_matches('=');
    base64::engine::general_purpose::STANDARD_NO_PAD
        .decode(trimmed)
        .map_err(|e| format!("invalid base64: {e}"))
}

fn percent_decode(s: &str) -> Vec<u8> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(v) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(v);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

// ── Diagrams ─────────────────────────────────────────────────────────────

/// Resolve one diagram reference into a PNG in the working directory.
///
/// Returns `Ok(None)` when the reference or the fetched payload is empty.
pub async fn resolve_diagram(
    ctx: &ExportContext<'_>,
    data: &str,
) -> Result<Option<LocalAsset>, ExportError> {
    let data = data.trim();
    if data.is_empty() {
        return Ok(None);
    }

    let payload = if data.starts_with("data:") {
        data.to_string()
    } else {
        info!("Downloading diagram: {}", data);
        let (bytes, _) = download(ctx, data)
            .await
            .map_err(|e| ExportError::diagram(data, e))?;
        String::from_utf8_lossy(&bytes).into_owned()
    };
    if payload.trim().is_empty() {
        debug!("Diagram {} has an empty payload", crate::error::truncate_ref(data));
        return Ok(None);
    }

    let encoded = base64_section(&payload).ok_or_else(|| ExportError::DiagramFormat {
        source_ref: crate::error::truncate_ref(data),
    })?;
    let decoded = decode_base64(encoded).map_err(|e| ExportError::diagram(data, e))?;

    let png = if payload.contains(PNG_DATA_HEAD) {
        debug!("Diagram carries a PNG payload ({} bytes)", decoded.len());
        decoded
    } else {
        let source = String::from_utf8_lossy(&decoded).into_owned();
        let prepared = svg::prepare_svg(&source).map_err(|e| ExportError::diagram(data, e))?;
        tokio::task::spawn_blocking(move || svg::rasterize(&prepared))
            .await
            .map_err(|e| ExportError::diagram(data, format!("rasterise task panicked: {e}")))?
            .map_err(|e| ExportError::diagram(data, e))?
    };

    let path = ctx
        .reserve_file("diagram-", "png")
        .map_err(|e| ExportError::diagram(data, e))?;
    tokio::fs::write(&path, &png)
        .await
        .map_err(|e| ExportError::diagram(data, e))?;
    debug!("Diagram stored → {}", path.display());

    Ok(Some(LocalAsset { path, size: None }))
}

/// The base64 text following the first `base64,` marker.
///
/// Stops at the first character outside the base64 alphabet, so a data URI
/// embedded in an attribute of a larger document is cut at its closing quote.
fn base64_section(payload: &str) -> Option<&str> {
    let (_, rest) = payload.split_once(BASE64_MARKER)?;
    let end = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=') || c.is_whitespace()))
        .unwrap_or(rest.len());
    Some(&rest[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExportConfig;
    use image::{DynamicImage, Rgba, RgbaImage};
    use std::io::Cursor;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn png(w: u32, h: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([10, 20, 30, 255])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    fn b64(bytes: &[u8]) -> String {
        base64::engine::general_purpose::STANDARD.encode(bytes)
    }

    /// Serve one canned HTTP response on a loopback port.
    async fn serve_once(status: &str, content_type: &str, body: Vec<u8>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let head = format!(
            "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let mut seen = Vec::new();
            while !seen.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                seen.extend_from_slice(&buf[..n]);
            }
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(&body).await.unwrap();
            socket.shutdown().await.ok();
        });
        format!("http://{addr}/asset")
    }

    #[test]
    fn data_uri_parsing() {
        let (bytes, mime) = decode_data_uri("data:image/png;base64,aGVsbG8=").unwrap().unwrap();
        assert_eq!(bytes, b"hello");
        assert_eq!(mime, "image/png");

        let (bytes, mime) = decode_data_uri("data:image/svg+xml;charset=utf-8,%3Csvg%3E").unwrap().unwrap();
        assert_eq!(bytes, b"<svg>");
        assert_eq!(mime, "image/svg+xml");

        assert!(decode_data_uri("http://example.com/a.png").is_none());
        assert!(decode_data_uri("data:image/png;base64,@@@").unwrap().is_err());
    }

    #[test]
    fn base64_section_stops_at_markup() {
        let text = r#"<svg><image href="data:image/png;base64,QUJD"/></svg>"#;
        assert_eq!(base64_section(text), Some("QUJD"));
        assert_eq!(base64_section("no marker here"), None);
    }

    #[test]
    fn extensions_follow_magic_bytes() {
        assert_eq!(image_extension(&png(1, 1), "text/html").as_deref(), Some("png"));
        assert_eq!(image_extension(b"<svg/>", "image/svg+xml").as_deref(), Some("svg"));
        assert_eq!(image_extension(b"<html/>", "text/html"), None);
    }

    #[tokio::test]
    async fn data_uri_images_are_stored_locally() {
        let config = ExportConfig::default();
        let ctx = ExportContext::new(&config).unwrap();
        let uri = format!("data:image/png;base64,{}", b64(&png(4, 3)));
        let asset = fetch_image(&ctx, &uri).await.unwrap();
        assert!(asset.path.starts_with(ctx.work_dir()));
        assert_eq!(asset.path.extension().unwrap(), "png");
        assert_eq!(std::fs::read(&asset.path).unwrap(), png(4, 3));
    }

    #[tokio::test]
    async fn sized_images_are_capped() {
        let config = ExportConfig::builder().max_image_width(10.0).build().unwrap();
        let ctx = ExportContext::new(&config).unwrap();
        let uri = format!("data:image/png;base64,{}", b64(&png(20, 8)));
        let asset = fetch_sized_image(&ctx, &uri).await.unwrap();
        assert_eq!(asset.size, Some(ImageSize::new(10.0, 4.0)));
        assert!(asset.file_url().starts_with("file:///"));
    }

    #[tokio::test]
    async fn unprobeable_images_get_the_default_square() {
        let config = ExportConfig::default();
        let ctx = ExportContext::new(&config).unwrap();
        let uri = "data:image/svg+xml,%3Csvg%2F%3E";
        let asset = fetch_sized_image(&ctx, uri).await.unwrap();
        assert_eq!(asset.size, Some(ImageSize::square(540.0)));
    }

    #[tokio::test]
    async fn http_images_are_downloaded() {
        let config = ExportConfig::default();
        let ctx = ExportContext::new(&config).unwrap();
        let url = serve_once("200 OK", "image/png", png(2, 2)).await;
        let asset = fetch_image(&ctx, &url).await.unwrap();
        assert_eq!(std::fs::read(&asset.path).unwrap(), png(2, 2));
    }

    #[tokio::test]
    async fn error_status_is_a_fetch_failure() {
        let config = ExportConfig::default();
        let ctx = ExportContext::new(&config).unwrap();
        let url = serve_once("404 Not Found", "text/plain", b"missing".to_vec()).await;
        let err = fetch_image(&ctx, &url).await.unwrap_err();
        assert!(matches!(err, AssetError::FetchFailed { ref reason, .. } if reason.contains("404")));
    }

    #[tokio::test]
    async fn html_body_is_not_an_image() {
        let config = ExportConfig::default();
        let ctx = ExportContext::new(&config).unwrap();
        let url = serve_once("200 OK", "text/html", b"<html>login</html>".to_vec()).await;
        let err = fetch_image(&ctx, &url).await.unwrap_err();
        assert!(matches!(err, AssetError::NotAnImage { .. }));
    }

    #[tokio::test]
    async fn unreachable_host_fails_without_panicking() {
        let config = ExportConfig::default();
        let ctx = ExportContext::new(&config).unwrap();
        let err = fetch_image(&ctx, "http://127.0.0.1:1/a.png").await.unwrap_err();
        assert_eq!(err.url(), "http://127.0.0.1:1/a.png");
    }

    #[tokio::test]
    async fn empty_diagram_data_resolves_to_nothing() {
        let config = ExportConfig::default();
        let ctx = ExportContext::new(&config).unwrap();
        assert_eq!(resolve_diagram(&ctx, "").await.unwrap(), None);
        assert_eq!(resolve_diagram(&ctx, "   ").await.unwrap(), None);
    }

    #[tokio::test]
    async fn png_diagrams_are_written_verbatim() {
        let config = ExportConfig::default();
        let ctx = ExportContext::new(&config).unwrap();
        let data = format!("{}{}", PNG_DATA_HEAD, b64(&png(5, 5)));
        let asset = resolve_diagram(&ctx, &data).await.unwrap().unwrap();
        assert_eq!(std::fs::read(&asset.path).unwrap(), png(5, 5));
    }

    #[tokio::test]
    async fn svg_diagrams_are_rasterised() {
        let config = ExportConfig::default();
        let ctx = ExportContext::new(&config).unwrap();
        let svg = r##"<svg xmlns="http://www.w3.org/2000/svg" width="30" height="20"><g><rect width="30" height="20" fill="#f00"/></g></svg>"##;
        let data = format!("data:image/svg+xml;base64,{}", b64(svg.as_bytes()));
        let asset = resolve_diagram(&ctx, &data).await.unwrap().unwrap();
        let bytes = std::fs::read(&asset.path).unwrap();
        assert_eq!(ImageSize::probe(&bytes), Some(ImageSize::new(30.0, 20.0)));
    }

    #[tokio::test]
    async fn diagram_without_base64_section_is_a_format_error() {
        let config = ExportConfig::default();
        let ctx = ExportContext::new(&config).unwrap();
        let err = resolve_diagram(&ctx, "data:image/svg+xml,%3Csvg%2F%3E").await.unwrap_err();
        assert!(matches!(err, ExportError::DiagramFormat { .. }));
    }

    #[tokio::test]
    async fn unreachable_diagram_is_fatal() {
        let config = ExportConfig::default();
        let ctx = ExportContext::new(&config).unwrap();
        let err = resolve_diagram(&ctx, "http://127.0.0.1:1/d.svg").await.unwrap_err();
        assert!(matches!(err, ExportError::DiagramResolution { .. }));
    }

    #[tokio::test]
    async fn fetched_diagram_text_with_png_fallback() {
        let config = ExportConfig::default();
        let ctx = ExportContext::new(&config).unwrap();
        let body = format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg"><image href="{}{}"/></svg>"#,
            PNG_DATA_HEAD,
            b64(&png(3, 2))
        );
        let url = serve_once("200 OK", "image/svg+xml", body.into_bytes()).await;
        let asset = resolve_diagram(&ctx, &url).await.unwrap().unwrap();
        assert_eq!(std::fs::read(&asset.path).unwrap(), png(3, 2));
    }
}
