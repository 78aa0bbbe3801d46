//! Bounded image dimensions.
//!
//! Word processors place images at their natural size, so a screenshot taken
//! on a 4K display would overflow the page. Everything that lands in the
//! output document is capped at a fixed width, scaling height to keep the
//! aspect ratio.

use image::ImageReader;
use std::io::Cursor;
use tracing::debug;

/// Width and height of an image in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageSize {
    pub width: f32,
    pub height: f32,
}

impl ImageSize {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    /// A `side × side` square, used when an image cannot be probed.
    pub fn square(side: f32) -> Self {
        Self::new(side, side)
    }

    /// Shrink to `max_width`, preserving aspect ratio.
    ///
    /// Images already narrower than the cap are returned unchanged.
    pub fn reasonable(self, max_width: f32) -> Self {
        if self.width < max_width {
            return self;
        }
        Self {
            width: max_width,
            height: max_width / self.width * self.height,
        }
    }

    /// Read the natural pixel dimensions from encoded image bytes.
    ///
    /// Only the header is decoded.
    pub fn probe(bytes: &[u8]) -> Option<Self> {
        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .ok()?;
        match reader.into_dimensions() {
            Ok((w, h)) if w > 0 && h > 0 => Some(Self::new(w as f32, h as f32)),
            Ok(_) => None,
            Err(e) => {
                debug!("Image dimension probe failed: {}", e);
                None
            }
        }
    }

    /// Parse `width`/`height` HTML attribute values (`"300"`, `"300px"`).
    pub fn from_attributes(width: Option<&str>, height: Option<&str>) -> Option<Self> {
        let w = parse_length(width?)?;
        let h = parse_length(height?)?;
        Some(Self::new(w, h))
    }
}

/// Pixel lengths only; percentages and other units are not sizes we can honour.
fn parse_length(value: &str) -> Option<f32> {
    let v = value.trim();
    let v = v.strip_suffix("px").unwrap_or(v).trim();
    let n: f32 = v.parse().ok()?;
    (n.is_finite() && n > 0.0).then_some(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgba, RgbaImage};

    #[test]
    fn wide_images_are_scaled_to_the_cap() {
        let s = ImageSize::new(1080.0, 540.0).reasonable(540.0);
        assert_eq!(s, ImageSize::new(540.0, 270.0));
    }

    #[test]
    fn narrow_images_are_unchanged() {
        let s = ImageSize::new(300.0, 900.0).reasonable(540.0);
        assert_eq!(s, ImageSize::new(300.0, 900.0));
    }

    #[test]
    fn exactly_cap_width_keeps_height() {
        let s = ImageSize::new(540.0, 123.0).reasonable(540.0);
        assert_eq!(s, ImageSize::new(540.0, 123.0));
    }

    #[test]
    fn probe_reads_png_header() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(12, 7, Rgba([0, 0, 0, 255])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        assert_eq!(ImageSize::probe(&buf), Some(ImageSize::new(12.0, 7.0)));
        assert_eq!(ImageSize::probe(b"<html>not an image</html>"), None);
    }

    #[test]
    fn attribute_lengths() {
        assert_eq!(
            ImageSize::from_attributes(Some("300px"), Some(" 150 ")),
            Some(ImageSize::new(300.0, 150.0))
        );
        assert_eq!(ImageSize::from_attributes(Some("60%"), Some("10")), None);
        assert_eq!(ImageSize::from_attributes(Some("10"), None), None);
        assert_eq!(ImageSize::from_attributes(Some("0"), Some("10")), None);
    }
}
