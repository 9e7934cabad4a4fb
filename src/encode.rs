//! Frame encoding to output blobs.

use std::io::Cursor;

use anyhow::{bail, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, ExtendedColorType, ImageEncoder};

use crate::frame::ImageFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Png,
    Jpeg,
    Webp,
}

impl OutputFormat {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(OutputFormat::Png),
            "jpeg" | "jpg" => Ok(OutputFormat::Jpeg),
            "webp" => Ok(OutputFormat::Webp),
            other => bail!("unsupported output format: {other}"),
        }
    }
}

/// Encode a frame to an in-memory blob.
///
/// `quality` is 0..1 and only affects JPEG: PNG is lossless by definition and
/// the `image` crate's WebP encoder is lossless-only, so for those formats the
/// value is accepted and ignored.
pub fn encode_frame(frame: &ImageFrame, format: OutputFormat, quality: f32) -> Result<Vec<u8>> {
    let bitmap = frame.bitmap();
    let (w, h) = (frame.width(), frame.height());
    let mut out = Cursor::new(Vec::new());

    match format {
        OutputFormat::Png => {
            PngEncoder::new(&mut out)
                .write_image(bitmap.as_raw(), w, h, ExtendedColorType::Rgba8)
                .context("png encode failed")?;
        }
        OutputFormat::Jpeg => {
            // JPEG has no alpha channel; flatten first.
            let rgb = DynamicImage::ImageRgba8(bitmap.clone()).to_rgb8();
            let q = (quality.clamp(0.0, 1.0) * 100.0).round().max(1.0) as u8;
            JpegEncoder::new_with_quality(&mut out, q)
                .write_image(rgb.as_raw(), w, h, ExtendedColorType::Rgb8)
                .context("jpeg encode failed")?;
        }
        OutputFormat::Webp => {
            WebPEncoder::new_lossless(&mut out)
                .encode(bitmap.as_raw(), w, h, ExtendedColorType::Rgba8)
                .context("webp encode failed")?;
        }
    }

    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;

    fn frame() -> ImageFrame {
        let mut img = RgbaImage::new(8, 6);
        for (x, y, p) in img.enumerate_pixels_mut() {
            *p = image::Rgba([x as u8 * 30, y as u8 * 40, 128, 255]);
        }
        ImageFrame::new(img)
    }

    #[test]
    fn parse_accepts_known_formats() {
        assert_eq!(OutputFormat::parse("png").unwrap(), OutputFormat::Png);
        assert_eq!(OutputFormat::parse("JPEG").unwrap(), OutputFormat::Jpeg);
        assert_eq!(OutputFormat::parse("jpg").unwrap(), OutputFormat::Jpeg);
        assert_eq!(OutputFormat::parse("webp").unwrap(), OutputFormat::Webp);
        assert!(OutputFormat::parse("tiff").is_err());
    }

    #[test]
    fn png_roundtrips_pixels_exactly() {
        let f = frame();
        let blob = encode_frame(&f, OutputFormat::Png, 0.92).unwrap();
        let decoded = image::load_from_memory(&blob).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (8, 6));
        assert_eq!(decoded.as_raw(), f.bitmap().as_raw());
    }

    #[test]
    fn png_blob_is_deterministic() {
        let f = frame();
        let a = encode_frame(&f, OutputFormat::Png, 0.92).unwrap();
        let b = encode_frame(&f, OutputFormat::Png, 0.92).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn jpeg_and_webp_produce_decodable_blobs() {
        let f = frame();
        let jpeg = encode_frame(&f, OutputFormat::Jpeg, 0.8).unwrap();
        let webp = encode_frame(&f, OutputFormat::Webp, 0.8).unwrap();
        assert_eq!(image::load_from_memory(&jpeg).unwrap().to_rgba8().dimensions(), (8, 6));
        assert_eq!(image::load_from_memory(&webp).unwrap().to_rgba8().dimensions(), (8, 6));
    }
}
