use std::io::{self, Write};

use image::RgbaImage;

use crate::ansi_palette::{AlphaThreshold, AnsiCode, PaletteKind, Quantizer};
use crate::frame_buffer::FrameBuffer;

/// Turns bitmaps into rows of colored spaces.
#[derive(Debug, Clone)]
pub struct AnsiEncoder {
    palette: PaletteKind,
    threshold: AlphaThreshold,
    pad: String,
}

impl AnsiEncoder {
    pub fn new(palette: PaletteKind, threshold: AlphaThreshold, pad: impl Into<String>) -> Self {
        Self {
            palette,
            threshold,
            pad: pad.into(),
        }
    }

    /// Appends one line per image row to `out` and returns the line count.
    ///
    /// Each line is `pad`, one space per pixel preceded by its background code
    /// when that code differs from the previous pixel's, `pad`, then a reset.
    pub fn encode(&self, image: &RgbaImage, out: &mut FrameBuffer) -> io::Result<usize> {
        let (width, height) = image.dimensions();
        for y in 0..height {
            // every line starts from the reset state left by the previous one
            let mut last = AnsiCode::Clear;
            out.write_all(self.pad.as_bytes())?;
            for x in 0..width {
                let code = self.palette.quantize(*image.get_pixel(x, y), self.threshold);
                if code != last {
                    code.write_to(out)?;
                    last = code;
                }
                out.write_all(b" ")?;
            }
            out.write_all(self.pad.as_bytes())?;
            AnsiCode::Clear.write_to(out)?;
            out.write_all(b"\n")?;
        }
        Ok(height as usize)
    }
}

#[cfg(test)]
mod tests {
    use image::{Rgba, RgbaImage};

    use super::AnsiEncoder;
    use crate::ansi_palette::{AlphaThreshold, PaletteKind};
    use crate::frame_buffer::FrameBuffer;

    fn encode(encoder: &AnsiEncoder, image: &RgbaImage) -> (String, usize) {
        let mut buffer = FrameBuffer::new();
        let lines = encoder.encode(image, &mut buffer).unwrap();
        (String::from_utf8(buffer.as_bytes().to_vec()).unwrap(), lines)
    }

    #[test]
    fn single_red_pixel_is_one_code_one_space_one_reset() {
        let encoder = AnsiEncoder::new(PaletteKind::Color256Precise, AlphaThreshold::OPAQUE, "");
        let image = RgbaImage::from_pixel(1, 1, Rgba([255, 0, 0, 255]));
        let (text, lines) = encode(&encoder, &image);
        assert_eq!(text, "\x1b[48;5;196m \x1b[0m\n");
        assert_eq!(lines, 1);
    }

    #[test]
    fn repeated_codes_are_latched_within_a_line() {
        let encoder = AnsiEncoder::new(PaletteKind::Color8, AlphaThreshold::OPAQUE, "");
        let mut image = RgbaImage::from_pixel(3, 1, Rgba([0, 0, 0, 255]));
        image.put_pixel(2, 0, Rgba([191, 25, 25, 255]));
        let (text, _) = encode(&encoder, &image);
        assert_eq!(text, "\x1b[40m  \x1b[41m \x1b[0m\n");
    }

    #[test]
    fn every_line_starts_fresh_after_its_reset() {
        let encoder = AnsiEncoder::new(PaletteKind::Color8, AlphaThreshold::OPAQUE, ">");
        let image = RgbaImage::from_pixel(1, 2, Rgba([25, 184, 25, 255]));
        let (text, lines) = encode(&encoder, &image);
        assert_eq!(text, ">\x1b[42m >\x1b[0m\n>\x1b[42m >\x1b[0m\n");
        assert_eq!(lines, 2);
    }

    #[test]
    fn transparent_pixels_emit_no_code_at_line_start() {
        let encoder = AnsiEncoder::new(PaletteKind::Gray, AlphaThreshold::OPAQUE, "");
        let mut image = RgbaImage::from_pixel(2, 1, Rgba([0, 0, 0, 0]));
        image.put_pixel(1, 0, Rgba([255, 255, 255, 255]));
        let (text, _) = encode(&encoder, &image);
        assert_eq!(text, " \x1b[48;5;255m \x1b[0m\n");
    }

    #[test]
    fn empty_image_encodes_nothing() {
        let encoder = AnsiEncoder::new(PaletteKind::Gray, AlphaThreshold::OPAQUE, " ");
        let (text, lines) = encode(&encoder, &RgbaImage::new(0, 0));
        assert!(text.is_empty());
        assert_eq!(lines, 0);
    }
}
