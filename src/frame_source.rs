use std::time::Duration;

use anyhow::{Context, Result};
use image::{ImageFormat, RgbaImage};

use crate::error_codes::CodedError;
use crate::gif_compositor::{decode_gif, GifCompositor};

/// A full bitmap plus its timing.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbaImage,
    /// How long the frame stays on screen once drawn.
    pub delay: Duration,
    /// Extra plays requested by the source: `-1` forever, `0` once.
    pub loop_count: i64,
}

/// Frames decoded from one input, in display order.
pub enum FrameSource {
    Still(Option<Frame>),
    Gif {
        compositor: GifCompositor,
        remaining: usize,
    },
}

impl FrameSource {
    /// Sniffs the container format and decodes it.
    ///
    /// GIF containers are read in full here; compositing happens lazily as
    /// frames are pulled.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let format = image::guess_format(bytes).map_err(|_| {
            CodedError::input("UNSUPPORTED_FORMAT", "unrecognized image format")
        })?;

        match format {
            ImageFormat::Gif => {
                let gif = decode_gif(bytes).context("failed to decode GIF")?;
                let compositor = GifCompositor::new(gif);
                let remaining = compositor.layer_count();
                Ok(Self::Gif {
                    compositor,
                    remaining,
                })
            }
            ImageFormat::Png | ImageFormat::Jpeg => {
                let image = image::load_from_memory_with_format(bytes, format).map_err(|error| {
                    CodedError::input(
                        "IMAGE_DECODE",
                        format!("malformed {format:?} image: {error}"),
                    )
                })?;
                tracing::debug!(
                    ?format,
                    width = image.width(),
                    height = image.height(),
                    "decoded still image"
                );
                Ok(Self::Still(Some(Frame {
                    image: image.to_rgba8(),
                    delay: Duration::ZERO,
                    loop_count: 0,
                })))
            }
            other => Err(CodedError::input(
                "UNSUPPORTED_FORMAT",
                format!("unsupported image format {other:?}; expected JPEG, PNG, or GIF"),
            )
            .into()),
        }
    }

    /// Number of frames left to yield.
    pub fn len(&self) -> usize {
        match self {
            Self::Still(frame) => usize::from(frame.is_some()),
            Self::Gif { remaining, .. } => *remaining,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Iterator for FrameSource {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        match self {
            Self::Still(frame) => frame.take(),
            Self::Gif {
                compositor,
                remaining,
            } => {
                if *remaining == 0 {
                    return None;
                }
                let index = compositor.next_layer_index();
                let image = compositor.next_frame()?;
                *remaining -= 1;
                let gif = compositor.gif();
                Some(Frame {
                    image,
                    delay: gif.layers[index].delay,
                    loop_count: gif.loop_count,
                })
            }
        }
    }
}
