//! GIF layer compositing.
//!
//! A GIF stores each frame as a delta: a sub-rectangle of indexed pixels plus
//! an instruction for what to do with the canvas once that frame has been
//! shown. [`GifCompositor`] replays those deltas onto one persistent virtual
//! canvas and hands out a full-canvas copy per layer.

use std::io::Cursor;
use std::time::Duration;

use anyhow::Result;
use image::{Rgba, RgbaImage};

use crate::error_codes::CodedError;

const CLEARED: Rgba<u8> = Rgba([0, 0, 0, 0]);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisposalMethod {
    Unspecified,
    None,
    Background,
    Previous,
}

impl From<gif::DisposalMethod> for DisposalMethod {
    fn from(value: gif::DisposalMethod) -> Self {
        match value {
            gif::DisposalMethod::Any => Self::Unspecified,
            gif::DisposalMethod::Keep => Self::None,
            gif::DisposalMethod::Background => Self::Background,
            gif::DisposalMethod::Previous => Self::Previous,
        }
    }
}

/// One image descriptor of a GIF, still in indexed form.
#[derive(Debug, Clone)]
pub struct GifLayer {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
    /// Local color table, if the layer carries one.
    pub palette: Option<Vec<[u8; 3]>>,
    pub transparent: Option<u8>,
    pub disposal: DisposalMethod,
    pub delay: Duration,
    /// Row-major color indices, `width * height` long.
    pub indices: Vec<u8>,
}

impl GifLayer {
    fn right(&self) -> u32 {
        self.left + self.width
    }

    fn bottom(&self) -> u32 {
        self.top + self.height
    }
}

#[derive(Debug, Clone)]
pub struct DecodedGif {
    /// Logical screen size from the header.
    pub width: u32,
    pub height: u32,
    pub global_palette: Option<Vec<[u8; 3]>>,
    pub background_index: Option<u8>,
    pub layers: Vec<GifLayer>,
    /// `-1` loops forever, otherwise the number of extra plays.
    pub loop_count: i64,
}

impl DecodedGif {
    /// Union of the logical screen and every layer rectangle.
    pub fn canvas_size(&self) -> (u32, u32) {
        self.layers
            .iter()
            .fold((self.width, self.height), |(width, height), layer| {
                (width.max(layer.right()), height.max(layer.bottom()))
            })
    }

    fn background_color(&self) -> Rgba<u8> {
        let index = match self.background_index {
            Some(index) => usize::from(index),
            None => return CLEARED,
        };
        self.global_palette
            .as_ref()
            .and_then(|palette| palette.get(index))
            .map(|[r, g, b]| Rgba([*r, *g, *b, 0xff]))
            .unwrap_or(CLEARED)
    }
}

/// Reads every layer of a GIF without compositing it.
pub fn decode_gif(bytes: &[u8]) -> Result<DecodedGif> {
    let mut options = gif::DecodeOptions::new();
    options.set_color_output(gif::ColorOutput::Indexed);
    let mut decoder = options
        .read_info(Cursor::new(bytes))
        .map_err(|error| CodedError::input("GIF_DECODE", format!("malformed GIF header: {error}")))?;

    let global_palette = decoder.global_palette().map(rgb_triples);
    let background_index = decoder.bg_color().and_then(|index| u8::try_from(index).ok());
    let width = u32::from(decoder.width());
    let height = u32::from(decoder.height());

    let mut layers = Vec::new();
    loop {
        let frame = decoder.read_next_frame().map_err(|error| {
            CodedError::input(
                "GIF_DECODE",
                format!("malformed GIF frame {}: {error}", layers.len()),
            )
        })?;
        let Some(frame) = frame else {
            break;
        };
        let layer = GifLayer {
            left: u32::from(frame.left),
            top: u32::from(frame.top),
            width: u32::from(frame.width),
            height: u32::from(frame.height),
            palette: frame.palette.as_deref().map(rgb_triples),
            transparent: frame.transparent,
            disposal: frame.dispose.into(),
            delay: Duration::from_millis(u64::from(frame.delay) * 10),
            indices: frame.buffer.to_vec(),
        };
        let expected = layer.width as usize * layer.height as usize;
        if layer.indices.len() < expected {
            return Err(CodedError::input(
                "GIF_GEOMETRY",
                format!(
                    "GIF frame {} holds {} pixels for a {}x{} rectangle",
                    layers.len(),
                    layer.indices.len(),
                    layer.width,
                    layer.height
                ),
            )
            .into());
        }
        layers.push(layer);
    }

    let loop_count = match decoder.repeat() {
        gif::Repeat::Infinite => -1,
        gif::Repeat::Finite(count) => i64::from(count),
    };

    tracing::debug!(
        width,
        height,
        layers = layers.len(),
        loop_count,
        "decoded gif container"
    );

    Ok(DecodedGif {
        width,
        height,
        global_palette,
        background_index,
        layers,
        loop_count,
    })
}

fn rgb_triples(raw: &[u8]) -> Vec<[u8; 3]> {
    raw.chunks_exact(3)
        .map(|chunk| [chunk[0], chunk[1], chunk[2]])
        .collect()
}

pub struct GifCompositor {
    gif: DecodedGif,
    canvas: RgbaImage,
    saved: Option<RgbaImage>,
    background: Rgba<u8>,
    next_layer: usize,
}

impl GifCompositor {
    pub fn new(gif: DecodedGif) -> Self {
        let (width, height) = gif.canvas_size();
        let background = gif.background_color();
        Self {
            gif,
            canvas: RgbaImage::from_pixel(width, height, CLEARED),
            saved: None,
            background,
            next_layer: 0,
        }
    }

    pub fn gif(&self) -> &DecodedGif {
        &self.gif
    }

    pub fn layer_count(&self) -> usize {
        self.gif.layers.len()
    }

    /// Index of the layer the next call to [`Self::next_frame`] will draw.
    pub fn next_layer_index(&self) -> usize {
        self.next_layer
    }

    /// Composites the next layer, wrapping to layer 0 after the last one.
    pub fn next_frame(&mut self) -> Option<RgbaImage> {
        if self.gif.layers.is_empty() {
            return None;
        }
        let index = self.next_layer;
        self.render_layer(index);
        self.next_layer = (index + 1) % self.gif.layers.len();
        Some(self.canvas.clone())
    }

    /// One composited bitmap per layer, in order.
    pub fn composite_all(gif: DecodedGif) -> Vec<RgbaImage> {
        let mut compositor = Self::new(gif);
        (0..compositor.layer_count())
            .filter_map(|_| compositor.next_frame())
            .collect()
    }

    fn render_layer(&mut self, index: usize) {
        if index == 0 {
            let wrap_disposal = self
                .gif
                .layers
                .last()
                .map(|layer| layer.disposal)
                .unwrap_or(DisposalMethod::Unspecified);
            let fill = if wrap_disposal == DisposalMethod::Background {
                self.background
            } else {
                CLEARED
            };
            fill_canvas(&mut self.canvas, fill);
            self.saved = None;
        } else {
            match self.gif.layers[index - 1].disposal {
                DisposalMethod::Background => fill_canvas(&mut self.canvas, self.background),
                DisposalMethod::Previous => {
                    if let Some(saved) = self.saved.take() {
                        self.canvas = saved;
                    }
                }
                DisposalMethod::None | DisposalMethod::Unspecified => {}
            }
        }

        if self.gif.layers[index].disposal == DisposalMethod::Previous {
            self.saved = Some(self.canvas.clone());
        }

        let layer = &self.gif.layers[index];
        let palette = layer
            .palette
            .as_deref()
            .or(self.gif.global_palette.as_deref())
            .unwrap_or(&[]);
        draw_layer(&mut self.canvas, layer, palette);
    }
}

fn fill_canvas(canvas: &mut RgbaImage, color: Rgba<u8>) {
    for pixel in canvas.pixels_mut() {
        *pixel = color;
    }
}

// GIF89a transparency is a single index, so pixels are kept or overwritten,
// never blended.
fn draw_layer(canvas: &mut RgbaImage, layer: &GifLayer, palette: &[[u8; 3]]) {
    let (canvas_width, canvas_height) = canvas.dimensions();
    let stride = layer.width as usize;
    for y in 0..layer.height {
        let canvas_y = layer.top + y;
        if canvas_y >= canvas_height {
            break;
        }
        for x in 0..layer.width {
            let canvas_x = layer.left + x;
            if canvas_x >= canvas_width {
                break;
            }
            let index = layer.indices[y as usize * stride + x as usize];
            if layer.transparent == Some(index) {
                continue;
            }
            let color = palette
                .get(usize::from(index))
                .map(|[r, g, b]| Rgba([*r, *g, *b, 0xff]))
                .unwrap_or(CLEARED);
            canvas.put_pixel(canvas_x, canvas_y, color);
        }
    }
}
