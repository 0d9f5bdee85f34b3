//! Terminal color palettes and the quantizers that map pixels onto them.
//!
//! Every quantizer answers the same question: which background-color escape
//! code best represents this pixel? Pixels whose alpha falls below the
//! configured threshold map to [`AnsiCode::Clear`] so the terminal's own
//! background shows through.

use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;

use image::Rgba;

use crate::error_codes::CodedError;

pub const ANSI_CLEAR: &str = "\x1b[0m";

const GRAY_RAMP_BEGIN: u8 = 232;
const GRAY_RAMP_STEPS: u32 = 24;
const CUBE_BEGIN: u8 = 16;
const CUBE_STEPS: [u8; 6] = [0x00, 0x5f, 0x87, 0xaf, 0xd7, 0xff];

/// Reference colors for the 8-color palette, in SGR index order.
pub const PALETTE8: [[u8; 3]; 8] = [
    [0, 0, 0],       // black
    [191, 25, 25],   // red
    [25, 184, 25],   // green
    [188, 110, 25],  // orange
    [25, 25, 184],   // blue
    [186, 25, 186],  // magenta
    [25, 187, 187],  // cyan
    [178, 178, 178], // gray
];

/// A background-color escape code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnsiCode {
    /// No background color: `ESC[0m`.
    Clear,
    /// One of the 8 basic background colors: `ESC[4{n}m`.
    Color8(u8),
    /// An xterm 256-color background: `ESC[48;5;{n}m`.
    Color256(u8),
}

impl AnsiCode {
    pub fn write_to<W: Write + ?Sized>(self, out: &mut W) -> io::Result<()> {
        match self {
            Self::Clear => out.write_all(ANSI_CLEAR.as_bytes()),
            Self::Color8(index) => write!(out, "\x1b[4{}m", index),
            Self::Color256(index) => write!(out, "\x1b[48;5;{}m", index),
        }
    }
}

impl fmt::Display for AnsiCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clear => f.write_str(ANSI_CLEAR),
            Self::Color8(index) => write!(f, "\x1b[4{}m", index),
            Self::Color256(index) => write!(f, "\x1b[48;5;{}m", index),
        }
    }
}

/// Alpha cutoff in the 16-bit alpha domain. Pixels with `alpha16 < threshold`
/// are transparent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlphaThreshold(u32);

impl AlphaThreshold {
    pub const OPAQUE: Self = Self(0xffff);

    /// Builds a threshold from a fraction of full opacity in `[0, 1]`.
    pub fn from_fraction(fraction: f64) -> Self {
        let clamped = fraction.clamp(0.0, 1.0);
        Self((clamped * f64::from(0xffff_u32)) as u32)
    }

    pub fn is_transparent(self, pixel: Rgba<u8>) -> bool {
        widen(pixel[3]) < self.0
    }
}

impl Default for AlphaThreshold {
    fn default() -> Self {
        Self::OPAQUE
    }
}

pub trait Quantizer: Send + Sync {
    fn quantize(&self, pixel: Rgba<u8>, threshold: AlphaThreshold) -> AnsiCode;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaletteKind {
    Gray,
    Color8,
    Color256Fast,
    Color256Precise,
}

const PALETTE_NAMES: &[(&str, PaletteKind)] = &[
    ("256", PaletteKind::Color256Precise),
    ("256-color", PaletteKind::Color256Precise),
    ("256-fast", PaletteKind::Color256Fast),
    ("8", PaletteKind::Color8),
    ("8-color", PaletteKind::Color8),
    ("gray", PaletteKind::Gray),
    ("grayscale", PaletteKind::Gray),
    ("grey", PaletteKind::Gray),
    ("greyscale", PaletteKind::Gray),
];

impl PaletteKind {
    pub fn names() -> Vec<&'static str> {
        PALETTE_NAMES.iter().map(|(name, _)| *name).collect()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gray => "gray",
            Self::Color8 => "8",
            Self::Color256Fast => "256-fast",
            Self::Color256Precise => "256",
        }
    }
}

impl FromStr for PaletteKind {
    type Err = CodedError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        PALETTE_NAMES
            .iter()
            .find_map(|(name, kind)| (*name == normalized).then_some(*kind))
            .ok_or_else(|| {
                CodedError::config(
                    "UNKNOWN_PALETTE",
                    format!(
                        "color palette '{}' not one of {:?}",
                        raw,
                        PaletteKind::names()
                    ),
                )
            })
    }
}

impl Quantizer for PaletteKind {
    fn quantize(&self, pixel: Rgba<u8>, threshold: AlphaThreshold) -> AnsiCode {
        if threshold.is_transparent(pixel) {
            return AnsiCode::Clear;
        }
        let [r, g, b, _] = pixel.0;
        match self {
            Self::Gray => AnsiCode::Color256(gray_index(r, g, b)),
            Self::Color8 => AnsiCode::Color8(nearest_palette8(r, g, b)),
            Self::Color256Fast => AnsiCode::Color256(cube_index_fast(r, g, b)),
            Self::Color256Precise => AnsiCode::Color256(cube_index_precise(r, g, b)),
        }
    }
}

fn widen(channel: u8) -> u32 {
    u32::from(channel) * 0x101
}

// round x to the nearest integer biased toward +Inf.
fn round_half_up(x: f64) -> f64 {
    (x + 0.5).floor()
}

pub fn luminance(r: u8, g: u8, b: u8) -> u8 {
    let y = (19595 * widen(r) + 38470 * widen(g) + 7471 * widen(b) + (1 << 15)) >> 24;
    y as u8
}

fn gray_index(r: u8, g: u8, b: u8) -> u8 {
    let ratio = f64::from(GRAY_RAMP_STEPS - 1) / 255.0;
    let scaled = round_half_up(ratio * f64::from(luminance(r, g, b))) as u8;
    GRAY_RAMP_BEGIN + scaled
}

fn nearest_palette8(r: u8, g: u8, b: u8) -> u8 {
    let mut best = 0;
    let mut best_distance = u32::MAX;
    for (index, reference) in PALETTE8.iter().enumerate() {
        let distance = distance_sq([r, g, b], *reference);
        // strict comparison keeps the first index on ties
        if distance < best_distance {
            best = index;
            best_distance = distance;
        }
    }
    best as u8
}

fn cube_index_fast(r: u8, g: u8, b: u8) -> u8 {
    let scale = |channel: u8| round_half_up(5.0 * f64::from(channel) / 255.0) as u8;
    scale(r) * 36 + scale(g) * 6 + scale(b) + CUBE_BEGIN
}

fn to_cube_step(value: u8) -> u8 {
    if value < 48 {
        0
    } else if value < 114 {
        1
    } else {
        (value - 35) / 40
    }
}

fn cube_index_precise(r: u8, g: u8, b: u8) -> u8 {
    let (qr, qg, qb) = (to_cube_step(r), to_cube_step(g), to_cube_step(b));
    let cube = [
        CUBE_STEPS[qr as usize],
        CUBE_STEPS[qg as usize],
        CUBE_STEPS[qb as usize],
    ];
    let cube_index = CUBE_BEGIN + 36 * qr + 6 * qg + qb;
    if cube == [r, g, b] {
        return cube_index;
    }

    let average = (u32::from(r) + u32::from(g) + u32::from(b)) / 3;
    let gray_step = if average > 238 {
        23
    } else {
        average.saturating_sub(3) / 10
    };
    let gray = (8 + 10 * gray_step) as u8;

    let cube_distance = distance_sq(cube, [r, g, b]);
    let gray_distance = distance_sq([gray, gray, gray], [r, g, b]);
    if gray_distance < cube_distance {
        GRAY_RAMP_BEGIN + gray_step as u8
    } else {
        cube_index
    }
}

fn distance_sq(a: [u8; 3], b: [u8; 3]) -> u32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let delta = i32::from(*x) - i32::from(*y);
            (delta * delta) as u32
        })
        .sum()
}
