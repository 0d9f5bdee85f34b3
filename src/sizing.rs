//! Output sizing.
//!
//! Terminal cells are taller than they are wide, and each output "pixel" is a
//! single cell. Source dimensions are first normalized by the font aspect
//! ratio, then fit into the optional width/height bounds.

pub const DEFAULT_FONT_ASPECT: f64 = 0.5;
pub const MIN_FONT_ASPECT: f64 = 0.05;
pub const MAX_FONT_ASPECT: f64 = 20.0;
/// Largest bitmap the resize stage will allocate.
pub const MAX_OUTPUT_PIXELS: u64 = 1 << 26;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    fn aspect(self) -> f64 {
        f64::from(self.width) / f64::from(self.height)
    }
}

/// Scales `size` horizontally by `1 / font_aspect`.
pub fn size_normal(size: Size, font_aspect: f64) -> Size {
    if size.is_empty() {
        return size;
    }
    let width = f64::from(size.width) / font_aspect;
    Size::new(round_dimension(width), size.height)
}

/// Returns the largest normalized size that fits within `width` x `height`.
///
/// A bound of `None` leaves that dimension unconstrained, so
/// `size_rect(size, None, None, a) == size_normal(size, a)`.
pub fn size_rect(size: Size, width: Option<u32>, height: Option<u32>, font_aspect: f64) -> Size {
    let normal = size_normal(size, font_aspect);
    if normal.is_empty() {
        return normal;
    }
    let width = width.filter(|value| *value > 0);
    let height = height.filter(|value| *value > 0);
    match (width, height) {
        (None, None) => normal,
        (Some(width), None) => size_width(normal, width),
        (None, Some(height)) => size_height(normal, height),
        (Some(width), Some(height)) => {
            let bounds = Size::new(width, height);
            if normal.aspect() > bounds.aspect() {
                // wider than the box: the image cannot fill it vertically
                size_width(normal, width)
            } else {
                size_height(normal, height)
            }
        }
    }
}

fn size_width(normal: Size, width: u32) -> Size {
    let height = f64::from(width) / normal.aspect();
    Size::new(width, round_dimension(height))
}

fn size_height(normal: Size, height: u32) -> Size {
    let width = f64::from(height) * normal.aspect();
    Size::new(round_dimension(width), height)
}

// round x to the nearest integer biased toward +Inf, never below one cell.
fn round_dimension(x: f64) -> u32 {
    ((x + 0.5).floor() as u32).max(1)
}
