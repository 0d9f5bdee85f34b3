use std::time::Duration;

use anyhow::Result;
use image::imageops::FilterType;

use crate::ansi_palette::{AlphaThreshold, PaletteKind};
use crate::error_codes::CodedError;
use crate::sizing::{Size, DEFAULT_FONT_ASPECT, MAX_FONT_ASPECT, MIN_FONT_ASPECT};

pub const DEFAULT_PALETTE: &str = "256";
pub const DEFAULT_FRAME_DELAY: Duration = Duration::from_millis(100);
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_USER_AGENT: &str = concat!("termpix/", env!("CARGO_PKG_VERSION"));

/// Raw option values as they arrive from the command line.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Terminal size to fit, when scaling to the terminal was requested.
    pub scale_to: Option<Size>,
    pub palette: String,
    pub font_aspect: f64,
    pub alpha_min: f64,
    pub animate: bool,
    pub repeat: Option<i64>,
    pub delay_ms: Option<u64>,
    pub pad: String,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            width: None,
            height: None,
            scale_to: None,
            palette: DEFAULT_PALETTE.to_owned(),
            font_aspect: DEFAULT_FONT_ASPECT,
            alpha_min: 1.0,
            animate: false,
            repeat: None,
            delay_ms: None,
            pad: String::new(),
        }
    }
}

/// Validated, immutable rendering configuration shared by every stage.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub palette: PaletteKind,
    pub alpha_threshold: AlphaThreshold,
    pub font_aspect: f64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub animate: bool,
    pub repeat: Option<i64>,
    pub forced_delay: Option<Duration>,
    pub pad: String,
    pub resize_filter: FilterType,
}

impl RenderConfig {
    pub fn from_options(options: &RenderOptions) -> Result<Self> {
        let palette = options.palette.parse::<PaletteKind>()?;

        if !(MIN_FONT_ASPECT..=MAX_FONT_ASPECT).contains(&options.font_aspect) {
            return Err(CodedError::config(
                "INVALID_FONT_ASPECT",
                format!(
                    "font aspect must be in [{MIN_FONT_ASPECT}, {MAX_FONT_ASPECT}] (got {})",
                    options.font_aspect
                ),
            )
            .into());
        }
        if !options.alpha_min.is_finite() || !(0.0..=1.0).contains(&options.alpha_min) {
            return Err(CodedError::config(
                "INVALID_ALPHA_MIN",
                format!("alpha threshold must be in [0, 1] (got {})", options.alpha_min),
            )
            .into());
        }

        let (width, height) = match options.scale_to {
            Some(terminal) => {
                let pad_columns = 2 * options.pad.chars().count() as u32;
                (
                    Some(terminal.width.saturating_sub(pad_columns).max(1)),
                    // keep one line free for the prompt
                    Some(terminal.height.saturating_sub(1).max(1)),
                )
            }
            None => (
                options.width.filter(|value| *value > 0),
                options.height.filter(|value| *value > 0),
            ),
        };

        Ok(Self {
            palette,
            alpha_threshold: AlphaThreshold::from_fraction(options.alpha_min),
            font_aspect: options.font_aspect,
            width,
            height,
            animate: options.animate,
            repeat: options.repeat,
            forced_delay: options.delay_ms.map(Duration::from_millis),
            pad: options.pad.clone(),
            resize_filter: FilterType::Nearest,
        })
    }

    /// Extra plays after the first pass: `-1` forever, `0` play once.
    ///
    /// An explicit repeat always wins. Loop counts embedded in the source only
    /// apply to animated playback.
    pub fn effective_repeat(&self, embedded: i64) -> i64 {
        match self.repeat {
            Some(repeat) => repeat.max(-1),
            None if self.animate => embedded.max(-1),
            None => 0,
        }
    }

    /// How long a frame stays on screen before the next one is drawn.
    pub fn effective_delay(&self, frame_delay: Duration) -> Duration {
        match self.forced_delay {
            Some(forced) => forced,
            None if frame_delay.is_zero() => DEFAULT_FRAME_DELAY,
            None => frame_delay,
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            palette: PaletteKind::Color256Precise,
            alpha_threshold: AlphaThreshold::OPAQUE,
            font_aspect: DEFAULT_FONT_ASPECT,
            width: None,
            height: None,
            animate: false,
            repeat: None,
            forced_delay: None,
            pad: String::new(),
            resize_filter: FilterType::Nearest,
        }
    }
}

/// Settings for fetching `http(s)://` inputs.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }
}
