use std::io::{self, Write};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use termpix::ansi_palette::{PaletteKind, ANSI_CLEAR};
use termpix::cancel::CancelToken;
use termpix::config::{FetchConfig, RenderConfig, RenderOptions, DEFAULT_PALETTE, DEFAULT_USER_AGENT};
use termpix::error_codes::{exit_code_for, find_coded_error, CodedError};
use termpix::frame_source::FrameSource;
use termpix::input::InputSource;
use termpix::pipeline::run_pipeline;
use termpix::sizing::{Size, DEFAULT_FONT_ASPECT};

const INTERRUPTED_EXIT_CODE: u8 = 130;

#[derive(Debug, Parser)]
#[command(name = "termpix")]
#[command(version)]
#[command(about = "Render JPEG, PNG, and GIF images in the terminal with ANSI colors")]
struct Cli {
    /// Image paths, file:// URLs, or http(s):// URLs. Reads stdin when empty.
    inputs: Vec<String>,

    /// Target width in character cells.
    #[arg(long)]
    width: Option<u32>,

    /// Target height in lines.
    #[arg(long)]
    height: Option<u32>,

    /// Fit the current terminal; overrides --width and --height.
    #[arg(long)]
    scale: bool,

    #[arg(long, default_value = DEFAULT_PALETTE, help = palette_help())]
    color: String,

    /// Width-to-height ratio of one terminal character cell.
    #[arg(long, default_value_t = DEFAULT_FONT_ASPECT)]
    font_aspect: f64,

    /// Minimum alpha fraction in [0, 1] for a pixel to be drawn.
    #[arg(long, default_value_t = 1.0)]
    alpha_min: f64,

    /// Play animations in place instead of printing frames one after another.
    #[arg(long)]
    animate: bool,

    /// Extra plays after the first; -1 loops forever.
    #[arg(long, allow_negative_numbers = true)]
    repeat: Option<i64>,

    /// Per-frame delay in milliseconds, overriding the image's own timing.
    #[arg(long)]
    delay: Option<u64>,

    /// Text printed before and after every line.
    #[arg(long, default_value = "")]
    pad: String,

    /// Read the image from stdin.
    #[arg(long)]
    stdin: bool,

    #[arg(long, default_value = DEFAULT_USER_AGENT)]
    user_agent: String,

    /// HTTP timeout in seconds.
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Log more to stderr (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn palette_help() -> String {
    format!("Palette: {}", PaletteKind::names().join(", "))
}

enum Outcome {
    Completed,
    Interrupted,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(Outcome::Completed) => ExitCode::SUCCESS,
        Ok(Outcome::Interrupted) => ExitCode::from(INTERRUPTED_EXIT_CODE),
        Err(error) => {
            report_error(&error);
            ExitCode::from(u8::try_from(exit_code_for(&error)).unwrap_or(1))
        }
    }
}

fn init_tracing(verbose: u8) {
    let default_filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<Outcome> {
    if cli.stdin && !cli.inputs.is_empty() {
        return Err(CodedError::config(
            "STDIN_WITH_INPUTS",
            "no input arguments are accepted together with --stdin",
        )
        .into());
    }

    let options = RenderOptions {
        width: cli.width,
        height: cli.height,
        scale_to: if cli.scale {
            Some(terminal_dimensions()?)
        } else {
            None
        },
        palette: cli.color,
        font_aspect: cli.font_aspect,
        alpha_min: cli.alpha_min,
        animate: cli.animate,
        repeat: cli.repeat,
        delay_ms: cli.delay,
        pad: cli.pad,
    };
    let config = RenderConfig::from_options(&options)?;
    let fetch = FetchConfig {
        user_agent: cli.user_agent,
        timeout: Duration::from_secs(cli.timeout),
    };
    tracing::debug!(palette = config.palette.as_str(), ?config.width, ?config.height, "render config ready");

    let sources = if cli.inputs.is_empty() {
        vec![InputSource::Stdin]
    } else {
        cli.inputs
            .iter()
            .map(|raw| InputSource::parse(raw))
            .collect::<Result<Vec<_>>>()?
    };

    let cancel = CancelToken::new();
    install_interrupt_handler(&cancel)?;

    // every input is read and decoded before anything is drawn
    let mut decoded = Vec::with_capacity(sources.len());
    for source in &sources {
        if cancel.is_cancelled() {
            return Ok(Outcome::Interrupted);
        }
        let label = source.display_label();
        let bytes = source
            .read_bytes(&fetch)
            .with_context(|| format!("failed to load {label}"))?;
        let frames = FrameSource::decode(&bytes).with_context(|| format!("failed to decode {label}"))?;
        tracing::info!(input = %label, frames = frames.len(), "decoded input");
        decoded.push(frames);
    }

    // all inputs play as one sequence, so repeats and cursor-up span inputs
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let summary = run_pipeline(decoded.into_iter().flatten(), &config, &mut out, &cancel)?;
    tracing::info!(frames = summary.frames_drawn, "playback finished");
    if summary.cancelled {
        return Ok(Outcome::Interrupted);
    }
    Ok(Outcome::Completed)
}

fn terminal_dimensions() -> Result<Size> {
    let (terminal_size::Width(columns), terminal_size::Height(rows)) =
        terminal_size::terminal_size().ok_or_else(|| {
            CodedError::config("TERMINAL_SIZE", "--scale requires stdout to be a terminal")
        })?;
    Ok(Size::new(u32::from(columns), u32::from(rows)))
}

/// First Ctrl-C cancels playback; a second one exits immediately.
fn install_interrupt_handler(cancel: &CancelToken) -> Result<()> {
    let cancel = cancel.clone();
    ctrlc::set_handler(move || {
        if cancel.is_cancelled() {
            // stdout may be locked by the draw loop
            eprint!("{ANSI_CLEAR}");
            std::process::exit(i32::from(INTERRUPTED_EXIT_CODE));
        }
        cancel.cancel();
    })
    .context("failed to install interrupt handler")
}

fn report_error(error: &anyhow::Error) {
    let mut stderr = io::stderr().lock();
    let coded = find_coded_error(error);
    let _ = match coded {
        Some(coded) => writeln!(stderr, "error[{}]: {}", coded.code, coded.message),
        None => writeln!(stderr, "error: {error}"),
    };
    for (index, cause) in error.chain().enumerate() {
        let headline = match coded {
            Some(_) => cause.is::<CodedError>(),
            None => index == 0,
        };
        if !headline {
            let _ = writeln!(stderr, "  note: {cause}");
        }
    }
}
