//! Staged playback pipeline.
//!
//! ```text
//! source -> resize -> loop -> encode -> draw
//! ```
//!
//! Every arrow is a `bounded(1)` channel, so at most one frame is in flight
//! per hop and frames reach the draw stage in source order. The first four
//! stages run on named worker threads; the draw stage (the pacer) runs on the
//! calling thread because it owns the output stream. Render buffers circulate
//! between encode and draw over a second channel seeded with two buffers.

use std::io::Write;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{after, bounded, select, Receiver, Sender};
use image::imageops;

use crate::ansi_encode::AnsiEncoder;
use crate::ansi_palette::ANSI_CLEAR;
use crate::cancel::CancelToken;
use crate::config::RenderConfig;
use crate::error_codes::CodedError;
use crate::frame_buffer::FrameBuffer;
use crate::frame_source::Frame;
use crate::sizing::{size_rect, Size, MAX_OUTPUT_PIXELS};

/// One frame rendered to terminal bytes.
#[derive(Debug)]
pub struct EncodedFrame {
    pub buffer: FrameBuffer,
    pub delay: Duration,
    pub loop_count: i64,
    /// Lines drawn by `buffer`.
    pub lines: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSummary {
    pub frames_drawn: usize,
    pub cancelled: bool,
}

/// Plays `frames` to `out` and blocks until playback ends or is cancelled.
pub fn run_pipeline<I, W>(
    frames: I,
    config: &RenderConfig,
    out: &mut W,
    cancel: &CancelToken,
) -> Result<PipelineSummary>
where
    I: Iterator<Item = Frame> + Send,
    W: Write + ?Sized,
{
    let (decoded_tx, decoded_rx) = bounded::<Frame>(1);
    let (resized_tx, resized_rx) = bounded::<Frame>(1);
    let (looped_tx, looped_rx) = bounded::<Frame>(1);
    let (encoded_tx, encoded_rx) = bounded::<EncodedFrame>(1);
    let (recycle_tx, recycle_rx) = bounded::<FrameBuffer>(2);
    for buffer in FrameBuffer::pair() {
        recycle_tx
            .send(buffer)
            .map_err(|_| anyhow!("render buffer pool closed before playback"))?;
    }
    let encoder = AnsiEncoder::new(config.palette, config.alpha_threshold, config.pad.clone());

    thread::scope(|scope| {
        let mut handles = Vec::with_capacity(4);
        let spawned = (|| -> Result<()> {
            handles.push(spawn_stage(scope, "termpix-source", cancel, move || {
                source_stage(frames, decoded_tx, cancel)
            })?);
            handles.push(spawn_stage(scope, "termpix-resize", cancel, move || {
                resize_stage(decoded_rx, resized_tx, config, cancel)
            })?);
            handles.push(spawn_stage(scope, "termpix-loop", cancel, move || {
                loop_stage(resized_rx, looped_tx, config, cancel)
            })?);
            handles.push(spawn_stage(scope, "termpix-encode", cancel, move || {
                encode_stage(looped_rx, encoded_tx, recycle_rx, &encoder, cancel)
            })?);
            Ok(())
        })();
        if let Err(error) = spawned {
            cancel.cancel();
            return Err(error);
        }

        let drawn = draw_stage(encoded_rx, recycle_tx, out, config, cancel);
        if drawn.is_err() {
            cancel.cancel();
        }

        let mut stage_error = None;
        for handle in handles {
            let name = handle.thread().name().unwrap_or("stage").to_owned();
            let result = handle
                .join()
                .map_err(|_| anyhow!("{name} thread panicked"))
                .and_then(|result| result);
            if let Err(error) = result {
                tracing::debug!(stage = %name, error = %error, "pipeline stage failed");
                stage_error.get_or_insert(error);
            }
        }

        let frames_drawn = drawn?;
        // stages drop their channels before cancelling, so reset only once all have joined
        let cancelled = cancel.is_cancelled();
        let reset = if cancelled {
            out.write_all(ANSI_CLEAR.as_bytes())
                .and_then(|()| out.flush())
                .map_err(write_error)
        } else {
            Ok(())
        };
        if let Some(error) = stage_error {
            return Err(error);
        }
        reset?;
        Ok(PipelineSummary {
            frames_drawn,
            cancelled,
        })
    })
}

/// Runs `stage` on a named thread; a failing stage cancels the others.
fn spawn_stage<'scope, 'env, F>(
    scope: &'scope thread::Scope<'scope, 'env>,
    name: &str,
    cancel: &'scope CancelToken,
    stage: F,
) -> Result<thread::ScopedJoinHandle<'scope, Result<()>>>
where
    F: FnOnce() -> Result<()> + Send + 'scope,
{
    thread::Builder::new()
        .name(name.to_owned())
        .spawn_scoped(scope, move || {
            let result = stage();
            if result.is_err() {
                cancel.cancel();
            }
            result
        })
        .with_context(|| format!("failed to spawn {name} thread"))
}

/// Hands `item` downstream. Returns `false` once the pipeline is shutting down.
fn forward<T>(tx: &Sender<T>, item: T, cancel: &CancelToken) -> bool {
    if cancel.is_cancelled() {
        return false;
    }
    select! {
        send(tx, item) -> result => result.is_ok(),
        recv(cancel.receiver()) -> _ => false,
    }
}

/// Pulls the next item, or `None` when upstream closed or playback was cancelled.
fn pull<T>(rx: &Receiver<T>, cancel: &CancelToken) -> Option<T> {
    if cancel.is_cancelled() {
        return None;
    }
    select! {
        recv(rx) -> item => item.ok(),
        recv(cancel.receiver()) -> _ => None,
    }
}

fn source_stage<I>(frames: I, tx: Sender<Frame>, cancel: &CancelToken) -> Result<()>
where
    I: Iterator<Item = Frame>,
{
    for frame in frames {
        if !forward(&tx, frame, cancel) {
            break;
        }
    }
    Ok(())
}

fn resize_stage(
    rx: Receiver<Frame>,
    tx: Sender<Frame>,
    config: &RenderConfig,
    cancel: &CancelToken,
) -> Result<()> {
    while let Some(mut frame) = pull(&rx, cancel) {
        let (width, height) = frame.image.dimensions();
        let source = Size::new(width, height);
        let target = size_rect(source, config.width, config.height, config.font_aspect);
        if target.pixel_count() > MAX_OUTPUT_PIXELS {
            return Err(CodedError::config(
                "OUTPUT_TOO_LARGE",
                format!(
                    "resizing {}x{} to {}x{} exceeds {MAX_OUTPUT_PIXELS} cells",
                    source.width, source.height, target.width, target.height
                ),
            )
            .into());
        }
        if target != source {
            tracing::trace!(
                from = ?source,
                to = ?target,
                "resizing frame"
            );
            frame.image = imageops::resize(
                &frame.image,
                target.width,
                target.height,
                config.resize_filter,
            );
        }
        if !forward(&tx, frame, cancel) {
            break;
        }
    }
    Ok(())
}

fn loop_stage(
    rx: Receiver<Frame>,
    tx: Sender<Frame>,
    config: &RenderConfig,
    cancel: &CancelToken,
) -> Result<()> {
    // the loop count is only final once the last frame of the sequence arrives
    let may_replay = config.repeat.map_or(config.animate, |repeat| repeat != 0);
    let mut played = Vec::new();
    let mut repeat = 0;
    while let Some(frame) = pull(&rx, cancel) {
        repeat = config.effective_repeat(frame.loop_count);
        if may_replay {
            played.push(frame.clone());
        }
        if !forward(&tx, frame, cancel) {
            return Ok(());
        }
    }
    if repeat == 0 || played.is_empty() || cancel.is_cancelled() {
        return Ok(());
    }

    tracing::debug!(frames = played.len(), repeat, "replaying frame sequence");
    let mut pass = 0_i64;
    while repeat < 0 || pass < repeat {
        for frame in &played {
            if !forward(&tx, frame.clone(), cancel) {
                return Ok(());
            }
        }
        pass += 1;
    }
    Ok(())
}

fn encode_stage(
    rx: Receiver<Frame>,
    tx: Sender<EncodedFrame>,
    buffers: Receiver<FrameBuffer>,
    encoder: &AnsiEncoder,
    cancel: &CancelToken,
) -> Result<()> {
    while let Some(frame) = pull(&rx, cancel) {
        let Some(mut buffer) = pull(&buffers, cancel) else {
            break;
        };
        buffer.clear();
        let lines = encoder
            .encode(&frame.image, &mut buffer)
            .context("failed to encode frame")?;
        let encoded = EncodedFrame {
            buffer,
            delay: frame.delay,
            loop_count: frame.loop_count,
            lines,
        };
        if !forward(&tx, encoded, cancel) {
            break;
        }
    }
    Ok(())
}

struct Shown {
    started: Instant,
    delay: Duration,
    lines: usize,
}

fn draw_stage<W>(
    rx: Receiver<EncodedFrame>,
    recycle: Sender<FrameBuffer>,
    out: &mut W,
    config: &RenderConfig,
    cancel: &CancelToken,
) -> Result<usize>
where
    W: Write + ?Sized,
{
    let mut previous: Option<Shown> = None;
    let mut drawn = 0;

    while let Some(mut frame) = pull(&rx, cancel) {
        if config.animate {
            if let Some(shown) = &previous {
                if !wait_until(shown.started + shown.delay, cancel) {
                    break;
                }
                if shown.lines > 0 {
                    write!(out, "\x1b[{}A", shown.lines).map_err(write_error)?;
                }
            }
        }

        let started = Instant::now();
        frame.buffer.flush_to(out).map_err(write_error)?;
        drawn += 1;
        tracing::trace!(frame = drawn, lines = frame.lines, "drew frame");
        previous = Some(Shown {
            started,
            delay: config.effective_delay(frame.delay),
            lines: frame.lines,
        });
        // the encoder may already be gone at the end of playback
        let _ = recycle.try_send(frame.buffer);
    }
    Ok(drawn)
}

/// Blocks until `deadline`. Returns `false` if cancelled first.
fn wait_until(deadline: Instant, cancel: &CancelToken) -> bool {
    let now = Instant::now();
    if deadline <= now {
        return !cancel.is_cancelled();
    }
    select! {
        recv(after(deadline - now)) -> _ => true,
        recv(cancel.receiver()) -> _ => false,
    }
}

fn write_error(error: std::io::Error) -> anyhow::Error {
    CodedError::write("OUTPUT_WRITE", format!("failed to write frame: {error}")).into()
}
