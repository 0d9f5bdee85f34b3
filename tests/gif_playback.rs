use std::fs;
use std::process::Command;

use image::Rgba;
use tempfile::tempdir;

use termpix::cancel::CancelToken;
use termpix::config::{RenderConfig, RenderOptions};
use termpix::frame_source::FrameSource;
use termpix::gif_compositor::{decode_gif, GifCompositor};
use termpix::pipeline::run_pipeline;

const PALETTE: [u8; 9] = [255, 0, 0, 0, 255, 0, 0, 0, 255];
const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
const GREEN: Rgba<u8> = Rgba([0, 255, 0, 255]);
const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);

struct Layer {
    rect: (u16, u16, u16, u16),
    fill: u8,
    dispose: gif::DisposalMethod,
    delay: u16,
}

fn encode_gif(width: u16, height: u16, repeat: gif::Repeat, layers: &[Layer]) -> Vec<u8> {
    let mut bytes = Vec::new();
    {
        let mut encoder =
            gif::Encoder::new(&mut bytes, width, height, &PALETTE).expect("gif header should encode");
        encoder.set_repeat(repeat).expect("loop extension should encode");
        for layer in layers {
            let (left, top, w, h) = layer.rect;
            let mut frame = gif::Frame::default();
            frame.left = left;
            frame.top = top;
            frame.width = w;
            frame.height = h;
            frame.dispose = layer.dispose;
            frame.delay = layer.delay;
            frame.buffer = vec![layer.fill; usize::from(w) * usize::from(h)].into();
            encoder.write_frame(&frame).expect("gif frame should encode");
        }
    }
    bytes
}

fn three_layer_gif(repeat: gif::Repeat) -> Vec<u8> {
    encode_gif(
        2,
        2,
        repeat,
        &[
            Layer {
                rect: (0, 0, 2, 2),
                fill: 0,
                dispose: gif::DisposalMethod::Keep,
                delay: 2,
            },
            Layer {
                rect: (1, 1, 1, 1),
                fill: 1,
                dispose: gif::DisposalMethod::Previous,
                delay: 2,
            },
            Layer {
                rect: (0, 0, 1, 1),
                fill: 2,
                dispose: gif::DisposalMethod::Keep,
                delay: 2,
            },
        ],
    )
}

#[test]
fn previous_disposal_restores_the_canvas_for_the_next_layer() {
    let gif = decode_gif(&three_layer_gif(gif::Repeat::Finite(0))).expect("gif should decode");
    let frames = GifCompositor::composite_all(gif);
    assert_eq!(frames.len(), 3);

    assert!(frames[0].pixels().all(|pixel| *pixel == RED));
    assert_eq!(*frames[1].get_pixel(1, 1), GREEN);
    assert_eq!(*frames[1].get_pixel(0, 0), RED);
    // green was drawn with Previous disposal, so it is gone again
    assert_eq!(*frames[2].get_pixel(1, 1), RED);
    assert_eq!(*frames[2].get_pixel(0, 0), BLUE);
}

#[test]
fn cyclic_compositing_reproduces_the_first_pass() {
    let gif = decode_gif(&three_layer_gif(gif::Repeat::Infinite)).expect("gif should decode");
    let first_pass = GifCompositor::composite_all(gif.clone());

    let mut compositor = GifCompositor::new(gif);
    let cycled = (0..6)
        .map(|_| compositor.next_frame().expect("frames should cycle"))
        .collect::<Vec<_>>();
    assert_eq!(&cycled[..3], &first_pass[..]);
    assert_eq!(&cycled[3..], &first_pass[..]);
}

#[test]
fn loop_extension_and_delays_reach_the_frames() {
    let frames = FrameSource::decode(&three_layer_gif(gif::Repeat::Finite(3)))
        .expect("gif should decode")
        .collect::<Vec<_>>();
    assert_eq!(frames.len(), 3);
    assert!(frames.iter().all(|frame| frame.loop_count == 3));
    assert!(frames
        .iter()
        .all(|frame| frame.delay == std::time::Duration::from_millis(20)));
}

#[test]
fn explicit_repeat_replays_the_whole_sequence() {
    let source = FrameSource::decode(&three_layer_gif(gif::Repeat::Infinite)).expect("gif should decode");
    let config = RenderConfig::from_options(&RenderOptions {
        font_aspect: 1.0,
        repeat: Some(2),
        ..RenderOptions::default()
    })
    .expect("options should validate");

    let mut out = Vec::new();
    let summary =
        run_pipeline(source, &config, &mut out, &CancelToken::new()).expect("playback should finish");
    assert_eq!(summary.frames_drawn, 9);

    let text = String::from_utf8(out).expect("output should be utf-8");
    let lines = text.lines().collect::<Vec<_>>();
    assert_eq!(lines.len(), 18);
    for pass in 0..3 {
        let frame = &lines[pass * 6..pass * 6 + 6];
        assert_eq!(frame[0], "\x1b[48;5;196m  \x1b[0m");
        assert_eq!(frame[3], "\x1b[48;5;196m \x1b[48;5;46m \x1b[0m");
        assert_eq!(frame[4], "\x1b[48;5;21m \x1b[48;5;196m \x1b[0m");
        assert_eq!(frame[5], "\x1b[48;5;196m  \x1b[0m");
    }
}

#[test]
fn animated_binary_plays_a_finite_gif_in_place() {
    let dir = tempdir().expect("tempdir should create");
    fs::write(dir.path().join("anim.gif"), three_layer_gif(gif::Repeat::Finite(1)))
        .expect("gif should write");

    let output = Command::new(env!("CARGO_BIN_EXE_termpix"))
        .current_dir(dir.path())
        .args(["--animate", "--font-aspect", "1", "--delay", "1", "anim.gif"])
        .env_remove("RUST_LOG")
        .output()
        .expect("termpix command should run");
    assert!(output.status.success());

    let text = String::from_utf8(output.stdout).expect("output should be utf-8");
    // six frames, each after the first preceded by a two-line cursor-up
    assert_eq!(text.matches("\x1b[2A").count(), 5);
    assert_eq!(text.lines().count(), 12);
}
