pub mod ansi_encode;
pub mod ansi_palette;
pub mod cancel;
pub mod config;
pub mod error_codes;
pub mod frame_buffer;
pub mod frame_source;
pub mod gif_compositor;
pub mod input;
pub mod pipeline;
pub mod sizing;
