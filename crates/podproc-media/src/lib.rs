//! Audio composition for the podcast processor.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building for multi-input audio jobs
//! - A runner with a deadline and progress parsing
//! - The `Composer` seam and its FFmpeg crossfade implementation

pub mod command;
pub mod compose;
pub mod error;

pub use command::{check_ffmpeg, FfmpegCommand, FfmpegProgress, FfmpegRunner};
pub use compose::{build_compose_command, Composer, FfmpegComposer};
pub use error::{MediaError, MediaResult};
