//! Segment composition.
//!
//! Segments are joined in the order given. Each non-first segment fades in
//! over its own `crossfade_ms` while the previous one fades out; a zero
//! crossfade is a hard cut.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use podproc_models::{AudioFormat, SegmentDescriptor};
use tracing::{debug, info};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// Audio composition engine.
#[async_trait]
pub trait Composer: Send + Sync {
    /// Merge `segments` into one file at `output` encoded as `format`.
    /// Returns the path of the produced file.
    async fn compose(
        &self,
        segments: &[SegmentDescriptor],
        output: &Path,
        format: AudioFormat,
    ) -> MediaResult<PathBuf>;
}

/// Composer that shells out to FFmpeg.
#[derive(Debug, Clone, Default)]
pub struct FfmpegComposer {
    timeout: Option<Duration>,
}

impl FfmpegComposer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill FFmpeg if composition runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl Composer for FfmpegComposer {
    async fn compose(
        &self,
        segments: &[SegmentDescriptor],
        output: &Path,
        format: AudioFormat,
    ) -> MediaResult<PathBuf> {
        for segment in segments {
            if !tokio::fs::try_exists(&segment.local_path).await.unwrap_or(false) {
                return Err(MediaError::FileNotFound(segment.local_path.clone()));
            }
        }

        let cmd = build_compose_command(segments, output, format)?;

        let mut runner = FfmpegRunner::new();
        if let Some(timeout) = self.timeout {
            runner = runner.with_timeout(timeout);
        }

        let started = Instant::now();
        runner
            .run_with_progress(&cmd, |p| {
                debug!(out_time_ms = p.out_time_ms, speed = p.speed, "Composition progress");
            })
            .await?;

        if !tokio::fs::try_exists(output).await.unwrap_or(false) {
            return Err(MediaError::FileNotFound(output.to_path_buf()));
        }

        info!(
            "Composed {} segments into {} in {:.1}s",
            segments.len(),
            output.display(),
            started.elapsed().as_secs_f64()
        );

        Ok(output.to_path_buf())
    }
}

/// Build the FFmpeg invocation that joins `segments` into `output`.
pub fn build_compose_command(
    segments: &[SegmentDescriptor],
    output: &Path,
    format: AudioFormat,
) -> MediaResult<FfmpegCommand> {
    if segments.is_empty() {
        return Err(MediaError::NoSegments);
    }

    for segment in segments {
        if segment.audio_format().is_none() {
            return Err(MediaError::UnsupportedFormat(format!(
                "'{}' ({})",
                segment.format,
                segment.local_path.display()
            )));
        }
    }

    let cmd = FfmpegCommand::new(output).inputs(segments.iter().map(|s| &s.local_path));

    let cmd = match crossfade_filter(segments) {
        Some(filter) => cmd.filter_complex(filter).map("[aout]"),
        None => cmd.map("0:a"),
    };

    Ok(apply_encoding(cmd.no_video(), format))
}

/// Filter graph chaining every input; `None` for a single segment.
fn crossfade_filter(segments: &[SegmentDescriptor]) -> Option<String> {
    if segments.len() < 2 {
        return None;
    }

    let mut stages = Vec::with_capacity(segments.len() - 1);
    let mut previous = "[0:a]".to_string();

    for (index, segment) in segments.iter().enumerate().skip(1) {
        let label = if index == segments.len() - 1 {
            "[aout]".to_string()
        } else {
            format!("[a{}]", index)
        };

        let stage = if segment.crossfade_ms == 0 {
            format!("{}[{}:a]concat=n=2:v=0:a=1{}", previous, index, label)
        } else {
            format!(
                "{}[{}:a]acrossfade=d={:.3}:c1=tri:c2=tri{}",
                previous,
                index,
                segment.crossfade_ms as f64 / 1000.0,
                label
            )
        };

        stages.push(stage);
        previous = label;
    }

    Some(stages.join(";"))
}

fn apply_encoding(cmd: FfmpegCommand, format: AudioFormat) -> FfmpegCommand {
    match format {
        AudioFormat::Mp3 => cmd.audio_codec("libmp3lame").audio_bitrate("192k"),
        AudioFormat::Wav => cmd.audio_codec("pcm_s16le"),
        AudioFormat::Ogg => cmd.audio_codec("libvorbis").audio_bitrate("192k"),
        AudioFormat::Flac => cmd.audio_codec("flac"),
        AudioFormat::M4a => cmd.audio_codec("aac").audio_bitrate("192k"),
        AudioFormat::Aac => cmd.audio_codec("aac").audio_bitrate("192k").output_arg("-f").output_arg("adts"),
        AudioFormat::Opus => cmd.audio_codec("libopus").audio_bitrate("128k"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use podproc_models::describe_segments;

    fn arg_after(args: &[String], flag: &str) -> Option<String> {
        args.windows(2).find(|w| w[0] == flag).map(|w| w[1].clone())
    }

    #[test]
    fn test_single_segment_has_no_filter() {
        let segments = describe_segments(["/s/000_a.wav"], 100);
        let cmd = build_compose_command(&segments, Path::new("/s/output.mp3"), AudioFormat::Mp3).unwrap();
        let args = cmd.build_args();

        assert!(!args.contains(&"-filter_complex".to_string()));
        assert_eq!(arg_after(&args, "-map").as_deref(), Some("0:a"));
        assert_eq!(arg_after(&args, "-c:a").as_deref(), Some("libmp3lame"));
    }

    #[test]
    fn test_crossfade_chain_follows_segment_order() {
        let segments = describe_segments(["/s/000_a.mp3", "/s/001_b.wav", "/s/002_c.flac"], 100);
        let cmd = build_compose_command(&segments, Path::new("/s/output.mp3"), AudioFormat::Mp3).unwrap();
        let args = cmd.build_args();

        assert_eq!(cmd.input_paths().len(), 3);
        assert_eq!(cmd.input_paths()[1], PathBuf::from("/s/001_b.wav"));
        assert_eq!(
            arg_after(&args, "-filter_complex").as_deref(),
            Some(
                "[0:a][1:a]acrossfade=d=0.100:c1=tri:c2=tri[a1];\
                 [a1][2:a]acrossfade=d=0.100:c1=tri:c2=tri[aout]"
            )
        );
        assert_eq!(arg_after(&args, "-map").as_deref(), Some("[aout]"));
    }

    #[test]
    fn test_zero_crossfade_is_concat() {
        let segments = describe_segments(["/s/000_a.mp3", "/s/001_b.mp3"], 0);
        let filter = crossfade_filter(&segments).unwrap();
        assert_eq!(filter, "[0:a][1:a]concat=n=2:v=0:a=1[aout]");
    }

    #[test]
    fn test_first_segment_crossfade_ignored() {
        let mut segments = describe_segments(["/s/000_a.mp3", "/s/001_b.mp3"], 250);
        segments[0].crossfade_ms = 9999;
        let filter = crossfade_filter(&segments).unwrap();
        assert!(filter.contains("d=0.250"));
    }

    #[test]
    fn test_rejects_empty_and_unsupported() {
        let out = Path::new("/s/output.mp3");
        assert!(matches!(
            build_compose_command(&[], out, AudioFormat::Mp3),
            Err(MediaError::NoSegments)
        ));

        let segments = describe_segments(["/s/000_a.mp3", "/s/001_notes.txt"], 100);
        assert!(matches!(
            build_compose_command(&segments, out, AudioFormat::Mp3),
            Err(MediaError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_output_encoding() {
        let segments = describe_segments(["/s/000_a.mp3"], 100);
        let cmd = build_compose_command(&segments, Path::new("/s/output.wav"), AudioFormat::Wav).unwrap();
        assert_eq!(arg_after(&cmd.build_args(), "-c:a").as_deref(), Some("pcm_s16le"));
    }

    #[tokio::test]
    async fn test_missing_input_file() {
        let dir = tempfile::tempdir().unwrap();
        let segments = describe_segments([dir.path().join("000_gone.mp3")], 100);

        let err = FfmpegComposer::new()
            .compose(&segments, &dir.path().join("output.mp3"), AudioFormat::Mp3)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }
}
