//! Staged segment descriptors.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::audio::AudioFormat;

/// One staged local file ready for composition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentDescriptor {
    /// Local path of the staged file
    pub local_path: PathBuf,
    /// Lower-cased file extension without the dot (empty if none)
    pub format: String,
    /// Crossfade into this segment from the previous one
    pub crossfade_ms: u64,
}

impl SegmentDescriptor {
    /// Describe a staged file, inferring its format from the extension.
    pub fn from_path(path: impl AsRef<Path>, crossfade_ms: u64) -> Self {
        let path = path.as_ref();
        let format = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        Self {
            local_path: path.to_path_buf(),
            format,
            crossfade_ms,
        }
    }

    /// Parsed audio format, if the extension is a supported one.
    pub fn audio_format(&self) -> Option<AudioFormat> {
        AudioFormat::from_extension(&self.format)
    }
}

/// Describe staged files in the given order with a uniform crossfade.
pub fn describe_segments<I, P>(paths: I, crossfade_ms: u64) -> Vec<SegmentDescriptor>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    paths
        .into_iter()
        .map(|p| SegmentDescriptor::from_path(p, crossfade_ms))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_extension() {
        let seg = SegmentDescriptor::from_path("/tmp/job/001_Intro.WAV", 100);
        assert_eq!(seg.format, "wav");
        assert_eq!(seg.audio_format(), Some(AudioFormat::Wav));
        assert_eq!(seg.crossfade_ms, 100);

        let bare = SegmentDescriptor::from_path("/tmp/job/noext", 100);
        assert_eq!(bare.format, "");
        assert_eq!(bare.audio_format(), None);
    }

    #[test]
    fn test_describe_preserves_order() {
        let paths = ["/s/000_c.mp3", "/s/001_a.wav", "/s/002_b.flac"];
        let segments = describe_segments(paths, 250);

        assert_eq!(segments.len(), 3);
        let got: Vec<_> = segments.iter().map(|s| s.local_path.clone()).collect();
        let want: Vec<_> = paths.iter().map(PathBuf::from).collect();
        assert_eq!(got, want);
        assert!(segments.iter().all(|s| s.crossfade_ms == 250));
    }
}
