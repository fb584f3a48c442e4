//! Recorded datasets exposed as [`FrameSource`]s.

pub mod euroc;
pub mod folder;
pub mod tum;
#[cfg(feature = "video")]
pub mod video;

use std::path::{Path, PathBuf};

use log::{debug, info};
use monovo_core::{CameraIntrinsics, Frame, FrameSource};
use serde::{Deserialize, Serialize};

use crate::errors::{CliError, Result};

pub use euroc::EurocProvider;
pub use folder::ImageFolderProvider;
pub use tum::TumProvider;
#[cfg(feature = "video")]
pub use video::{VideoInfo, VideoProvider, VideoSequence};

/// On-disk layout of a recorded sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum DatasetFormat {
    /// `mav0/cam0/data.csv` with nanosecond timestamps and `sensor.yaml`.
    Euroc,
    /// `rgb.txt` listing `timestamp filename`.
    Tum,
    /// A folder of png/jpg images played back at a fixed rate.
    Images,
    /// A single video file decoded with FFmpeg (requires the `video` feature).
    Video,
}

/// `[start, end)` selection of source frames, taking every `stride`-th one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRange {
    pub start: usize,
    pub end: Option<usize>,
    pub stride: usize,
}

impl Default for FrameRange {
    fn default() -> Self {
        Self {
            start: 0,
            end: None,
            stride: 1,
        }
    }
}

impl FrameRange {
    pub fn new(start: usize, end: Option<usize>, stride: usize) -> Result<Self> {
        if stride == 0 {
            return Err(CliError::InvalidConfig("stride must be at least 1".into()));
        }
        if let Some(end) = end
            && end < start
        {
            return Err(CliError::InvalidConfig(format!(
                "frame range end ({end}) precedes start ({start})"
            )));
        }
        Ok(Self { start, end, stride })
    }

    /// Source indices selected out of `total` frames.
    pub fn indices(&self, total: usize) -> Vec<usize> {
        let end = self.end.map_or(total, |end| end.min(total));
        (self.start.min(end)..end).step_by(self.stride).collect()
    }

    /// Whether source frame `index` is part of the selection.
    pub fn selects(&self, index: usize) -> bool {
        index >= self.start
            && !self.is_exhausted_at(index)
            && (index - self.start) % self.stride == 0
    }

    /// Whether no frame at or after `index` can be selected.
    pub fn is_exhausted_at(&self, index: usize) -> bool {
        self.end.is_some_and(|end| index >= end)
    }
}

/// One image of a sequence and its capture time in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageEntry {
    pub timestamp: f64,
    pub path: PathBuf,
}

/// What a dataset's frames are read from.
#[derive(Debug, Clone)]
pub enum Media {
    Images(Vec<ImageEntry>),
    #[cfg(feature = "video")]
    Video(VideoInfo),
}

/// A loaded sequence: its frame media plus whatever calibration ships with it.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub name: String,
    pub root: PathBuf,
    pub format: DatasetFormat,
    pub media: Media,
    pub calibration: Option<CameraIntrinsics>,
}

impl Dataset {
    /// Opens `root` with the provider for `format`.
    ///
    /// `fps` sets the playback rate of image folders and is the fallback rate
    /// for videos whose container reports none.
    pub fn open(root: impl AsRef<Path>, format: DatasetFormat, fps: f64) -> Result<Self> {
        let root = root.as_ref();
        let dataset = match format {
            DatasetFormat::Euroc => EurocProvider::load(root)?,
            DatasetFormat::Tum => TumProvider::load(root)?,
            DatasetFormat::Images => ImageFolderProvider::load(root, fps)?,
            #[cfg(feature = "video")]
            DatasetFormat::Video => VideoProvider::load(root, fps)?,
            #[cfg(not(feature = "video"))]
            DatasetFormat::Video => {
                return Err(CliError::InvalidConfig(
                    "video input requires building with the `video` feature".into(),
                ));
            }
        };
        info!(
            "opened {:?} dataset '{}' with {} frames{}",
            format,
            dataset.name,
            dataset.len(),
            if dataset.calibration.is_some() {
                " and calibration"
            } else {
                ""
            }
        );
        Ok(dataset)
    }

    pub(crate) fn name_of(root: &Path) -> String {
        let name = root
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("dataset");
        // EuRoC roots are often given as `<sequence>/mav0`.
        if name == "mav0"
            && let Some(parent) = root.parent().and_then(|p| p.file_name()).and_then(|s| s.to_str())
        {
            return parent.to_string();
        }
        name.to_string()
    }

    /// Image entries of an image dataset; empty for videos.
    pub fn entries(&self) -> &[ImageEntry] {
        match &self.media {
            Media::Images(entries) => entries,
            #[cfg(feature = "video")]
            Media::Video(_) => &[],
        }
    }

    /// Frames in the source; estimated for videos.
    pub fn len(&self) -> usize {
        match &self.media {
            Media::Images(entries) => entries.len(),
            #[cfg(feature = "video")]
            Media::Video(info) => info.frame_count,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frame source over the selected part of the sequence.
    pub fn frames(&self, range: &FrameRange) -> Result<Frames> {
        match &self.media {
            Media::Images(entries) => Ok(Frames::Images(ImageSequence::new(
                entries.clone(),
                range.indices(entries.len()),
            ))),
            #[cfg(feature = "video")]
            Media::Video(info) => Ok(Frames::Video(VideoSequence::open(info, *range)?)),
        }
    }
}

/// Frame source of any dataset format.
pub enum Frames {
    Images(ImageSequence),
    #[cfg(feature = "video")]
    Video(VideoSequence),
}

impl FrameSource for Frames {
    type Error = CliError;

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match self {
            Frames::Images(images) => images.next_frame(),
            #[cfg(feature = "video")]
            Frames::Video(video) => video.next_frame(),
        }
    }

    fn remaining_hint(&self) -> Option<usize> {
        match self {
            Frames::Images(images) => images.remaining_hint(),
            #[cfg(feature = "video")]
            Frames::Video(video) => video.remaining_hint(),
        }
    }
}

/// Lazily decodes images in sequence order and converts them to grayscale.
///
/// Frame indices are positions in the full sequence, so they stay strictly
/// increasing under any range and stride.
#[derive(Debug, Clone)]
pub struct ImageSequence {
    entries: Vec<ImageEntry>,
    indices: Vec<usize>,
    cursor: usize,
}

impl ImageSequence {
    pub fn new(entries: Vec<ImageEntry>, indices: Vec<usize>) -> Self {
        Self {
            entries,
            indices,
            cursor: 0,
        }
    }

    pub fn selected(&self) -> usize {
        self.indices.len()
    }
}

impl FrameSource for ImageSequence {
    type Error = CliError;

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(&index) = self.indices.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;

        let entry = &self.entries[index];
        let image = image::open(&entry.path)
            .map_err(|source| CliError::Image {
                path: entry.path.display().to_string(),
                source,
            })?
            .to_luma8();
        debug!(
            "loaded frame {index} ({}x{}) from {}",
            image.width(),
            image.height(),
            entry.path.display()
        );
        Ok(Some(Frame::new(index as u64, entry.timestamp, image)))
    }

    fn remaining_hint(&self) -> Option<usize> {
        Some(self.indices.len() - self.cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_applies_start_end_and_stride() {
        let range = FrameRange::new(2, Some(9), 3).unwrap();
        assert_eq!(range.indices(20), vec![2, 5, 8]);
        assert_eq!(range.indices(6), vec![2, 5]);
        assert_eq!(FrameRange::default().indices(3), vec![0, 1, 2]);
        assert!(FrameRange::new(5, None, 1).unwrap().indices(3).is_empty());
    }

    #[test]
    fn range_membership_matches_indices() {
        let range = FrameRange::new(2, Some(9), 3).unwrap();
        let selected: Vec<usize> = (0..20).filter(|i| range.selects(*i)).collect();
        assert_eq!(selected, range.indices(20));
        assert!(!range.is_exhausted_at(8));
        assert!(range.is_exhausted_at(9));
        assert!(!FrameRange::default().is_exhausted_at(usize::MAX));
    }

    #[test]
    #[cfg(not(feature = "video"))]
    fn video_format_needs_the_video_feature() {
        let error = Dataset::open("clip.mp4", DatasetFormat::Video, 30.0).unwrap_err();
        assert!(matches!(error, CliError::InvalidConfig(_)));
    }

    #[test]
    fn range_rejects_zero_stride_and_reversed_bounds() {
        assert!(FrameRange::new(0, None, 0).is_err());
        assert!(FrameRange::new(5, Some(2), 1).is_err());
    }

    #[test]
    fn mav0_roots_take_the_sequence_name() {
        assert_eq!(Dataset::name_of(Path::new("/data/MH_01_easy/mav0")), "MH_01_easy");
        assert_eq!(Dataset::name_of(Path::new("/data/freiburg1_xyz")), "freiburg1_xyz");
    }
}
