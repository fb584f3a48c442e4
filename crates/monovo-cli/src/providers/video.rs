use std::path::{Path, PathBuf};

use ffmpeg_next as ffmpeg;
use image::GrayImage;
use log::{debug, info};
use monovo_core::{Frame, FrameSource};

use super::{Dataset, DatasetFormat, FrameRange, Media};
use crate::errors::{CliError, Result};

/// Stream properties read when a video is opened.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Container frame count, or an estimate from the duration.
    pub frame_count: usize,
}

/// Video files decoded with FFmpeg. Videos carry no calibration.
pub struct VideoProvider;

impl VideoProvider {
    /// Probes `path`. `fallback_fps` is used when the container reports no rate.
    pub fn load(path: &Path, fallback_fps: f64) -> Result<Dataset> {
        ffmpeg::init().map_err(|e| video_error(path, format!("failed to initialize FFmpeg: {e}")))?;

        let input = ffmpeg::format::input(&path).map_err(|e| video_error(path, e.to_string()))?;
        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| video_error(path, "no video stream found"))?;
        let decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .and_then(|context| context.decoder().video())
            .map_err(|e| video_error(path, format!("failed to create decoder: {e}")))?;

        let rate = stream.avg_frame_rate();
        let fps = if rate.numerator() > 0 && rate.denominator() > 0 {
            f64::from(rate)
        } else {
            fallback_fps
        };
        let duration = stream.duration() as f64 * f64::from(stream.time_base());
        let frame_count = if stream.frames() > 0 {
            stream.frames() as usize
        } else if duration.is_finite() && duration > 0.0 {
            (duration * fps).round() as usize
        } else {
            0
        };

        let info = VideoInfo {
            path: path.to_path_buf(),
            width: decoder.width(),
            height: decoder.height(),
            fps,
            frame_count,
        };
        info!(
            "opened video {}: {}x{} @ {:.2} fps, ~{} frames",
            path.display(),
            info.width,
            info.height,
            info.fps,
            info.frame_count
        );

        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("video")
            .to_string();
        Ok(Dataset {
            name,
            root: path.to_path_buf(),
            format: DatasetFormat::Video,
            media: Media::Video(info),
            calibration: None,
        })
    }
}

/// Decodes a video one frame at a time, keeping the frames `range` selects.
///
/// Frame indices count every decoded frame, so they match the `[start, end)`
/// positions of the full video.
pub struct VideoSequence {
    info: VideoInfo,
    input: ffmpeg::format::context::Input,
    decoder: ffmpeg::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    stream_index: usize,
    time_base: f64,
    range: FrameRange,
    decoded: usize,
    flushed: bool,
    finished: bool,
}

impl VideoSequence {
    pub fn open(info: &VideoInfo, range: FrameRange) -> Result<Self> {
        let path = info.path.as_path();
        let input = ffmpeg::format::input(&path).map_err(|e| video_error(path, e.to_string()))?;
        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| video_error(path, "no video stream found"))?;
        let stream_index = stream.index();
        let time_base = f64::from(stream.time_base());
        let decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .and_then(|context| context.decoder().video())
            .map_err(|e| video_error(path, format!("failed to create decoder: {e}")))?;
        let scaler = ffmpeg::software::scaling::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::format::Pixel::GRAY8,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::Flags::BILINEAR,
        )
        .map_err(|e| video_error(path, format!("failed to create scaler: {e}")))?;

        Ok(Self {
            info: info.clone(),
            input,
            decoder,
            scaler,
            stream_index,
            time_base,
            range,
            decoded: 0,
            flushed: false,
            finished: false,
        })
    }

    pub fn info(&self) -> &VideoInfo {
        &self.info
    }

    fn receive(&mut self) -> Result<Option<ffmpeg::frame::Video>> {
        let mut frame = ffmpeg::frame::Video::empty();
        match self.decoder.receive_frame(&mut frame) {
            Ok(()) => Ok(Some(frame)),
            Err(ffmpeg::Error::Eof) => {
                self.finished = true;
                Ok(None)
            }
            Err(ffmpeg::Error::Other {
                errno: ffmpeg::error::EAGAIN,
            }) => Ok(None),
            Err(e) => Err(self.error(format!("failed to receive frame: {e}"))),
        }
    }

    /// Sends the next packet of the video stream, or flushes the decoder at end of input.
    fn feed(&mut self) -> Result<()> {
        if self.flushed {
            self.finished = true;
            return Ok(());
        }
        let mut packet = ffmpeg::Packet::empty();
        loop {
            match packet.read(&mut self.input) {
                Ok(()) if packet.stream() == self.stream_index => {
                    return self
                        .decoder
                        .send_packet(&packet)
                        .map_err(|e| self.error(format!("failed to send packet: {e}")));
                }
                Ok(()) => continue,
                Err(ffmpeg::Error::Eof) => {
                    self.flushed = true;
                    return self
                        .decoder
                        .send_eof()
                        .map_err(|e| self.error(format!("failed to flush decoder: {e}")));
                }
                Err(e) => return Err(self.error(format!("failed to read packet: {e}"))),
            }
        }
    }

    fn to_gray(&mut self, decoded: &ffmpeg::frame::Video) -> Result<GrayImage> {
        let mut gray = ffmpeg::frame::Video::empty();
        self.scaler
            .run(decoded, &mut gray)
            .map_err(|e| self.error(format!("failed to convert frame: {e}")))?;
        gray_from_plane(gray.data(0), gray.stride(0), gray.width(), gray.height())
            .ok_or_else(|| self.error("decoded plane is smaller than the frame"))
    }

    fn error(&self, message: impl Into<String>) -> CliError {
        video_error(&self.info.path, message)
    }
}

impl FrameSource for VideoSequence {
    type Error = CliError;

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            if self.finished || self.range.is_exhausted_at(self.decoded) {
                return Ok(None);
            }
            let Some(decoded) = self.receive()? else {
                if !self.finished {
                    self.feed()?;
                }
                continue;
            };

            let index = self.decoded;
            self.decoded += 1;
            if !self.range.selects(index) {
                continue;
            }

            let image = self.to_gray(&decoded)?;
            let timestamp = frame_timestamp(decoded.timestamp(), self.time_base, index, self.info.fps);
            debug!("decoded video frame {index} at {timestamp:.3}s");
            return Ok(Some(Frame::new(index as u64, timestamp, image)));
        }
    }

    fn remaining_hint(&self) -> Option<usize> {
        if self.info.frame_count == 0 {
            return None;
        }
        let total = self.range.indices(self.info.frame_count).len();
        let done = self
            .range
            .indices(self.decoded.min(self.info.frame_count))
            .len();
        Some(total.saturating_sub(done))
    }
}

fn video_error(path: &Path, message: impl Into<String>) -> CliError {
    CliError::Video {
        path: path.display().to_string(),
        message: message.into(),
    }
}

/// Presentation time in seconds, or `index / fps` when the stream has none.
fn frame_timestamp(pts: Option<i64>, time_base: f64, index: usize, fps: f64) -> f64 {
    match pts {
        Some(pts) if time_base > 0.0 => pts as f64 * time_base,
        _ if fps > 0.0 => index as f64 / fps,
        _ => 0.0,
    }
}

/// Copies a strided 8-bit plane into a packed image.
fn gray_from_plane(data: &[u8], stride: usize, width: u32, height: u32) -> Option<GrayImage> {
    let (w, h) = (width as usize, height as usize);
    if stride < w || data.len() < stride * h.saturating_sub(1) + w {
        return None;
    }
    let mut pixels = Vec::with_capacity(w * h);
    for row in 0..h {
        pixels.extend_from_slice(&data[row * stride..row * stride + w]);
    }
    GrayImage::from_raw(width, height, pixels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn padded_planes_are_packed() {
        let stride = 6;
        let data: Vec<u8> = (0..stride * 3).map(|v| v as u8).collect();
        let image = gray_from_plane(&data, stride, 4, 3).unwrap();

        assert_eq!(image.dimensions(), (4, 3));
        assert_eq!(image.get_pixel(0, 1).0, [6]);
        assert_eq!(image.get_pixel(3, 2).0, [15]);
    }

    #[test]
    fn short_planes_are_rejected() {
        assert!(gray_from_plane(&[0; 10], 4, 4, 3).is_none());
        assert!(gray_from_plane(&[0; 12], 3, 4, 3).is_none());
    }

    #[test]
    fn timestamps_fall_back_to_frame_rate() {
        assert_relative_eq!(
            frame_timestamp(Some(3003), 1.0 / 30000.0, 3, 29.97),
            0.1001,
            epsilon = 1e-12
        );
        assert_eq!(frame_timestamp(None, 1.0 / 30000.0, 15, 30.0), 0.5);
        assert_eq!(frame_timestamp(None, 0.0, 15, 0.0), 0.0);
    }

    #[test]
    fn non_video_files_fail_to_open() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("notes.mp4");
        fs::write(&path, "not a video").unwrap();

        let error = VideoProvider::load(&path, 30.0).err().unwrap();
        assert!(matches!(error, CliError::Video { .. }));
    }
}
