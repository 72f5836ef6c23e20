use std::path::Path;
use std::time::Duration;

use crate::capture::domain::frame_source::{FrameSource, SourceError};
use crate::capture::domain::source_descriptor::{SourceDescriptor, SourceKind};
use crate::capture::infrastructure::rgb_decoder::RgbDecoder;
use crate::shared::frame::Frame;
use crate::shared::source_metadata::SourceMetadata;

const AV_TIME_BASE: f64 = 1_000_000.0;

/// Decodes a video file via ffmpeg-next, one RGB24 frame per call.
///
/// Seeking jumps the demuxer to the nearest preceding keyframe and then
/// decodes forward, discarding pictures that precede the target.
pub struct FfmpegVideoSource {
    ictx: ffmpeg_next::format::context::Input,
    decoder: RgbDecoder,
    stream_index: usize,
    time_base: ffmpeg_next::Rational,
    metadata: SourceMetadata,
    frame_index: usize,
    seek_target: Option<Duration>,
    flushing: bool,
    done: bool,
}

// Safety: the source is owned and driven by a single capture thread.
// The raw pointers inside ffmpeg types are never shared across threads.
unsafe impl Send for FfmpegVideoSource {}

impl FfmpegVideoSource {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let descriptor = SourceDescriptor::VideoFile(path.to_path_buf());
        let unavailable = |e: &dyn std::fmt::Display| SourceError::unavailable(&descriptor, e);

        ffmpeg_next::init().map_err(|e| unavailable(&e))?;
        let ictx = ffmpeg_next::format::input(path).map_err(|e| unavailable(&e))?;

        let (stream_index, time_base, decoder, fps, stream_frames, stream_duration) = {
            let stream = ictx
                .streams()
                .best(ffmpeg_next::media::Type::Video)
                .ok_or_else(|| unavailable(&"no video stream found"))?;
            let decoder = RgbDecoder::from_stream(&stream).map_err(|e| unavailable(&e))?;
            let rate = stream.rate();
            let fps = if rate.denominator() != 0 {
                rate.numerator() as f64 / rate.denominator() as f64
            } else {
                0.0
            };
            (
                stream.index(),
                stream.time_base(),
                decoder,
                fps,
                stream.frames(),
                stream.duration(),
            )
        };

        let duration = if stream_duration > 0 {
            Some(pts_to_duration(stream_duration, time_base))
        } else if ictx.duration() > 0 {
            Some(Duration::from_secs_f64(ictx.duration() as f64 / AV_TIME_BASE))
        } else {
            None
        };

        let total_frames = if stream_frames > 0 {
            stream_frames as usize
        } else {
            duration.map_or(0, |d| (d.as_secs_f64() * fps).round() as usize)
        };

        let metadata = SourceMetadata {
            kind: SourceKind::VideoFile,
            width: decoder.width(),
            height: decoder.height(),
            fps,
            duration,
            total_frames,
            codec: decoder.codec_name(),
            source_path: Some(path.to_path_buf()),
        };

        Ok(Self {
            ictx,
            decoder,
            stream_index,
            time_base,
            metadata,
            frame_index: 0,
            seek_target: None,
            flushing: false,
            done: false,
        })
    }

    /// Returns the next decoded frame at or past any pending seek target.
    fn try_receive(&mut self) -> Result<Option<Frame>, SourceError> {
        loop {
            let Some(picture) = self
                .decoder
                .receive()
                .map_err(|e| SourceError::Decode(e.to_string()))?
            else {
                return Ok(None);
            };

            let timestamp =
                frame_timestamp(picture.pts, self.time_base, self.frame_index, self.metadata.fps);
            if let Some(target) = self.seek_target {
                if timestamp < target {
                    continue;
                }
                self.seek_target = None;
            }

            let frame = Frame::new(
                picture.pixels,
                self.metadata.width,
                self.metadata.height,
                3,
                self.frame_index,
                timestamp,
            );
            self.frame_index += 1;
            return Ok(Some(frame));
        }
    }
}

impl FrameSource for FfmpegVideoSource {
    fn metadata(&self) -> &SourceMetadata {
        &self.metadata
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        loop {
            if self.done {
                return Ok(None);
            }
            if let Some(frame) = self.try_receive()? {
                return Ok(Some(frame));
            }
            if self.flushing {
                self.done = true;
                return Ok(None);
            }

            let next = self
                .ictx
                .packets()
                .next()
                .map(|(stream, packet)| (stream.index(), packet));
            match next {
                None => {
                    self.decoder.send_eof();
                    self.flushing = true;
                }
                Some((index, packet)) if index == self.stream_index => {
                    if let Err(e) = self.decoder.send(&packet) {
                        log::debug!("Skipping undecodable packet: {e}");
                    }
                }
                Some(_) => {}
            }
        }
    }

    fn seek(&mut self, position: Duration) -> Result<(), SourceError> {
        let position = match self.metadata.duration {
            Some(duration) => position.min(duration),
            None => position,
        };
        let ts = (position.as_secs_f64() * AV_TIME_BASE) as i64;
        self.ictx
            .seek(ts, ..ts)
            .map_err(|e| SourceError::Seek {
                position,
                reason: e.to_string(),
            })?;

        self.decoder.flush();
        self.flushing = false;
        self.done = false;
        self.seek_target = Some(position);
        self.frame_index = (position.as_secs_f64() * self.metadata.fps).round() as usize;
        Ok(())
    }

    fn close(&mut self) {
        self.done = true;
    }
}

/// Presentation time of a decoded picture. Pictures without a pts are
/// placed by their index at the nominal frame rate.
fn frame_timestamp(
    pts: Option<i64>,
    time_base: ffmpeg_next::Rational,
    frame_index: usize,
    fps: f64,
) -> Duration {
    match pts {
        Some(pts) => pts_to_duration(pts, time_base),
        None if fps > 0.0 => Duration::from_secs_f64(frame_index as f64 / fps),
        None => Duration::ZERO,
    }
}

fn pts_to_duration(pts: i64, time_base: ffmpeg_next::Rational) -> Duration {
    if pts <= 0 || time_base.denominator() == 0 {
        return Duration::ZERO;
    }
    let secs = pts as f64 * time_base.numerator() as f64 / time_base.denominator() as f64;
    Duration::from_secs_f64(secs.max(0.0))
}
