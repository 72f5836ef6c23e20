use std::time::Instant;

use crate::capture::domain::frame_source::{FrameSource, SourceError};
use crate::capture::domain::source_descriptor::{SourceDescriptor, SourceKind};
use crate::capture::infrastructure::rgb_decoder::RgbDecoder;
use crate::shared::frame::Frame;
use crate::shared::source_metadata::SourceMetadata;

/// Frame rate requested from devices that need one up front.
const REQUESTED_FPS: &str = "30";

/// Captures frames from a local camera through libavdevice.
///
/// Timestamps are measured from the moment the device was opened.
pub struct FfmpegCameraSource {
    ictx: ffmpeg_next::format::context::Input,
    decoder: RgbDecoder,
    stream_index: usize,
    metadata: SourceMetadata,
    opened_at: Instant,
    frame_index: usize,
    closed: bool,
}

// Safety: the source is owned and driven by a single capture thread.
// The raw pointers inside ffmpeg types are never shared across threads.
unsafe impl Send for FfmpegCameraSource {}

impl FfmpegCameraSource {
    pub fn open(index: u32) -> Result<Self, SourceError> {
        let descriptor = SourceDescriptor::Camera { index };
        let unavailable = |e: &dyn std::fmt::Display| SourceError::unavailable(&descriptor, e);

        ffmpeg_next::init().map_err(|e| unavailable(&e))?;
        ffmpeg_next::device::register_all();

        let (format_name, url) = device_address(index)
            .ok_or_else(|| unavailable(&"no camera backend for this platform"))?;
        let format = ffmpeg_next::device::input::video()
            .find(|f| f.name() == format_name)
            .ok_or_else(|| unavailable(&format!("ffmpeg was built without {format_name}")))?;

        let mut options = ffmpeg_next::Dictionary::new();
        options.set("framerate", REQUESTED_FPS);
        let ictx = ffmpeg_next::format::open_with(
            &url,
            &ffmpeg_next::format::format::Format::Input(format),
            options,
        )
        .map_err(|e| unavailable(&e))?
        .input();

        let (stream_index, decoder, fps) = {
            let stream = ictx
                .streams()
                .best(ffmpeg_next::media::Type::Video)
                .ok_or_else(|| unavailable(&"device exposes no video stream"))?;
            let decoder = RgbDecoder::from_stream(&stream).map_err(|e| unavailable(&e))?;
            let rate = stream.avg_frame_rate();
            let fps = if rate.denominator() != 0 && rate.numerator() > 0 {
                rate.numerator() as f64 / rate.denominator() as f64
            } else {
                0.0
            };
            (stream.index(), decoder, fps)
        };

        log::info!(
            "Opened camera {index} ({format_name} {url}) at {}x{}",
            decoder.width(),
            decoder.height()
        );

        let metadata = SourceMetadata {
            kind: SourceKind::Camera,
            width: decoder.width(),
            height: decoder.height(),
            fps,
            duration: None,
            total_frames: 0,
            codec: decoder.codec_name(),
            source_path: None,
        };

        Ok(Self {
            ictx,
            decoder,
            stream_index,
            metadata,
            opened_at: Instant::now(),
            frame_index: 0,
            closed: false,
        })
    }
}

impl FrameSource for FfmpegCameraSource {
    fn metadata(&self) -> &SourceMetadata {
        &self.metadata
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        if self.closed {
            return Ok(None);
        }
        loop {
            if let Some(picture) = self
                .decoder
                .receive()
                .map_err(|e| SourceError::Decode(e.to_string()))?
            {
                let timestamp = self.opened_at.elapsed();
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

            let next = self
                .ictx
                .packets()
                .next()
                .map(|(stream, packet)| (stream.index(), packet));
            match next {
                None => return Err(SourceError::Device("camera stream ended".into())),
                Some((index, packet)) if index == self.stream_index => {
                    self.decoder
                        .send(&packet)
                        .map_err(|e| SourceError::Device(e.to_string()))?;
                }
                Some(_) => {}
            }
        }
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// The avdevice input format and device URL for camera `index`.
fn device_address(index: u32) -> Option<(&'static str, String)> {
    if cfg!(target_os = "linux") {
        Some(("video4linux2", format!("/dev/video{index}")))
    } else if cfg!(target_os = "macos") {
        Some(("avfoundation", format!("{index}:none")))
    } else if cfg!(target_os = "windows") {
        Some(("vfwcap", index.to_string()))
    } else {
        None
    }
}
