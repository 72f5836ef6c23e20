use std::path::Path;

use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling;
use ffmpeg_next::util::frame::video::Video;

use crate::recording::domain::video_writer::VideoWriter;
use crate::shared::frame::Frame;
use crate::shared::source_metadata::SourceMetadata;

/// Encodes annotated frames to a video file via ffmpeg-next (MPEG-4 Part 2
/// in whatever container the output extension selects).
#[derive(Default)]
pub struct FfmpegWriter {
    session: Option<EncodeSession>,
}

/// Everything that only exists between `open` and `close`.
struct EncodeSession {
    octx: ffmpeg_next::format::context::Output,
    encoder: ffmpeg_next::codec::encoder::video::Encoder,
    scaler: scaling::Context,
    staging: Video,
    source_width: u32,
    source_height: u32,
    time_base: ffmpeg_next::Rational,
    next_pts: i64,
}

// Safety: FfmpegWriter is only used from a single thread at a time.
// The raw pointers inside ffmpeg types are not shared across threads.
unsafe impl Send for FfmpegWriter {}

impl FfmpegWriter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EncodeSession {
    fn start(path: &Path, metadata: &SourceMetadata) -> Result<Self, Box<dyn std::error::Error>> {
        let mut octx = ffmpeg_next::format::output(path)?;
        let wants_global_header = octx
            .format()
            .flags()
            .contains(ffmpeg_next::format::Flags::GLOBAL_HEADER);

        let codec = ffmpeg_next::encoder::find(ffmpeg_next::codec::Id::MPEG4)
            .ok_or("MPEG4 encoder not found")?;
        let mut stream = octx.add_stream(Some(codec))?;
        let mut settings = ffmpeg_next::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()?;

        // MPEG-4 needs even dimensions; the scaler absorbs the odd pixel.
        let encoded_width = (metadata.width & !1).max(2);
        let encoded_height = (metadata.height & !1).max(2);
        let fps = metadata.recording_fps().round() as i32;
        let time_base = ffmpeg_next::Rational(1, fps);

        settings.set_width(encoded_width);
        settings.set_height(encoded_height);
        settings.set_format(Pixel::YUV420P);
        settings.set_time_base(time_base);
        settings.set_frame_rate(Some(ffmpeg_next::Rational(fps, 1)));
        if wants_global_header {
            settings.set_flags(ffmpeg_next::codec::Flags::GLOBAL_HEADER);
        }

        let encoder = settings.open_with(ffmpeg_next::Dictionary::new())?;
        stream.set_parameters(&encoder);
        octx.write_header()?;

        let scaler = scaling::Context::get(
            Pixel::RGB24,
            metadata.width,
            metadata.height,
            Pixel::YUV420P,
            encoded_width,
            encoded_height,
            scaling::Flags::BILINEAR,
        )?;

        Ok(Self {
            octx,
            encoder,
            scaler,
            staging: Video::new(Pixel::RGB24, metadata.width, metadata.height),
            source_width: metadata.width,
            source_height: metadata.height,
            time_base,
            next_pts: 0,
        })
    }

    fn encode(&mut self, frame: &Frame) -> Result<(), Box<dyn std::error::Error>> {
        if (frame.width(), frame.height()) != (self.source_width, self.source_height) {
            return Err(format!(
                "frame is {}x{}, recording is {}x{}",
                frame.width(),
                frame.height(),
                self.source_width,
                self.source_height
            )
            .into());
        }

        let row_bytes = self.source_width as usize * 3;
        let stride = self.staging.stride(0);
        let plane = self.staging.data_mut(0);
        for (row, pixels) in frame.data().chunks_exact(row_bytes).enumerate() {
            plane[row * stride..row * stride + row_bytes].copy_from_slice(pixels);
        }

        let mut yuv = Video::empty();
        self.scaler.run(&self.staging, &mut yuv)?;
        yuv.set_pts(Some(self.next_pts));
        self.next_pts += 1;
        self.encoder.send_frame(&yuv)?;
        self.flush_packets()
    }

    /// Moves every packet the encoder has ready into the container.
    fn flush_packets(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let stream_time_base = self
            .octx
            .stream(0)
            .ok_or("output stream missing")?
            .time_base();
        let mut packet = ffmpeg_next::Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(0);
            packet.rescale_ts(self.time_base, stream_time_base);
            packet.write_interleaved(&mut self.octx)?;
        }
        Ok(())
    }

    fn finish(mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.encoder.send_eof()?;
        self.flush_packets()?;
        self.octx.write_trailer()?;
        Ok(())
    }
}

impl VideoWriter for FfmpegWriter {
    fn open(
        &mut self,
        path: &Path,
        metadata: &SourceMetadata,
    ) -> Result<(), Box<dyn std::error::Error>> {
        ffmpeg_next::init()?;
        if metadata.width == 0 || metadata.height == 0 {
            return Err(format!(
                "cannot record {}x{} frames",
                metadata.width, metadata.height
            )
            .into());
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        self.session = Some(EncodeSession::start(path, metadata)?);
        Ok(())
    }

    fn write(&mut self, frame: &Frame) -> Result<(), Box<dyn std::error::Error>> {
        self.session
            .as_mut()
            .ok_or("FfmpegWriter: not opened")?
            .encode(frame)
    }

    fn close(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        match self.session.take() {
            Some(session) => session.finish(),
            None => Ok(()),
        }
    }
}
