//! Decoder plus RGB24 scaler shared by the ffmpeg-backed sources.

use ffmpeg_next::util::frame::video::Video;

/// A decoded picture as tightly-packed RGB24 with its stream timestamp.
pub struct DecodedPicture {
    pub pixels: Vec<u8>,
    pub pts: Option<i64>,
}

pub struct RgbDecoder {
    decoder: ffmpeg_next::decoder::Video,
    scaler: ffmpeg_next::software::scaling::Context,
    width: u32,
    height: u32,
}

impl RgbDecoder {
    pub fn from_stream(
        stream: &ffmpeg_next::format::stream::Stream,
    ) -> Result<Self, ffmpeg_next::Error> {
        let codec_ctx = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())?;
        let decoder = codec_ctx.decoder().video()?;
        let width = decoder.width();
        let height = decoder.height();

        let scaler = ffmpeg_next::software::scaling::Context::get(
            decoder.format(),
            width,
            height,
            ffmpeg_next::format::Pixel::RGB24,
            width,
            height,
            ffmpeg_next::software::scaling::Flags::BILINEAR,
        )?;

        Ok(Self {
            decoder,
            scaler,
            width,
            height,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn codec_name(&self) -> String {
        self.decoder
            .codec()
            .map(|c| c.name().to_string())
            .unwrap_or_default()
    }

    pub fn send(&mut self, packet: &ffmpeg_next::Packet) -> Result<(), ffmpeg_next::Error> {
        self.decoder.send_packet(packet)
    }

    pub fn send_eof(&mut self) {
        let _ = self.decoder.send_eof();
    }

    /// Drops buffered pictures, e.g. after the demuxer seeks.
    pub fn flush(&mut self) {
        self.decoder.flush();
    }

    /// Pops the next decoded picture, if the decoder has one ready.
    pub fn receive(&mut self) -> Result<Option<DecodedPicture>, ffmpeg_next::Error> {
        let mut decoded = Video::empty();
        if self.decoder.receive_frame(&mut decoded).is_err() {
            return Ok(None);
        }

        let mut rgb_frame = Video::empty();
        self.scaler.run(&decoded, &mut rgb_frame)?;
        Ok(Some(DecodedPicture {
            pixels: extract_rgb_pixels(&rgb_frame, self.width, self.height),
            pts: decoded.timestamp().or_else(|| decoded.pts()),
        }))
    }
}

/// Copies pixel data from an ffmpeg frame into a contiguous RGB buffer.
///
/// ffmpeg frames may pad each row (stride > width*3); the padding is
/// stripped here.
fn extract_rgb_pixels(rgb_frame: &Video, width: u32, height: u32) -> Vec<u8> {
    let stride = rgb_frame.stride(0);
    let data = rgb_frame.data(0);
    let row_bytes = width as usize * 3;

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let row_start = row * stride;
        pixels.extend_from_slice(&data[row_start..row_start + row_bytes]);
    }
    pixels
}
