use std::path::Path;
use std::time::Duration;

use crate::capture::domain::frame_source::{FrameSource, SourceError};
use crate::capture::domain::source_descriptor::{SourceDescriptor, SourceKind};
use crate::capture::infrastructure::rgb_decoder::RgbDecoder;
use crate::shared::frame::Frame;
use crate::shared::source_metadata::SourceMetadata;

/// A still image exposed as a one-frame source.
///
/// The image is decoded with ffmpeg when the source is opened, which is
/// considerably faster than the pure-Rust `image` decoders for large JPEGs.
pub struct ImageFileSource {
    frame: Option<Frame>,
    metadata: SourceMetadata,
}

impl ImageFileSource {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let descriptor = SourceDescriptor::Image(path.to_path_buf());
        let unavailable = |e: &dyn std::fmt::Display| SourceError::unavailable(&descriptor, e);

        ffmpeg_next::init().map_err(|e| unavailable(&e))?;
        let mut ictx = ffmpeg_next::format::input(path).map_err(|e| unavailable(&e))?;

        let (stream_index, mut decoder) = {
            let stream = ictx
                .streams()
                .best(ffmpeg_next::media::Type::Video)
                .ok_or_else(|| unavailable(&"no image data found"))?;
            let decoder = RgbDecoder::from_stream(&stream).map_err(|e| unavailable(&e))?;
            (stream.index(), decoder)
        };

        let pixels = decode_single_picture(&mut ictx, &mut decoder, stream_index)
            .map_err(|e| unavailable(&e))?
            .ok_or_else(|| unavailable(&"failed to decode image"))?;

        let (width, height) = (decoder.width(), decoder.height());
        let metadata = SourceMetadata {
            kind: SourceKind::Image,
            width,
            height,
            fps: 0.0,
            duration: None,
            total_frames: 1,
            codec: decoder.codec_name(),
            source_path: Some(path.to_path_buf()),
        };

        Ok(Self {
            frame: Some(Frame::new(pixels, width, height, 3, 0, Duration::ZERO)),
            metadata,
        })
    }
}

fn decode_single_picture(
    ictx: &mut ffmpeg_next::format::context::Input,
    decoder: &mut RgbDecoder,
    stream_index: usize,
) -> Result<Option<Vec<u8>>, ffmpeg_next::Error> {
    for (stream, packet) in ictx.packets() {
        if stream.index() != stream_index {
            continue;
        }
        decoder.send(&packet)?;
        if let Some(picture) = decoder.receive()? {
            return Ok(Some(picture.pixels));
        }
    }

    // Some formats only release the picture on flush
    decoder.send_eof();
    Ok(decoder.receive()?.map(|picture| picture.pixels))
}

impl FrameSource for ImageFileSource {
    fn metadata(&self) -> &SourceMetadata {
        &self.metadata
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        Ok(self.frame.take())
    }

    fn close(&mut self) {
        self.frame = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_png(path: &Path, width: u32, height: u32) {
        let img = image::RgbImage::from_fn(width, height, |x, _| image::Rgb([x as u8, 64, 200]));
        img.save(path).unwrap();
    }

    #[test]
    fn test_yields_exactly_one_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("face.png");
        write_png(&path, 40, 30);

        let mut source = ImageFileSource::open(&path).unwrap();
        assert_eq!(source.metadata().kind, SourceKind::Image);
        assert_eq!(source.metadata().total_frames, 1);

        let frame = source.next_frame().unwrap().unwrap();
        assert_eq!((frame.width(), frame.height()), (40, 30));
        assert_eq!(frame.data().len(), 40 * 30 * 3);
        assert_eq!(&frame.data()[..3], &[0, 64, 200]);
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_seek_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("face.png");
        write_png(&path, 8, 8);

        let mut source = ImageFileSource::open(&path).unwrap();
        assert_eq!(
            source.seek(Duration::from_secs(1)),
            Err(SourceError::SeekUnsupported(SourceKind::Image))
        );
    }

    #[test]
    fn test_missing_image_is_unavailable() {
        let result = ImageFileSource::open(Path::new("/nonexistent/face.png"));
        assert!(matches!(result, Err(SourceError::Unavailable { .. })));
    }
}
