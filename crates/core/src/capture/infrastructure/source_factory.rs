use crate::capture::domain::frame_source::{FrameSource, SourceError, SourceOpener};
use crate::capture::domain::source_descriptor::SourceDescriptor;
use crate::capture::infrastructure::ffmpeg_camera_source::FfmpegCameraSource;
use crate::capture::infrastructure::ffmpeg_video_source::FfmpegVideoSource;
use crate::capture::infrastructure::image_file_source::ImageFileSource;

/// Opens cameras, video files and still images with the ffmpeg adapters.
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegSourceOpener;

impl SourceOpener for FfmpegSourceOpener {
    fn open(&self, descriptor: &SourceDescriptor) -> Result<Box<dyn FrameSource>, SourceError> {
        if let Some(path) = descriptor.path() {
            if !path.is_file() {
                return Err(SourceError::unavailable(descriptor, "file not found"));
            }
        }

        let source: Box<dyn FrameSource> = match descriptor {
            SourceDescriptor::Camera { index } => Box::new(FfmpegCameraSource::open(*index)?),
            SourceDescriptor::VideoFile(path) => Box::new(FfmpegVideoSource::open(path)?),
            SourceDescriptor::Image(path) => Box::new(ImageFileSource::open(path)?),
        };
        Ok(source)
    }
}
