pub mod ffmpeg_camera_source;
pub mod ffmpeg_video_source;
pub mod image_file_source;
pub mod rgb_decoder;
pub mod source_factory;
