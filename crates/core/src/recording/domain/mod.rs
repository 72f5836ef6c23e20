pub mod image_writer;
pub mod overlay_painter;
pub mod storage_error;
pub mod video_writer;
