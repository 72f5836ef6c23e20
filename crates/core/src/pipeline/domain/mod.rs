pub mod annotated_frame;
pub mod playback_controller;
pub mod result_renderer;
pub mod session;
