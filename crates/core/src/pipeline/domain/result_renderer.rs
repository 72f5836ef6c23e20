use crate::pipeline::domain::annotated_frame::AnnotatedFrame;

/// Boundary that displays annotated frames. Runs on the presentation
/// thread and only ever sees the most recent frame.
pub trait ResultRenderer: Send {
    fn render(&mut self, frame: &AnnotatedFrame);
}
