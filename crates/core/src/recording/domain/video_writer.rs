use std::path::Path;

use crate::shared::frame::Frame;
use crate::shared::source_metadata::SourceMetadata;

/// Abstracts video encoding so the recorder can write output without
/// depending on a specific codec library.
pub trait VideoWriter: Send {
    /// Output uses the source resolution and its native frame rate.
    fn open(
        &mut self,
        path: &Path,
        metadata: &SourceMetadata,
    ) -> Result<(), Box<dyn std::error::Error>>;

    fn write(&mut self, frame: &Frame) -> Result<(), Box<dyn std::error::Error>>;

    fn close(&mut self) -> Result<(), Box<dyn std::error::Error>>;
}
