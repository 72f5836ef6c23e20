use std::time::Duration;

use ndarray::ArrayView3;

/// Identifies which opened source a frame came from.
///
/// Every `open_source` call gets a fresh id, so frames from a source that has
/// since been replaced can be told apart from current ones.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u64);

/// A captured image: contiguous RGB bytes in row-major order plus the
/// presentation timestamp and the source it was read from.
///
/// Format conversion happens at I/O boundaries only; the domain layer
/// treats pixel data as opaque.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    channels: u8,
    index: usize,
    timestamp: Duration,
    source: SourceId,
}

impl Frame {
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        channels: u8,
        index: usize,
        timestamp: Duration,
    ) -> Self {
        debug_assert_eq!(
            data.len(),
            (width as usize) * (height as usize) * (channels as usize),
            "data length must equal width * height * channels"
        );
        Self {
            data,
            width,
            height,
            channels,
            index,
            timestamp,
            source: SourceId::default(),
        }
    }

    /// Tags the frame with the source it was captured from.
    pub fn with_source(mut self, source: SourceId) -> Self {
        self.source = source;
        self
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    /// Position of the frame within its source (0 for stills).
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }

    pub fn source(&self) -> SourceId {
        self.source
    }

    /// Pixel view shaped `(height, width, channels)`.
    ///
    /// Returns `None` only if the buffer was built with inconsistent
    /// dimensions, which `new` rejects in debug builds.
    pub fn as_ndarray(&self) -> Option<ArrayView3<'_, u8>> {
        ArrayView3::from_shape(self.shape(), &self.data).ok()
    }

    /// Luma plane using the BT.601 weights, one byte per pixel.
    pub fn to_luma(&self) -> Vec<u8> {
        let channels = self.channels as usize;
        if channels < 3 {
            return self.data.iter().step_by(channels.max(1)).copied().collect();
        }
        self.data
            .chunks_exact(channels)
            .map(|px| {
                let y = 0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32;
                y.round().clamp(0.0, 255.0) as u8
            })
            .collect()
    }

    fn shape(&self) -> (usize, usize, usize) {
        (
            self.height as usize,
            self.width as usize,
            self.channels as usize,
        )
    }
}
