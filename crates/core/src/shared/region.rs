use crate::detection::domain::backend_kind::BackendKind;

/// Axis-aligned box in integer frame coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    /// Builds a box from floating-point corners, clamped to a
    /// `frame_width` x `frame_height` frame.
    ///
    /// Returns `None` when the clamped box covers less than one pixel in
    /// either direction (including NaN input), so every box that exists
    /// lies inside its frame.
    pub fn clamped(
        (x1, y1, x2, y2): (f64, f64, f64, f64),
        frame_width: u32,
        frame_height: u32,
    ) -> Option<Self> {
        if [x1, y1, x2, y2].iter().any(|v| v.is_nan()) {
            return None;
        }
        let fw = frame_width as f64;
        let fh = frame_height as f64;
        let left = x1.max(0.0).min(fw);
        let top = y1.max(0.0).min(fh);
        let right = x2.max(0.0).min(fw);
        let bottom = y2.max(0.0).min(fh);

        if !(right - left >= 1.0 && bottom - top >= 1.0) {
            return None;
        }

        let x = left.floor() as u32;
        let y = top.floor() as u32;
        let right = (right.ceil() as u32).min(frame_width);
        let bottom = (bottom.ceil() as u32).min(frame_height);
        Some(Self {
            x,
            y,
            width: right - x,
            height: bottom - y,
        })
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// True when the box is non-empty and entirely inside the frame.
    pub fn fits_within(&self, frame_width: u32, frame_height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && self.right() <= frame_width
            && self.bottom() <= frame_height
    }

    /// Grows the box by `margin` of its size on every side, clamped to the frame.
    pub fn expanded(&self, margin: f64, frame_width: u32, frame_height: u32) -> Self {
        let dx = self.width as f64 * margin;
        let dy = self.height as f64 * margin;
        Self::clamped(
            (
                self.x as f64 - dx,
                self.y as f64 - dy,
                self.right() as f64 + dx,
                self.bottom() as f64 + dy,
            ),
            frame_width,
            frame_height,
        )
        .unwrap_or(*self)
    }

    pub fn iou(&self, other: &BoundingBox) -> f64 {
        let ix1 = self.x.max(other.x);
        let iy1 = self.y.max(other.y);
        let ix2 = self.right().min(other.right());
        let iy2 = self.bottom().min(other.bottom());
        if ix2 <= ix1 || iy2 <= iy1 {
            return 0.0;
        }

        let inter = (ix2 - ix1) as f64 * (iy2 - iy1) as f64;
        inter / (self.area() as f64 + other.area() as f64 - inter)
    }
}

/// A located face: its box within one frame, the detector's score and the
/// backend that produced it.
#[derive(Clone, Debug, PartialEq)]
pub struct FaceRegion {
    pub bbox: BoundingBox,
    pub confidence: f64,
    pub backend: BackendKind,
}

impl FaceRegion {
    /// Builds a region from raw detector corners, clamped to the frame.
    pub fn from_corners(
        corners: (f64, f64, f64, f64),
        confidence: f64,
        backend: BackendKind,
        frame_width: u32,
        frame_height: u32,
    ) -> Option<Self> {
        BoundingBox::clamped(corners, frame_width, frame_height).map(|bbox| Self {
            bbox,
            confidence,
            backend,
        })
    }
}
