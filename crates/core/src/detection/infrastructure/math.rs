//! Geometry and tensor helpers shared by the ONNX detector backends.

use crate::shared::frame::Frame;

/// A scored detection in frame coordinates, before clamping.
#[derive(Clone, Debug, PartialEq)]
pub struct RawDetection {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub score: f64,
}

impl RawDetection {
    pub fn corners(&self) -> (f64, f64, f64, f64) {
        (self.x1, self.y1, self.x2, self.y2)
    }
}

/// IoU between two detections.
pub fn bbox_iou(a: &RawDetection, b: &RawDetection) -> f64 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    if inter == 0.0 {
        return 0.0;
    }

    let area_a = (a.x2 - a.x1) * (a.y2 - a.y1);
    let area_b = (b.x2 - b.x1) * (b.y2 - b.y1);
    inter / (area_a + area_b - inter)
}

/// Greedy NMS: sort by score descending, suppress overlapping boxes.
pub fn nms(mut dets: Vec<RawDetection>, iou_thresh: f64) -> Vec<RawDetection> {
    dets.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<RawDetection> = Vec::new();
    for det in dets {
        if keep.iter().all(|k| bbox_iou(k, &det) <= iou_thresh) {
            keep.push(det);
        }
    }
    keep
}

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Samples a `size` x `size` RGB patch covering `(x, y, w, h)` of the frame
/// (nearest neighbour) into an NCHW tensor scaled to `[0, 1]`.
///
/// Parts of the window outside the frame repeat the edge pixels.
pub fn sample_nchw(
    frame: &Frame,
    window: (f64, f64, f64, f64),
    size: usize,
) -> ndarray::Array4<f32> {
    let (wx, wy, ww, wh) = window;
    let src_w = frame.width() as usize;
    let src_h = frame.height() as usize;
    let channels = frame.channels() as usize;
    let data = frame.data();

    let mut tensor = ndarray::Array4::<f32>::zeros((1, 3, size, size));
    if src_w == 0 || src_h == 0 || channels < 3 {
        return tensor;
    }

    let step_x = ww / size as f64;
    let step_y = wh / size as f64;
    for ty in 0..size {
        let sy = (wy + (ty as f64 + 0.5) * step_y).max(0.0) as usize;
        let sy = sy.min(src_h - 1);
        for tx in 0..size {
            let sx = (wx + (tx as f64 + 0.5) * step_x).max(0.0) as usize;
            let sx = sx.min(src_w - 1);
            let offset = (sy * src_w + sx) * channels;
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = data[offset + c] as f32 / 255.0;
            }
        }
    }
    tensor
}
