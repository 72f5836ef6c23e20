/// YOLO face detector using ONNX Runtime via `ort`.
///
/// Handles letterbox preprocessing, inference and NMS post-processing, and
/// maps boxes back to clamped frame coordinates.
use std::path::Path;
use std::sync::Mutex;

use crate::detection::domain::backend_kind::BackendKind;
use crate::detection::domain::detector_backend::{DetectError, DetectorBackend};
use crate::detection::infrastructure::execution_provider::{build_session, declared_input_size};
use crate::detection::infrastructure::math::{nms, RawDetection};
use crate::shared::frame::Frame;
use crate::shared::region::FaceRegion;

/// Fallback YOLO model input resolution when the model doesn't specify dimensions.
const DEFAULT_INPUT_SIZE: u32 = 640;

/// Default confidence threshold for face detection.
pub const DEFAULT_CONFIDENCE: f64 = 0.25;

/// NMS IoU threshold.
const NMS_IOU_THRESH: f64 = 0.45;

/// Gray used for letterbox padding (YOLO convention).
const PAD_VALUE: f32 = 114.0 / 255.0;

/// Letterbox transform from frame to model coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Letterbox {
    scale: f64,
    pad_x: u32,
    pad_y: u32,
}

impl Letterbox {
    fn to_frame(self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.pad_x as f64) / self.scale,
            (y - self.pad_y as f64) / self.scale,
        )
    }
}

pub struct OnnxYoloDetector {
    session: Mutex<ort::session::Session>,
    confidence: f64,
    input_size: u32,
}

impl OnnxYoloDetector {
    /// Load a YOLO ONNX model and prepare for inference.
    ///
    /// The input resolution is read from the model's input shape (expecting NCHW).
    /// Falls back to 640 if the shape is dynamic or unreadable.
    pub fn new(model_path: &Path, confidence: f64) -> Result<Self, Box<dyn std::error::Error>> {
        let session = build_session(model_path)?;
        let input_size = declared_input_size(&session).unwrap_or(DEFAULT_INPUT_SIZE);
        Ok(Self {
            session: Mutex::new(session),
            confidence,
            input_size,
        })
    }
}

impl DetectorBackend for OnnxYoloDetector {
    fn kind(&self) -> BackendKind {
        BackendKind::DeepDetector
    }

    fn detect(&self, frame: &Frame) -> Result<Vec<FaceRegion>, DetectError> {
        let (input_tensor, letterbox) = letterbox(frame, self.input_size);
        let input_value = ort::value::Tensor::from_array(input_tensor)?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| format!("session lock poisoned: {e}"))?;
        let outputs = session.run(ort::inputs![input_value])?;
        if outputs.len() == 0 {
            return Err("YOLO model produced no outputs".into());
        }
        let tensor = outputs[0].try_extract_array::<f32>()?;
        let data = tensor.as_slice().ok_or("cannot get tensor slice")?;
        let raw = parse_detections(data, tensor.shape(), self.confidence, letterbox)?;

        Ok(nms(raw, NMS_IOU_THRESH)
            .into_iter()
            .filter_map(|d| {
                FaceRegion::from_corners(
                    d.corners(),
                    d.score,
                    BackendKind::DeepDetector,
                    frame.width(),
                    frame.height(),
                )
            })
            .collect())
    }
}

/// Decodes YOLO rows `[cx, cy, w, h, conf, ...]` above `confidence`.
///
/// The output is `[1, features, detections]` (transposed) or
/// `[1, detections, features]`; both layouts are handled.
fn parse_detections(
    data: &[f32],
    shape: &[usize],
    confidence: f64,
    letterbox: Letterbox,
) -> Result<Vec<RawDetection>, DetectError> {
    if shape.len() != 3 {
        return Err(format!("unexpected YOLO output shape: {shape:?}").into());
    }
    let transposed = shape[1] < shape[2];
    let (num_dets, num_feats) = if transposed {
        (shape[2], shape[1])
    } else {
        (shape[1], shape[2])
    };
    if num_feats < 5 || data.len() < num_dets * num_feats {
        return Err(format!("YOLO output too small for shape {shape:?}").into());
    }

    let value = |det: usize, feat: usize| -> f64 {
        if transposed {
            data[feat * num_dets + det] as f64
        } else {
            data[det * num_feats + feat] as f64
        }
    };

    let mut raw = Vec::new();
    for i in 0..num_dets {
        let score = value(i, 4);
        if score < confidence {
            continue;
        }
        let (cx, cy, w, h) = (value(i, 0), value(i, 1), value(i, 2), value(i, 3));
        let (x1, y1) = letterbox.to_frame(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = letterbox.to_frame(cx + w / 2.0, cy + h / 2.0);
        raw.push(RawDetection {
            x1,
            y1,
            x2,
            y2,
            score,
        });
    }
    Ok(raw)
}

/// Letterbox-resize a frame to `target_size` x `target_size` (nearest
/// neighbour) as a `[0, 1]` NCHW tensor.
fn letterbox(frame: &Frame, target_size: u32) -> (ndarray::Array4<f32>, Letterbox) {
    let fw = frame.width() as f64;
    let fh = frame.height() as f64;
    let target = target_size as f64;

    let scale = (target / fw).min(target / fh);
    let new_w = ((fw * scale).round() as u32).min(target_size);
    let new_h = ((fh * scale).round() as u32).min(target_size);
    let pad_x = (target_size - new_w) / 2;
    let pad_y = (target_size - new_h) / 2;

    let size = target_size as usize;
    let mut tensor = ndarray::Array4::<f32>::from_elem((1, 3, size, size), PAD_VALUE);

    let src = frame.data();
    let channels = frame.channels() as usize;
    let src_w = frame.width() as usize;
    let src_h = frame.height() as usize;
    if src_w > 0 && src_h > 0 && channels >= 3 {
        for y in 0..new_h as usize {
            let src_y = ((y as f64 / scale) as usize).min(src_h - 1);
            for x in 0..new_w as usize {
                let src_x = ((x as f64 / scale) as usize).min(src_w - 1);
                let offset = (src_y * src_w + src_x) * channels;
                let ty = pad_y as usize + y;
                let tx = pad_x as usize + x;
                for c in 0..3 {
                    tensor[[0, c, ty, tx]] = src[offset + c] as f32 / 255.0;
                }
            }
        }
    }

    (
        tensor,
        Letterbox {
            scale,
            pad_x,
            pad_y,
        },
    )
}
