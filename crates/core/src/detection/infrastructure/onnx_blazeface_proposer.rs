/// BlazeFace face proposer using ONNX Runtime via `ort`.
///
/// A lightweight short-range detector whose boxes seed the landmark mesh
/// stage. It never reports faces on its own.
use std::path::Path;
use std::sync::Mutex;

use crate::detection::domain::detector_backend::DetectError;
use crate::detection::infrastructure::execution_provider::build_session;
use crate::detection::infrastructure::math::{nms, sample_nchw, sigmoid, RawDetection};
use crate::shared::frame::Frame;

/// BlazeFace model input resolution.
const INPUT_SIZE: u32 = 128;

/// Proposal score threshold (after sigmoid).
const PROPOSAL_THRESH: f32 = 0.5;

/// NMS IoU threshold.
const NMS_IOU_THRESH: f64 = 0.3;

/// Number of BlazeFace anchors (short-range model).
const NUM_ANCHORS: usize = 896;

/// Values per anchor in the regressor output: box deltas then 6 keypoints.
const REGRESSOR_STRIDE: usize = 16;

pub struct OnnxBlazefaceProposer {
    session: Mutex<ort::session::Session>,
    anchors: Vec<[f32; 2]>,
}

impl OnnxBlazefaceProposer {
    pub fn new(model_path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let session = build_session(model_path)?;
        Ok(Self {
            session: Mutex::new(session),
            anchors: generate_anchors(),
        })
    }

    /// Candidate face boxes in frame coordinates, unclamped.
    pub fn propose(&self, frame: &Frame) -> Result<Vec<RawDetection>, DetectError> {
        let size = INPUT_SIZE as usize;
        let window = (0.0, 0.0, frame.width() as f64, frame.height() as f64);
        let input_value = ort::value::Tensor::from_array(sample_nchw(frame, window, size))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| format!("session lock poisoned: {e}"))?;
        let outputs = session.run(ort::inputs![input_value])?;

        // regressors [1, 896, 16], classificators [1, 896, 1]
        if outputs.len() < 2 {
            return Err(
                format!("BlazeFace model expected 2 outputs, got {}", outputs.len()).into(),
            );
        }
        let regressors = outputs[0].try_extract_array::<f32>()?;
        let scores = outputs[1].try_extract_array::<f32>()?;
        let reg_data = regressors.as_slice().ok_or("cannot get regressor slice")?;
        let score_data = scores.as_slice().ok_or("cannot get score slice")?;

        let raw = decode(
            &self.anchors,
            reg_data,
            score_data,
            frame.width(),
            frame.height(),
        );
        Ok(nms(raw, NMS_IOU_THRESH))
    }
}

/// Decodes anchor-relative boxes whose sigmoid score clears the threshold.
fn decode(
    anchors: &[[f32; 2]],
    reg_data: &[f32],
    score_data: &[f32],
    frame_width: u32,
    frame_height: u32,
) -> Vec<RawDetection> {
    let fw = frame_width as f32;
    let fh = frame_height as f32;
    let input = INPUT_SIZE as f32;
    let count = anchors.len().min(score_data.len());

    let mut raw = Vec::new();
    for (i, &logit) in score_data.iter().enumerate().take(count) {
        let score = sigmoid(logit);
        if score < PROPOSAL_THRESH {
            continue;
        }
        let offset = i * REGRESSOR_STRIDE;
        if offset + 4 > reg_data.len() {
            break;
        }
        let anchor = anchors[i];
        let cx = anchor[0] + reg_data[offset] / input;
        let cy = anchor[1] + reg_data[offset + 1] / input;
        let w = reg_data[offset + 2] / input;
        let h = reg_data[offset + 3] / input;

        raw.push(RawDetection {
            x1: ((cx - w / 2.0) * fw) as f64,
            y1: ((cy - h / 2.0) * fh) as f64,
            x2: ((cx + w / 2.0) * fw) as f64,
            y2: ((cy + h / 2.0) * fh) as f64,
            score: score as f64,
        });
    }
    raw
}

/// BlazeFace short-range anchors: a 16x16 grid with 2 anchors per cell
/// followed by an 8x8 grid with 6, centres normalized to `(0, 1)`.
fn generate_anchors() -> Vec<[f32; 2]> {
    let strides = [(8, 2), (16, 6)]; // (stride, anchors_per_cell)
    let mut anchors = Vec::with_capacity(NUM_ANCHORS);

    for &(stride, num) in &strides {
        let grid_size = INPUT_SIZE as usize / stride;
        for y in 0..grid_size {
            for x in 0..grid_size {
                let cx = (x as f32 + 0.5) / grid_size as f32;
                let cy = (y as f32 + 0.5) / grid_size as f32;
                anchors.extend(std::iter::repeat([cx, cy]).take(num));
            }
        }
    }

    anchors
}
