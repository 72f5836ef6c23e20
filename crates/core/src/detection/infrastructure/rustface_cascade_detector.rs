//! Classical cascade face detector backed by `rustface` (SeetaFace funnel
//! cascade). Runs on a grayscale copy of the frame.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::detection::domain::backend_kind::BackendKind;
use crate::detection::domain::detector_backend::{DetectError, DetectorBackend};
use crate::shared::frame::Frame;
use crate::shared::region::FaceRegion;

pub const DEFAULT_MIN_FACE_SIZE: u32 = 20;

const SCORE_THRESH: f64 = 2.0;
const PYRAMID_SCALE_FACTOR: f32 = 0.8;
const WINDOW_STEP: u32 = 4;

pub struct RustfaceCascadeDetector {
    model: rustface::Model,
    min_face_size: u32,
}

impl RustfaceCascadeDetector {
    pub fn new(model_path: &Path, min_face_size: u32) -> Result<Self, Box<dyn std::error::Error>> {
        let file = File::open(model_path)?;
        let model = rustface::read_model(BufReader::new(file))?;
        Ok(Self {
            model,
            min_face_size: min_face_size.max(DEFAULT_MIN_FACE_SIZE),
        })
    }
}

impl DetectorBackend for RustfaceCascadeDetector {
    fn kind(&self) -> BackendKind {
        BackendKind::Cascade
    }

    fn detect(&self, frame: &Frame) -> Result<Vec<FaceRegion>, DetectError> {
        let (width, height) = (frame.width(), frame.height());
        if width < self.min_face_size || height < self.min_face_size {
            return Ok(Vec::new());
        }

        // The detector keeps per-image scratch state, so build one per call.
        let mut detector = rustface::create_detector_with_model(self.model.clone());
        detector.set_min_face_size(self.min_face_size);
        detector.set_score_thresh(SCORE_THRESH);
        detector.set_pyramid_scale_factor(PYRAMID_SCALE_FACTOR);
        detector.set_slide_window_step(WINDOW_STEP, WINDOW_STEP);

        let gray = frame.to_luma();
        let faces = detector.detect(&rustface::ImageData::new(&gray, width, height));

        Ok(faces
            .iter()
            .filter_map(|face| {
                let bbox = face.bbox();
                let x = bbox.x() as f64;
                let y = bbox.y() as f64;
                let corners = (x, y, x + bbox.width() as f64, y + bbox.height() as f64);
                FaceRegion::from_corners(corners, face.score(), BackendKind::Cascade, width, height)
            })
            .collect())
    }
}
