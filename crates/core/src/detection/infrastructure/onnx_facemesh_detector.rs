/// Landmark-mesh face detector: BlazeFace proposals refined by FaceMesh.
///
/// Each proposal is cropped, run through the 468-point mesh model, and
/// replaced by the extent of its landmarks. The mesh face-presence score
/// becomes the region confidence.
use std::path::Path;
use std::sync::Mutex;

use crate::detection::domain::backend_kind::BackendKind;
use crate::detection::domain::detector_backend::{DetectError, DetectorBackend};
use crate::detection::infrastructure::execution_provider::build_session;
use crate::detection::infrastructure::math::{sample_nchw, sigmoid, RawDetection};
use crate::detection::infrastructure::onnx_blazeface_proposer::OnnxBlazefaceProposer;
use crate::shared::frame::Frame;
use crate::shared::region::FaceRegion;

/// FaceMesh model input resolution.
const MESH_INPUT_SIZE: usize = 192;

/// Landmarks produced by the mesh model.
const NUM_LANDMARKS: usize = 468;

/// Values per landmark (x, y, z) in the landmark output.
const LANDMARK_STRIDE: usize = 3;

/// Context added around a proposal on each side, as a fraction of its size.
const PROPOSAL_MARGIN: f64 = 0.25;

/// Default face-presence threshold.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

pub struct OnnxFaceMeshDetector {
    proposer: OnnxBlazefaceProposer,
    mesh: Mutex<ort::session::Session>,
    confidence: f64,
}

impl OnnxFaceMeshDetector {
    pub fn new(
        proposer_path: &Path,
        mesh_path: &Path,
        confidence: f64,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let proposer = OnnxBlazefaceProposer::new(proposer_path)?;
        let mesh = build_session(mesh_path)?;
        Ok(Self {
            proposer,
            mesh: Mutex::new(mesh),
            confidence,
        })
    }

    /// Runs the mesh model on one crop window, returning the landmark
    /// extent in frame coordinates and the presence score.
    fn refine(&self, frame: &Frame, window: Window) -> Result<Option<RawDetection>, DetectError> {
        let crop = (window.x, window.y, window.side, window.side);
        let tensor = sample_nchw(frame, crop, MESH_INPUT_SIZE);
        let input_value = ort::value::Tensor::from_array(tensor)?;

        let mut mesh = self
            .mesh
            .lock()
            .map_err(|e| format!("session lock poisoned: {e}"))?;
        let outputs = mesh.run(ort::inputs![input_value])?;

        let mut landmarks = None;
        let mut presence = None;
        for i in 0..outputs.len() {
            let array = outputs[i].try_extract_array::<f32>()?;
            let data = array.as_slice().ok_or("cannot get mesh output slice")?;
            if data.len() >= NUM_LANDMARKS * LANDMARK_STRIDE && landmarks.is_none() {
                landmarks = Some(data.to_vec());
            } else if data.len() == 1 && presence.is_none() {
                presence = Some(data[0]);
            }
        }

        let landmarks = landmarks.ok_or("mesh model produced no landmark output")?;
        let presence = sigmoid(presence.ok_or("mesh model produced no presence score")?);
        Ok(landmark_extent(&landmarks, presence, window))
    }
}

impl DetectorBackend for OnnxFaceMeshDetector {
    fn kind(&self) -> BackendKind {
        BackendKind::LandmarkMesh
    }

    fn detect(&self, frame: &Frame) -> Result<Vec<FaceRegion>, DetectError> {
        let proposals = self.proposer.propose(frame)?;
        let mut regions = Vec::with_capacity(proposals.len());

        for proposal in &proposals {
            let Some(refined) = self.refine(frame, Window::around(proposal))? else {
                continue;
            };
            if refined.score < self.confidence {
                continue;
            }
            if let Some(region) = FaceRegion::from_corners(
                refined.corners(),
                refined.score,
                BackendKind::LandmarkMesh,
                frame.width(),
                frame.height(),
            ) {
                regions.push(region);
            }
        }

        Ok(regions)
    }
}

/// Square crop window in frame coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Window {
    x: f64,
    y: f64,
    side: f64,
}

impl Window {
    /// Square window centred on the proposal, enlarged by the margin.
    fn around(proposal: &RawDetection) -> Self {
        let w = proposal.x2 - proposal.x1;
        let h = proposal.y2 - proposal.y1;
        let side = w.max(h) * (1.0 + 2.0 * PROPOSAL_MARGIN);
        let cx = (proposal.x1 + proposal.x2) / 2.0;
        let cy = (proposal.y1 + proposal.y2) / 2.0;
        Self {
            x: cx - side / 2.0,
            y: cy - side / 2.0,
            side,
        }
    }
}

/// Maps landmarks from mesh input pixels into the frame and returns their
/// bounding extent, or `None` when the output holds too few landmarks.
fn landmark_extent(landmarks: &[f32], presence: f32, window: Window) -> Option<RawDetection> {
    if landmarks.len() < NUM_LANDMARKS * LANDMARK_STRIDE {
        return None;
    }
    let scale = window.side / MESH_INPUT_SIZE as f64;
    let mut extent = RawDetection {
        x1: f64::INFINITY,
        y1: f64::INFINITY,
        x2: f64::NEG_INFINITY,
        y2: f64::NEG_INFINITY,
        score: presence as f64,
    };
    for point in landmarks.chunks_exact(LANDMARK_STRIDE).take(NUM_LANDMARKS) {
        let x = window.x + point[0] as f64 * scale;
        let y = window.y + point[1] as f64 * scale;
        extent.x1 = extent.x1.min(x);
        extent.y1 = extent.y1.min(y);
        extent.x2 = extent.x2.max(x);
        extent.y2 = extent.y2.max(y);
    }
    Some(extent)
}
