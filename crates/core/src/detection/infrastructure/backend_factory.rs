use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::detection::domain::backend_kind::BackendKind;
use crate::detection::domain::detector_backend::{DetectorBackend, DetectorFactory};
use crate::detection::infrastructure::onnx_facemesh_detector::OnnxFaceMeshDetector;
use crate::detection::infrastructure::onnx_yolo_detector::OnnxYoloDetector;
use crate::detection::infrastructure::rustface_cascade_detector::RustfaceCascadeDetector;
use crate::shared::constants::{BLAZEFACE_MODEL, CASCADE_MODEL, FACEMESH_MODEL, YOLO_FACE_MODEL};
use crate::shared::model_resolver::{self, logged_progress, ModelArtifact};
use crate::shared::model_slot::ModelLoadError;
use crate::shared::settings::PipelineSettings;

/// Builds detector backends from model artifacts, resolving (and when
/// possible downloading) the weights on each load.
#[derive(Clone, Debug)]
pub struct ModelBackendFactory {
    models_dir: Option<PathBuf>,
    cascade_min_face_size: u32,
    deep_confidence: f64,
    mesh_confidence: f64,
}

impl ModelBackendFactory {
    pub fn from_settings(settings: &PipelineSettings) -> Self {
        Self {
            models_dir: settings.models_dir.clone(),
            cascade_min_face_size: settings.cascade_min_face_size,
            deep_confidence: settings.deep_confidence,
            mesh_confidence: settings.mesh_confidence,
        }
    }

    fn resolve(&self, artifact: &ModelArtifact) -> Result<PathBuf, ModelLoadError> {
        log::info!("Resolving model: {}", artifact.file_name);
        Ok(model_resolver::resolve(
            artifact,
            self.models_dir.as_deref(),
            Some(logged_progress(artifact.file_name)),
        )?)
    }
}

impl DetectorFactory for ModelBackendFactory {
    fn load(&self, kind: BackendKind) -> Result<Arc<dyn DetectorBackend>, ModelLoadError> {
        let backend: Arc<dyn DetectorBackend> = match kind {
            BackendKind::Cascade => {
                let path = self.resolve(&CASCADE_MODEL)?;
                Arc::new(
                    RustfaceCascadeDetector::new(&path, self.cascade_min_face_size)
                        .map_err(|e| load_error(&path, e))?,
                )
            }
            BackendKind::DeepDetector => {
                let path = self.resolve(&YOLO_FACE_MODEL)?;
                Arc::new(
                    OnnxYoloDetector::new(&path, self.deep_confidence)
                        .map_err(|e| load_error(&path, e))?,
                )
            }
            BackendKind::LandmarkMesh => {
                let proposer = self.resolve(&BLAZEFACE_MODEL)?;
                let mesh = self.resolve(&FACEMESH_MODEL)?;
                Arc::new(
                    OnnxFaceMeshDetector::new(&proposer, &mesh, self.mesh_confidence)
                        .map_err(|e| load_error(&mesh, e))?,
                )
            }
        };
        log::info!("Loaded {kind} backend");
        Ok(backend)
    }
}

fn load_error(path: &Path, e: Box<dyn std::error::Error>) -> ModelLoadError {
    ModelLoadError::model(path.display().to_string(), e)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factory_with_models(dir: &Path) -> ModelBackendFactory {
        let settings = PipelineSettings {
            models_dir: Some(dir.to_path_buf()),
            ..PipelineSettings::default()
        };
        ModelBackendFactory::from_settings(&settings)
    }

    #[test]
    fn test_from_settings_copies_thresholds() {
        let settings = PipelineSettings {
            deep_confidence: 0.4,
            mesh_confidence: 0.7,
            ..PipelineSettings::default()
        };
        let factory = ModelBackendFactory::from_settings(&settings);
        assert_eq!(factory.deep_confidence, 0.4);
        assert_eq!(factory.mesh_confidence, 0.7);
        assert!(factory.models_dir.is_none());
    }

    #[test]
    fn test_corrupt_onnx_model_is_a_model_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(YOLO_FACE_MODEL.file_name), b"not onnx").unwrap();

        let result = factory_with_models(dir.path()).load(BackendKind::DeepDetector);
        assert!(matches!(result, Err(ModelLoadError::Model { .. })));
    }
}
