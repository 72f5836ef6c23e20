use crate::shared::model_resolver::ModelArtifact;

/// Directory name used under the platform config and cache directories.
pub const APP_DIR_NAME: &str = "MoodLens";

/// SeetaFace frontal funnel cascade used by the `cascade` backend.
pub const CASCADE_MODEL: ModelArtifact = ModelArtifact {
    file_name: "seeta_fd_frontal_v1.0.bin",
    url: Some("https://github.com/atomashpolskiy/rustface/raw/master/model/seeta_fd_frontal_v1.0.bin"),
};

/// YOLO face model (WIDER FACE, pose head) used by the `deep-detector` backend.
pub const YOLO_FACE_MODEL: ModelArtifact = ModelArtifact {
    file_name: "yolo11n-pose_widerface.onnx",
    url: Some(
        "https://github.com/neutrinographics/faceguard/releases/download/v0.1.0/yolo11n-pose_widerface.onnx",
    ),
};

/// Short-range BlazeFace proposal model for the `landmark-mesh` backend.
/// Not downloadable; it must be placed in the models directory.
pub const BLAZEFACE_MODEL: ModelArtifact = ModelArtifact {
    file_name: "blazeface.onnx",
    url: None,
};

/// 468-point FaceMesh model for the `landmark-mesh` backend.
pub const FACEMESH_MODEL: ModelArtifact = ModelArtifact {
    file_name: "face_mesh.onnx",
    url: None,
};

/// FER+ emotion classifier.
pub const EMOTION_MODEL: ModelArtifact = ModelArtifact {
    file_name: "emotion-ferplus-8.onnx",
    url: Some(
        "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/emotion_ferplus/model/emotion-ferplus-8.onnx",
    ),
};

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "tif", "webp"];

/// Classifications at or above this confidence are drawn in the emotion's
/// own colour; weaker ones are drawn in the uncertain accent.
pub const CONFIDENT_EMOTION_THRESHOLD: f32 = 0.6;
