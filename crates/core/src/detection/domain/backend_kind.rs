use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The closed set of face-localization strategies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Classical boosted cascade: fastest, frontal faces only.
    #[serde(alias = "haar")]
    Cascade,
    /// Single-shot deep detector: robust to pose and scale.
    #[serde(alias = "yolo")]
    DeepDetector,
    /// Proposal detector refined by a dense landmark mesh.
    #[serde(alias = "mediapipe")]
    LandmarkMesh,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [
        BackendKind::Cascade,
        BackendKind::DeepDetector,
        BackendKind::LandmarkMesh,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BackendKind::Cascade => "cascade",
            BackendKind::DeepDetector => "deep-detector",
            BackendKind::LandmarkMesh => "landmark-mesh",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cascade" | "haar" => Ok(BackendKind::Cascade),
            "deep" | "yolo" | "deep-detector" => Ok(BackendKind::DeepDetector),
            "mesh" | "mediapipe" | "landmark-mesh" => Ok(BackendKind::LandmarkMesh),
            other => Err(format!(
                "unknown backend '{other}' (expected cascade, deep-detector or landmark-mesh)"
            )),
        }
    }
}
