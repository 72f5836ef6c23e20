pub mod emotion;
pub mod emotion_classifier;
pub mod emotion_result;
pub mod face_crop;
