pub mod backend_factory;
pub mod execution_provider;
pub mod math;
pub mod onnx_blazeface_proposer;
pub mod onnx_facemesh_detector;
pub mod onnx_yolo_detector;
pub mod rustface_cascade_detector;
