pub mod backend_kind;
pub mod detector_backend;
