pub mod constants;
pub mod frame;
pub mod model_resolver;
pub mod model_slot;
pub mod region;
pub mod settings;
pub mod source_metadata;
