pub mod domain;
pub mod infrastructure;
pub mod orchestrator;
pub mod pipeline_logger;
