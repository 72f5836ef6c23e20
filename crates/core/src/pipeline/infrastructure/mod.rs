pub mod backend_switch;
pub mod capture_loop;
pub mod face_worker_pool;
pub mod frame_queue;
pub mod presentation;
pub mod processing_loop;
pub mod run_state;
