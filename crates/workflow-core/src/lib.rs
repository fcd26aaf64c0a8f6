pub mod config;
pub mod execution;
pub mod models;
pub mod orchestration;
pub mod persistence;
pub mod registry;
pub mod tasks;

pub use orchestration::Scheduler;
pub use registry::TaskRegistry;
