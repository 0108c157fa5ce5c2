pub mod config;
pub mod errors;
pub mod job_scheduling;
pub mod services;
pub mod tabs;

pub use config::AppConfig;
pub use errors::{AppError, AppResult};
