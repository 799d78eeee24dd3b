mod app;
mod config;
mod error;
mod logging;
mod telemetry;

pub use app::{run, run_from_args};
pub use config::RuntimeConfig;
pub use error::AppError;
