//! Process wiring for Burrow: configuration, telemetry, backend selection and
//! the lifecycle of the deletion pipeline.

pub mod app;
pub mod cli;
pub mod error;
pub mod telemetry;

pub use app::{open_storage, Application, Backend, Settings};
pub use cli::Cli;
pub use error::{AppError, Result};
