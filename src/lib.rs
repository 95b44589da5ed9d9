pub mod config;
pub mod error;
pub mod extract;
pub mod import;
pub mod logging;
pub mod model;
pub mod processor;
pub mod repository;
pub mod service;
pub mod validation;

pub use config::ImportConfig;
pub use error::AppError;
pub use extract::{ExtractedFile, RowRecord};
pub use import::{ImportProcess, ImportResult, ProcessState};
pub use processor::ProcessorRegistry;
pub use service::{ImportHandle, ImportService};
