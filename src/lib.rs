pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod mapping_gen;

pub use config::{MappingConfig, MappingEntry, RunSettings, ToolSettings};
pub use core::{BulkSyncEngine, GrandTotal, JobResult, RunSummary, TransferRecord};
pub use error::{ConfigError, ExecutionError, ParseError, RunError, ValidationError};
