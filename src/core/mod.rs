pub mod accountant;
pub mod aggregator;
pub mod engine;
pub mod executor;
pub mod parser;
pub mod report;
pub mod scheduler;

pub use accountant::{ActionCounts, JobAccountant, JobTally, TabularLog};
pub use aggregator::{GrandTotal, ResultAggregator};
pub use engine::BulkSyncEngine;
pub use executor::{JobResult, JobRunner, OutputLines, SyncCommand, SyncExecutor};
pub use parser::{TransferRecord, TransferRecordParser};
pub use report::{
    ConsoleReporter, LogReporter, Reporter, Reporters, RunSummary, SummaryFileReporter,
};
pub use scheduler::JobScheduler;
