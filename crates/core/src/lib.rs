pub mod config;
pub mod context;
pub mod executor;
pub mod manager;
pub mod orchestrator;
pub mod package;
pub mod parser;
pub mod prober;
pub mod queue;
pub mod reconciler;
pub mod retry;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Settings;
pub use context::ServiceContext;
pub use executor::{CommandOutput, CommandRunner, CommandTimeouts, SystemRunner};
pub use manager::{interpret_probe, ManagerRegistry, PackageManager};
pub use orchestrator::{Orchestrator, VerifyConfig};
pub use package::{
    InstallStatus, Job, JobStatus, Operation, OperationOutcome, PackageKey, StatusRecord,
    Verification,
};
pub use parser::OutputParser;
pub use prober::StatusProber;
pub use queue::{OperationHandle, OperationQueue, QueueConfig};
pub use reconciler::{BulkConfig, BulkEntry, BulkError, BulkProgress, BulkReconciler, BulkResult};
pub use retry::BackoffPolicy;
