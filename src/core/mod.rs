pub mod copy;
pub mod error;
pub mod models;
pub mod monitor;
pub mod orchestrator;
pub mod power;
pub mod walker;

pub use copy::{CopyEngine, FileCopier, NativeCopier};
pub use error::{JobError, is_transient_io_error};
pub use models::{
    BackupJob, CopyTask, JobStatus, PathKind, PathSpec, RootResult, TaskStatus, TriggerReason,
};
pub use monitor::TriggerMonitor;
pub use orchestrator::{Orchestrator, StartOutcome};
pub use power::PowerAdapter;
pub use walker::{PathWalker, WalkEntry};
