//! testgate core
//!
//! Building blocks shared by the testgate tools:
//! - `exec`: run one external command and observe its exit status
//! - `task`: named tasks and the package-manager adapters that run them
//! - `git`: changed paths and HEAD capture
//! - `telemetry`: tracing setup for the binaries

pub mod error;
pub mod exec;
pub mod git;
pub mod task;
pub mod telemetry;

pub use error::{Result, TestgateError};
pub use exec::{execute, CommandSpec, ExecOutcome, ExecStatus, FailureCause};
pub use git::{capture_head_sha, changed_files, changed_files_last_commit, is_git_repo};
pub use task::{CommandTaskExecutor, PackageManager, Task, TaskExecutor};
pub use telemetry::init_tracing;
