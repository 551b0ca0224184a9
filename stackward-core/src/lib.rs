//! stackward core library
//!
//! The deployment control loop behind the `stackward` CLI: differencing
//! planner, deployment executor, health convergence monitor and rollback
//! supervisor, all driving a cluster through a typed adapter.

pub mod adapter;
pub mod compose;
pub mod deploy;
pub mod error;
pub mod monitor;
pub mod orchestrator;
pub mod plan;
pub mod remove;
pub mod snapshot;
pub mod state;
pub mod types;

// Re-export commonly used items
pub use adapter::{ClusterAdapter, DockerAdapter};
pub use compose::{ComposeConverter, ComposeFile, ComposeParser, ConvertOptions};
pub use error::{Result, StackError};
pub use orchestrator::{ApplyOptions, ApplyOrchestrator, ApplyOutcome};
pub use plan::{ActionVerb, Plan, Planner};
pub use remove::StackRemover;
pub use snapshot::Snapshot;
pub use state::StateReader;
pub use types::{DesiredState, ServiceSpec, StackNamespace, Task, TaskState};
