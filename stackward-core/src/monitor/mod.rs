//! Convergence monitoring and observability streams.

pub mod convergence;
pub mod events;
pub mod healthlog;
pub mod logs;
pub mod watcher;

pub use convergence::ConvergenceMonitor;
pub use watcher::{FailureLedger, ServiceUpdateWatcher, ServiceVerdict, WatchOptions};

use crate::adapter::ClusterAdapter;
use crate::types::StackNamespace;
use events::EventStreamer;
use healthlog::HealthLogStreamer;
use logs::LogStreamer;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// The observability tap: engine events, container logs and healthcheck
/// logs, all filtered to the stack and all tied to one apply lifetime.
pub struct ObservabilityTap {
    handles: Vec<JoinHandle<()>>,
}

impl ObservabilityTap {
    /// Spawn the three streams in the background. They stop at the next
    /// suspension point once `cancel` fires.
    pub fn spawn(
        adapter: Arc<dyn ClusterAdapter>,
        ns: &StackNamespace,
        cancel: &CancellationToken,
    ) -> Self {
        let events = EventStreamer::new(Arc::clone(&adapter), ns.clone());
        let logs = LogStreamer::new(Arc::clone(&adapter), ns.clone());
        let health = HealthLogStreamer::new(adapter, ns.clone());

        let handles = vec![
            tokio::spawn(events.run(cancel.clone())),
            tokio::spawn(logs.run(cancel.clone())),
            tokio::spawn(health.run(cancel.clone())),
        ];
        Self { handles }
    }

    /// Wait for all streams to drain after cancellation.
    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}
