//! Health convergence monitor.
//!
//! Aggregates one service-update watcher per written service. The stack has
//! converged when every watcher reports healthy; the first failure or
//! timeout cancels the rest.

use super::watcher::{FailureLedger, ServiceUpdateWatcher, ServiceVerdict, WatchOptions};
use crate::adapter::ClusterAdapter;
use crate::deploy::UpdatedService;
use crate::error::{Result, StackError};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct ConvergenceMonitor {
    adapter: Arc<dyn ClusterAdapter>,
    opts: WatchOptions,
    /// Max services watched concurrently.
    parallelism: usize,
    cancel: CancellationToken,
}

impl ConvergenceMonitor {
    pub fn new(
        adapter: Arc<dyn ClusterAdapter>,
        opts: WatchOptions,
        parallelism: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self { adapter, opts, parallelism: parallelism.max(1), cancel }
    }

    /// Block until every written service converges, or fail fast on the
    /// first failed or timed-out watcher.
    pub async fn wait(&self, updated: Vec<UpdatedService>) -> Result<()> {
        if updated.is_empty() {
            info!("no services were changed, nothing to watch");
            return Ok(());
        }

        info!(services = updated.len(), "waiting for services to converge");

        let ledger =
            Arc::new(FailureLedger::new(self.opts.max_failed_tasks * updated.len()));
        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        // Watchers get a child token so a failure can stop the others
        // without cancelling the whole apply context.
        let watch_cancel = self.cancel.child_token();

        let mut set = JoinSet::new();
        for service in updated {
            let adapter = Arc::clone(&self.adapter);
            let opts = self.opts.clone();
            let ledger = Arc::clone(&ledger);
            let cancel = watch_cancel.clone();
            let semaphore = Arc::clone(&semaphore);
            set.spawn(async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => return (service.local.clone(), Ok(ServiceVerdict::Cancelled)),
                };
                if cancel.is_cancelled() {
                    return (service.local.clone(), Ok(ServiceVerdict::Cancelled));
                }
                let local = service.local.clone();
                let watcher = ServiceUpdateWatcher::new(adapter, service, opts, ledger, cancel);
                (local, watcher.watch().await)
            });
        }

        let mut outcome: Result<()> = Ok(());
        while let Some(joined) = set.join_next().await {
            let (local, verdict) = match joined {
                Ok(result) => result,
                Err(e) => {
                    warn!(error = %e, "watcher task panicked");
                    watch_cancel.cancel();
                    if outcome.is_ok() {
                        outcome = Err(StackError::Internal(format!("watcher panicked: {}", e)));
                    }
                    continue;
                }
            };

            match verdict {
                Ok(ServiceVerdict::Healthy) => {
                    info!(service = %local, "service converged");
                }
                Ok(ServiceVerdict::Failed { reason }) => {
                    warn!(service = %local, "convergence failed: {reason}");
                    watch_cancel.cancel();
                    if outcome.is_ok() {
                        outcome = Err(if ledger.total() > ledger.budget() {
                            StackError::FailureBudgetExceeded {
                                failed: ledger.total(),
                                services: ledger.budget() / self.opts.max_failed_tasks.max(1),
                            }
                        } else {
                            StackError::ConvergenceFailed { service: local, reason }
                        });
                    }
                }
                Ok(ServiceVerdict::Timeout) => {
                    watch_cancel.cancel();
                    if outcome.is_ok() {
                        outcome = Err(StackError::Timeout {
                            what: format!("service {} update", local),
                            elapsed: self.opts.service_timeout,
                        });
                    }
                }
                Ok(ServiceVerdict::Cancelled) => {
                    if outcome.is_ok() && self.cancel.is_cancelled() {
                        outcome = Err(StackError::Cancelled);
                    }
                }
                Err(e) => {
                    warn!(service = %local, error = %e, "watcher failed");
                    watch_cancel.cancel();
                    if outcome.is_ok() {
                        outcome = Err(e);
                    }
                }
            }
        }

        if outcome.is_ok() {
            info!("all services converged");
        }
        outcome
    }
}
