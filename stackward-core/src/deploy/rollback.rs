//! Rollback supervisor.
//!
//! Single authority for undoing an apply: restores the services the apply
//! updated from the sealed snapshot and removes the services it created.
//! Services the plan left untouched are never rewritten. Networks, volumes,
//! configs and secrets are not undone: they are additive and their content
//! cannot be restored from the snapshot.
//!
//! The supervisor runs at most once per invocation; later triggers (signal
//! racing a convergence failure, say) are no-ops.

use crate::adapter::ClusterAdapter;
use crate::error::{Result, StackError};
use crate::plan::{ActionVerb, Plan};
use crate::snapshot::{ServiceSnapshot, Snapshot};
use crate::types::StackNamespace;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Outcome of one rollback run.
#[derive(Debug, Default)]
pub struct RollbackReport {
    pub attempted: usize,
    pub failures: Vec<(String, String)>,
}

impl RollbackReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Fold the report into an error when any per-service action failed.
    pub fn into_result(self) -> Result<()> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(StackError::RollbackPartial {
                attempted: self.attempted,
                failed: self.failures.len(),
            })
        }
    }
}

pub struct RollbackSupervisor {
    adapter: Arc<dyn ClusterAdapter>,
    ns: StackNamespace,
    timeout: Duration,
    ran: AtomicBool,
}

impl RollbackSupervisor {
    pub fn new(adapter: Arc<dyn ClusterAdapter>, ns: StackNamespace, timeout: Duration) -> Self {
        Self { adapter, ns, timeout, ran: AtomicBool::new(false) }
    }

    /// Restore the snapshot, limited to services the plan wrote. Idempotent:
    /// the first call runs, every later call returns an empty report.
    pub async fn run(&self, snapshot: &Snapshot, plan: &Plan) -> RollbackReport {
        if self.ran.swap(true, Ordering::SeqCst) {
            info!("rollback already ran this invocation, skipping");
            return RollbackReport::default();
        }

        if snapshot.is_empty() {
            info!("nothing to roll back");
            return RollbackReport::default();
        }

        warn!(stack = %self.ns, "rolling back");

        match tokio::time::timeout(self.timeout, self.restore(snapshot, plan)).await {
            Ok(report) => report,
            Err(_) => {
                error!(stack = %self.ns, timeout = ?self.timeout, "rollback timed out");
                let mut report = RollbackReport::default();
                report.failures.push(("*".to_string(), "rollback timed out".to_string()));
                report
            }
        }
    }

    async fn restore(&self, snapshot: &Snapshot, plan: &Plan) -> RollbackReport {
        let mut report = RollbackReport::default();

        // Only services the apply updated get their previous spec back;
        // rewriting an untouched service would churn it for nothing.
        let updated: HashSet<&str> = plan
            .services
            .iter()
            .filter(|a| a.verb == ActionVerb::Update)
            .map(|a| a.local.as_str())
            .collect();

        // Per-service failures are collected, never fatal: a partial
        // rollback is still better than none.
        for (local, entry) in snapshot.services() {
            if !updated.contains(local.as_str()) {
                continue;
            }
            report.attempted += 1;
            if let Err(e) = self.restore_service(local, entry).await {
                error!(service = %local, error = %e, "rollback of service failed");
                report.failures.push((local.clone(), e.to_string()));
            } else {
                info!(service = %local, image = %entry.image, "service restored");
            }
        }

        for local in snapshot.created() {
            report.attempted += 1;
            if let Err(e) = self.remove_created(local).await {
                error!(service = %local, error = %e, "removal of created service failed");
                report.failures.push((local.clone(), e.to_string()));
            } else {
                info!(service = %local, "created service removed");
            }
        }

        report
    }

    /// Re-issue the previous spec with the previous version token; if the
    /// token has moved on, re-inspect and retry once.
    async fn restore_service(&self, local: &str, entry: &ServiceSnapshot) -> Result<()> {
        match self.adapter.service_update(&entry.id, entry.version, &entry.spec, None).await {
            Ok(()) => Ok(()),
            Err(StackError::VersionConflict { .. }) => {
                let fresh = self.adapter.service_inspect(&entry.id).await?;
                self.adapter.service_update(&entry.id, fresh.version, &entry.spec, None).await
            }
            Err(StackError::NotFound { .. }) => {
                warn!(service = %local, "service vanished before rollback, skipping");
                Ok(())
            }
            Err(other) => Err(other),
        }
    }

    async fn remove_created(&self, local: &str) -> Result<()> {
        let name = self.ns.scope(local);
        match self.adapter.service_inspect(&name).await {
            Ok(service) => self.adapter.service_remove(&service.id).await,
            // Never created, or already gone: both fine.
            Err(StackError::NotFound { .. }) => Ok(()),
            Err(other) => Err(other),
        }
    }
}
