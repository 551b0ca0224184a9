//! Service-update watcher.
//!
//! Drives a single service's rolling update to a verdict by polling its
//! tasks. Tasks that existed before the write are "old"; the update is done
//! when every old task has stopped running and every new running task is
//! healthy (or merely running, for containers without a healthcheck).

use crate::adapter::{ClusterAdapter, HealthProbeStatus, TaskFilter};
use crate::deploy::UpdatedService;
use crate::error::Result;
use crate::types::{Task, TaskState};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Tuning knobs for one watcher run.
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Task poll interval.
    pub poll_interval: Duration,
    /// How long to wait for the engine to start replacing tasks before
    /// declaring "no actual change".
    pub settle_delay: Duration,
    /// Interval between status summary lines.
    pub status_interval: Duration,
    /// Per-service convergence deadline.
    pub service_timeout: Duration,
    /// Failed new tasks tolerated before giving up on this service.
    pub max_failed_tasks: usize,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            settle_delay: Duration::from_secs(1),
            status_interval: Duration::from_secs(10),
            service_timeout: Duration::from_secs(5 * 60),
            max_failed_tasks: 3,
        }
    }
}

/// Failed-task count shared across watchers, with the stack-wide budget.
#[derive(Debug)]
pub struct FailureLedger {
    count: AtomicUsize,
    budget: usize,
}

impl FailureLedger {
    pub fn new(budget: usize) -> Self {
        Self { count: AtomicUsize::new(0), budget }
    }

    /// Record one more failed task; true when the stack-wide budget is now
    /// exceeded.
    pub fn record(&self) -> bool {
        self.count.fetch_add(1, Ordering::SeqCst) + 1 > self.budget
    }

    pub fn total(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn budget(&self) -> usize {
        self.budget
    }
}

/// Terminal verdict of one watcher run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceVerdict {
    /// Old tasks gone, new tasks running and healthy (or no change at all).
    Healthy,
    /// The per-service or stack-wide failed-task budget was exceeded.
    Failed { reason: String },
    /// The per-service deadline fired.
    Timeout,
    /// The apply context was cancelled.
    Cancelled,
}

/// Watch phase, for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Waiting for the first replacement task to appear.
    Tracking,
    /// Replacements exist; waiting for old tasks to drain and new ones to
    /// run.
    Replaced,
    /// Gates met; waiting for container healthchecks.
    Verifying,
}

pub struct ServiceUpdateWatcher {
    adapter: Arc<dyn ClusterAdapter>,
    service: UpdatedService,
    opts: WatchOptions,
    ledger: Arc<FailureLedger>,
    cancel: CancellationToken,
}

impl ServiceUpdateWatcher {
    pub fn new(
        adapter: Arc<dyn ClusterAdapter>,
        service: UpdatedService,
        opts: WatchOptions,
        ledger: Arc<FailureLedger>,
        cancel: CancellationToken,
    ) -> Self {
        Self { adapter, service, opts, ledger, cancel }
    }

    /// Run to a verdict. Never mutates the cluster; cancellation returns
    /// [`ServiceVerdict::Cancelled`] at the next suspension point.
    pub async fn watch(&self) -> Result<ServiceVerdict> {
        let start = Instant::now();
        let deadline = start + self.opts.service_timeout;
        let mut last_status = start;
        let mut phase = Phase::Tracking;

        // Single-writer failure bookkeeping, owned by this watcher.
        let mut seen_failed: HashSet<String> = HashSet::new();
        let mut failure_lines: Vec<String> = Vec::new();

        // Let the engine settle before deciding whether the write changed
        // anything at all.
        if !self.sleep(self.opts.settle_delay).await {
            return Ok(ServiceVerdict::Cancelled);
        }

        loop {
            if Instant::now() >= deadline {
                warn!(service = %self.service.local, "service update timed out");
                return Ok(ServiceVerdict::Timeout);
            }

            let tasks = self
                .adapter
                .task_list(&TaskFilter::service(&self.service.id))
                .await?;

            let (old, new): (Vec<&Task>, Vec<&Task>) = tasks
                .iter()
                .partition(|t| self.service.pre_update_task_ids.contains(&t.id));

            if phase == Phase::Tracking {
                if new.is_empty() {
                    // Only an update can be a no-op. A created service has
                    // no pre-update tasks and simply has not scheduled yet.
                    if !self.service.pre_update_task_ids.is_empty() {
                        info!(service = %self.service.local, "no task churn after update, service unchanged");
                        return Ok(ServiceVerdict::Healthy);
                    }
                } else {
                    phase = Phase::Replaced;
                }
            }

            // Classify new tasks, counting each failed task once.
            for task in &new {
                if task.is_failed() && seen_failed.insert(task.id.clone()) {
                    let line = describe_failure(task);
                    warn!(service = %self.service.local, task = %task.short_id(), "{line}");
                    failure_lines.push(line);

                    let stack_budget_blown = self.ledger.record();
                    if failure_lines.len() >= self.opts.max_failed_tasks {
                        return Ok(ServiceVerdict::Failed {
                            reason: format!(
                                "{} new task(s) failed: {}",
                                failure_lines.len(),
                                failure_lines.join("; ")
                            ),
                        });
                    }
                    if stack_budget_blown {
                        return Ok(ServiceVerdict::Failed {
                            reason: format!(
                                "stack-wide failed-task budget exceeded ({} > {})",
                                self.ledger.total(),
                                self.ledger.budget()
                            ),
                        });
                    }
                }
            }

            // Gate 1: every old task has stopped running.
            let old_drained = old.iter().all(|t| t.state != TaskState::Running);
            // Gate 2: at least one new task is actually running.
            let new_running: Vec<&&Task> = new
                .iter()
                .filter(|t| {
                    t.desired_state == TaskState::Running && t.state == TaskState::Running
                })
                .collect();

            if old_drained && !new_running.is_empty() {
                if phase == Phase::Replaced {
                    phase = Phase::Verifying;
                }
                if self.all_healthy(&new_running).await? {
                    info!(
                        service = %self.service.local,
                        tasks = new_running.len(),
                        "old tasks drained, new tasks running and healthy"
                    );
                    return Ok(ServiceVerdict::Healthy);
                }
            } else if phase == Phase::Verifying {
                // A verified task died; fall back to waiting for gates.
                phase = Phase::Replaced;
            }

            if last_status.elapsed() >= self.opts.status_interval {
                self.log_status(phase, &old, &new);
                last_status = Instant::now();
            }

            if !self.sleep(self.opts.poll_interval).await {
                return Ok(ServiceVerdict::Cancelled);
            }
        }
    }

    /// Every new running task must be healthy; containers without a
    /// healthcheck are healthy by virtue of running. A probe still in its
    /// start grace period is tolerated but does not satisfy the gate.
    async fn all_healthy(&self, running: &[&&Task]) -> Result<bool> {
        for task in running {
            let Some(container_id) = &task.container_id else {
                return Ok(false);
            };
            let details = match self.adapter.container_inspect(container_id).await {
                Ok(details) => details,
                // The container can disappear between poll and inspect.
                Err(crate::error::StackError::NotFound { .. }) => return Ok(false),
                Err(other) => return Err(other),
            };
            if !details.running {
                return Ok(false);
            }
            if let Some(health) = details.health {
                if health.status != HealthProbeStatus::Healthy {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    fn log_status(&self, phase: Phase, old: &[&Task], new: &[&Task]) {
        let states: Vec<String> = old
            .iter()
            .map(|t| format!("OLD-{}:{}", t.short_id(), t.state))
            .chain(new.iter().map(|t| format!("NEW-{}:{}", t.short_id(), t.state)))
            .collect();
        info!(
            service = %self.service.local,
            phase = ?phase,
            old = old.len(),
            new = new.len(),
            "task status: {}",
            states.join(", ")
        );
    }

    /// Cancellable sleep; false when cancelled.
    async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

fn describe_failure(task: &Task) -> String {
    let mut line = format!(
        "task {} failed with state {} (desired: {})",
        task.short_id(),
        task.state,
        task.desired_state
    );
    if let Some(err) = &task.error {
        line.push_str(&format!(": {}", err));
    }
    if let Some(code) = task.exit_code {
        if code != 0 {
            line.push_str(&format!(" (exit code {})", code));
        }
    }
    if task.state == TaskState::Complete && task.desired_state == TaskState::Shutdown {
        line.push_str(" [replaced after failing, likely healthcheck]");
    }
    line
}
