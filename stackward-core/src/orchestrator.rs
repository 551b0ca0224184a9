//! Apply orchestrator.
//!
//! Top-level coordinator for one apply: wires the state reader, planner,
//! snapshot, executor and convergence monitor together, owns the signal
//! handler and the apply-wide deadline, and decides the final outcome.
//! On any failure after the first mutation it triggers the rollback
//! supervisor exactly once before returning.

use crate::adapter::ClusterAdapter;
use crate::compose::{ComposeConverter, ComposeFile, ConvertOptions};
use crate::deploy::{Executor, ExecutorOptions, RollbackSupervisor, UpdatedService};
use crate::error::StackError;
use crate::monitor::{ConvergenceMonitor, ObservabilityTap, WatchOptions};
use crate::plan::{Plan, Planner};
use crate::snapshot::Snapshot;
use crate::state::StateReader;
use crate::types::StackNamespace;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Options for one apply invocation.
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Whole-apply budget.
    pub timeout: Duration,
    /// Rollback budget.
    pub rollback_timeout: Duration,
    /// Return right after the executor, skipping convergence.
    pub no_wait: bool,
    /// Delete orphaned resources.
    pub prune: bool,
    /// Max concurrent service-update watchers.
    pub parallel: usize,
    /// Encoded registry auth token.
    pub registry_auth: Option<String>,
    /// Manifest conversion options.
    pub convert: ConvertOptions,
    /// Watcher tuning.
    pub watch: WatchOptions,
}

impl ApplyOptions {
    pub fn new(convert: ConvertOptions) -> Self {
        Self {
            timeout: Duration::from_secs(15 * 60),
            rollback_timeout: Duration::from_secs(10 * 60),
            no_wait: false,
            prune: false,
            parallel: 1,
            registry_auth: None,
            convert,
            watch: WatchOptions::default(),
        }
    }
}

/// Final status of one apply, mapped to an exit code by the CLI.
#[derive(Debug)]
pub enum ApplyOutcome {
    /// Stack converged (or `--no-wait` skipped convergence).
    Ok,
    /// Validation or executor failure before convergence. Rollback ran if
    /// anything had been mutated.
    DeployError(StackError),
    /// Convergence failed or timed out; rollback ran.
    ConvergenceError(StackError),
    /// A signal interrupted the apply; rollback ran.
    Interrupted,
}

/// Why the apply context was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CancelCause {
    None,
    Signal,
    Deadline,
}

struct CancelState {
    token: CancellationToken,
    cause: AtomicU8,
}

impl CancelState {
    fn new() -> Self {
        Self { token: CancellationToken::new(), cause: AtomicU8::new(0) }
    }

    /// First cause wins; later triggers are no-ops.
    fn trigger(&self, cause: CancelCause) {
        let value = match cause {
            CancelCause::None => return,
            CancelCause::Signal => 1,
            CancelCause::Deadline => 2,
        };
        if self.cause.compare_exchange(0, value, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
            self.token.cancel();
        }
    }

    fn cause(&self) -> CancelCause {
        match self.cause.load(Ordering::SeqCst) {
            1 => CancelCause::Signal,
            2 => CancelCause::Deadline,
            _ => CancelCause::None,
        }
    }
}

pub struct ApplyOrchestrator {
    adapter: Arc<dyn ClusterAdapter>,
    ns: StackNamespace,
    opts: ApplyOptions,
}

impl ApplyOrchestrator {
    pub fn new(adapter: Arc<dyn ClusterAdapter>, ns: StackNamespace, opts: ApplyOptions) -> Self {
        Self { adapter, ns, opts }
    }

    /// Run one apply to completion.
    pub async fn apply(&self, manifest: &ComposeFile) -> ApplyOutcome {
        let cancel = Arc::new(CancelState::new());
        let _signal_guard = spawn_signal_handler(Arc::clone(&cancel));
        spawn_deadline(Arc::clone(&cancel), self.opts.timeout);

        // Everything up to here is pure validation; failures never touch
        // the cluster and never roll back.
        let desired = match ComposeConverter::convert(manifest, &self.ns, &self.opts.convert) {
            Ok(desired) => desired,
            Err(e) => return ApplyOutcome::DeployError(e),
        };

        let reader = StateReader::new(Arc::clone(&self.adapter), self.ns.clone());
        let current = match reader.read().await {
            Ok(current) => current,
            Err(e) => return ApplyOutcome::DeployError(e),
        };

        let plan = Planner::new(self.ns.name()).plan(&current, &desired);
        for warning in &plan.warnings {
            warn!("{warning}");
        }
        log_plan(&plan);

        // Sealed before the executor's first write (I4).
        let snapshot = Snapshot::capture(&current, &desired);
        let rollback =
            RollbackSupervisor::new(Arc::clone(&self.adapter), self.ns.clone(), self.opts.rollback_timeout);

        let tap = ObservabilityTap::spawn(Arc::clone(&self.adapter), &self.ns, &cancel.token);

        let executor = Executor::new(Arc::clone(&self.adapter), self.ns.clone(), cancel.token.clone());
        let exec_opts = ExecutorOptions {
            prune: self.opts.prune,
            registry_auth: self.opts.registry_auth.clone(),
        };

        let updated = match executor.execute(&plan, &desired, &snapshot, &exec_opts).await {
            Ok(updated) => updated,
            Err(e) => {
                error!(error = %e, "deploy failed, rolling back");
                self.run_rollback(&rollback, &snapshot, &plan).await;
                cancel.token.cancel();
                tap.join().await;
                return match cancel.cause() {
                    CancelCause::Signal => ApplyOutcome::Interrupted,
                    _ => ApplyOutcome::DeployError(e),
                };
            }
        };

        info!(services = updated.len(), "deploy complete");

        if self.opts.no_wait {
            info!("--no-wait set, skipping convergence");
            cancel.token.cancel();
            tap.join().await;
            return ApplyOutcome::Ok;
        }

        let outcome = self.converge(&cancel, updated, &rollback, &snapshot, &plan).await;
        cancel.token.cancel();
        tap.join().await;
        outcome
    }

    async fn converge(
        &self,
        cancel: &Arc<CancelState>,
        updated: Vec<UpdatedService>,
        rollback: &RollbackSupervisor,
        snapshot: &Snapshot,
        plan: &Plan,
    ) -> ApplyOutcome {
        let monitor = ConvergenceMonitor::new(
            Arc::clone(&self.adapter),
            self.opts.watch.clone(),
            self.opts.parallel,
            cancel.token.clone(),
        );

        match monitor.wait(updated).await {
            Ok(()) => ApplyOutcome::Ok,
            Err(e) => {
                error!(error = %e, "convergence failed, rolling back");
                self.run_rollback(rollback, snapshot, plan).await;
                match cancel.cause() {
                    CancelCause::Signal => ApplyOutcome::Interrupted,
                    CancelCause::Deadline => ApplyOutcome::ConvergenceError(StackError::Timeout {
                        what: "apply".to_string(),
                        elapsed: self.opts.timeout,
                    }),
                    CancelCause::None => ApplyOutcome::ConvergenceError(e),
                }
            }
        }
    }

    async fn run_rollback(&self, rollback: &RollbackSupervisor, snapshot: &Snapshot, plan: &Plan) {
        let report = rollback.run(snapshot, plan).await;
        if !report.is_clean() {
            // Surfaced alongside the originating error; never re-triggers
            // rollback.
            for (service, reason) in &report.failures {
                error!(service = %service, "rollback action failed: {reason}");
            }
        }
    }
}

fn log_plan(plan: &Plan) {
    let creates = plan.changed_services().filter(|a| a.changes.is_empty()).count();
    let updates = plan.changed_services().count() - creates;
    info!(
        stack = %plan.stack_name,
        creates,
        updates,
        orphan_services = plan.orphans.services.len(),
        "plan computed"
    );
    if plan.is_empty() {
        info!("no changes detected");
    }
}

/// Install the interrupt handler. The first signal cancels the apply
/// context exactly once; rollback follows from the main control flow.
fn spawn_signal_handler(cancel: Arc<CancelState>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let ctrl_c = async {
            let _ = tokio::signal::ctrl_c().await;
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(_) => std::future::pending::<()>().await,
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => warn!("received interrupt, cancelling apply"),
            _ = terminate => warn!("received termination signal, cancelling apply"),
        }
        cancel.trigger(CancelCause::Signal);
    })
}

fn spawn_deadline(cancel: Arc<CancelState>, timeout: Duration) {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.token.cancelled() => {}
            _ = tokio::time::sleep(timeout) => {
                warn!(timeout = ?timeout, "apply deadline reached, cancelling");
                cancel.trigger(CancelCause::Deadline);
            }
        }
    });
}
