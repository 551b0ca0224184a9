//! Deployment executor: applies a plan against the cluster.
//!
//! Resources are applied in fixed dependency order: obsolete services are
//! pruned (and waited on) first, then images are pulled, then networks,
//! volumes, configs and secrets are created, then services are created or
//! updated. Remaining orphans are pruned last.

pub mod rollback;

pub use rollback::{RollbackReport, RollbackSupervisor};

use crate::adapter::{ClusterAdapter, TaskFilter};
use crate::error::{Result, StackError};
use crate::plan::{ActionVerb, Plan, ResourceAction};
use crate::snapshot::Snapshot;
use crate::types::{DesiredState, ServiceSpec, StackNamespace, TaskState};
use futures_util::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Poll interval while waiting for a removed service to disappear.
const REMOVAL_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Executor options for one apply.
#[derive(Debug, Clone, Default)]
pub struct ExecutorOptions {
    /// Delete orphaned resources.
    pub prune: bool,
    /// Encoded registry auth token passed to pulls, creates and updates.
    pub registry_auth: Option<String>,
}

/// One service this apply wrote, handed to the update watcher.
#[derive(Debug, Clone)]
pub struct UpdatedService {
    pub id: String,
    pub local: String,
    /// Version token the write was submitted with (zero for creates).
    pub version: u64,
    /// Running tasks of the previous service version, captured immediately
    /// before the write so a fast new task cannot race into the set.
    pub pre_update_task_ids: HashSet<String>,
}

pub struct Executor {
    adapter: Arc<dyn ClusterAdapter>,
    ns: StackNamespace,
    cancel: CancellationToken,
}

impl Executor {
    pub fn new(
        adapter: Arc<dyn ClusterAdapter>,
        ns: StackNamespace,
        cancel: CancellationToken,
    ) -> Self {
        Self { adapter, ns, cancel }
    }

    /// Apply the plan. Returns the services that were written, in plan
    /// order. The snapshot must be sealed before this runs.
    pub async fn execute(
        &self,
        plan: &Plan,
        desired: &DesiredState,
        snapshot: &Snapshot,
        opts: &ExecutorOptions,
    ) -> Result<Vec<UpdatedService>> {
        debug_assert!(snapshot.is_sealed());

        if opts.prune {
            self.prune_services(&plan.orphans.services).await?;
        }

        self.pull_images(plan, desired, opts).await?;
        self.apply_resources(plan, desired).await?;
        let updated = self.apply_services(plan, desired, snapshot, opts).await?;

        if opts.prune {
            self.prune_resources(plan).await?;
        }

        Ok(updated)
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(StackError::Cancelled);
        }
        Ok(())
    }

    /// Remove obsolete services and wait for each to be fully gone. A
    /// half-removed service would still hold names and network attachments
    /// the new set needs.
    async fn prune_services(&self, orphans: &[ResourceAction]) -> Result<()> {
        for orphan in orphans {
            self.check_cancelled()?;
            let id = orphan.id.as_deref().ok_or_else(|| {
                StackError::Internal(format!("orphan service '{}' without id", orphan.local))
            })?;

            info!(service = %orphan.local, "removing obsolete service");
            self.adapter.service_remove(id).await?;
            self.wait_for_removal(&orphan.local, id).await?;
        }
        Ok(())
    }

    async fn wait_for_removal(&self, local: &str, id: &str) -> Result<()> {
        loop {
            match self.adapter.service_inspect(id).await {
                Err(StackError::NotFound { .. }) => {
                    info!(service = %local, "service removed");
                    return Ok(());
                }
                Err(other) => return Err(other),
                Ok(_) => {}
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(StackError::Cancelled),
                _ = tokio::time::sleep(REMOVAL_POLL_INTERVAL) => {}
            }
        }
    }

    /// Pull every image named by a create or update action, sequentially.
    async fn pull_images(
        &self,
        plan: &Plan,
        desired: &DesiredState,
        opts: &ExecutorOptions,
    ) -> Result<()> {
        let mut pulled = HashSet::new();
        for action in plan.changed_services() {
            self.check_cancelled()?;
            let Some(spec) = desired.services.get(&action.local) else { continue };
            if !pulled.insert(spec.image.clone()) {
                continue;
            }

            info!(image = %spec.image, "pulling image");
            let mut stream =
                self.adapter.image_pull(&spec.image, opts.registry_auth.as_deref()).await?;
            while let Some(progress) = stream.next().await {
                let progress = progress.map_err(|e| StackError::Deploy {
                    kind: "image",
                    name: spec.image.clone(),
                    reason: e.to_string(),
                })?;
                // Layer-level messages are progress redraws; keep them out
                // of the log stream.
                match progress.layer {
                    Some(_) => debug!(image = %spec.image, status = %progress.status, "pull progress"),
                    None => println!("[pull:{}] {}", spec.image, progress.status),
                }
            }
        }
        Ok(())
    }

    /// Create networks, volumes, configs and secrets, in that order.
    async fn apply_resources(&self, plan: &Plan, desired: &DesiredState) -> Result<()> {
        for action in &plan.networks {
            if action.verb != ActionVerb::Create {
                continue;
            }
            self.check_cancelled()?;
            let spec = desired.networks.get(&action.local).ok_or_else(|| {
                StackError::Internal(format!("planned network '{}' missing from desired state", action.local))
            })?;
            info!(network = %spec.name, "creating network");
            self.adapter.network_create(spec).await?;
        }

        for action in &plan.volumes {
            if action.verb != ActionVerb::Create {
                continue;
            }
            self.check_cancelled()?;
            let spec = desired.volumes.get(&action.local).ok_or_else(|| {
                StackError::Internal(format!("planned volume '{}' missing from desired state", action.local))
            })?;
            info!(volume = %spec.name, "creating volume");
            self.adapter.volume_create(spec).await?;
        }

        for action in &plan.configs {
            if action.verb != ActionVerb::Create {
                continue;
            }
            self.check_cancelled()?;
            let spec = desired.configs.get(&action.local).ok_or_else(|| {
                StackError::Internal(format!("planned config '{}' missing from desired state", action.local))
            })?;
            info!(config = %spec.name, "creating config");
            self.adapter.config_create(spec).await?;
        }

        for action in &plan.secrets {
            if action.verb != ActionVerb::Create {
                continue;
            }
            self.check_cancelled()?;
            let spec = desired.secrets.get(&action.local).ok_or_else(|| {
                StackError::Internal(format!("planned secret '{}' missing from desired state", action.local))
            })?;
            info!(secret = %spec.name, "creating secret");
            self.adapter.secret_create(spec).await?;
        }

        Ok(())
    }

    async fn apply_services(
        &self,
        plan: &Plan,
        desired: &DesiredState,
        snapshot: &Snapshot,
        opts: &ExecutorOptions,
    ) -> Result<Vec<UpdatedService>> {
        let mut updated = Vec::new();

        for action in &plan.services {
            if !matches!(action.verb, ActionVerb::Create | ActionVerb::Update) {
                continue;
            }
            self.check_cancelled()?;
            let spec = desired.services.get(&action.local).ok_or_else(|| {
                StackError::Internal(format!("planned service '{}' missing from desired state", action.local))
            })?;

            match action.verb {
                ActionVerb::Create => {
                    info!(service = %spec.name, image = %spec.image, "creating service");
                    let id = self
                        .adapter
                        .service_create(spec, opts.registry_auth.as_deref())
                        .await?;
                    updated.push(UpdatedService {
                        id,
                        local: action.local.clone(),
                        version: 0,
                        pre_update_task_ids: HashSet::new(),
                    });
                }
                ActionVerb::Update => {
                    let id = action.service_id.clone().ok_or_else(|| {
                        StackError::Internal(format!(
                            "update action for '{}' without service id",
                            action.local
                        ))
                    })?;
                    let version = snapshot
                        .get(&action.local)
                        .map(|s| s.version)
                        .or(action.current_version)
                        .ok_or_else(|| {
                            StackError::Internal(format!(
                                "update action for '{}' without version token",
                                action.local
                            ))
                        })?;

                    info!(
                        service = %spec.name,
                        image = %spec.image,
                        changes = ?action.changes,
                        "updating service"
                    );
                    let (written_version, pre_update_task_ids) =
                        self.update_service(&id, version, spec, opts).await?;
                    updated.push(UpdatedService {
                        id,
                        local: action.local.clone(),
                        version: written_version,
                        pre_update_task_ids,
                    });
                }
                _ => unreachable!(),
            }
        }

        Ok(updated)
    }

    /// Submit a service update, capturing the previous version's running
    /// task ids immediately before the write. One version-conflict retry
    /// with a fresh token; a second conflict surfaces as a failure.
    async fn update_service(
        &self,
        id: &str,
        version: u64,
        spec: &ServiceSpec,
        opts: &ExecutorOptions,
    ) -> Result<(u64, HashSet<String>)> {
        let pre_update_task_ids = self.running_task_ids(id).await?;

        match self
            .adapter
            .service_update(id, version, spec, opts.registry_auth.as_deref())
            .await
        {
            Ok(()) => Ok((version, pre_update_task_ids)),
            Err(StackError::VersionConflict { .. }) => {
                warn!(service = %spec.name, "version token moved, re-reading and retrying once");
                let fresh = self.adapter.service_inspect(id).await?;
                let pre_update_task_ids = self.running_task_ids(id).await?;
                self.adapter
                    .service_update(id, fresh.version, spec, opts.registry_auth.as_deref())
                    .await?;
                Ok((fresh.version, pre_update_task_ids))
            }
            Err(other) => Err(other),
        }
    }

    async fn running_task_ids(&self, service_id: &str) -> Result<HashSet<String>> {
        let tasks = self
            .adapter
            .task_list(&TaskFilter::service(service_id).desired(TaskState::Running))
            .await?;
        Ok(tasks.into_iter().map(|t| t.id).collect())
    }

    /// Delete remaining orphans: configs, secrets, volumes, then networks.
    /// Orphan services were already removed before deploy.
    async fn prune_resources(&self, plan: &Plan) -> Result<()> {
        for orphan in &plan.orphans.configs {
            self.check_cancelled()?;
            if let Some(id) = &orphan.id {
                info!(config = %orphan.local, "pruning orphan config");
                self.adapter.config_remove(id).await?;
            }
        }
        for orphan in &plan.orphans.secrets {
            self.check_cancelled()?;
            if let Some(id) = &orphan.id {
                info!(secret = %orphan.local, "pruning orphan secret");
                self.adapter.secret_remove(id).await?;
            }
        }
        for orphan in &plan.orphans.volumes {
            self.check_cancelled()?;
            info!(volume = %orphan.local, "pruning orphan volume");
            self.adapter.volume_remove(&self.ns.scope(&orphan.local)).await?;
        }
        for orphan in &plan.orphans.networks {
            self.check_cancelled()?;
            if let Some(id) = &orphan.id {
                info!(network = %orphan.local, "pruning orphan network");
                self.adapter.network_remove(id).await?;
            }
        }
        Ok(())
    }
}
