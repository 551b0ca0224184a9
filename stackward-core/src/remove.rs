//! Whole-stack removal.
//!
//! Deletes every object labelled with the stack namespace: services first
//! (waiting for each to disappear so networks are detachable), then
//! networks, volumes, configs and secrets. Individual failures are logged
//! and do not stop the sweep.

use crate::adapter::ClusterAdapter;
use crate::error::{Result, StackError};
use crate::types::StackNamespace;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const REMOVAL_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct StackRemover {
    adapter: Arc<dyn ClusterAdapter>,
    ns: StackNamespace,
    timeout: Duration,
}

impl StackRemover {
    pub fn new(adapter: Arc<dyn ClusterAdapter>, ns: StackNamespace, timeout: Duration) -> Self {
        Self { adapter, ns, timeout }
    }

    /// Remove the entire stack. Returns the number of objects removed, or
    /// an error only when nothing could even be listed.
    pub async fn remove(&self) -> Result<usize> {
        info!(stack = %self.ns, "removing stack");
        let mut removed = 0;

        let services = self.adapter.service_list(&self.ns).await?;
        for service in &services {
            info!(service = %service.spec.name, "removing service");
            if let Err(e) = self.adapter.service_remove(&service.id).await {
                warn!(service = %service.spec.name, error = %e, "failed to remove service");
            } else {
                removed += 1;
            }
        }
        for service in &services {
            self.wait_gone(&service.id, &service.spec.name).await;
        }

        for network in self.adapter.network_list(&self.ns).await? {
            info!(network = %network.name, "removing network");
            if let Err(e) = self.adapter.network_remove(&network.id).await {
                warn!(network = %network.name, error = %e, "failed to remove network");
            } else {
                removed += 1;
            }
        }

        for volume in self.adapter.volume_list(&self.ns).await? {
            info!(volume = %volume, "removing volume");
            if let Err(e) = self.adapter.volume_remove(&volume).await {
                warn!(volume = %volume, error = %e, "failed to remove volume");
            } else {
                removed += 1;
            }
        }

        for config in self.adapter.config_list(&self.ns).await? {
            info!(config = %config.name, "removing config");
            if let Err(e) = self.adapter.config_remove(&config.id).await {
                warn!(config = %config.name, error = %e, "failed to remove config");
            } else {
                removed += 1;
            }
        }

        for secret in self.adapter.secret_list(&self.ns).await? {
            info!(secret = %secret.name, "removing secret");
            if let Err(e) = self.adapter.secret_remove(&secret.id).await {
                warn!(secret = %secret.name, error = %e, "failed to remove secret");
            } else {
                removed += 1;
            }
        }

        info!(stack = %self.ns, removed, "stack removed");
        Ok(removed)
    }

    async fn wait_gone(&self, id: &str, name: &str) {
        let deadline = tokio::time::Instant::now() + self.timeout;
        loop {
            match self.adapter.service_inspect(id).await {
                Err(StackError::NotFound { .. }) => return,
                Err(_) => return,
                Ok(_) if tokio::time::Instant::now() >= deadline => {
                    warn!(service = %name, "service still present after removal timeout");
                    return;
                }
                Ok(_) => tokio::time::sleep(REMOVAL_POLL_INTERVAL).await,
            }
        }
    }
}
