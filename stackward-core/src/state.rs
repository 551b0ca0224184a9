//! State reader: assembles the current stack state from the cluster.
//!
//! Only objects labelled with the stack namespace are visible. Names come
//! back prefix-stripped so both sides of the diff use local names. A failure
//! listing any one kind is fatal for the apply; partial plans are worse than
//! no plan.

use crate::adapter::ClusterAdapter;
use crate::error::Result;
use crate::types::{CurrentState, StackNamespace};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub struct StateReader {
    adapter: Arc<dyn ClusterAdapter>,
    ns: StackNamespace,
}

impl StateReader {
    pub fn new(adapter: Arc<dyn ClusterAdapter>, ns: StackNamespace) -> Self {
        Self { adapter, ns }
    }

    pub async fn read(&self) -> Result<CurrentState> {
        let mut state = CurrentState::default();

        // Networks first: the id-to-name table is needed to normalise
        // service network attachments below.
        let networks = self.adapter.network_list(&self.ns).await?;
        let mut network_names: HashMap<String, String> = HashMap::new();
        for summary in networks {
            // The list endpoint is incomplete; inspect for the full record.
            let network = self.adapter.network_inspect(&summary.id).await?;
            network_names.insert(network.id.clone(), network.name.clone());
            if let Some(local) = self.ns.unscope(&network.name) {
                state.networks.insert(local.to_string(), network);
            }
        }

        for mut service in self.adapter.service_list(&self.ns).await? {
            let Some(local) = self.ns.unscope(&service.spec.name) else {
                debug!(service = %service.spec.name, "labelled service without stack prefix, skipping");
                continue;
            };
            // The engine reports attachments by network id; translate back
            // to names so they compare against the desired side.
            for target in &mut service.spec.networks {
                if let Some(name) = network_names.get(target) {
                    *target = name.clone();
                }
            }
            service.spec.networks.sort();
            state.services.insert(local.to_string(), service);
        }

        for name in self.adapter.volume_list(&self.ns).await? {
            if let Some(local) = self.ns.unscope(&name) {
                state.volumes.insert(local.to_string());
            }
        }

        for config in self.adapter.config_list(&self.ns).await? {
            if let Some(local) = self.ns.unscope(&config.name) {
                state.configs.insert(local.to_string(), config);
            }
        }

        for secret in self.adapter.secret_list(&self.ns).await? {
            if let Some(local) = self.ns.unscope(&secret.name) {
                state.secrets.insert(local.to_string(), secret);
            }
        }

        debug!(
            services = state.services.len(),
            networks = state.networks.len(),
            volumes = state.volumes.len(),
            "read current stack state"
        );
        Ok(state)
    }
}
