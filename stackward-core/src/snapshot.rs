//! Pre-apply snapshot of service state, kept in memory for rollback.
//!
//! The snapshot is captured from the current state in one pass and sealed
//! before the executor performs its first write; once sealed it is immutable
//! until the process exits. A crashed process loses its snapshot and cannot
//! roll back, a documented limitation of the in-memory design.

use crate::error::{Result, StackError};
use crate::types::{CurrentState, DesiredState, ServiceSpec};
use std::collections::BTreeMap;

/// Pre-apply record of one existing service.
#[derive(Debug, Clone)]
pub struct ServiceSnapshot {
    pub id: String,
    pub version: u64,
    pub spec: ServiceSpec,
    /// Image reference as reported by the cluster at capture time.
    pub image: String,
}

/// In-memory undo record for one apply.
#[derive(Debug, Default)]
pub struct Snapshot {
    /// Services that existed before the apply, keyed by local name. The
    /// rollback supervisor restores the ones the apply updated.
    services: BTreeMap<String, ServiceSnapshot>,
    /// Local names of services the apply will create: these are deleted,
    /// not restored, on rollback.
    created: Vec<String>,
    sealed: bool,
}

impl Snapshot {
    /// Capture the service set in one pass and seal the result.
    pub fn capture(current: &CurrentState, desired: &DesiredState) -> Self {
        let mut snapshot = Snapshot::default();

        for (local, service) in &current.services {
            snapshot.services.insert(
                local.clone(),
                ServiceSnapshot {
                    id: service.id.clone(),
                    version: service.version,
                    spec: service.spec.clone(),
                    image: service.spec.image.clone(),
                },
            );
        }

        for local in desired.services.keys() {
            if !current.services.contains_key(local) {
                snapshot.created.push(local.clone());
            }
        }

        snapshot.sealed = true;
        snapshot
    }

    /// Record one pre-existing service. Rejected once sealed.
    pub fn record(&mut self, local: &str, entry: ServiceSnapshot) -> Result<()> {
        if self.sealed {
            return Err(StackError::Internal(format!(
                "snapshot is sealed; cannot record service '{}'",
                local
            )));
        }
        self.services.insert(local.to_string(), entry);
        Ok(())
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Pre-existing services, to be restored on rollback.
    pub fn services(&self) -> impl Iterator<Item = (&String, &ServiceSnapshot)> {
        self.services.iter()
    }

    pub fn get(&self, local: &str) -> Option<&ServiceSnapshot> {
        self.services.get(local)
    }

    /// Services created by this apply, to be deleted on rollback.
    pub fn created(&self) -> &[String] {
        &self.created
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty() && self.created.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        CurrentService, ReplicationMode, RestartPolicy, UpdatePolicy,
    };

    fn spec(name: &str) -> ServiceSpec {
        ServiceSpec {
            name: format!("demo_{}", name),
            labels: BTreeMap::new(),
            image: "nginx:1.25".to_string(),
            command: vec![],
            args: vec![],
            env: vec![],
            mode: ReplicationMode::default(),
            mounts: vec![],
            ports: vec![],
            networks: vec![],
            healthcheck: None,
            update: UpdatePolicy::default(),
            restart: RestartPolicy::default(),
            constraints: vec![],
            stop_grace_period: None,
        }
    }

    #[test]
    fn test_capture_separates_existing_from_created() {
        let mut current = CurrentState::default();
        current.services.insert(
            "web".to_string(),
            CurrentService { id: "svc1".to_string(), version: 3, spec: spec("web") },
        );
        let mut desired = DesiredState::default();
        desired.services.insert("web".to_string(), spec("web"));
        desired.services.insert("api".to_string(), spec("api"));

        let snapshot = Snapshot::capture(&current, &desired);
        assert!(snapshot.is_sealed());
        assert_eq!(snapshot.get("web").unwrap().version, 3);
        assert_eq!(snapshot.created(), ["api"]);
    }

    #[test]
    fn test_sealed_snapshot_rejects_writes() {
        let snapshot = Snapshot::capture(&CurrentState::default(), &DesiredState::default());
        let mut snapshot = snapshot;
        let entry = ServiceSnapshot {
            id: "svc9".to_string(),
            version: 1,
            spec: spec("late"),
            image: "nginx:1.25".to_string(),
        };
        assert!(snapshot.record("late", entry).is_err());
    }
}
