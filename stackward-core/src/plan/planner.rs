//! Differencing planner.
//!
//! Computes a [`Plan`] purely from (current, desired) state. No cluster
//! calls happen here; the planner is deterministic and idempotent.

use super::{ActionVerb, Orphans, Plan, ResourceAction, ServiceAction};
use crate::types::{CurrentService, CurrentState, DesiredState, ServiceSpec};

/// Creates deployment plans by comparing current and desired state.
pub struct Planner {
    stack_name: String,
}

impl Planner {
    pub fn new(stack_name: impl Into<String>) -> Self {
        Self { stack_name: stack_name.into() }
    }

    pub fn plan(&self, current: &CurrentState, desired: &DesiredState) -> Plan {
        let mut plan = Plan { stack_name: self.stack_name.clone(), ..Default::default() };

        self.plan_networks(current, desired, &mut plan);
        self.plan_volumes(current, desired, &mut plan);
        self.plan_sensitive(current, desired, &mut plan);
        self.plan_services(current, desired, &mut plan);

        plan
    }

    /// Networks are never updated in place; a difference is reported as a
    /// warning, not an action.
    fn plan_networks(&self, current: &CurrentState, desired: &DesiredState, plan: &mut Plan) {
        for (local, spec) in &desired.networks {
            match current.networks.get(local) {
                Some(existing) => {
                    if spec.driver.is_some() && spec.driver != existing.driver {
                        plan.warnings.push(format!(
                            "network '{}' driver differs ({} vs {}); networks are only recreated manually",
                            local,
                            existing.driver.as_deref().unwrap_or("default"),
                            spec.driver.as_deref().unwrap_or("default"),
                        ));
                    }
                    plan.networks.push(ResourceAction {
                        local: local.clone(),
                        verb: ActionVerb::None,
                        id: Some(existing.id.clone()),
                    });
                }
                None => plan.networks.push(ResourceAction {
                    local: local.clone(),
                    verb: ActionVerb::Create,
                    id: None,
                }),
            }
        }

        for (local, existing) in &current.networks {
            if !desired.networks.contains_key(local) {
                plan.orphans.networks.push(ResourceAction {
                    local: local.clone(),
                    verb: ActionVerb::Delete,
                    id: Some(existing.id.clone()),
                });
            }
        }
    }

    /// Volumes are immutable once created.
    fn plan_volumes(&self, current: &CurrentState, desired: &DesiredState, plan: &mut Plan) {
        for local in desired.volumes.keys() {
            let verb = if current.volumes.contains(local) {
                ActionVerb::None
            } else {
                ActionVerb::Create
            };
            plan.volumes.push(ResourceAction { local: local.clone(), verb, id: None });
        }

        for local in &current.volumes {
            if !desired.volumes.contains_key(local) {
                plan.orphans.volumes.push(ResourceAction {
                    local: local.clone(),
                    verb: ActionVerb::Delete,
                    id: None,
                });
            }
        }
    }

    /// Configs and secrets are content-addressed and immutable; changing
    /// content must be expressed as a rename plus a pruned orphan.
    fn plan_sensitive(&self, current: &CurrentState, desired: &DesiredState, plan: &mut Plan) {
        let kinds = [
            (&desired.configs, &current.configs, true),
            (&desired.secrets, &current.secrets, false),
        ];
        for (desired_map, current_map, is_config) in kinds {
            let (actions, orphans) = if is_config {
                (&mut plan.configs, &mut plan.orphans.configs)
            } else {
                (&mut plan.secrets, &mut plan.orphans.secrets)
            };

            for local in desired_map.keys() {
                match current_map.get(local) {
                    Some(existing) => actions.push(ResourceAction {
                        local: local.clone(),
                        verb: ActionVerb::None,
                        id: Some(existing.id.clone()),
                    }),
                    None => actions.push(ResourceAction {
                        local: local.clone(),
                        verb: ActionVerb::Create,
                        id: None,
                    }),
                }
            }

            for (local, existing) in current_map {
                if !desired_map.contains_key(local) {
                    orphans.push(ResourceAction {
                        local: local.clone(),
                        verb: ActionVerb::Delete,
                        id: Some(existing.id.clone()),
                    });
                }
            }
        }
    }

    fn plan_services(&self, current: &CurrentState, desired: &DesiredState, plan: &mut Plan) {
        for (local, spec) in &desired.services {
            match current.services.get(local) {
                Some(existing) => {
                    let changes = compare_services(existing, spec);
                    let verb =
                        if changes.is_empty() { ActionVerb::None } else { ActionVerb::Update };
                    plan.services.push(ServiceAction {
                        local: local.clone(),
                        verb,
                        service_id: Some(existing.id.clone()),
                        current_version: Some(existing.version),
                        changes,
                    });
                }
                None => plan.services.push(ServiceAction {
                    local: local.clone(),
                    verb: ActionVerb::Create,
                    service_id: None,
                    current_version: None,
                    changes: vec![],
                }),
            }
        }

        for (local, existing) in &current.services {
            if !desired.services.contains_key(local) {
                plan.orphans.services.push(ResourceAction {
                    local: local.clone(),
                    verb: ActionVerb::Delete,
                    id: Some(existing.id.clone()),
                });
            }
        }
    }
}

/// Compare an observed service against its desired spec, returning the list
/// of differing fields. The comparison is conservative: anything that cannot
/// be proven equal counts as a change.
fn compare_services(current: &CurrentService, desired: &ServiceSpec) -> Vec<String> {
    let mut changes = Vec::new();
    let current = &current.spec;

    // The cluster reports digest-pinned references; compare without.
    if current.image_without_digest() != desired.image_without_digest() {
        changes.push("image".to_string());
    }
    if current.mode != desired.mode {
        changes.push("replicas".to_string());
    }
    if current.env != desired.env {
        changes.push("env".to_string());
    }
    if current.command != desired.command || current.args != desired.args {
        changes.push("command".to_string());
    }
    if current.mounts != desired.mounts {
        changes.push("mounts".to_string());
    }
    if current.ports != desired.ports {
        changes.push("ports".to_string());
    }
    if current.networks != desired.networks {
        changes.push("networks".to_string());
    }
    if current.healthcheck != desired.healthcheck {
        changes.push("healthcheck".to_string());
    }
    if current.update != desired.update {
        changes.push("update-policy".to_string());
    }
    if current.restart != desired.restart {
        changes.push("restart-policy".to_string());
    }
    if current.constraints != desired.constraints {
        changes.push("placement".to_string());
    }
    if current.stop_grace_period != desired.stop_grace_period {
        changes.push("stop-grace-period".to_string());
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        CurrentService, NetworkState, ReplicationMode, RestartPolicy, ServiceSpec, UpdatePolicy,
    };
    use std::collections::BTreeMap;

    fn spec(name: &str, image: &str) -> ServiceSpec {
        ServiceSpec {
            name: format!("demo_{}", name),
            labels: BTreeMap::new(),
            image: image.to_string(),
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

    fn current_with(services: Vec<(&str, &str)>) -> CurrentState {
        let mut state = CurrentState::default();
        for (i, (name, image)) in services.into_iter().enumerate() {
            state.services.insert(
                name.to_string(),
                CurrentService { id: format!("svc{}", i), version: 7, spec: spec(name, image) },
            );
        }
        state
    }

    fn desired_with(services: Vec<(&str, &str)>) -> DesiredState {
        let mut state = DesiredState::default();
        for (name, image) in services {
            state.services.insert(name.to_string(), spec(name, image));
        }
        state
    }

    #[test]
    fn test_create_when_absent() {
        let plan =
            Planner::new("demo").plan(&CurrentState::default(), &desired_with(vec![("web", "nginx:1.25")]));
        assert_eq!(plan.services.len(), 1);
        assert_eq!(plan.services[0].verb, ActionVerb::Create);
        assert!(!plan.is_empty());
    }

    #[test]
    fn test_none_when_identical() {
        let plan = Planner::new("demo").plan(
            &current_with(vec![("web", "nginx:1.25")]),
            &desired_with(vec![("web", "nginx:1.25")]),
        );
        assert_eq!(plan.services[0].verb, ActionVerb::None);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_update_on_image_change() {
        let plan = Planner::new("demo").plan(
            &current_with(vec![("web", "nginx:1.25")]),
            &desired_with(vec![("web", "nginx:1.26")]),
        );
        assert_eq!(plan.services[0].verb, ActionVerb::Update);
        assert_eq!(plan.services[0].changes, vec!["image"]);
        assert_eq!(plan.services[0].current_version, Some(7));
    }

    #[test]
    fn test_digest_suffix_is_not_a_change() {
        let plan = Planner::new("demo").plan(
            &current_with(vec![("web", "nginx:1.25@sha256:deadbeef")]),
            &desired_with(vec![("web", "nginx:1.25")]),
        );
        assert_eq!(plan.services[0].verb, ActionVerb::None);
    }

    #[test]
    fn test_orphan_service_is_deferred() {
        let plan = Planner::new("demo").plan(
            &current_with(vec![("old", "nginx:1.25"), ("web", "nginx:1.25")]),
            &desired_with(vec![("web", "nginx:1.25")]),
        );
        assert_eq!(plan.services.len(), 1);
        assert_eq!(plan.orphans.services.len(), 1);
        assert_eq!(plan.orphans.services[0].local, "old");
        assert_eq!(plan.orphans.services[0].verb, ActionVerb::Delete);
    }

    #[test]
    fn test_deterministic_alphabetical_order() {
        let desired = desired_with(vec![("zeta", "a:1"), ("alpha", "a:1"), ("mid", "a:1")]);
        let plan = Planner::new("demo").plan(&CurrentState::default(), &desired);
        let order: Vec<&str> = plan.services.iter().map(|a| a.local.as_str()).collect();
        assert_eq!(order, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_existing_network_is_kept_with_warning() {
        let mut current = CurrentState::default();
        current.networks.insert(
            "front".to_string(),
            NetworkState {
                id: "net1".to_string(),
                name: "demo_front".to_string(),
                driver: Some("overlay".to_string()),
                labels: BTreeMap::new(),
            },
        );
        let mut desired = DesiredState::default();
        desired.networks.insert(
            "front".to_string(),
            crate::types::NetworkSpec {
                name: "demo_front".to_string(),
                labels: BTreeMap::new(),
                driver: Some("bridge".to_string()),
                attachable: false,
                external: false,
            },
        );
        let plan = Planner::new("demo").plan(&current, &desired);
        assert_eq!(plan.networks[0].verb, ActionVerb::None);
        assert_eq!(plan.warnings.len(), 1);
    }

    #[test]
    fn test_replica_change_detected() {
        let mut desired = desired_with(vec![("web", "nginx:1.25")]);
        desired.services.get_mut("web").unwrap().mode =
            ReplicationMode::Replicated { replicas: 3 };
        let plan = Planner::new("demo").plan(&current_with(vec![("web", "nginx:1.25")]), &desired);
        assert_eq!(plan.services[0].changes, vec!["replicas"]);
    }

    #[test]
    fn test_volume_immutability() {
        let mut current = CurrentState::default();
        current.volumes.insert("data".to_string());
        current.volumes.insert("stale".to_string());
        let mut desired = DesiredState::default();
        desired.volumes.insert(
            "data".to_string(),
            crate::types::VolumeSpec {
                name: "demo_data".to_string(),
                labels: BTreeMap::new(),
                driver: None,
                driver_opts: BTreeMap::new(),
                external: false,
            },
        );
        let plan = Planner::new("demo").plan(&current, &desired);
        assert_eq!(plan.volumes[0].verb, ActionVerb::None);
        assert_eq!(plan.orphans.volumes.len(), 1);
        assert_eq!(plan.orphans.volumes[0].local, "stale");
    }
}
