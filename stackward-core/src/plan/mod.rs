//! Deployment plan types.
//!
//! A plan is five ordered action sequences (networks, volumes, configs,
//! secrets, services, applied in that order) plus the set of orphans, which
//! is only touched when pruning is requested.

pub mod planner;

pub use planner::Planner;

/// The change a single action performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionVerb {
    Create,
    Update,
    Delete,
    None,
}

impl ActionVerb {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionVerb::Create => "create",
            ActionVerb::Update => "update",
            ActionVerb::Delete => "delete",
            ActionVerb::None => "none",
        }
    }
}

impl std::fmt::Display for ActionVerb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A planned change to a network, volume, config or secret.
#[derive(Debug, Clone)]
pub struct ResourceAction {
    /// Local (prefix-stripped) name.
    pub local: String,
    pub verb: ActionVerb,
    /// Cluster id of the existing object, when there is one.
    pub id: Option<String>,
}

/// A planned change to a service.
#[derive(Debug, Clone)]
pub struct ServiceAction {
    /// Local (prefix-stripped) name.
    pub local: String,
    pub verb: ActionVerb,
    /// Cluster id of the existing service, when there is one.
    pub service_id: Option<String>,
    /// Version token of the existing service at plan time.
    pub current_version: Option<u64>,
    /// Human-readable list of differing fields.
    pub changes: Vec<String>,
}

/// Objects labelled for this stack whose local name is not in the desired
/// state. Only deleted when pruning is requested; orphan services go first
/// (before deploy, with a wait for full removal), everything else last.
#[derive(Debug, Clone, Default)]
pub struct Orphans {
    pub services: Vec<ResourceAction>,
    pub networks: Vec<ResourceAction>,
    pub volumes: Vec<ResourceAction>,
    pub configs: Vec<ResourceAction>,
    pub secrets: Vec<ResourceAction>,
}

impl Orphans {
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
            && self.networks.is_empty()
            && self.volumes.is_empty()
            && self.configs.is_empty()
            && self.secrets.is_empty()
    }
}

/// The full deployment plan. Deterministic: equal inputs produce equal
/// plans, ordered alphabetically by local name within each kind.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub stack_name: String,

    // Resources, applied first, in this order.
    pub networks: Vec<ResourceAction>,
    pub volumes: Vec<ResourceAction>,
    pub configs: Vec<ResourceAction>,
    pub secrets: Vec<ResourceAction>,

    // Services, applied after resources.
    pub services: Vec<ServiceAction>,

    // Cleanup, applied last.
    pub orphans: Orphans,

    /// Conservative notes surfaced to the user (e.g. a network differs but
    /// will not be recreated automatically).
    pub warnings: Vec<String>,
}

impl Plan {
    /// True when no action changes anything and there are no orphans.
    pub fn is_empty(&self) -> bool {
        let resources_quiet = self
            .networks
            .iter()
            .chain(&self.volumes)
            .chain(&self.configs)
            .chain(&self.secrets)
            .all(|a| a.verb == ActionVerb::None);
        let services_quiet = self.services.iter().all(|a| a.verb == ActionVerb::None);
        resources_quiet && services_quiet && self.orphans.is_empty()
    }

    /// Locals of services this plan will create or update.
    pub fn changed_services(&self) -> impl Iterator<Item = &ServiceAction> {
        self.services
            .iter()
            .filter(|a| matches!(a.verb, ActionVerb::Create | ActionVerb::Update))
    }
}
