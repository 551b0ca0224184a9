//! Domain types shared across the deployment control loop.

pub mod resource;
pub mod service;
pub mod state;
pub mod task;

pub use resource::{NetworkSpec, NetworkState, SensitiveSpec, SensitiveState, VolumeSpec};
pub use service::{
    HealthCheckSpec, Mount, MountKind, PortProtocol, PortSpec, PublishMode, ReplicationMode,
    RestartCondition, RestartPolicy, ServiceSpec, UpdateOrder, UpdatePolicy,
};
pub use state::{CurrentService, CurrentState, DesiredState};
pub use task::{Task, TaskState};

/// Label key marking every object owned by a stack.
///
/// Objects without this label are foreign and are never touched.
pub const STACK_NAMESPACE_LABEL: &str = "com.docker.stack.namespace";

/// Local name of the implicit network services attach to when the manifest
/// declares none.
pub const DEFAULT_NETWORK: &str = "default";

/// A stack's namespace: the name every owned object is prefixed and
/// labelled with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackNamespace {
    name: String,
}

impl StackNamespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full cluster-side name for a local object name.
    pub fn scope(&self, local: &str) -> String {
        format!("{}_{}", self.name, local)
    }

    /// Strip the stack prefix from a cluster-side name, if present.
    pub fn unscope<'a>(&self, full: &'a str) -> Option<&'a str> {
        full.strip_prefix(&self.name).and_then(|rest| rest.strip_prefix('_'))
    }

    /// Filter expression `label=value` used when listing owned objects.
    pub fn label_filter(&self) -> String {
        format!("{}={}", STACK_NAMESPACE_LABEL, self.name)
    }

    /// Whether a label map marks the object as belonging to this stack.
    pub fn owns(&self, labels: &std::collections::HashMap<String, String>) -> bool {
        labels.get(STACK_NAMESPACE_LABEL).map(|v| v == &self.name).unwrap_or(false)
    }
}

impl std::fmt::Display for StackNamespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_and_unscope() {
        let ns = StackNamespace::new("web");
        assert_eq!(ns.scope("db"), "web_db");
        assert_eq!(ns.unscope("web_db"), Some("db"));
        assert_eq!(ns.unscope("other_db"), None);
        // A bare prefix without separator is not ours.
        assert_eq!(ns.unscope("webdb"), None);
    }

    #[test]
    fn test_owns() {
        let ns = StackNamespace::new("web");
        let mut labels = std::collections::HashMap::new();
        assert!(!ns.owns(&labels));
        labels.insert(STACK_NAMESPACE_LABEL.to_string(), "web".to_string());
        assert!(ns.owns(&labels));
        labels.insert(STACK_NAMESPACE_LABEL.to_string(), "other".to_string());
        assert!(!ns.owns(&labels));
    }
}
