//! Service domain types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Desired configuration of one service, fully resolved: names are
/// stack-scoped, env is sorted, durations are parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Full cluster-side name (`{stack}_{local}`).
    pub name: String,

    /// Labels attached to the service object (always includes the stack
    /// namespace label).
    pub labels: BTreeMap<String, String>,

    /// Image reference. May carry a digest suffix when read back from the
    /// cluster.
    pub image: String,

    /// Entrypoint override.
    #[serde(default)]
    pub command: Vec<String>,

    /// Arguments to the entrypoint.
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment as sorted `KEY=value` pairs.
    #[serde(default)]
    pub env: Vec<String>,

    /// Replication mode.
    #[serde(default)]
    pub mode: ReplicationMode,

    /// Volume and bind mounts, sorted by target path.
    #[serde(default)]
    pub mounts: Vec<Mount>,

    /// Published ports, sorted by target port.
    #[serde(default)]
    pub ports: Vec<PortSpec>,

    /// Full names of networks to attach to, sorted.
    #[serde(default)]
    pub networks: Vec<String>,

    /// Container healthcheck, if declared.
    pub healthcheck: Option<HealthCheckSpec>,

    /// Rolling-update policy.
    #[serde(default)]
    pub update: UpdatePolicy,

    /// Restart policy.
    #[serde(default)]
    pub restart: RestartPolicy,

    /// Placement constraints, verbatim.
    #[serde(default)]
    pub constraints: Vec<String>,

    /// Grace period before the engine kills a stopping container.
    pub stop_grace_period: Option<Duration>,
}

impl ServiceSpec {
    /// Replica count this spec asks for; `Global` mode has no fixed count.
    pub fn replicas(&self) -> Option<u64> {
        match self.mode {
            ReplicationMode::Replicated { replicas } => Some(replicas),
            ReplicationMode::Global => None,
        }
    }

    /// Image reference with any `@sha256:…` digest suffix stripped.
    ///
    /// The cluster reports digest-pinned references for running services;
    /// manifests carry tag references. Comparing without the digest avoids
    /// misclassifying an unchanged image as an update.
    pub fn image_without_digest(&self) -> &str {
        match self.image.split_once('@') {
            Some((name, _digest)) => name,
            None => &self.image,
        }
    }
}

/// How many replicas a service runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicationMode {
    /// Fixed replica count. An unspecified count in the manifest means one.
    Replicated { replicas: u64 },
    /// One task per cluster node.
    Global,
}

impl Default for ReplicationMode {
    fn default() -> Self {
        ReplicationMode::Replicated { replicas: 1 }
    }
}

/// A volume or bind mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub kind: MountKind,
    /// Volume name (stack-scoped) or absolute host path.
    pub source: String,
    /// Mount point inside the container.
    pub target: String,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountKind {
    Volume,
    Bind,
}

/// A single published port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    pub target: u16,
    pub published: Option<u16>,
    #[serde(default)]
    pub protocol: PortProtocol,
    #[serde(default)]
    pub mode: PublishMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortProtocol {
    #[default]
    Tcp,
    Udp,
}

impl std::fmt::Display for PortProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortProtocol::Tcp => f.write_str("tcp"),
            PortProtocol::Udp => f.write_str("udp"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishMode {
    #[default]
    Ingress,
    Host,
}

/// Container healthcheck configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckSpec {
    /// Probe command in exec form (`["CMD", …]` / `["CMD-SHELL", …]`).
    pub test: Vec<String>,
    pub interval: Option<Duration>,
    pub timeout: Option<Duration>,
    pub retries: Option<u64>,
    /// Grace period during which failing probes do not count.
    pub start_period: Option<Duration>,
    /// Disable any healthcheck inherited from the image.
    #[serde(default)]
    pub disable: bool,
}

/// Rolling-update policy for a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatePolicy {
    /// Tasks updated concurrently.
    pub parallelism: u64,
    /// Delay between task batches.
    pub delay: Option<Duration>,
    /// Whether new tasks start before or after old ones stop.
    pub order: UpdateOrder,
    /// Window the engine monitors each updated task for failure.
    pub monitor: Option<Duration>,
    /// Fraction of task failures tolerated during the update.
    pub max_failure_ratio: f64,
}

impl Default for UpdatePolicy {
    fn default() -> Self {
        Self {
            parallelism: 1,
            delay: None,
            order: UpdateOrder::StopFirst,
            monitor: None,
            max_failure_ratio: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateOrder {
    StopFirst,
    StartFirst,
}

/// Restart policy for a service's tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartPolicy {
    pub condition: RestartCondition,
    pub delay: Option<Duration>,
    pub max_attempts: Option<u64>,
    pub window: Option<Duration>,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self { condition: RestartCondition::Any, delay: None, max_attempts: None, window: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartCondition {
    None,
    OnFailure,
    Any,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(image: &str) -> ServiceSpec {
        ServiceSpec {
            name: "stack_web".to_string(),
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

    #[test]
    fn test_image_without_digest() {
        let pinned = spec("nginx:1.25@sha256:0123456789abcdef");
        assert_eq!(pinned.image_without_digest(), "nginx:1.25");

        let plain = spec("nginx:1.25");
        assert_eq!(plain.image_without_digest(), "nginx:1.25");
    }

    #[test]
    fn test_default_replicas_is_one() {
        assert_eq!(spec("nginx:1.25").replicas(), Some(1));
    }
}
