//! Cluster adapter abstraction.
//!
//! The adapter is the only component that knows the engine's wire details.
//! Everything above it speaks domain types, which is what makes the control
//! loop testable against an in-memory fake.

use crate::error::Result;
use crate::types::{
    CurrentService, NetworkSpec, NetworkState, SensitiveSpec, SensitiveState, ServiceSpec,
    StackNamespace, Task, TaskState, VolumeSpec,
};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::collections::HashMap;

pub mod docker;

pub use docker::DockerAdapter;

/// Filter for task listings.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub service_id: Option<String>,
    pub desired_state: Option<TaskState>,
}

impl TaskFilter {
    pub fn service(id: impl Into<String>) -> Self {
        Self { service_id: Some(id.into()), desired_state: None }
    }

    pub fn desired(mut self, state: TaskState) -> Self {
        self.desired_state = Some(state);
        self
    }
}

/// A container as returned by the list endpoint.
#[derive(Debug, Clone)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    /// Owning service's full name, from the engine's service label.
    pub service: Option<String>,
    pub labels: HashMap<String, String>,
}

/// A container as returned by the inspect endpoint.
#[derive(Debug, Clone)]
pub struct ContainerDetails {
    pub id: String,
    pub name: String,
    pub running: bool,
    /// Healthcheck state, absent when the container defines no healthcheck.
    pub health: Option<ContainerHealth>,
}

#[derive(Debug, Clone)]
pub struct ContainerHealth {
    pub status: HealthProbeStatus,
    pub failing_streak: u64,
    /// Probe history, oldest first.
    pub log: Vec<HealthProbe>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthProbeStatus {
    /// Within the start grace period; tolerated as transient.
    Starting,
    Healthy,
    Unhealthy,
}

impl HealthProbeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthProbeStatus::Starting => "starting",
            HealthProbeStatus::Healthy => "healthy",
            HealthProbeStatus::Unhealthy => "unhealthy",
        }
    }
}

/// One recorded healthcheck execution.
#[derive(Debug, Clone)]
pub struct HealthProbe {
    pub start: String,
    pub end: String,
    pub exit_code: i64,
    pub output: String,
}

/// One line from a container's log stream.
#[derive(Debug, Clone)]
pub struct LogLine {
    pub stderr: bool,
    pub line: String,
}

/// One unit of image-pull progress.
#[derive(Debug, Clone)]
pub struct PullProgress {
    pub layer: Option<String>,
    pub status: String,
}

/// Object scope of a cluster event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventScope {
    Container,
    Service,
    Node,
}

/// One message from the engine's event stream.
#[derive(Debug, Clone)]
pub struct ClusterEvent {
    pub scope: EventScope,
    pub action: String,
    pub actor_id: String,
    pub attributes: HashMap<String, String>,
}

/// Typed capability interface over the engine's API.
///
/// Errors are returned as [`crate::StackError`] kinds; implementations never
/// panic. Two implementations exist: the live one ([`DockerAdapter`]) and an
/// in-memory fake used by the integration tests.
#[async_trait]
pub trait ClusterAdapter: Send + Sync {
    // Services.

    /// List services labelled with the stack namespace.
    async fn service_list(&self, ns: &StackNamespace) -> Result<Vec<CurrentService>>;

    /// Inspect one service by id. Returns `NotFound` once it is gone.
    async fn service_inspect(&self, id: &str) -> Result<CurrentService>;

    /// Create a service, returning its id.
    async fn service_create(&self, spec: &ServiceSpec, auth: Option<&str>) -> Result<String>;

    /// Update a service. `version` must match the engine's current version
    /// token or the call fails with `VersionConflict`.
    async fn service_update(
        &self,
        id: &str,
        version: u64,
        spec: &ServiceSpec,
        auth: Option<&str>,
    ) -> Result<()>;

    async fn service_remove(&self, id: &str) -> Result<()>;

    // Tasks.

    async fn task_list(&self, filter: &TaskFilter) -> Result<Vec<Task>>;

    // Containers.

    /// List running containers labelled with the stack namespace.
    async fn container_list(&self, ns: &StackNamespace) -> Result<Vec<ContainerSummary>>;

    async fn container_inspect(&self, id: &str) -> Result<ContainerDetails>;

    /// Follow a container's demultiplexed log stream.
    async fn container_logs(&self, id: &str) -> Result<BoxStream<'static, Result<LogLine>>>;

    // Networks.

    async fn network_list(&self, ns: &StackNamespace) -> Result<Vec<NetworkState>>;

    /// The list endpoint is incomplete; callers needing full configuration
    /// must follow up with an inspect.
    async fn network_inspect(&self, id: &str) -> Result<NetworkState>;

    async fn network_create(&self, spec: &NetworkSpec) -> Result<String>;

    async fn network_remove(&self, id: &str) -> Result<()>;

    // Volumes.

    /// List volume names labelled with the stack namespace.
    async fn volume_list(&self, ns: &StackNamespace) -> Result<Vec<String>>;

    async fn volume_create(&self, spec: &VolumeSpec) -> Result<()>;

    async fn volume_remove(&self, name: &str) -> Result<()>;

    // Configs and secrets.

    async fn config_list(&self, ns: &StackNamespace) -> Result<Vec<SensitiveState>>;

    async fn config_create(&self, spec: &SensitiveSpec) -> Result<String>;

    async fn config_remove(&self, id: &str) -> Result<()>;

    async fn secret_list(&self, ns: &StackNamespace) -> Result<Vec<SensitiveState>>;

    async fn secret_create(&self, spec: &SensitiveSpec) -> Result<String>;

    async fn secret_remove(&self, id: &str) -> Result<()>;

    // Images.

    /// Pull an image, streaming the engine's progress messages.
    async fn image_pull(
        &self,
        reference: &str,
        auth: Option<&str>,
    ) -> Result<BoxStream<'static, Result<PullProgress>>>;

    // Events.

    /// Subscribe to the engine event stream, filtered to container, service
    /// and node events.
    async fn events(&self) -> Result<BoxStream<'static, Result<ClusterEvent>>>;

    /// Adapter name for logging.
    fn name(&self) -> &str;
}
