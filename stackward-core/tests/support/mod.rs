//! In-memory cluster fake for integration tests.
//!
//! Implements the full adapter surface over a mutex-guarded map of objects.
//! Task lifecycles are simulated poll-by-poll: every `task_list` call for a
//! service advances that service's scripted behaviour one step, so the
//! watcher's own polling drives the simulation deterministically.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use stackward_core::adapter::{
    ClusterAdapter, ClusterEvent, ContainerDetails, ContainerHealth, ContainerSummary,
    HealthProbeStatus, LogLine, PullProgress, TaskFilter,
};
use stackward_core::error::{Result, StackError};
use stackward_core::types::{
    CurrentService, NetworkSpec, NetworkState, SensitiveSpec, SensitiveState, ServiceSpec,
    StackNamespace, Task, TaskState, VolumeSpec,
};
use std::collections::HashMap;
use std::sync::Mutex;

/// Scripted lifecycle for a service's tasks after a create or update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceBehavior {
    /// Replacement tasks come up running and healthy.
    Healthy,
    /// The first replacement task fails once; its replacement is healthy.
    FlakyOnce,
    /// Every replacement task is shut down and replaced, forever.
    AlwaysFailing,
    /// Replacement tasks appear but stay in `starting` forever.
    NeverReady,
    /// The write causes no task churn at all.
    NoChurn,
}

#[derive(Debug, Clone)]
struct FakeService {
    id: String,
    version: u64,
    spec: ServiceSpec,
    behavior: ServiceBehavior,
    churn_active: bool,
    phase: u32,
    tasks: Vec<Task>,
}

#[derive(Default)]
struct ClusterInner {
    services: HashMap<String, FakeService>,
    networks: HashMap<String, NetworkState>,
    volumes: HashMap<String, VolumeSpec>,
    configs: HashMap<String, SensitiveState>,
    secrets: HashMap<String, SensitiveState>,
    containers: HashMap<String, (ContainerSummary, ContainerDetails)>,
    pulled: Vec<String>,
    image_behaviors: HashMap<String, ServiceBehavior>,
    service_overrides: HashMap<String, ServiceBehavior>,
    counter: u64,
}

impl ClusterInner {
    fn next_id(&mut self, prefix: &str) -> String {
        self.counter += 1;
        format!("{}{}", prefix, self.counter)
    }

    fn behavior_for(&self, spec: &ServiceSpec) -> ServiceBehavior {
        if let Some(b) = self.service_overrides.get(&spec.name) {
            return *b;
        }
        self.image_behaviors.get(&spec.image).copied().unwrap_or(ServiceBehavior::Healthy)
    }

    fn replicas(spec: &ServiceSpec) -> usize {
        spec.replicas().unwrap_or(1) as usize
    }

    fn spawn_task(&mut self, service_id: &str, state: TaskState) -> Task {
        let id = self.next_id("t");
        Task {
            id,
            service_id: service_id.to_string(),
            state,
            desired_state: TaskState::Running,
            error: None,
            container_id: None,
            exit_code: None,
        }
    }

    fn attach_container(&mut self, service: &ServiceSpec, task: &mut Task) {
        let container_id = format!("c-{}", task.id);
        task.container_id = Some(container_id.clone());
        let mut labels = HashMap::new();
        for (k, v) in &service.labels {
            labels.insert(k.clone(), v.clone());
        }
        labels.insert("com.docker.swarm.service.name".to_string(), service.name.clone());
        let summary = ContainerSummary {
            id: container_id.clone(),
            name: format!("{}.{}", service.name, task.id),
            service: Some(service.name.clone()),
            labels,
        };
        let details = ContainerDetails {
            id: container_id.clone(),
            name: summary.name.clone(),
            running: true,
            health: service.healthcheck.as_ref().map(|_| ContainerHealth {
                status: HealthProbeStatus::Healthy,
                failing_streak: 0,
                log: vec![],
            }),
        };
        self.containers.insert(container_id, (summary, details));
    }

    /// Advance one service's scripted churn by one step.
    fn step(&mut self, service_id: &str) {
        let Some(mut service) = self.services.get(service_id).cloned() else { return };
        if !service.churn_active {
            return;
        }
        service.phase += 1;

        match service.behavior {
            ServiceBehavior::NoChurn => {
                service.churn_active = false;
            }
            ServiceBehavior::Healthy => match service.phase {
                1 => {
                    shutdown_old(&mut service);
                    for _ in 0..Self::replicas(&service.spec) {
                        let task = self.spawn_task(&service.id, TaskState::Starting);
                        service.tasks.push(task);
                    }
                }
                _ => {
                    let spec = service.spec.clone();
                    for task in service.tasks.iter_mut() {
                        if task.state == TaskState::Starting {
                            task.state = TaskState::Running;
                            self.attach_container(&spec, task);
                        }
                    }
                    service.churn_active = false;
                }
            },
            ServiceBehavior::FlakyOnce => match service.phase {
                1 => {
                    shutdown_old(&mut service);
                    let task = self.spawn_task(&service.id, TaskState::Starting);
                    service.tasks.push(task);
                }
                2 => {
                    if let Some(task) =
                        service.tasks.iter_mut().find(|t| t.state == TaskState::Starting)
                    {
                        task.state = TaskState::Failed;
                        task.error = Some("task: non-zero exit (1)".to_string());
                        task.exit_code = Some(1);
                    }
                    for _ in 0..Self::replicas(&service.spec) {
                        let task = self.spawn_task(&service.id, TaskState::Starting);
                        service.tasks.push(task);
                    }
                }
                _ => {
                    let spec = service.spec.clone();
                    for task in service.tasks.iter_mut() {
                        if task.state == TaskState::Starting {
                            task.state = TaskState::Running;
                            self.attach_container(&spec, task);
                        }
                    }
                    service.churn_active = false;
                }
            },
            ServiceBehavior::AlwaysFailing => {
                if service.phase == 1 {
                    shutdown_old(&mut service);
                } else {
                    // The engine's replaced-after-failing signal.
                    for task in service.tasks.iter_mut() {
                        if task.state == TaskState::Starting {
                            task.state = TaskState::Complete;
                            task.desired_state = TaskState::Shutdown;
                        }
                    }
                }
                let task = self.spawn_task(&service.id, TaskState::Starting);
                service.tasks.push(task);
            }
            ServiceBehavior::NeverReady => {
                if service.phase == 1 {
                    shutdown_old(&mut service);
                    for _ in 0..Self::replicas(&service.spec) {
                        let task = self.spawn_task(&service.id, TaskState::Starting);
                        service.tasks.push(task);
                    }
                }
            }
        }

        self.services.insert(service_id.to_string(), service);
    }
}

fn shutdown_old(service: &mut FakeService) {
    for task in service.tasks.iter_mut() {
        if task.state == TaskState::Running {
            task.state = TaskState::Shutdown;
            task.desired_state = TaskState::Shutdown;
        }
    }
}

/// The in-memory fake cluster.
#[derive(Default)]
pub struct FakeCluster {
    inner: Mutex<ClusterInner>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script how services running `image` behave after a write.
    pub fn behave_image(&self, image: &str, behavior: ServiceBehavior) {
        self.inner.lock().unwrap().image_behaviors.insert(image.to_string(), behavior);
    }

    /// Script one service by full name, overriding its image behaviour.
    pub fn behave_service(&self, full_name: &str, behavior: ServiceBehavior) {
        self.inner.lock().unwrap().service_overrides.insert(full_name.to_string(), behavior);
    }

    pub fn pulled_images(&self) -> Vec<String> {
        self.inner.lock().unwrap().pulled.clone()
    }

    pub fn service_by_name(&self, full_name: &str) -> Option<(String, u64, ServiceSpec)> {
        let inner = self.inner.lock().unwrap();
        inner
            .services
            .values()
            .find(|s| s.spec.name == full_name)
            .map(|s| (s.id.clone(), s.version, s.spec.clone()))
    }

    pub fn service_count(&self) -> usize {
        self.inner.lock().unwrap().services.len()
    }

    pub fn network_names(&self) -> Vec<String> {
        self.inner.lock().unwrap().networks.values().map(|n| n.name.clone()).collect()
    }

    pub fn volume_names(&self) -> Vec<String> {
        self.inner.lock().unwrap().volumes.keys().cloned().collect()
    }
}

#[async_trait]
impl ClusterAdapter for FakeCluster {
    async fn service_list(&self, ns: &StackNamespace) -> Result<Vec<CurrentService>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .services
            .values()
            .filter(|s| {
                s.spec
                    .labels
                    .get(stackward_core::types::STACK_NAMESPACE_LABEL)
                    .map(|l| l == ns.name())
                    .unwrap_or(false)
            })
            .map(|s| CurrentService { id: s.id.clone(), version: s.version, spec: s.spec.clone() })
            .collect())
    }

    async fn service_inspect(&self, id: &str) -> Result<CurrentService> {
        let inner = self.inner.lock().unwrap();
        inner
            .services
            .values()
            .find(|s| s.id == id || s.spec.name == id)
            .map(|s| CurrentService { id: s.id.clone(), version: s.version, spec: s.spec.clone() })
            .ok_or_else(|| StackError::NotFound { kind: "service", name: id.to_string() })
    }

    async fn service_create(&self, spec: &ServiceSpec, _auth: Option<&str>) -> Result<String> {
        let mut inner = self.inner.lock().unwrap();
        if inner.services.values().any(|s| s.spec.name == spec.name) {
            return Err(StackError::Deploy {
                kind: "service",
                name: spec.name.clone(),
                reason: "name already in use".to_string(),
            });
        }
        let id = inner.next_id("svc");
        let behavior = inner.behavior_for(spec);
        inner.services.insert(
            id.clone(),
            FakeService {
                id: id.clone(),
                version: 1,
                spec: spec.clone(),
                behavior,
                churn_active: true,
                phase: 0,
                tasks: vec![],
            },
        );
        Ok(id)
    }

    async fn service_update(
        &self,
        id: &str,
        version: u64,
        spec: &ServiceSpec,
        _auth: Option<&str>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let behavior = inner.behavior_for(spec);
        let service = inner
            .services
            .get_mut(id)
            .ok_or_else(|| StackError::NotFound { kind: "service", name: id.to_string() })?;
        if service.version != version {
            return Err(StackError::VersionConflict { service: spec.name.clone() });
        }
        let changed = service.spec != *spec;
        service.spec = spec.clone();
        service.version += 1;
        service.behavior = behavior;
        // An update that changes nothing produces no task churn, like the
        // real engine.
        if changed {
            service.churn_active = true;
            service.phase = 0;
        }
        Ok(())
    }

    async fn service_remove(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .services
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StackError::NotFound { kind: "service", name: id.to_string() })
    }

    async fn task_list(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(service_id) = &filter.service_id {
            inner.step(service_id);
        }
        let tasks: Vec<Task> = inner
            .services
            .values()
            .flat_map(|s| s.tasks.iter())
            .filter(|t| filter.service_id.as_ref().map(|id| &t.service_id == id).unwrap_or(true))
            .filter(|t| filter.desired_state.map(|d| t.desired_state == d).unwrap_or(true))
            .cloned()
            .collect();
        Ok(tasks)
    }

    async fn container_list(&self, ns: &StackNamespace) -> Result<Vec<ContainerSummary>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .containers
            .values()
            .filter(|(summary, _)| ns.owns(&summary.labels))
            .map(|(summary, _)| summary.clone())
            .collect())
    }

    async fn container_inspect(&self, id: &str) -> Result<ContainerDetails> {
        let inner = self.inner.lock().unwrap();
        inner
            .containers
            .get(id)
            .map(|(_, details)| details.clone())
            .ok_or_else(|| StackError::NotFound { kind: "container", name: id.to_string() })
    }

    async fn container_logs(&self, _id: &str) -> Result<BoxStream<'static, Result<LogLine>>> {
        Ok(futures_util::stream::pending().boxed())
    }

    async fn network_list(&self, ns: &StackNamespace) -> Result<Vec<NetworkState>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .networks
            .values()
            .filter(|n| {
                n.labels
                    .get(stackward_core::types::STACK_NAMESPACE_LABEL)
                    .map(|v| v == ns.name())
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn network_inspect(&self, id: &str) -> Result<NetworkState> {
        let inner = self.inner.lock().unwrap();
        inner
            .networks
            .get(id)
            .cloned()
            .ok_or_else(|| StackError::NotFound { kind: "network", name: id.to_string() })
    }

    async fn network_create(&self, spec: &NetworkSpec) -> Result<String> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id("net");
        inner.networks.insert(
            id.clone(),
            NetworkState {
                id: id.clone(),
                name: spec.name.clone(),
                driver: spec.driver.clone(),
                labels: spec.labels.clone(),
            },
        );
        Ok(id)
    }

    async fn network_remove(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .networks
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StackError::NotFound { kind: "network", name: id.to_string() })
    }

    async fn volume_list(&self, ns: &StackNamespace) -> Result<Vec<String>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .volumes
            .values()
            .filter(|v| {
                v.labels
                    .get(stackward_core::types::STACK_NAMESPACE_LABEL)
                    .map(|l| l == ns.name())
                    .unwrap_or(false)
            })
            .map(|v| v.name.clone())
            .collect())
    }

    async fn volume_create(&self, spec: &VolumeSpec) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.volumes.insert(spec.name.clone(), spec.clone());
        Ok(())
    }

    async fn volume_remove(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .volumes
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StackError::NotFound { kind: "volume", name: name.to_string() })
    }

    async fn config_list(&self, ns: &StackNamespace) -> Result<Vec<SensitiveState>> {
        let inner = self.inner.lock().unwrap();
        Ok(list_sensitive(&inner.configs, ns))
    }

    async fn config_create(&self, spec: &SensitiveSpec) -> Result<String> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id("cfg");
        inner.configs.insert(
            id.clone(),
            SensitiveState { id: id.clone(), name: spec.name.clone(), labels: spec.labels.clone() },
        );
        Ok(id)
    }

    async fn config_remove(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .configs
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StackError::NotFound { kind: "config", name: id.to_string() })
    }

    async fn secret_list(&self, ns: &StackNamespace) -> Result<Vec<SensitiveState>> {
        let inner = self.inner.lock().unwrap();
        Ok(list_sensitive(&inner.secrets, ns))
    }

    async fn secret_create(&self, spec: &SensitiveSpec) -> Result<String> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id("sec");
        inner.secrets.insert(
            id.clone(),
            SensitiveState { id: id.clone(), name: spec.name.clone(), labels: spec.labels.clone() },
        );
        Ok(id)
    }

    async fn secret_remove(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .secrets
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StackError::NotFound { kind: "secret", name: id.to_string() })
    }

    async fn image_pull(
        &self,
        reference: &str,
        _auth: Option<&str>,
    ) -> Result<BoxStream<'static, Result<PullProgress>>> {
        self.inner.lock().unwrap().pulled.push(reference.to_string());
        let progress = vec![
            Ok(PullProgress { layer: None, status: format!("Pulling from {}", reference) }),
            Ok(PullProgress { layer: None, status: "Pull complete".to_string() }),
        ];
        Ok(futures_util::stream::iter(progress).boxed())
    }

    async fn events(&self) -> Result<BoxStream<'static, Result<ClusterEvent>>> {
        Ok(futures_util::stream::pending().boxed())
    }

    fn name(&self) -> &str {
        "fake"
    }
}

fn list_sensitive(
    map: &HashMap<String, SensitiveState>,
    ns: &StackNamespace,
) -> Vec<SensitiveState> {
    map.values()
        .filter(|s| {
            s.labels
                .get(stackward_core::types::STACK_NAMESPACE_LABEL)
                .map(|l| l == ns.name())
                .unwrap_or(false)
        })
        .cloned()
        .collect()
}
