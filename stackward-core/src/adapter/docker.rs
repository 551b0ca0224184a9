//! Live cluster adapter backed by the Docker engine API.
//!
//! All wire types stay inside this module; conversions normalise engine
//! responses into the same shape the manifest converter produces so the
//! planner can compare them field by field.

use super::{
    ClusterAdapter, ClusterEvent, ContainerDetails, ContainerHealth, ContainerSummary, EventScope,
    HealthProbe, HealthProbeStatus, LogLine, PullProgress, TaskFilter,
};
use crate::error::{Result, StackError};
use crate::types::{
    CurrentService, HealthCheckSpec, Mount, MountKind, NetworkSpec, NetworkState, PortProtocol,
    PortSpec, PublishMode, ReplicationMode, RestartCondition, RestartPolicy, SensitiveSpec,
    SensitiveState, ServiceSpec, StackNamespace, Task, TaskState, UpdateOrder, UpdatePolicy,
    VolumeSpec, STACK_NAMESPACE_LABEL,
};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bollard::auth::DockerCredentials;
use bollard::container::LogOutput;
use bollard::query_parameters::{
    CreateImageOptionsBuilder, EventsOptionsBuilder, InspectContainerOptionsBuilder,
    InspectNetworkOptionsBuilder, InspectServiceOptionsBuilder, ListConfigsOptionsBuilder,
    ListContainersOptionsBuilder, ListNetworksOptionsBuilder, ListSecretsOptionsBuilder,
    ListServicesOptionsBuilder, ListTasksOptionsBuilder, ListVolumesOptionsBuilder,
    LogsOptionsBuilder, RemoveVolumeOptionsBuilder, UpdateServiceOptionsBuilder,
};
use bollard::{models, Docker};
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Transport failures are retried this many times with linear back-off.
const TRANSPORT_RETRIES: u32 = 3;

/// Live adapter talking to the engine discovered through its standard
/// environment variables (`DOCKER_HOST`, …).
pub struct DockerAdapter {
    docker: Docker,
}

impl DockerAdapter {
    /// Connect using the engine's standard environment discovery.
    pub fn from_env() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| StackError::Transport { reason: e.to_string() })?;
        Ok(Self { docker })
    }

    /// Wrap a read-type call with linear-back-off retries.
    async fn retry<T, F, Fut>(&self, what: &str, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<T, bollard::errors::Error>>,
    {
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(v) => return Ok(v),
                Err(e) if is_not_found(&e) => return Err(map_err(e, what)),
                Err(e) => {
                    attempt += 1;
                    if attempt >= TRANSPORT_RETRIES {
                        return Err(map_err(e, what));
                    }
                    let backoff = Duration::from_secs(attempt as u64);
                    warn!(what, error = %e, attempt, "transport failure, retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    fn label_filters(ns: &StackNamespace) -> HashMap<String, Vec<String>> {
        HashMap::from([("label".to_string(), vec![ns.label_filter()])])
    }
}

#[async_trait]
impl ClusterAdapter for DockerAdapter {
    async fn service_list(&self, ns: &StackNamespace) -> Result<Vec<CurrentService>> {
        let services = self
            .retry("service list", || {
                self.docker.list_services(Some(
                    ListServicesOptionsBuilder::new().filters(&Self::label_filters(ns)).build(),
                ))
            })
            .await?;
        services.into_iter().map(service_from_api).collect()
    }

    async fn service_inspect(&self, id: &str) -> Result<CurrentService> {
        let service = self
            .retry("service inspect", || self.docker.inspect_service(id, None))
            .await?;
        service_from_api(service)
    }

    async fn service_create(&self, spec: &ServiceSpec, auth: Option<&str>) -> Result<String> {
        let response = self
            .docker
            .create_service(service_to_api(spec), credentials(auth))
            .await
            .map_err(|e| map_err(e, "service create"))?;
        response.id.ok_or_else(|| StackError::Internal("engine returned no service id".into()))
    }

    async fn service_update(
        &self,
        id: &str,
        version: u64,
        spec: &ServiceSpec,
        auth: Option<&str>,
    ) -> Result<()> {
        let options = UpdateServiceOptions { version: version as i64, ..Default::default() };
        self.docker
            .update_service(id, options, service_to_api(spec), credentials(auth))
            .await
            .map_err(|e| {
                if is_version_conflict(&e) {
                    StackError::VersionConflict { service: spec.name.clone() }
                } else {
                    map_err(e, "service update")
                }
            })?;
        Ok(())
    }

    async fn service_remove(&self, id: &str) -> Result<()> {
        self.docker.delete_service(id).await.map_err(|e| map_err(e, "service remove"))
    }

    async fn task_list(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let mut filters: HashMap<String, Vec<String>> = HashMap::new();
        if let Some(service) = &filter.service_id {
            filters.insert("service".to_string(), vec![service.clone()]);
        }
        if let Some(state) = filter.desired_state {
            filters.insert("desired-state".to_string(), vec![state.as_str().to_string()]);
        }
        let tasks = self
            .retry("task list", || self.docker.list_tasks(Some(ListTasksOptions { filters: filters.clone() })))
            .await?;
        // Re-apply the filter locally; the engine has returned unfiltered
        // lists under load before.
        Ok(tasks
            .into_iter()
            .filter_map(task_from_api)
            .filter(|t| filter.service_id.as_ref().map(|id| &t.service_id == id).unwrap_or(true))
            .filter(|t| filter.desired_state.map(|d| t.desired_state == d).unwrap_or(true))
            .collect())
    }

    async fn container_list(&self, ns: &StackNamespace) -> Result<Vec<ContainerSummary>> {
        let containers = self
            .retry("container list", || {
                self.docker.list_containers(Some(ListContainersOptions {
                    all: false,
                    filters: Self::label_filters(ns),
                    ..Default::default()
                }))
            })
            .await?;
        Ok(containers
            .into_iter()
            .filter_map(|c| {
                let id = c.id?;
                let labels = c.labels.unwrap_or_default();
                let name = c
                    .names
                    .and_then(|n| n.into_iter().next())
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_else(|| id[..id.len().min(12)].to_string());
                let service = labels.get("com.docker.swarm.service.name").cloned();
                Some(ContainerSummary { id, name, service, labels })
            })
            .collect())
    }

    async fn container_inspect(&self, id: &str) -> Result<ContainerDetails> {
        let inspect = self
            .retry("container inspect", || {
                self.docker.inspect_container(id, None::<InspectContainerOptions>)
            })
            .await?;
        let name = inspect
            .name
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_else(|| id.to_string());
        let state = inspect.state;
        let running = state
            .as_ref()
            .and_then(|s| s.running)
            .unwrap_or(false);
        let health = state.and_then(|s| s.health).and_then(health_from_api);
        Ok(ContainerDetails { id: id.to_string(), name, running, health })
    }

    async fn container_logs(&self, id: &str) -> Result<BoxStream<'static, Result<LogLine>>> {
        let stream = self.docker.logs(
            id,
            Some(LogsOptions::<String> {
                follow: true,
                stdout: true,
                stderr: true,
                tail: "10".to_string(),
                ..Default::default()
            }),
        );
        Ok(stream
            .map_err(|e| StackError::Transport { reason: e.to_string() })
            .try_filter_map(|output| async move {
                Ok(match output {
                    LogOutput::StdOut { message } => Some(LogLine {
                        stderr: false,
                        line: String::from_utf8_lossy(&message).into_owned(),
                    }),
                    LogOutput::StdErr { message } => Some(LogLine {
                        stderr: true,
                        line: String::from_utf8_lossy(&message).into_owned(),
                    }),
                    _ => None,
                })
            })
            .boxed())
    }

    async fn network_list(&self, ns: &StackNamespace) -> Result<Vec<NetworkState>> {
        let networks = self
            .retry("network list", || {
                self.docker.list_networks(Some(ListNetworksOptions {
                    filters: Self::label_filters(ns),
                }))
            })
            .await?;
        Ok(networks
            .into_iter()
            .filter_map(|n| {
                Some(NetworkState {
                    id: n.id?,
                    name: n.name.unwrap_or_default(),
                    driver: n.driver,
                    labels: n.labels.map(map_to_btree).unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn network_inspect(&self, id: &str) -> Result<NetworkState> {
        let network = self
            .retry("network inspect", || {
                self.docker.inspect_network(id, None::<InspectNetworkOptions<String>>)
            })
            .await?;
        Ok(NetworkState {
            id: network.id.unwrap_or_else(|| id.to_string()),
            name: network.name.unwrap_or_default(),
            driver: network.driver,
            labels: network.labels.map(map_to_btree).unwrap_or_default(),
        })
    }

    async fn network_create(&self, spec: &NetworkSpec) -> Result<String> {
        let response = self
            .docker
            .create_network(CreateNetworkOptions {
                name: spec.name.clone(),
                driver: spec.driver.clone().unwrap_or_else(|| "overlay".to_string()),
                attachable: spec.attachable,
                labels: spec.labels.clone().into_iter().collect(),
                ..Default::default()
            })
            .await
            .map_err(|e| map_err(e, "network create"))?;
        response.id.ok_or_else(|| StackError::Internal("engine returned no network id".into()))
    }

    async fn network_remove(&self, id: &str) -> Result<()> {
        self.docker.remove_network(id).await.map_err(|e| map_err(e, "network remove"))
    }

    async fn volume_list(&self, ns: &StackNamespace) -> Result<Vec<String>> {
        let response = self
            .retry("volume list", || {
                self.docker.list_volumes(Some(ListVolumesOptions {
                    filters: Self::label_filters(ns),
                }))
            })
            .await?;
        Ok(response
            .volumes
            .unwrap_or_default()
            .into_iter()
            .map(|v| v.name)
            .collect())
    }

    async fn volume_create(&self, spec: &VolumeSpec) -> Result<()> {
        self.docker
            .create_volume(CreateVolumeOptions {
                name: spec.name.clone(),
                driver: spec.driver.clone().unwrap_or_else(|| "local".to_string()),
                driver_opts: spec.driver_opts.clone().into_iter().collect(),
                labels: spec.labels.clone().into_iter().collect(),
            })
            .await
            .map_err(|e| map_err(e, "volume create"))?;
        Ok(())
    }

    async fn volume_remove(&self, name: &str) -> Result<()> {
        self.docker.remove_volume(name, None).await.map_err(|e| map_err(e, "volume remove"))
    }

    async fn config_list(&self, ns: &StackNamespace) -> Result<Vec<SensitiveState>> {
        // Listed unfiltered and narrowed by label here; the config endpoint
        // predates server-side label filters on some engine versions.
        let configs = self
            .retry("config list", || self.docker.list_configs::<String>(None))
            .await?;
        Ok(configs
            .into_iter()
            .filter_map(|c| {
                let spec = c.spec?;
                Some(SensitiveState {
                    id: c.id?,
                    name: spec.name.unwrap_or_default(),
                    labels: spec.labels.map(map_to_btree).unwrap_or_default(),
                })
            })
            .filter(|c| c.labels.get(STACK_NAMESPACE_LABEL).map(|v| v == ns.name()).unwrap_or(false))
            .collect())
    }

    async fn config_create(&self, spec: &SensitiveSpec) -> Result<String> {
        let response = self
            .docker
            .create_config(models::ConfigSpec {
                name: Some(spec.name.clone()),
                labels: Some(spec.labels.clone().into_iter().collect()),
                data: Some(STANDARD.encode(&spec.data)),
                ..Default::default()
            })
            .await
            .map_err(|e| map_err(e, "config create"))?;
        Ok(response.id)
    }

    async fn config_remove(&self, id: &str) -> Result<()> {
        self.docker.delete_config(id).await.map_err(|e| map_err(e, "config remove"))
    }

    async fn secret_list(&self, ns: &StackNamespace) -> Result<Vec<SensitiveState>> {
        let secrets = self
            .retry("secret list", || self.docker.list_secrets(Some(ListSecretsOptions {
                filters: Self::label_filters(ns),
            })))
            .await?;
        Ok(secrets
            .into_iter()
            .filter_map(|s| {
                let spec = s.spec?;
                Some(SensitiveState {
                    id: s.id?,
                    name: spec.name.unwrap_or_default(),
                    labels: spec.labels.map(map_to_btree).unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn secret_create(&self, spec: &SensitiveSpec) -> Result<String> {
        let response = self
            .docker
            .create_secret(models::SecretSpec {
                name: Some(spec.name.clone()),
                labels: Some(spec.labels.clone().into_iter().collect()),
                data: Some(STANDARD.encode(&spec.data)),
                ..Default::default()
            })
            .await
            .map_err(|e| map_err(e, "secret create"))?;
        Ok(response.id)
    }

    async fn secret_remove(&self, id: &str) -> Result<()> {
        self.docker.delete_secret(id).await.map_err(|e| map_err(e, "secret remove"))
    }

    async fn image_pull(
        &self,
        reference: &str,
        auth: Option<&str>,
    ) -> Result<BoxStream<'static, Result<PullProgress>>> {
        debug!(image = reference, "pulling image");
        let stream = self.docker.create_image(
            Some(CreateImageOptions { from_image: reference.to_string(), ..Default::default() }),
            None,
            credentials(auth),
        );
        Ok(stream
            .map_err(|e| StackError::Transport { reason: e.to_string() })
            .map_ok(|info| PullProgress {
                layer: info.id,
                status: info.status.unwrap_or_default(),
            })
            .boxed())
    }

    async fn events(&self) -> Result<BoxStream<'static, Result<ClusterEvent>>> {
        let filters = HashMap::from([(
            "type".to_string(),
            vec!["container".to_string(), "service".to_string(), "node".to_string()],
        )]);
        let stream = self.docker.events(Some(EventsOptions::<String> {
            filters,
            ..Default::default()
        }));
        Ok(stream
            .map_err(|e| StackError::Transport { reason: e.to_string() })
            .try_filter_map(|message| async move { Ok(event_from_api(message)) })
            .boxed())
    }

    fn name(&self) -> &str {
        "docker"
    }
}

fn credentials(auth: Option<&str>) -> Option<DockerCredentials> {
    auth.map(|token| DockerCredentials {
        identitytoken: Some(token.to_string()),
        ..Default::default()
    })
}

fn is_not_found(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }
    )
}

fn is_version_conflict(err: &bollard::errors::Error) -> bool {
    match err {
        bollard::errors::Error::DockerResponseServerError { status_code: 409, .. } => true,
        bollard::errors::Error::DockerResponseServerError { message, .. } => {
            message.contains("out of sequence")
        }
        _ => false,
    }
}

fn map_err(err: bollard::errors::Error, what: &str) -> StackError {
    match err {
        bollard::errors::Error::DockerResponseServerError { status_code: 404, message } => {
            StackError::NotFound { kind: "object", name: message }
        }
        other => StackError::Transport { reason: format!("{}: {}", what, other) },
    }
}

fn map_to_btree(map: HashMap<String, String>) -> BTreeMap<String, String> {
    map.into_iter().collect()
}

// --- wire conversions ---

fn service_from_api(service: models::Service) -> Result<CurrentService> {
    let id = service
        .id
        .ok_or_else(|| StackError::Internal("service without id in list response".into()))?;
    let version = service.version.and_then(|v| v.index).unwrap_or(0) as u64;
    let api_spec = service
        .spec
        .ok_or_else(|| StackError::Internal(format!("service {} without spec", id)))?;

    let name = api_spec.name.unwrap_or_default();
    let labels = api_spec.labels.map(map_to_btree).unwrap_or_default();

    let task = api_spec.task_template.unwrap_or_default();
    let container = task.container_spec.unwrap_or_default();

    let mut env = container.env.unwrap_or_default();
    env.sort();

    let mut mounts: Vec<Mount> = container
        .mounts
        .unwrap_or_default()
        .into_iter()
        .filter_map(|m| {
            Some(Mount {
                kind: match m.typ? {
                    models::MountTypeEnum::BIND => MountKind::Bind,
                    _ => MountKind::Volume,
                },
                source: m.source.unwrap_or_default(),
                target: m.target.unwrap_or_default(),
                read_only: m.read_only.unwrap_or(false),
            })
        })
        .collect();
    mounts.sort_by(|a, b| a.target.cmp(&b.target));

    let mut networks: Vec<String> = task
        .networks
        .unwrap_or_default()
        .into_iter()
        .filter_map(|n| n.target)
        .collect();
    networks.sort();

    let mode = match service_mode(&api_spec.mode) {
        Some(m) => m,
        None => ReplicationMode::default(),
    };

    // Ports come from the submitted spec side, not the runtime endpoint,
    // so they compare against what the manifest produces.
    let mut ports: Vec<PortSpec> = api_spec
        .endpoint_spec
        .and_then(|s| s.ports)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|p| {
            Some(PortSpec {
                target: p.target_port? as u16,
                published: p.published_port.map(|v| v as u16),
                protocol: match p.protocol {
                    Some(models::EndpointPortConfigProtocolEnum::UDP) => PortProtocol::Udp,
                    _ => PortProtocol::Tcp,
                },
                mode: match p.publish_mode {
                    Some(models::EndpointPortConfigPublishModeEnum::HOST) => PublishMode::Host,
                    _ => PublishMode::Ingress,
                },
            })
        })
        .collect();
    ports.sort_by_key(|p| (p.target, p.published));

    let healthcheck = container.health_check.and_then(healthcheck_from_api);

    let update = api_spec
        .update_config
        .map(|u| UpdatePolicy {
            parallelism: u.parallelism.unwrap_or(1) as u64,
            delay: u.delay.map(nanos_to_duration),
            order: match u.order {
                Some(models::ServiceSpecUpdateConfigOrderEnum::START_FIRST) => {
                    UpdateOrder::StartFirst
                }
                _ => UpdateOrder::StopFirst,
            },
            monitor: u.monitor.map(nanos_to_duration),
            max_failure_ratio: u.max_failure_ratio.unwrap_or(0.0),
        })
        .unwrap_or_default();

    let restart = task
        .restart_policy
        .map(|r| RestartPolicy {
            condition: match r.condition {
                Some(models::TaskSpecRestartPolicyConditionEnum::NONE) => RestartCondition::None,
                Some(models::TaskSpecRestartPolicyConditionEnum::ON_FAILURE) => {
                    RestartCondition::OnFailure
                }
                _ => RestartCondition::Any,
            },
            delay: r.delay.map(nanos_to_duration),
            max_attempts: r.max_attempts.map(|v| v as u64),
            window: r.window.map(nanos_to_duration),
        })
        .unwrap_or_default();

    let mut constraints =
        task.placement.and_then(|p| p.constraints).unwrap_or_default();
    constraints.sort();

    Ok(CurrentService {
        id,
        version,
        spec: ServiceSpec {
            name,
            labels,
            image: container.image.unwrap_or_default(),
            command: container.command.unwrap_or_default(),
            args: container.args.unwrap_or_default(),
            env,
            mode,
            mounts,
            ports,
            networks,
            healthcheck,
            update,
            restart,
            constraints,
            stop_grace_period: container.stop_grace_period.map(nanos_to_duration),
        },
    })
}

fn service_mode(mode: &Option<models::ServiceSpecMode>) -> Option<ReplicationMode> {
    let mode = mode.as_ref()?;
    if mode.global.is_some() {
        return Some(ReplicationMode::Global);
    }
    let replicated = mode.replicated.as_ref()?;
    Some(ReplicationMode::Replicated {
        replicas: replicated.replicas.unwrap_or(1) as u64,
    })
}

fn healthcheck_from_api(hc: models::HealthConfig) -> Option<HealthCheckSpec> {
    let test = hc.test.unwrap_or_default();
    if test.is_empty() {
        return None;
    }
    let disable = test == ["NONE"];
    Some(HealthCheckSpec {
        test,
        interval: hc.interval.map(nanos_to_duration),
        timeout: hc.timeout.map(nanos_to_duration),
        retries: hc.retries.map(|v| v as u64),
        start_period: hc.start_period.map(nanos_to_duration),
        disable,
    })
}

fn service_to_api(spec: &ServiceSpec) -> models::ServiceSpec {
    let healthcheck = spec.healthcheck.as_ref().map(|hc| models::HealthConfig {
        test: Some(if hc.disable { vec!["NONE".to_string()] } else { hc.test.clone() }),
        interval: hc.interval.map(duration_to_nanos),
        timeout: hc.timeout.map(duration_to_nanos),
        retries: hc.retries.map(|v| v as i64),
        start_period: hc.start_period.map(duration_to_nanos),
        ..Default::default()
    });

    let mounts: Vec<models::Mount> = spec
        .mounts
        .iter()
        .map(|m| models::Mount {
            target: Some(m.target.clone()),
            source: Some(m.source.clone()),
            typ: Some(match m.kind {
                MountKind::Bind => models::MountTypeEnum::BIND,
                MountKind::Volume => models::MountTypeEnum::VOLUME,
            }),
            read_only: Some(m.read_only),
            ..Default::default()
        })
        .collect();

    let networks: Vec<models::NetworkAttachmentConfig> = spec
        .networks
        .iter()
        .map(|n| models::NetworkAttachmentConfig { target: Some(n.clone()), ..Default::default() })
        .collect();

    let ports: Vec<models::EndpointPortConfig> = spec
        .ports
        .iter()
        .map(|p| models::EndpointPortConfig {
            target_port: Some(p.target as i64),
            published_port: p.published.map(|v| v as i64),
            protocol: Some(match p.protocol {
                PortProtocol::Tcp => models::EndpointPortConfigProtocolEnum::TCP,
                PortProtocol::Udp => models::EndpointPortConfigProtocolEnum::UDP,
            }),
            publish_mode: Some(match p.mode {
                PublishMode::Ingress => models::EndpointPortConfigPublishModeEnum::INGRESS,
                PublishMode::Host => models::EndpointPortConfigPublishModeEnum::HOST,
            }),
            ..Default::default()
        })
        .collect();

    let mode = Some(match spec.mode {
        ReplicationMode::Replicated { replicas } => models::ServiceSpecMode {
            replicated: Some(models::ServiceSpecModeReplicated {
                replicas: Some(replicas as i64),
            }),
            ..Default::default()
        },
        ReplicationMode::Global => models::ServiceSpecMode {
            global: Some(Default::default()),
            ..Default::default()
        },
    });

    models::ServiceSpec {
        name: Some(spec.name.clone()),
        labels: Some(spec.labels.clone().into_iter().collect()),
        task_template: Some(models::TaskSpec {
            container_spec: Some(models::TaskSpecContainerSpec {
                image: Some(spec.image.clone()),
                command: (!spec.command.is_empty()).then(|| spec.command.clone()),
                args: (!spec.args.is_empty()).then(|| spec.args.clone()),
                env: Some(spec.env.clone()),
                mounts: Some(mounts),
                health_check: healthcheck,
                stop_grace_period: spec.stop_grace_period.map(duration_to_nanos),
                ..Default::default()
            }),
            restart_policy: Some(models::TaskSpecRestartPolicy {
                condition: Some(match spec.restart.condition {
                    RestartCondition::None => models::TaskSpecRestartPolicyConditionEnum::NONE,
                    RestartCondition::OnFailure => {
                        models::TaskSpecRestartPolicyConditionEnum::ON_FAILURE
                    }
                    RestartCondition::Any => models::TaskSpecRestartPolicyConditionEnum::ANY,
                }),
                delay: spec.restart.delay.map(duration_to_nanos),
                max_attempts: spec.restart.max_attempts.map(|v| v as i64),
                window: spec.restart.window.map(duration_to_nanos),
            }),
            placement: Some(models::TaskSpecPlacement {
                constraints: Some(spec.constraints.clone()),
                ..Default::default()
            }),
            networks: Some(networks),
            ..Default::default()
        }),
        mode,
        update_config: Some(models::ServiceSpecUpdateConfig {
            parallelism: Some(spec.update.parallelism as i64),
            delay: spec.update.delay.map(duration_to_nanos),
            order: Some(match spec.update.order {
                UpdateOrder::StopFirst => models::ServiceSpecUpdateConfigOrderEnum::STOP_FIRST,
                UpdateOrder::StartFirst => models::ServiceSpecUpdateConfigOrderEnum::START_FIRST,
            }),
            monitor: spec.update.monitor.map(duration_to_nanos),
            max_failure_ratio: Some(spec.update.max_failure_ratio),
            ..Default::default()
        }),
        endpoint_spec: (!ports.is_empty()).then(|| models::EndpointSpec {
            mode: Some(models::EndpointSpecModeEnum::VIP),
            ports: Some(ports),
        }),
        ..Default::default()
    }
}

fn task_from_api(task: models::Task) -> Option<Task> {
    let id = task.id?;
    let service_id = task.service_id.unwrap_or_default();
    let status = task.status.unwrap_or_default();
    let state = status
        .state
        .map(|s| TaskState::parse(&s.to_string()))
        .unwrap_or(TaskState::Unknown);
    let desired_state = task
        .desired_state
        .map(|s| TaskState::parse(&s.to_string()))
        .unwrap_or(TaskState::Unknown);
    let container_status = status.container_status;
    Some(Task {
        id,
        service_id,
        state,
        desired_state,
        error: status.err.filter(|e| !e.is_empty()),
        container_id: container_status.as_ref().and_then(|c| c.container_id.clone()),
        exit_code: container_status.and_then(|c| c.exit_code),
    })
}

fn health_from_api(health: models::Health) -> Option<ContainerHealth> {
    let status = match health.status? {
        models::HealthStatusEnum::STARTING => HealthProbeStatus::Starting,
        models::HealthStatusEnum::HEALTHY => HealthProbeStatus::Healthy,
        models::HealthStatusEnum::UNHEALTHY => HealthProbeStatus::Unhealthy,
        _ => return None,
    };
    Some(ContainerHealth {
        status,
        failing_streak: health.failing_streak.unwrap_or(0) as u64,
        log: health
            .log
            .unwrap_or_default()
            .into_iter()
            .map(|entry| HealthProbe {
                start: entry.start.map(|t| t.to_string()).unwrap_or_default(),
                end: entry.end.map(|t| t.to_string()).unwrap_or_default(),
                exit_code: entry.exit_code.unwrap_or(0),
                output: entry.output.unwrap_or_default(),
            })
            .collect(),
    })
}

fn event_from_api(message: models::EventMessage) -> Option<ClusterEvent> {
    let scope = match message.typ? {
        models::EventMessageTypeEnum::CONTAINER => EventScope::Container,
        models::EventMessageTypeEnum::SERVICE => EventScope::Service,
        models::EventMessageTypeEnum::NODE => EventScope::Node,
        _ => return None,
    };
    let actor = message.actor.unwrap_or_default();
    Some(ClusterEvent {
        scope,
        action: message.action.unwrap_or_default(),
        actor_id: actor.id.unwrap_or_default(),
        attributes: actor.attributes.unwrap_or_default(),
    })
}

fn nanos_to_duration(nanos: i64) -> Duration {
    Duration::from_nanos(nanos.max(0) as u64)
}

fn duration_to_nanos(d: Duration) -> i64 {
    d.as_nanos().min(i64::MAX as u128) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_nanos_round_trip() {
        let d = Duration::from_secs(90);
        assert_eq!(nanos_to_duration(duration_to_nanos(d)), d);
    }
}
