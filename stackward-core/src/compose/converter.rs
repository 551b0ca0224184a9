//! Compose manifest to desired-state converter.
//!
//! Resolves every name to its stack-scoped form, attaches the namespace
//! label, normalises collections for deterministic comparison and parses
//! duration strings. Content validation that depends on flags (`:latest`
//! policy) or the filesystem (bind paths, config files) happens here, before
//! any cluster call.

use super::types::*;
use crate::error::{Result, StackError};
use crate::types::{
    DesiredState, HealthCheckSpec, Mount, MountKind, NetworkSpec, PortProtocol, PortSpec,
    PublishMode, ReplicationMode, RestartCondition, RestartPolicy, SensitiveSpec, ServiceSpec,
    StackNamespace, UpdateOrder, UpdatePolicy, VolumeSpec, DEFAULT_NETWORK,
    STACK_NAMESPACE_LABEL,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Environment variable overriding the directory relative bind-mount and
/// config/secret file paths resolve against.
pub const BASE_DIR_ENV: &str = "STACKWARD_BASE_DIR";

/// Conversion options.
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Base directory for relative paths in the manifest.
    pub base_dir: PathBuf,
    /// Permit image references with a `:latest` (or missing) tag.
    pub allow_latest: bool,
}

impl ConvertOptions {
    /// Resolve the base directory from [`BASE_DIR_ENV`], falling back to the
    /// process working directory.
    pub fn from_env(allow_latest: bool) -> Self {
        let base_dir = std::env::var_os(BASE_DIR_ENV)
            .map(PathBuf::from)
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        Self { base_dir, allow_latest }
    }
}

/// Converter from a parsed manifest to a [`DesiredState`].
pub struct ComposeConverter;

impl ComposeConverter {
    pub fn convert(
        compose: &ComposeFile,
        ns: &StackNamespace,
        opts: &ConvertOptions,
    ) -> Result<DesiredState> {
        let mut state = DesiredState::default();
        let mut needs_default_network = false;

        for (local, definition) in &compose.networks {
            if definition.external {
                debug!(network = %local, "external network, not managed");
                continue;
            }
            state.networks.insert(local.clone(), convert_network(ns, local, definition));
        }

        for (local, definition) in &compose.volumes {
            if definition.external {
                continue;
            }
            state.volumes.insert(local.clone(), convert_volume(ns, local, definition));
        }

        for (local, definition) in &compose.configs {
            if definition.external {
                continue;
            }
            state
                .configs
                .insert(local.clone(), convert_file_object(ns, local, definition, opts, "config")?);
        }

        for (local, definition) in &compose.secrets {
            if definition.external {
                continue;
            }
            state
                .secrets
                .insert(local.clone(), convert_file_object(ns, local, definition, opts, "secret")?);
        }

        for (local, service) in &compose.services {
            validate_image(local, &service.image, opts.allow_latest)?;
            for network in &service.networks {
                if !compose.networks.contains_key(network) {
                    return Err(StackError::Validation {
                        reason: format!(
                            "service '{}' references undeclared network '{}'",
                            local, network
                        ),
                    });
                }
            }
            let spec = convert_service(ns, local, service, compose, opts)?;
            if service.networks.is_empty() {
                needs_default_network = true;
            }
            state.services.insert(local.clone(), spec);
        }

        // Services without explicit attachments land on the implicit default
        // network; make sure it exists before any of them is created.
        if needs_default_network && !state.networks.contains_key(DEFAULT_NETWORK) {
            state.networks.insert(
                DEFAULT_NETWORK.to_string(),
                convert_network(ns, DEFAULT_NETWORK, &NetworkDefinition::default()),
            );
        }

        Ok(state)
    }
}

fn validate_image(service: &str, image: &str, allow_latest: bool) -> Result<()> {
    if allow_latest {
        return Ok(());
    }
    // A reference with no tag is implicitly `:latest`. The slash check keeps
    // registry ports (`registry:5000/app`) from being mistaken for tags.
    let tag = image.rsplit_once(':').filter(|(_, t)| !t.contains('/')).map(|(_, t)| t);
    if tag.is_none() || tag == Some("latest") {
        return Err(StackError::LatestTagForbidden {
            service: service.to_string(),
            image: image.to_string(),
        });
    }
    Ok(())
}

fn stack_labels(
    ns: &StackNamespace,
    extra: &std::collections::HashMap<String, String>,
) -> BTreeMap<String, String> {
    let mut labels: BTreeMap<String, String> =
        extra.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    labels.insert(STACK_NAMESPACE_LABEL.to_string(), ns.name().to_string());
    labels
}

fn convert_network(ns: &StackNamespace, local: &str, def: &NetworkDefinition) -> NetworkSpec {
    NetworkSpec {
        name: ns.scope(local),
        labels: stack_labels(ns, &def.labels),
        driver: def.driver.clone(),
        attachable: def.attachable,
        external: false,
    }
}

fn convert_volume(ns: &StackNamespace, local: &str, def: &VolumeDefinition) -> VolumeSpec {
    VolumeSpec {
        name: ns.scope(local),
        labels: stack_labels(ns, &def.labels),
        driver: def.driver.clone(),
        driver_opts: def.driver_opts.clone(),
        external: false,
    }
}

fn convert_file_object(
    ns: &StackNamespace,
    local: &str,
    def: &FileObjectDefinition,
    opts: &ConvertOptions,
    kind: &str,
) -> Result<SensitiveSpec> {
    let file = def.file.as_deref().ok_or_else(|| StackError::Validation {
        reason: format!("{} '{}' has no file source", kind, local),
    })?;
    let path = resolve_path(&opts.base_dir, file);
    let data = std::fs::read(&path)
        .map_err(|e| StackError::ManifestRead { path: path.clone(), source: e })?;
    Ok(SensitiveSpec { name: ns.scope(local), labels: stack_labels(ns, &def.labels), data, external: false })
}

fn convert_service(
    ns: &StackNamespace,
    local: &str,
    service: &Service,
    compose: &ComposeFile,
    opts: &ConvertOptions,
) -> Result<ServiceSpec> {
    let deploy = service.deploy.clone().unwrap_or_default();

    let mode = match deploy.mode.as_deref() {
        Some("global") => ReplicationMode::Global,
        _ => ReplicationMode::Replicated { replicas: deploy.replicas.unwrap_or(1) },
    };

    let mut mounts = Vec::new();
    for entry in &service.volumes {
        mounts.push(convert_mount(ns, local, entry, &compose.volumes, opts)?);
    }
    mounts.sort_by(|a: &Mount, b: &Mount| a.target.cmp(&b.target));

    let mut ports = Vec::new();
    for entry in &service.ports {
        ports.push(convert_port(local, entry)?);
    }
    ports.sort_by_key(|p: &PortSpec| (p.target, p.published));

    let mut networks: Vec<String> = if service.networks.is_empty() {
        vec![ns.scope(DEFAULT_NETWORK)]
    } else {
        service.networks.iter().map(|n| ns.scope(n)).collect()
    };
    networks.sort();

    let mut labels = stack_labels(ns, &service.labels);
    for (k, v) in &deploy.labels {
        labels.insert(k.clone(), v.clone());
    }

    Ok(ServiceSpec {
        name: ns.scope(local),
        labels,
        image: service.image.clone(),
        command: service.entrypoint.as_ref().map(|e| e.to_vec()).unwrap_or_default(),
        args: service.command.as_ref().map(|c| c.to_vec()).unwrap_or_default(),
        env: service.environment.to_sorted_list(),
        mode,
        mounts,
        ports,
        networks,
        healthcheck: convert_healthcheck(local, service.healthcheck.as_ref())?,
        update: convert_update_policy(local, deploy.update_config.as_ref())?,
        restart: convert_restart_policy(local, deploy.restart_policy.as_ref())?,
        constraints: {
            let mut constraints =
                deploy.placement.map(|p| p.constraints).unwrap_or_default();
            constraints.sort();
            constraints
        },
        stop_grace_period: parse_duration_opt(local, service.stop_grace_period.as_deref())?,
    })
}

fn convert_mount(
    ns: &StackNamespace,
    service: &str,
    entry: &VolumeEntry,
    declared: &BTreeMap<String, VolumeDefinition>,
    opts: &ConvertOptions,
) -> Result<Mount> {
    let (source, target, read_only, explicit_bind) = match entry {
        VolumeEntry::Short(short) => parse_short_mount(service, short)?,
        VolumeEntry::Long { kind, source, target, read_only } => {
            (source.clone(), target.clone(), *read_only, kind == "bind")
        }
    };

    let is_bind = explicit_bind || source.starts_with('.') || source.starts_with('/');
    if is_bind {
        let resolved = resolve_path(&opts.base_dir, &source);
        if !resolved.is_absolute() {
            return Err(StackError::Validation {
                reason: format!(
                    "service '{}': bind mount source '{}' does not resolve to an absolute path",
                    service, source
                ),
            });
        }
        Ok(Mount {
            kind: MountKind::Bind,
            source: resolved.to_string_lossy().into_owned(),
            target,
            read_only,
        })
    } else {
        if !declared.contains_key(&source) {
            return Err(StackError::Validation {
                reason: format!(
                    "service '{}' references undeclared volume '{}'",
                    service, source
                ),
            });
        }
        Ok(Mount { kind: MountKind::Volume, source: ns.scope(&source), target, read_only })
    }
}

fn parse_short_mount(service: &str, short: &str) -> Result<(String, String, bool, bool)> {
    let parts: Vec<&str> = short.split(':').collect();
    match parts.as_slice() {
        [source, target] => Ok((source.to_string(), target.to_string(), false, false)),
        [source, target, flags] => {
            Ok((source.to_string(), target.to_string(), flags.contains("ro"), false))
        }
        _ => Err(StackError::Validation {
            reason: format!("service '{}': invalid volume entry '{}'", service, short),
        }),
    }
}

fn convert_port(service: &str, entry: &PortEntry) -> Result<PortSpec> {
    match entry {
        PortEntry::Short(short) => {
            let (spec, proto) = match short.split_once('/') {
                Some((spec, proto)) => (spec, proto),
                None => (short.as_str(), "tcp"),
            };
            let (published, target) =
                spec.split_once(':').ok_or_else(|| StackError::Validation {
                    reason: format!("service '{}': invalid port entry '{}'", service, short),
                })?;
            Ok(PortSpec {
                target: parse_port(service, target)?,
                published: Some(parse_port(service, published)?),
                protocol: parse_protocol(service, proto)?,
                mode: PublishMode::Ingress,
            })
        }
        PortEntry::Long { target, published, protocol, mode } => Ok(PortSpec {
            target: *target,
            published: *published,
            protocol: parse_protocol(service, protocol.as_deref().unwrap_or("tcp"))?,
            mode: match mode.as_deref() {
                Some("host") => PublishMode::Host,
                _ => PublishMode::Ingress,
            },
        }),
    }
}

fn parse_port(service: &str, s: &str) -> Result<u16> {
    s.parse().map_err(|_| StackError::Validation {
        reason: format!("service '{}': invalid port number '{}'", service, s),
    })
}

fn parse_protocol(service: &str, s: &str) -> Result<PortProtocol> {
    match s {
        "tcp" => Ok(PortProtocol::Tcp),
        "udp" => Ok(PortProtocol::Udp),
        other => Err(StackError::Validation {
            reason: format!("service '{}': unsupported port protocol '{}'", service, other),
        }),
    }
}

fn convert_healthcheck(
    service: &str,
    definition: Option<&HealthCheckDefinition>,
) -> Result<Option<HealthCheckSpec>> {
    let Some(def) = definition else { return Ok(None) };

    if def.disable {
        return Ok(Some(HealthCheckSpec {
            test: vec!["NONE".to_string()],
            interval: None,
            timeout: None,
            retries: None,
            start_period: None,
            disable: true,
        }));
    }

    let test = match &def.test {
        // A scalar probe runs through the shell.
        Some(StringOrList::String(cmd)) => {
            vec!["CMD-SHELL".to_string(), cmd.clone()]
        }
        Some(StringOrList::List(items)) => items.clone(),
        None => return Ok(None),
    };

    Ok(Some(HealthCheckSpec {
        test,
        interval: parse_duration_opt(service, def.interval.as_deref())?,
        timeout: parse_duration_opt(service, def.timeout.as_deref())?,
        retries: def.retries,
        start_period: parse_duration_opt(service, def.start_period.as_deref())?,
        disable: false,
    }))
}

fn convert_update_policy(
    service: &str,
    definition: Option<&UpdateConfigDefinition>,
) -> Result<UpdatePolicy> {
    let Some(def) = definition else { return Ok(UpdatePolicy::default()) };
    Ok(UpdatePolicy {
        parallelism: def.parallelism.unwrap_or(1),
        delay: parse_duration_opt(service, def.delay.as_deref())?,
        order: match def.order.as_deref() {
            Some("start-first") => UpdateOrder::StartFirst,
            _ => UpdateOrder::StopFirst,
        },
        monitor: parse_duration_opt(service, def.monitor.as_deref())?,
        max_failure_ratio: def.max_failure_ratio.unwrap_or(0.0),
    })
}

fn convert_restart_policy(
    service: &str,
    definition: Option<&RestartPolicyDefinition>,
) -> Result<RestartPolicy> {
    let Some(def) = definition else { return Ok(RestartPolicy::default()) };
    Ok(RestartPolicy {
        condition: match def.condition.as_deref() {
            Some("none") => RestartCondition::None,
            Some("on-failure") => RestartCondition::OnFailure,
            _ => RestartCondition::Any,
        },
        delay: parse_duration_opt(service, def.delay.as_deref())?,
        max_attempts: def.max_attempts,
        window: parse_duration_opt(service, def.window.as_deref())?,
    })
}

fn parse_duration_opt(service: &str, value: Option<&str>) -> Result<Option<Duration>> {
    match value {
        None => Ok(None),
        Some(s) => humantime::parse_duration(s).map(Some).map_err(|_| StackError::Validation {
            reason: format!("service '{}': invalid duration '{}'", service, s),
        }),
    }
}

fn resolve_path(base: &Path, raw: &str) -> PathBuf {
    let path = Path::new(raw);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
