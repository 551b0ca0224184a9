//! Compose file format types.
//!
//! Types matching the compose specification subset the deployer understands.
//! Unknown fields are ignored; fields the engine ignores in cluster mode are
//! simply not modelled.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Root structure of a compose manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposeFile {
    /// Compose file format version (e.g. "3", "3.8"). Empty is accepted.
    #[serde(default)]
    pub version: String,

    /// Services to be deployed.
    pub services: BTreeMap<String, Service>,

    /// Named volumes.
    #[serde(default)]
    pub volumes: BTreeMap<String, VolumeDefinition>,

    /// Networks.
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkDefinition>,

    /// Configs (content read from files at conversion time).
    #[serde(default)]
    pub configs: BTreeMap<String, FileObjectDefinition>,

    /// Secrets (content read from files at conversion time).
    #[serde(default)]
    pub secrets: BTreeMap<String, FileObjectDefinition>,
}

/// A service in a compose manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Service {
    /// Container image to run.
    #[serde(default)]
    pub image: String,

    /// Override the image's default command.
    #[serde(default)]
    pub command: Option<StringOrList>,

    /// Override the image's entrypoint.
    #[serde(default)]
    pub entrypoint: Option<StringOrList>,

    /// Environment variables.
    #[serde(default)]
    pub environment: Environment,

    /// Port publications, short (`"8080:80"`) or long form.
    #[serde(default)]
    pub ports: Vec<PortEntry>,

    /// Volume mounts, short (`"data:/var/lib/data"`) or long form.
    #[serde(default)]
    pub volumes: Vec<VolumeEntry>,

    /// Networks to attach to.
    #[serde(default)]
    pub networks: Vec<String>,

    /// Container healthcheck.
    #[serde(default)]
    pub healthcheck: Option<HealthCheckDefinition>,

    /// Metadata labels.
    #[serde(default)]
    pub labels: HashMap<String, String>,

    /// Grace period before a stopping container is killed (e.g. "10s").
    #[serde(default)]
    pub stop_grace_period: Option<String>,

    /// Cluster-mode deployment configuration.
    #[serde(default)]
    pub deploy: Option<DeployConfig>,
}

/// A scalar-or-list value (`command: echo hi` vs `command: [echo, hi]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StringOrList {
    String(String),
    List(Vec<String>),
}

impl StringOrList {
    /// Shell-split a scalar form; pass a list form through unchanged.
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            StringOrList::String(s) => s.split_whitespace().map(|p| p.to_string()).collect(),
            StringOrList::List(items) => items.clone(),
        }
    }
}

/// Environment variables can be specified as a map or list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Environment {
    /// Environment as key-value map.
    Map(BTreeMap<String, String>),
    /// Environment as list of `KEY=value` strings.
    List(Vec<String>),
}

impl Default for Environment {
    fn default() -> Self {
        Environment::Map(BTreeMap::new())
    }
}

impl Environment {
    /// Normalise to sorted `KEY=value` pairs regardless of input form.
    pub fn to_sorted_list(&self) -> Vec<String> {
        let mut list = match self {
            Environment::Map(map) => {
                map.iter().map(|(k, v)| format!("{}={}", k, v)).collect::<Vec<_>>()
            }
            Environment::List(list) => list.clone(),
        };
        list.sort();
        list
    }
}

/// A port publication in short or long form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortEntry {
    Short(String),
    Long {
        target: u16,
        #[serde(default)]
        published: Option<u16>,
        #[serde(default)]
        protocol: Option<String>,
        #[serde(default)]
        mode: Option<String>,
    },
}

/// A volume mount in short or long form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VolumeEntry {
    Short(String),
    Long {
        #[serde(rename = "type")]
        kind: String,
        source: String,
        target: String,
        #[serde(default)]
        read_only: bool,
    },
}

/// Healthcheck definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthCheckDefinition {
    /// Probe command: a string (run via shell) or `["CMD", …]` form.
    #[serde(default)]
    pub test: Option<StringOrList>,
    #[serde(default)]
    pub interval: Option<String>,
    #[serde(default)]
    pub timeout: Option<String>,
    #[serde(default)]
    pub retries: Option<u64>,
    #[serde(default)]
    pub start_period: Option<String>,
    #[serde(default)]
    pub disable: bool,
}

/// Deployment configuration (cluster mode).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployConfig {
    /// "replicated" (default) or "global".
    #[serde(default)]
    pub mode: Option<String>,

    #[serde(default)]
    pub replicas: Option<u64>,

    #[serde(default)]
    pub labels: HashMap<String, String>,

    #[serde(default)]
    pub update_config: Option<UpdateConfigDefinition>,

    #[serde(default)]
    pub restart_policy: Option<RestartPolicyDefinition>,

    #[serde(default)]
    pub placement: Option<PlacementDefinition>,
}

/// Rolling-update configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateConfigDefinition {
    #[serde(default)]
    pub parallelism: Option<u64>,
    #[serde(default)]
    pub delay: Option<String>,
    #[serde(default)]
    pub monitor: Option<String>,
    #[serde(default)]
    pub max_failure_ratio: Option<f64>,
    /// "stop-first" (default) or "start-first".
    #[serde(default)]
    pub order: Option<String>,
}

/// Restart policy configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestartPolicyDefinition {
    /// "none", "on-failure" or "any".
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub delay: Option<String>,
    #[serde(default)]
    pub max_attempts: Option<u64>,
    #[serde(default)]
    pub window: Option<String>,
}

/// Placement configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlacementDefinition {
    #[serde(default)]
    pub constraints: Vec<String>,
}

/// Volume definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeDefinition {
    #[serde(default)]
    pub driver: Option<String>,
    #[serde(default)]
    pub driver_opts: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub external: bool,
}

/// Network definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkDefinition {
    #[serde(default)]
    pub driver: Option<String>,
    #[serde(default)]
    pub attachable: bool,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub external: bool,
}

/// Config or secret definition, sourced from a file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileObjectDefinition {
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub external: bool,
}
