//! Network, volume, config and secret domain types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Desired configuration of one overlay network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSpec {
    /// Full cluster-side name.
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub driver: Option<String>,
    #[serde(default)]
    pub attachable: bool,
    /// External networks are referenced, never created or removed.
    #[serde(default)]
    pub external: bool,
}

/// A network as observed in the cluster. The list endpoint is incomplete,
/// so this is assembled from list + inspect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkState {
    pub id: String,
    pub name: String,
    pub driver: Option<String>,
    pub labels: BTreeMap<String, String>,
}

/// Desired configuration of one named volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSpec {
    /// Full cluster-side name.
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub driver: Option<String>,
    #[serde(default)]
    pub driver_opts: BTreeMap<String, String>,
    #[serde(default)]
    pub external: bool,
}

/// Desired configuration of one config or secret. Both are content-addressed
/// and immutable in the cluster, so the payload only matters on create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensitiveSpec {
    /// Full cluster-side name.
    pub name: String,
    pub labels: BTreeMap<String, String>,
    /// File contents, read at manifest-conversion time.
    #[serde(default)]
    pub data: Vec<u8>,
    #[serde(default)]
    pub external: bool,
}

/// A config or secret as observed in the cluster. Payloads are never
/// readable back, so only identity is tracked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensitiveState {
    pub id: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
}
