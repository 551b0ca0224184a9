//! Desired and current stack state.
//!
//! Both sides of the diff use the same shape: four mappings keyed by local
//! (prefix-stripped) name. `BTreeMap` keeps iteration order alphabetical,
//! which makes plans deterministic.

use super::resource::{NetworkSpec, NetworkState, SensitiveSpec, SensitiveState, VolumeSpec};
use super::service::ServiceSpec;
use std::collections::{BTreeMap, BTreeSet};

/// The desired stack state, assembled from the manifest.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DesiredState {
    pub services: BTreeMap<String, ServiceSpec>,
    pub networks: BTreeMap<String, NetworkSpec>,
    pub volumes: BTreeMap<String, VolumeSpec>,
    pub configs: BTreeMap<String, SensitiveSpec>,
    pub secrets: BTreeMap<String, SensitiveSpec>,
}

/// A service as observed in the cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentService {
    pub id: String,
    /// Opaque version token; required to authorise updates.
    pub version: u64,
    /// Normalised spec, same shape as the desired side. The image here may
    /// carry a digest suffix.
    pub spec: ServiceSpec,
}

/// The current stack state, read from the cluster.
///
/// Volumes are reduced to a set of names: the engine does not expose enough
/// structure to compare them deeply.
#[derive(Debug, Clone, Default)]
pub struct CurrentState {
    pub services: BTreeMap<String, CurrentService>,
    pub networks: BTreeMap<String, NetworkState>,
    pub volumes: BTreeSet<String>,
    pub configs: BTreeMap<String, SensitiveState>,
    pub secrets: BTreeMap<String, SensitiveState>,
}
