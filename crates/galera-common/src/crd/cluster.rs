//! MariaDBCluster Custom Resource Definition
//!
//! A MariaDBCluster describes a multi-master Galera cluster. The spec is
//! owned by the user; the status is owned exclusively by the controller and
//! records where the cluster stands in its bootstrap/operational/recovery
//! lifecycle.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{CustomResource, Resource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{ClusterPhase, ClusterStage, PodCondition, RecoveryStep};
use crate::{
    join_key, CLUSTER_LABEL_KEY, COMPONENT_LABEL_KEY, FIELD_MANAGER, MANAGED_BY_LABEL_KEY,
};

/// Default MariaDB image for the server workload
pub const DEFAULT_IMAGE: &str = "mariadb:11.4";

/// Default size of each replica's data volume
pub const DEFAULT_STORAGE_SIZE: &str = "10Gi";

/// Specification for a MariaDBCluster
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "galera.dev",
    version = "v1alpha1",
    kind = "MariaDBCluster",
    plural = "mariadbclusters",
    shortname = "mdbc",
    status = "MariaDBClusterStatus",
    namespaced,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Stage","type":"string","jsonPath":".status.stage"}"#,
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MariaDBClusterSpec {
    /// Desired number of database replicas
    pub replicas: i32,

    /// Server container image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Size of each replica's data volume (e.g. "10Gi")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_size: Option<String>,

    /// Storage class for replica data volumes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,

    /// Volume used to stage snapshots taken from the cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<SnapshotSpec>,
}

/// Snapshot volume claim parameters
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSpec {
    /// Requested size (e.g. "20Gi")
    pub size: String,

    /// Storage class for the snapshot claim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
}

impl MariaDBClusterSpec {
    /// Validate the cluster specification
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.replicas < 1 {
            return Err(crate::Error::validation(format!(
                "replicas must be at least 1, got {}",
                self.replicas
            )));
        }
        if let Some(ref snapshot) = self.snapshot {
            if snapshot.size.trim().is_empty() {
                return Err(crate::Error::validation("snapshot.size cannot be empty"));
            }
        }
        Ok(())
    }

    /// Server image, falling back to the default
    pub fn image(&self) -> &str {
        self.image.as_deref().unwrap_or(DEFAULT_IMAGE)
    }

    /// Data volume size, falling back to the default
    pub fn storage_size(&self) -> &str {
        self.storage_size.as_deref().unwrap_or(DEFAULT_STORAGE_SIZE)
    }
}

/// Status for a MariaDBCluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MariaDBClusterStatus {
    /// Current lifecycle phase
    #[serde(default)]
    pub phase: ClusterPhase,

    /// Qualifier within the phase
    #[serde(default)]
    pub stage: ClusterStage,

    /// Last StatefulSet generation the controller acted on
    #[serde(default)]
    pub stateful_set_observed_generation: i64,

    /// Replica designated to re-seed the cluster during recovery
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_from: Option<String>,

    /// Per-replica replication reports collected during recovery
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stateful_set_pod_conditions: Vec<PodCondition>,
}

impl MariaDBClusterStatus {
    /// Designated bootstrap source, treating an empty string as unset
    pub fn bootstrap_source(&self) -> Option<&str> {
        self.bootstrap_from.as_deref().filter(|s| !s.is_empty())
    }

    /// Typed view of the recovery sub-machine
    pub fn recovery_step(&self) -> RecoveryStep<'_> {
        match self.bootstrap_source() {
            Some(bootstrap_from) => RecoveryStep::Verifying { bootstrap_from },
            None if self.stage == ClusterStage::PrimaryRecovered => RecoveryStep::Reforming,
            None => RecoveryStep::Selecting,
        }
    }
}

/// Managed component names, used for labels and resource naming
pub mod components {
    /// Database server StatefulSet and its headless service
    pub const SERVER: &str = "server";
    /// Client-facing proxy service
    pub const PROXY: &str = "proxy";
    /// Snapshot volume claim
    pub const SNAPSHOT: &str = "snapshot";
}

impl MariaDBCluster {
    /// Current status, or the initial status when none was written yet
    pub fn status_or_default(&self) -> MariaDBClusterStatus {
        self.status.clone().unwrap_or_default()
    }

    /// Current phase
    pub fn phase(&self) -> ClusterPhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    /// Work queue key (`namespace/name`)
    pub fn queue_key(&self) -> String {
        join_key(&self.namespace().unwrap_or_default(), &self.name_any())
    }

    /// Name of the server StatefulSet, its headless service and RBAC objects
    pub fn server_name(&self) -> String {
        format!("{}-{}", self.name_any(), components::SERVER)
    }

    /// Name of the client-facing proxy service
    pub fn proxy_name(&self) -> String {
        format!("{}-{}", self.name_any(), components::PROXY)
    }

    /// Name of the snapshot volume claim
    pub fn snapshot_pvc_name(&self) -> String {
        format!("{}-{}", self.name_any(), components::SNAPSHOT)
    }

    /// Labels stamped on every managed resource of `component`
    pub fn labels(&self, component: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            (CLUSTER_LABEL_KEY.to_string(), self.name_any()),
            (COMPONENT_LABEL_KEY.to_string(), component.to_string()),
            (MANAGED_BY_LABEL_KEY.to_string(), FIELD_MANAGER.to_string()),
        ])
    }

    /// Selector matching the server pods
    pub fn server_selector(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (CLUSTER_LABEL_KEY.to_string(), self.name_any()),
            (COMPONENT_LABEL_KEY.to_string(), components::SERVER.to_string()),
        ])
    }

    /// Controller owner reference pointing at this cluster
    ///
    /// None only when the object has no uid yet (never persisted).
    pub fn owner_reference(&self) -> Option<OwnerReference> {
        self.controller_owner_ref(&())
    }
}
