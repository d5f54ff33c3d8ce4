//! Name collisions with resources the controller does not own.
//!
//! Before the first node is provisioned, look for a StatefulSet or ConfigMap
//! that already carries the cluster's name. Objects this cluster owns are
//! not conflicts.

use galera_common::crd::MariaDBCluster;
use galera_common::Result;
use kube::{Resource, ResourceExt};

use crate::cache::ClusterCache;

/// Resource kinds found under the cluster's name
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConflictReport {
    /// Conflicting kinds, in check order
    pub kinds: Vec<&'static str>,
}

impl ConflictReport {
    /// No conflicting resource was found
    pub fn is_clear(&self) -> bool {
        self.kinds.is_empty()
    }
}

impl std::fmt::Display for ConflictReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kinds.join(", "))
    }
}

fn owned_by<K: Resource>(obj: &K, cluster: &MariaDBCluster) -> bool {
    let Some(uid) = cluster.uid() else {
        return false;
    };
    obj.owner_references().iter().any(|o| o.uid == uid)
}

/// Check every kind that would collide with the cluster's name.
pub fn check_conflicts(cache: &dyn ClusterCache, cluster: &MariaDBCluster) -> Result<ConflictReport> {
    let namespace = cluster.namespace().unwrap_or_default();
    let name = cluster.name_any();
    let mut report = ConflictReport::default();

    if let Some(sts) = cache.get_stateful_set(&namespace, &name)? {
        if !owned_by(&sts, cluster) {
            report.kinds.push("StatefulSet");
        }
    }
    if let Some(cm) = cache.get_config_map(&namespace, &name)? {
        if !owned_by(&cm, cluster) {
            report.kinds.push("ConfigMap");
        }
    }

    Ok(report)
}
