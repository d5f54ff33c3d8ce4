//! Snapshot volume claim.
//!
//! Only created when the cluster spec carries a `snapshot` section. The
//! server pods mount the claim under `/snapshot`.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use galera_common::crd::{components, MariaDBCluster};

use super::managed_meta;

/// Volume claim that holds database snapshots, when the cluster asks for one
pub fn build_snapshot_claim(cluster: &MariaDBCluster) -> Option<PersistentVolumeClaim> {
    let snapshot = cluster.spec.snapshot.as_ref()?;
    Some(PersistentVolumeClaim {
        metadata: managed_meta(cluster, cluster.snapshot_pvc_name(), components::SNAPSHOT),
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: snapshot.storage_class_name.clone(),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(snapshot.size.clone()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    })
}
