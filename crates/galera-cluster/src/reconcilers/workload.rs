//! Server StatefulSet.
//!
//! The replica count follows the bootstrap phase so nodes join one at a
//! time. Each bootstrap step changes the spec, either through the
//! new-cluster flag or the replica count, which bumps the StatefulSet
//! generation the state machine waits for before judging readiness.
//! The phase itself stays out of the pod template, so entering or leaving
//! recovery does not roll pods on its own.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, ObjectFieldSelector,
    PersistentVolumeClaim, PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource,
    PodSpec, PodTemplateSpec, Probe, TCPSocketAction, Volume, VolumeMount,
    VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use kube::ResourceExt;

use galera_common::crd::{components, ClusterPhase, MariaDBCluster};

use super::managed_meta;
use super::services::{server_ports, MYSQL_PORT};

const CONTAINER_NAME: &str = "mariadb";
const DATA_VOLUME: &str = "data";
const DATA_PATH: &str = "/var/lib/mysql";
const SNAPSHOT_VOLUME: &str = "snapshot";
const SNAPSHOT_PATH: &str = "/snapshot";

/// StatefulSet replica count for `phase`.
///
/// Zero until bootstrap starts, then one node per bootstrap step, then the
/// requested count.
pub fn replicas_for_phase(phase: ClusterPhase, requested: i32) -> i32 {
    match phase {
        ClusterPhase::New | ClusterPhase::PreFlight => 0,
        ClusterPhase::BootstrapFirst | ClusterPhase::BootstrapFirstRestart => 1,
        ClusterPhase::BootstrapSecond => requested.min(2),
        ClusterPhase::BootstrapThird => requested.min(3),
        ClusterPhase::Operational | ClusterPhase::Recovery => requested,
    }
}

fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn field_env(name: &str, path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: path.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// `gcomm://` address listing every peer through the headless service
fn cluster_address(cluster: &MariaDBCluster, peers: i32, new_cluster: bool) -> String {
    if new_cluster {
        return "gcomm://".to_string();
    }
    let server = cluster.server_name();
    let namespace = cluster.namespace().unwrap_or_default();
    let hosts: Vec<String> = (0..peers)
        .map(|i| format!("{server}-{i}.{server}.{namespace}.svc"))
        .collect();
    format!("gcomm://{}", hosts.join(","))
}

fn server_container(cluster: &MariaDBCluster) -> Container {
    let status = cluster.status_or_default();
    let new_cluster = status.phase == ClusterPhase::BootstrapFirst;

    let mut vars = vec![
        field_env("POD_NAME", "metadata.name"),
        field_env("POD_NAMESPACE", "metadata.namespace"),
        env("MARIADB_RANDOM_ROOT_PASSWORD", "1"),
        env("GALERA_CLUSTER_NAME", cluster.name_any()),
        env(
            "GALERA_CLUSTER_ADDRESS",
            cluster_address(cluster, cluster.spec.replicas, new_cluster),
        ),
        env("GALERA_NEW_CLUSTER", new_cluster.to_string()),
    ];
    if let Some(source) = status.bootstrap_source() {
        vars.push(env("GALERA_BOOTSTRAP_FROM", source));
    }

    let mut args = vec![
        "--wsrep-on=ON".to_string(),
        "--wsrep-provider=/usr/lib/galera/libgalera_smm.so".to_string(),
        "--wsrep-cluster-name=$(GALERA_CLUSTER_NAME)".to_string(),
        "--wsrep-cluster-address=$(GALERA_CLUSTER_ADDRESS)".to_string(),
        "--wsrep-node-name=$(POD_NAME)".to_string(),
        "--binlog-format=ROW".to_string(),
        "--default-storage-engine=InnoDB".to_string(),
        "--innodb-autoinc-lock-mode=2".to_string(),
    ];
    if new_cluster {
        args.push("--wsrep-new-cluster".to_string());
    }

    let mut mounts = vec![VolumeMount {
        name: DATA_VOLUME.to_string(),
        mount_path: DATA_PATH.to_string(),
        ..Default::default()
    }];
    if cluster.spec.snapshot.is_some() {
        mounts.push(VolumeMount {
            name: SNAPSHOT_VOLUME.to_string(),
            mount_path: SNAPSHOT_PATH.to_string(),
            ..Default::default()
        });
    }

    Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(cluster.spec.image().to_string()),
        args: Some(args),
        env: Some(vars),
        ports: Some(
            server_ports()
                .iter()
                .map(|(name, port)| ContainerPort {
                    name: Some(name.to_string()),
                    container_port: *port,
                    ..Default::default()
                })
                .collect(),
        ),
        readiness_probe: Some(Probe {
            tcp_socket: Some(TCPSocketAction {
                port: IntOrString::Int(MYSQL_PORT),
                ..Default::default()
            }),
            initial_delay_seconds: Some(10),
            period_seconds: Some(5),
            ..Default::default()
        }),
        volume_mounts: Some(mounts),
        ..Default::default()
    }
}

fn data_claim_template(cluster: &MariaDBCluster) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(DATA_VOLUME.to_string()),
            labels: Some(cluster.labels(components::SERVER)),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: cluster.spec.storage_class_name.clone(),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(cluster.spec.storage_size().to_string()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// StatefulSet running the database replicas
pub fn build_stateful_set(cluster: &MariaDBCluster) -> Option<StatefulSet> {
    let replicas = replicas_for_phase(cluster.phase(), cluster.spec.replicas);
    let name = cluster.server_name();

    let volumes = cluster.spec.snapshot.as_ref().map(|_| {
        vec![Volume {
            name: SNAPSHOT_VOLUME.to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: cluster.snapshot_pvc_name(),
                ..Default::default()
            }),
            ..Default::default()
        }]
    });

    Some(StatefulSet {
        metadata: managed_meta(cluster, name.clone(), components::SERVER),
        spec: Some(StatefulSetSpec {
            replicas: Some(replicas),
            service_name: name.clone().into(),
            selector: LabelSelector {
                match_labels: Some(cluster.server_selector()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(cluster.labels(components::SERVER)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(name),
                    containers: vec![server_container(cluster)],
                    volumes,
                    ..Default::default()
                }),
            },
            volume_claim_templates: Some(vec![data_claim_template(cluster)]),
            ..Default::default()
        }),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::cluster;
    use super::*;
    use galera_common::crd::MariaDBClusterStatus;

    fn in_phase(phase: ClusterPhase, replicas: i32) -> MariaDBCluster {
        let mut c = cluster(replicas);
        c.status = Some(MariaDBClusterStatus {
            phase,
            ..Default::default()
        });
        c
    }

    fn env_of(sts: &StatefulSet) -> BTreeMap<String, String> {
        let container = &sts.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0];
        container
            .env
            .iter()
            .flatten()
            .filter_map(|e| Some((e.name.clone(), e.value.clone()?)))
            .collect()
    }

    fn replicas_of(sts: &StatefulSet) -> i32 {
        sts.spec.as_ref().unwrap().replicas.unwrap()
    }

    #[test]
    fn replica_count_follows_bootstrap() {
        assert_eq!(replicas_for_phase(ClusterPhase::New, 5), 0);
        assert_eq!(replicas_for_phase(ClusterPhase::BootstrapFirst, 5), 1);
        assert_eq!(replicas_for_phase(ClusterPhase::BootstrapFirstRestart, 5), 1);
        assert_eq!(replicas_for_phase(ClusterPhase::BootstrapSecond, 5), 2);
        assert_eq!(replicas_for_phase(ClusterPhase::BootstrapThird, 5), 3);
        assert_eq!(replicas_for_phase(ClusterPhase::Operational, 5), 5);
        assert_eq!(replicas_for_phase(ClusterPhase::Recovery, 5), 5);
    }

    #[test]
    fn first_node_starts_a_new_cluster() {
        let sts = build_stateful_set(&in_phase(ClusterPhase::BootstrapFirst, 3)).unwrap();
        assert_eq!(replicas_of(&sts), 1);
        let env = env_of(&sts);
        assert_eq!(env["GALERA_NEW_CLUSTER"], "true");
        assert_eq!(env["GALERA_CLUSTER_ADDRESS"], "gcomm://");
        let args = sts.spec.unwrap().template.spec.unwrap().containers[0]
            .args
            .clone()
            .unwrap();
        assert!(args.contains(&"--wsrep-new-cluster".to_string()));
    }

    #[test]
    fn restart_drops_new_cluster_flag_and_changes_template() {
        let first = build_stateful_set(&in_phase(ClusterPhase::BootstrapFirst, 3)).unwrap();
        let restart = build_stateful_set(&in_phase(ClusterPhase::BootstrapFirstRestart, 3)).unwrap();

        let env = env_of(&restart);
        assert_eq!(env["GALERA_NEW_CLUSTER"], "false");
        assert_eq!(
            env["GALERA_CLUSTER_ADDRESS"],
            "gcomm://prod-server-0.prod-server.db.svc,prod-server-1.prod-server.db.svc,prod-server-2.prod-server.db.svc"
        );
        assert_ne!(
            first.spec.unwrap().template,
            restart.spec.unwrap().template
        );
    }

    #[test]
    fn bootstrap_source_is_exposed_during_recovery() {
        let mut c = in_phase(ClusterPhase::Recovery, 3);
        if let Some(status) = c.status.as_mut() {
            status.bootstrap_from = Some("prod-server-2".into());
        }
        let sts = build_stateful_set(&c).unwrap();
        assert_eq!(replicas_of(&sts), 3);
        assert_eq!(env_of(&sts)["GALERA_BOOTSTRAP_FROM"], "prod-server-2");
    }

    #[test]
    fn pods_run_as_server_account_with_data_claim() {
        let sts = build_stateful_set(&in_phase(ClusterPhase::Operational, 3)).unwrap();
        let spec = sts.spec.unwrap();
        assert_eq!(
            serde_json::to_value(&spec).unwrap()["serviceName"],
            serde_json::json!("prod-server")
        );
        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.service_account_name.as_deref(), Some("prod-server"));
        assert!(pod.volumes.is_none());
        let claims = spec.volume_claim_templates.unwrap();
        assert_eq!(
            claims[0].spec.as_ref().unwrap().resources.as_ref().unwrap().requests.as_ref().unwrap()["storage"],
            Quantity("10Gi".into())
        );
    }

    #[test]
    fn entering_recovery_leaves_the_pod_template_alone() {
        let operational = build_stateful_set(&in_phase(ClusterPhase::Operational, 3)).unwrap();
        let recovery = build_stateful_set(&in_phase(ClusterPhase::Recovery, 3)).unwrap();
        assert_eq!(operational.spec, recovery.spec);
        assert!(!env_of(&recovery).contains_key("GALERA_PHASE"));
    }

    #[test]
    fn every_bootstrap_step_changes_the_spec() {
        let phases = [
            ClusterPhase::BootstrapFirst,
            ClusterPhase::BootstrapFirstRestart,
            ClusterPhase::BootstrapSecond,
            ClusterPhase::BootstrapThird,
        ];
        for pair in phases.windows(2) {
            let before = build_stateful_set(&in_phase(pair[0], 3)).unwrap();
            let after = build_stateful_set(&in_phase(pair[1], 3)).unwrap();
            assert_ne!(before.spec, after.spec, "{:?} -> {:?}", pair[0], pair[1]);
        }
    }
}
