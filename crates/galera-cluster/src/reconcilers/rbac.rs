//! Identity of the server pods.
//!
//! Replicas write their own recovery reports into the cluster status, so
//! they need read access to their cluster and write access to its status.

use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use kube::ResourceExt;

use galera_common::crd::{components, MariaDBCluster};

use super::managed_meta;

const GROUP: &str = "galera.dev";

fn rule(api_group: &str, resources: &[&str], verbs: &[&str]) -> PolicyRule {
    PolicyRule {
        api_groups: Some(vec![api_group.to_string()]),
        resources: Some(resources.iter().map(|r| r.to_string()).collect()),
        verbs: verbs.iter().map(|v| v.to_string()).collect(),
        ..Default::default()
    }
}

/// ServiceAccount the server pods run as
pub fn build_service_account(cluster: &MariaDBCluster) -> Option<ServiceAccount> {
    Some(ServiceAccount {
        metadata: managed_meta(cluster, cluster.server_name(), components::SERVER),
        ..Default::default()
    })
}

/// Role granting the server pods access to their cluster
pub fn build_role(cluster: &MariaDBCluster) -> Option<Role> {
    Some(Role {
        metadata: managed_meta(cluster, cluster.server_name(), components::SERVER),
        rules: Some(vec![
            rule(GROUP, &["mariadbclusters"], &["get", "list", "watch"]),
            rule(GROUP, &["mariadbclusters/status"], &["get", "patch", "update"]),
            rule("", &["pods"], &["get", "list", "watch"]),
        ]),
    })
}

/// Binds the server Role to the server ServiceAccount
pub fn build_role_binding(cluster: &MariaDBCluster) -> Option<RoleBinding> {
    let name = cluster.server_name();
    Some(RoleBinding {
        metadata: managed_meta(cluster, name.clone(), components::SERVER),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: name.clone(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name,
            namespace: cluster.namespace(),
            ..Default::default()
        }]),
    })
}
