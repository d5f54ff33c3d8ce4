//! Network endpoints for the server pods.
//!
//! The headless server service gives every replica a stable DNS name for
//! group communication and must publish pods before they are ready, or a
//! recovering replica could never reach its peers. The proxy service is the
//! single client entry point and only routes to ready replicas.

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use galera_common::crd::{components, MariaDBCluster};

use super::managed_meta;

/// MariaDB client protocol
pub const MYSQL_PORT: i32 = 3306;
/// Galera group communication
pub const GALERA_PORT: i32 = 4567;
/// Incremental state transfer
pub const IST_PORT: i32 = 4568;
/// Full state snapshot transfer
pub const SST_PORT: i32 = 4444;

fn port(name: &str, number: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port: number,
        target_port: Some(IntOrString::Int(number)),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

/// Named container ports shared with the StatefulSet
pub(crate) fn server_ports() -> [(&'static str, i32); 4] {
    [
        ("mysql", MYSQL_PORT),
        ("galera", GALERA_PORT),
        ("ist", IST_PORT),
        ("sst", SST_PORT),
    ]
}

/// Headless service backing the StatefulSet's pod DNS names
pub fn build_server_service(cluster: &MariaDBCluster) -> Option<Service> {
    Some(Service {
        metadata: managed_meta(cluster, cluster.server_name(), components::SERVER),
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            publish_not_ready_addresses: Some(true),
            selector: Some(cluster.server_selector()),
            ports: Some(server_ports().iter().map(|(n, p)| port(n, *p)).collect()),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Client-facing service routing to ready replicas
pub fn build_proxy_service(cluster: &MariaDBCluster) -> Option<Service> {
    Some(Service {
        metadata: managed_meta(cluster, cluster.proxy_name(), components::PROXY),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(cluster.server_selector()),
            ports: Some(vec![port("mysql", MYSQL_PORT)]),
            ..Default::default()
        }),
        ..Default::default()
    })
}
