//! Dependent resources of a MariaDBCluster.
//!
//! Each managed object is described by a pure builder that turns the cluster
//! into the desired object, and applied with server-side apply under the
//! operator's field manager. The set runs after every state-machine pass in
//! a fixed order; applying an already converged object is a no-op on the
//! server.

mod rbac;
mod services;
mod snapshot;
mod workload;

pub use rbac::{build_role, build_role_binding, build_service_account};
pub use services::{build_proxy_service, build_server_service};
pub use snapshot::build_snapshot_claim;
pub use workload::{build_stateful_set, replicas_for_phase};

use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{ObjectMeta, Patch, PatchParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

use galera_common::crd::MariaDBCluster;
use galera_common::{Result, FIELD_MANAGER};

/// Brings one managed resource in line with the cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DependentReconciler: Send + Sync {
    /// Kind of the managed resource, for logs
    fn kind(&self) -> &'static str;

    /// Idempotently ensure the resource matches `cluster`
    async fn reconcile(&self, cluster: &MariaDBCluster) -> Result<()>;
}

/// Builds the desired object for a cluster; `None` when the cluster
/// does not want one.
pub type Builder<K> = fn(&MariaDBCluster) -> Option<K>;

/// Server-side applies whatever its builder produces.
pub struct ApplyReconciler<K> {
    client: Client,
    kind: &'static str,
    build: Builder<K>,
    _kind: PhantomData<fn() -> K>,
}

impl<K> ApplyReconciler<K> {
    /// Reconciler for `kind` built by `build`
    pub fn new(client: Client, kind: &'static str, build: Builder<K>) -> Self {
        Self {
            client,
            kind,
            build,
            _kind: PhantomData,
        }
    }
}

#[async_trait]
impl<K> DependentReconciler for ApplyReconciler<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
{
    fn kind(&self) -> &'static str {
        self.kind
    }

    async fn reconcile(&self, cluster: &MariaDBCluster) -> Result<()> {
        let Some(desired) = (self.build)(cluster) else {
            return Ok(());
        };
        let namespace = cluster.namespace().unwrap_or_default();
        let name = desired.name_any();
        let api: Api<K> = Api::namespaced(self.client.clone(), &namespace);
        api.patch(
            &name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&desired),
        )
        .await?;
        debug!(kind = self.kind, namespace = %namespace, name = %name, "applied");
        Ok(())
    }
}

/// The dependent reconcilers, in the order they run
#[derive(Clone)]
pub struct Reconcilers {
    ordered: Vec<Arc<dyn DependentReconciler>>,
}

impl Reconcilers {
    /// Run `ordered` in the given order
    pub fn new(ordered: Vec<Arc<dyn DependentReconciler>>) -> Self {
        Self { ordered }
    }

    /// The full set: snapshot claim, service account, role, role binding,
    /// server StatefulSet, server service, proxy service.
    pub fn standard(client: Client) -> Self {
        Self::new(vec![
            Arc::new(ApplyReconciler::<PersistentVolumeClaim>::new(
                client.clone(),
                "PersistentVolumeClaim",
                build_snapshot_claim,
            )),
            Arc::new(ApplyReconciler::<ServiceAccount>::new(
                client.clone(),
                "ServiceAccount",
                build_service_account,
            )),
            Arc::new(ApplyReconciler::<Role>::new(client.clone(), "Role", build_role)),
            Arc::new(ApplyReconciler::<RoleBinding>::new(
                client.clone(),
                "RoleBinding",
                build_role_binding,
            )),
            Arc::new(ApplyReconciler::<StatefulSet>::new(
                client.clone(),
                "StatefulSet",
                build_stateful_set,
            )),
            Arc::new(ApplyReconciler::<Service>::new(
                client.clone(),
                "Service",
                build_server_service,
            )),
            Arc::new(ApplyReconciler::<Service>::new(
                client,
                "Service",
                build_proxy_service,
            )),
        ])
    }

    /// Kinds in run order
    pub fn kinds(&self) -> Vec<&'static str> {
        self.ordered.iter().map(|r| r.kind()).collect()
    }

    /// Run every reconciler; a failure does not stop the ones after it.
    ///
    /// Returns the first error once all have run.
    pub async fn reconcile_all(&self, cluster: &MariaDBCluster) -> Result<()> {
        let mut first_error = None;
        for reconciler in &self.ordered {
            if let Err(e) = reconciler.reconcile(cluster).await {
                warn!(
                    cluster = %cluster.queue_key(),
                    kind = reconciler.kind(),
                    error = %e,
                    "dependent reconcile failed"
                );
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Metadata shared by every managed object of `component`
pub(crate) fn managed_meta(cluster: &MariaDBCluster, name: String, component: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: cluster.namespace(),
        labels: Some(cluster.labels(component)),
        owner_references: cluster.owner_reference().map(|o| vec![o]),
        ..Default::default()
    }
}
