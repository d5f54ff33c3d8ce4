//! Read-only views of the cluster resource and its dependents.
//!
//! The controller never reads the API server for the objects it watches;
//! it reads reflector stores that a background watcher keeps up to date.
//! Those stores are eventually consistent, so every decision made from them
//! is re-checked on a later pass rather than trusted forever.
//!
//! Pods are the exception: the designated bootstrap replica is looked up
//! directly because the controller does not watch pods.

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use kube::runtime::reflector::{ObjectRef, Store};
use kube::{Api, Client};
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use galera_common::crd::MariaDBCluster;
use galera_common::Error;

/// Cached lookups for the objects the controller watches.
#[cfg_attr(test, automock)]
pub trait ClusterCache: Send + Sync {
    /// Get a MariaDBCluster by namespace and name
    fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<MariaDBCluster>, Error>;

    /// Get a StatefulSet by namespace and name
    fn get_stateful_set(&self, namespace: &str, name: &str)
        -> Result<Option<StatefulSet>, Error>;

    /// Get a ConfigMap by namespace and name
    fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>, Error>;
}

/// Live lookups for pods.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PodClient: Send + Sync {
    /// Get a Pod by namespace and name; `None` if it does not exist
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, Error>;
}

/// [`ClusterCache`] backed by reflector stores.
#[derive(Clone)]
pub struct ReflectorCache {
    clusters: Store<MariaDBCluster>,
    stateful_sets: Store<StatefulSet>,
    config_maps: Store<ConfigMap>,
}

impl ReflectorCache {
    /// Wrap the three stores fed by the operator's watchers
    pub fn new(
        clusters: Store<MariaDBCluster>,
        stateful_sets: Store<StatefulSet>,
        config_maps: Store<ConfigMap>,
    ) -> Self {
        Self {
            clusters,
            stateful_sets,
            config_maps,
        }
    }

    /// Wait until every store has completed its initial list.
    ///
    /// Reconciling against a partially filled cache would make existing
    /// clusters look deleted, so callers treat a failure here as fatal.
    pub async fn wait_for_sync(&self, timeout: Duration) -> Result<(), Error> {
        debug!(timeout_secs = timeout.as_secs(), "waiting for caches to sync");
        let synced = async {
            self.clusters.wait_until_ready().await?;
            self.stateful_sets.wait_until_ready().await?;
            self.config_maps.wait_until_ready().await
        };
        match tokio::time::timeout(timeout, synced).await {
            Ok(Ok(())) => {
                info!(
                    clusters = self.clusters.state().len(),
                    stateful_sets = self.stateful_sets.state().len(),
                    "caches synced"
                );
                Ok(())
            }
            Ok(Err(e)) => Err(Error::internal_with_context(
                "cache",
                format!("watcher stopped before the cache synced: {e}"),
            )),
            Err(_) => Err(Error::internal_with_context(
                "cache",
                format!("caches not synced after {}s", timeout.as_secs()),
            )),
        }
    }
}

fn lookup<K>(store: &Store<K>, namespace: &str, name: &str) -> Option<K>
where
    K: kube::Resource<DynamicType = ()> + Clone + 'static,
{
    let key = ObjectRef::new(name).within(namespace);
    store.get(&key).map(|obj| (*obj).clone())
}

impl ClusterCache for ReflectorCache {
    fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<MariaDBCluster>, Error> {
        Ok(lookup(&self.clusters, namespace, name))
    }

    fn get_stateful_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<StatefulSet>, Error> {
        Ok(lookup(&self.stateful_sets, namespace, name))
    }

    fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>, Error> {
        Ok(lookup(&self.config_maps, namespace, name))
    }
}

/// [`PodClient`] that reads straight from the API server.
pub struct KubePodClient {
    client: Client,
}

impl KubePodClient {
    /// Create a new KubePodClient wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PodClient for KubePodClient {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }
}
