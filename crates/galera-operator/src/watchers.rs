//! Reflector watchers feeding the controller cache and work queue
//!
//! One watcher per kind keeps a reflector store current and turns every
//! applied or deleted object into a `namespace/name` key of the owning
//! cluster. Dependents are mapped through their `MariaDBCluster` owner
//! reference; unowned objects that share a cluster's name are mapped to
//! that cluster so the conflict check sees them come and go.

use std::fmt::Debug;
use std::hash::Hash;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::NamespaceResourceScope;
use kube::runtime::reflector::{self, ObjectRef, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use galera_cluster::{ReflectorCache, WorkQueue};
use galera_common::crd::MariaDBCluster;
use galera_common::join_key;

/// Watch timeout in seconds, kept below the client read timeout (30s)
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Running watchers and the cache they fill
pub struct Watchers {
    pub cache: ReflectorCache,
    pub tasks: Vec<JoinHandle<()>>,
}

/// Start the cluster, StatefulSet and ConfigMap watchers.
///
/// `namespace` restricts every watch to one namespace.
pub fn start(client: &Client, namespace: Option<&str>, queue: &WorkQueue<String>) -> Watchers {
    let (clusters, cluster_writer) = reflector::store::<MariaDBCluster>();
    let (stateful_sets, sts_writer) = reflector::store::<StatefulSet>();
    let (config_maps, cm_writer) = reflector::store::<ConfigMap>();

    let tasks = vec![
        spawn_watcher(
            api(client, namespace),
            cluster_writer,
            queue.clone(),
            |cluster: &MariaDBCluster| Some(cluster.queue_key()),
        ),
        spawn_watcher(api(client, namespace), sts_writer, queue.clone(), {
            let clusters = clusters.clone();
            move |sts: &StatefulSet| dependent_key(sts, |ns, name| has_cluster(&clusters, ns, name))
        }),
        spawn_watcher(api(client, namespace), cm_writer, queue.clone(), {
            let clusters = clusters.clone();
            move |cm: &ConfigMap| dependent_key(cm, |ns, name| has_cluster(&clusters, ns, name))
        }),
    ];

    Watchers {
        cache: ReflectorCache::new(clusters, stateful_sets, config_maps),
        tasks,
    }
}

fn api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

fn has_cluster(clusters: &Store<MariaDBCluster>, namespace: &str, name: &str) -> bool {
    clusters
        .get(&ObjectRef::new(name).within(namespace))
        .is_some()
}

fn spawn_watcher<K, F>(
    api: Api<K>,
    writer: reflector::store::Writer<K>,
    queue: WorkQueue<String>,
    key_for: F,
) -> JoinHandle<()>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone + Send + Sync,
    F: Fn(&K) -> Option<String> + Send + 'static,
{
    let kind = K::kind(&K::DynamicType::default()).to_string();
    tokio::spawn(async move {
        let stream = watcher(api, watcher::Config::default().timeout(WATCH_TIMEOUT_SECS))
            .default_backoff()
            .reflect(writer);
        let mut stream = std::pin::pin!(stream);

        while let Some(event) = stream.next().await {
            match event {
                Ok(event) => enqueue_event(&kind, &event, &key_for, &queue),
                Err(e) => warn!(%kind, error = %e, "watch error"),
            }
        }
        warn!(%kind, "watch stream ended");
    })
}

/// Queue the cluster key an event maps to, subject to per-key backoff
fn enqueue_event<K, F>(
    kind: &str,
    event: &watcher::Event<K>,
    key_for: &F,
    queue: &WorkQueue<String>,
) where
    K: Resource,
    F: Fn(&K) -> Option<String>,
{
    let obj = match event {
        watcher::Event::Apply(obj)
        | watcher::Event::InitApply(obj)
        | watcher::Event::Delete(obj) => obj,
        watcher::Event::Init | watcher::Event::InitDone => return,
    };
    if let Some(key) = key_for(obj) {
        debug!(%kind, object = %obj.name_any(), %key, "enqueue");
        queue.enqueue(key);
    }
}

/// Key of the `MariaDBCluster` controlling `obj`, if any
pub fn owner_key<K: Resource>(obj: &K) -> Option<String> {
    let namespace = obj.namespace()?;
    let kind = MariaDBCluster::kind(&());
    let api_version = MariaDBCluster::api_version(&());
    obj.owner_references()
        .iter()
        .find(|owner| owner.kind == kind && owner.api_version == api_version)
        .map(|owner| join_key(&namespace, &owner.name))
}

/// Key for a dependent object: its owner, else a same-named cluster
pub fn dependent_key<K: Resource>(
    obj: &K,
    cluster_exists: impl Fn(&str, &str) -> bool,
) -> Option<String> {
    if let Some(key) = owner_key(obj) {
        return Some(key);
    }
    let namespace = obj.namespace()?;
    let name = obj.name_any();
    cluster_exists(&namespace, &name).then(|| join_key(&namespace, &name))
}
