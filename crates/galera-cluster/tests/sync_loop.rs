//! Drives the sync loop through a full cluster lifecycle against an
//! in-memory API server.
//!
//! The fake applies the status patches the controller produces with
//! `json_patch`, including the resourceVersion guard, so these tests also
//! check that the generated operations are valid against the stored object.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec, StatefulSetStatus};
use k8s_openapi::api::core::v1::{ConfigMap, ContainerStatus, Pod, PodStatus};
use kube::api::ObjectMeta;
use kube::ResourceExt;

use galera_cluster::patch::StatusWriter;
use galera_cluster::reconcilers::{build_stateful_set, DependentReconciler, Reconcilers};
use galera_cluster::{
    ClusterCache, Context, Controller, PodClient, RateLimiterConfig, SyncOutcome, WorkQueue,
};
use galera_common::crd::{
    ClusterPhase, ClusterStage, MariaDBCluster, MariaDBClusterSpec, MariaDBClusterStatus,
    PodCondition,
};
use galera_common::events::NoopEventPublisher;
use galera_common::{Error, Result};

const KEY: &str = "db/prod";
const SERVER_KEY: &str = "db/prod-server";

#[derive(Default)]
struct World {
    clusters: HashMap<String, MariaDBCluster>,
    /// What the informer cache shows
    stateful_sets: HashMap<String, StatefulSet>,
    /// What was last applied to the API server
    applied: HashMap<String, StatefulSet>,
    pods: HashMap<String, Pod>,
    version: u64,
}

/// One shared store standing in for the API server and the caches
#[derive(Clone, Default)]
struct FakeApi {
    world: Arc<Mutex<World>>,
}

impl FakeApi {
    fn with_cluster(replicas: i32) -> Self {
        let api = Self::default();
        let mut cluster = MariaDBCluster::new(
            "prod",
            MariaDBClusterSpec {
                replicas,
                image: None,
                storage_size: None,
                storage_class_name: None,
                snapshot: None,
            },
        );
        cluster.metadata.namespace = Some("db".into());
        cluster.metadata.uid = Some("uid-prod".into());
        cluster.metadata.resource_version = Some("1".into());
        api.world.lock().unwrap().clusters.insert(KEY.into(), cluster);
        api
    }

    fn status(&self) -> MariaDBClusterStatus {
        self.world.lock().unwrap().clusters[KEY]
            .status
            .clone()
            .unwrap_or_default()
    }

    /// What a replica agent does when it reports its position
    fn report(&self, reports: Vec<PodCondition>) {
        let mut world = self.world.lock().unwrap();
        world.version += 1;
        let version = world.version + 1;
        let cluster = world.clusters.get_mut(KEY).unwrap();
        cluster
            .status
            .get_or_insert_with(Default::default)
            .stateful_set_pod_conditions = reports;
        cluster.metadata.resource_version = Some(version.to_string());
    }

    fn set_workload(&self, desired: i32, ready: i32, generation: i64) {
        let sts = StatefulSet {
            metadata: ObjectMeta {
                name: Some("prod-server".into()),
                namespace: Some("db".into()),
                ..Default::default()
            },
            spec: Some(StatefulSetSpec {
                replicas: Some(desired),
                ..Default::default()
            }),
            status: Some(StatefulSetStatus {
                replicas: desired,
                current_replicas: Some(desired),
                ready_replicas: Some(ready),
                current_revision: Some("rev".into()),
                update_revision: Some("rev".into()),
                observed_generation: Some(generation),
                ..Default::default()
            }),
        };
        self.world
            .lock()
            .unwrap()
            .stateful_sets
            .insert("db/prod-server".into(), sts);
    }

    fn applied_generation(&self) -> Option<i64> {
        self.world.lock().unwrap().applied[SERVER_KEY].metadata.generation
    }

    /// The cache catches up with the last apply; pods have not moved yet.
    fn sync_cache(&self) {
        let mut world = self.world.lock().unwrap();
        let mut latest = world.applied[SERVER_KEY].clone();
        latest.status = world
            .stateful_sets
            .get(SERVER_KEY)
            .and_then(|cached| cached.status.clone());
        world.stateful_sets.insert(SERVER_KEY.into(), latest);
    }

    /// The StatefulSet controller acts on the last apply and every pod
    /// comes up ready.
    fn roll_out(&self) {
        self.sync_cache();
        let mut world = self.world.lock().unwrap();
        let sts = world.stateful_sets.get_mut(SERVER_KEY).unwrap();
        let desired = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        let generation = sts.metadata.generation;
        let revision = format!("rev-{}", generation.unwrap_or_default());
        sts.status = Some(StatefulSetStatus {
            replicas: desired,
            current_replicas: Some(desired),
            ready_replicas: Some(desired),
            current_revision: Some(revision.clone()),
            update_revision: Some(revision),
            observed_generation: generation,
            ..Default::default()
        });
    }

    fn lose_all_pods(&self) {
        let mut world = self.world.lock().unwrap();
        let sts = world.stateful_sets.get_mut(SERVER_KEY).unwrap();
        if let Some(status) = sts.status.as_mut() {
            status.ready_replicas = Some(0);
        }
    }

    fn set_pod(&self, name: &str, ready: bool) {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some("db".into()),
                ..Default::default()
            },
            status: Some(PodStatus {
                container_statuses: Some(vec![ContainerStatus {
                    name: "mariadb".into(),
                    ready,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };
        self.world
            .lock()
            .unwrap()
            .pods
            .insert(format!("db/{name}"), pod);
    }
}

impl ClusterCache for FakeApi {
    fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<MariaDBCluster>> {
        Ok(self.world.lock().unwrap().clusters.get(&format!("{namespace}/{name}")).cloned())
    }

    fn get_stateful_set(&self, namespace: &str, name: &str) -> Result<Option<StatefulSet>> {
        Ok(self
            .world
            .lock()
            .unwrap()
            .stateful_sets
            .get(&format!("{namespace}/{name}"))
            .cloned())
    }

    fn get_config_map(&self, _namespace: &str, _name: &str) -> Result<Option<ConfigMap>> {
        Ok(None)
    }
}

#[async_trait]
impl PodClient for FakeApi {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        Ok(self.world.lock().unwrap().pods.get(&format!("{namespace}/{name}")).cloned())
    }
}

#[async_trait]
impl StatusWriter for FakeApi {
    async fn get_latest(&self, namespace: &str, name: &str) -> Result<Option<MariaDBCluster>> {
        self.get_cluster(namespace, name)
    }

    async fn apply_status_patch(
        &self,
        namespace: &str,
        name: &str,
        patch: json_patch::Patch,
    ) -> Result<()> {
        let key = format!("{namespace}/{name}");
        let mut world = self.world.lock().unwrap();
        world.version += 1;
        let version = world.version + 1;
        let stored = world
            .clusters
            .get_mut(&key)
            .ok_or_else(|| Error::not_found("MariaDBCluster", key.clone()))?;

        let mut doc = serde_json::to_value(&*stored)?;
        json_patch::patch(&mut doc, &patch.0)
            .map_err(|e| Error::conflict(key.clone(), e.to_string()))?;
        let mut updated: MariaDBCluster = serde_json::from_value(doc)?;
        updated.metadata.resource_version = Some(version.to_string());
        *stored = updated;
        Ok(())
    }
}

#[derive(Default)]
struct CountingReconciler {
    calls: AtomicUsize,
}

#[async_trait]
impl DependentReconciler for CountingReconciler {
    fn kind(&self) -> &'static str {
        "StatefulSet"
    }

    async fn reconcile(&self, _cluster: &MariaDBCluster) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Applies the generated server StatefulSet the way the API server
/// stores it: the generation moves only when the spec changes.
struct StatefulSetApplier {
    api: FakeApi,
}

#[async_trait]
impl DependentReconciler for StatefulSetApplier {
    fn kind(&self) -> &'static str {
        "StatefulSet"
    }

    async fn reconcile(&self, cluster: &MariaDBCluster) -> Result<()> {
        let Some(mut desired) = build_stateful_set(cluster) else {
            return Ok(());
        };
        let key = format!(
            "{}/{}",
            cluster.namespace().unwrap_or_default(),
            desired.name_any()
        );
        let mut world = self.api.world.lock().unwrap();
        match world.applied.get_mut(&key) {
            Some(stored) if stored.spec == desired.spec => {}
            Some(stored) => {
                stored.spec = desired.spec;
                stored.metadata.generation = Some(stored.metadata.generation.unwrap_or(0) + 1);
            }
            None => {
                desired.metadata.generation = Some(1);
                world.applied.insert(key, desired);
            }
        }
        Ok(())
    }
}

fn controller(api: &FakeApi, reconciler: Arc<CountingReconciler>) -> Arc<Controller> {
    controller_with(api, reconciler)
}

fn controller_with(api: &FakeApi, reconciler: Arc<dyn DependentReconciler>) -> Arc<Controller> {
    let ctx = Context::from_parts(
        Arc::new(api.clone()),
        Arc::new(api.clone()),
        Arc::new(api.clone()),
        Reconcilers::new(vec![reconciler]),
        Arc::new(NoopEventPublisher),
    );
    let queue = WorkQueue::new(
        "clusters",
        RateLimiterConfig::new(Duration::from_millis(1), Duration::from_millis(50)),
    );
    Arc::new(Controller::new(queue, Arc::new(ctx)))
}

async fn pass(ctrl: &Controller) -> SyncOutcome {
    ctrl.sync_handler(KEY).await.unwrap()
}

#[tokio::test]
async fn cluster_bootstraps_recovers_and_resyncs() {
    let api = FakeApi::with_cluster(3);
    let reconciler = Arc::new(CountingReconciler::default());
    let ctrl = controller(&api, Arc::clone(&reconciler));

    pass(&ctrl).await;
    assert_eq!(api.status().phase, ClusterPhase::PreFlight);
    pass(&ctrl).await;
    assert_eq!(api.status().phase, ClusterPhase::BootstrapFirst);

    // No workload yet: nothing moves
    assert_eq!(
        pass(&ctrl).await,
        SyncOutcome::Synced {
            phase: ClusterPhase::BootstrapFirst,
            changed: false
        }
    );

    api.set_workload(1, 1, 1);
    pass(&ctrl).await;
    assert_eq!(api.status().phase, ClusterPhase::BootstrapFirstRestart);
    assert_eq!(api.status().stateful_set_observed_generation, 1);

    // Restart not picked up yet
    pass(&ctrl).await;
    assert_eq!(api.status().phase, ClusterPhase::BootstrapFirstRestart);

    api.set_workload(1, 1, 2);
    pass(&ctrl).await;
    assert_eq!(api.status().phase, ClusterPhase::BootstrapSecond);

    api.set_workload(2, 2, 3);
    pass(&ctrl).await;
    assert_eq!(api.status().phase, ClusterPhase::BootstrapThird);

    api.set_workload(3, 3, 4);
    pass(&ctrl).await;
    assert_eq!(api.status().phase, ClusterPhase::Operational);
    assert_eq!(api.status().stateful_set_observed_generation, 4);

    pass(&ctrl).await;
    assert_eq!(api.status().stage, ClusterStage::Synced);

    // Every replica lost
    api.set_workload(3, 0, 4);
    pass(&ctrl).await;
    let status = api.status();
    assert_eq!(status.phase, ClusterPhase::Recovery);
    assert_eq!(status.stage, ClusterStage::None);

    // Partial reports: keep waiting
    api.report(vec![
        PodCondition::new("prod-server-0", 5),
        PodCondition::new("prod-server-1", 9),
    ]);
    pass(&ctrl).await;
    assert_eq!(api.status().bootstrap_from, None);

    api.report(vec![
        PodCondition::new("prod-server-0", 5),
        PodCondition::new("prod-server-1", 9),
        PodCondition::new("prod-server-2", 9),
    ]);
    pass(&ctrl).await;
    assert_eq!(api.status().bootstrap_from.as_deref(), Some("prod-server-1"));

    // Designated pod not ready yet
    api.set_pod("prod-server-1", false);
    pass(&ctrl).await;
    assert_eq!(api.status().stage, ClusterStage::None);

    api.set_pod("prod-server-1", true);
    pass(&ctrl).await;
    let status = api.status();
    assert_eq!(status.stage, ClusterStage::PrimaryRecovered);
    assert_eq!(status.bootstrap_from, None);

    api.set_workload(3, 3, 5);
    pass(&ctrl).await;
    let status = api.status();
    assert_eq!(status.phase, ClusterPhase::Operational);
    assert_eq!(status.stage, ClusterStage::Degraded);
    assert!(status.stateful_set_pod_conditions.is_empty());

    pass(&ctrl).await;
    assert_eq!(api.status().stage, ClusterStage::Synced);

    // Dependents are reconciled on every pass
    assert_eq!(reconciler.calls.load(Ordering::SeqCst), 16);
}

#[tokio::test]
async fn bootstrap_follows_the_generated_statefulset() {
    let api = FakeApi::with_cluster(3);
    let ctrl = controller_with(&api, Arc::new(StatefulSetApplier { api: api.clone() }));

    pass(&ctrl).await;
    assert_eq!(api.status().phase, ClusterPhase::PreFlight);
    // Zero replicas before bootstrap, and every counter agrees
    api.roll_out();

    pass(&ctrl).await;
    assert_eq!(api.status().phase, ClusterPhase::BootstrapFirst);
    assert_eq!(api.applied_generation(), Some(2));

    // Cache still shows the settled zero-replica set
    pass(&ctrl).await;
    assert_eq!(api.status().phase, ClusterPhase::BootstrapFirst);

    // Spec visible, first pod not up yet
    api.sync_cache();
    pass(&ctrl).await;
    assert_eq!(api.status().phase, ClusterPhase::BootstrapFirst);

    api.roll_out();
    pass(&ctrl).await;
    assert_eq!(api.status().phase, ClusterPhase::BootstrapFirstRestart);
    assert_eq!(api.status().stateful_set_observed_generation, 2);

    for (expected, generation) in [
        (ClusterPhase::BootstrapSecond, 3),
        (ClusterPhase::BootstrapThird, 4),
        (ClusterPhase::Operational, 5),
    ] {
        let before = api.status().phase;
        // The previous rollout is still what the cache shows
        pass(&ctrl).await;
        assert_eq!(api.status().phase, before);

        api.roll_out();
        pass(&ctrl).await;
        assert_eq!(api.status().phase, expected);
        assert_eq!(api.status().stateful_set_observed_generation, generation);
    }

    pass(&ctrl).await;
    assert_eq!(api.status().stage, ClusterStage::Synced);

    // Losing every pod moves to recovery without touching the pod template
    api.lose_all_pods();
    pass(&ctrl).await;
    assert_eq!(api.status().phase, ClusterPhase::Recovery);
    assert_eq!(api.applied_generation(), Some(5));
}

#[tokio::test]
async fn restarted_recovery_reselects_from_kept_reports() {
    let api = FakeApi::with_cluster(3);
    let ctrl = controller(&api, Arc::new(CountingReconciler::default()));
    {
        let mut world = api.world.lock().unwrap();
        let cluster = world.clusters.get_mut(KEY).unwrap();
        cluster.status = Some(MariaDBClusterStatus {
            phase: ClusterPhase::Recovery,
            stage: ClusterStage::PrimaryRecovered,
            ..Default::default()
        });
    }
    api.report(vec![
        PodCondition::new("prod-server-0", 5),
        PodCondition::new("prod-server-1", 9),
        PodCondition::new("prod-server-2", 7),
    ]);

    // The recovered primary went down again before the others rejoined
    api.set_workload(3, 0, 6);
    assert_eq!(
        pass(&ctrl).await,
        SyncOutcome::Synced {
            phase: ClusterPhase::Recovery,
            changed: true
        }
    );
    let status = api.status();
    assert_eq!(status.stage, ClusterStage::None);
    assert_eq!(status.bootstrap_from, None);
    assert_eq!(status.stateful_set_pod_conditions.len(), 3);

    pass(&ctrl).await;
    let status = api.status();
    assert_eq!(status.phase, ClusterPhase::Recovery);
    assert_eq!(status.bootstrap_from.as_deref(), Some("prod-server-1"));

    api.set_pod("prod-server-1", true);
    pass(&ctrl).await;
    assert_eq!(api.status().stage, ClusterStage::PrimaryRecovered);
}

#[tokio::test]
async fn invalid_report_blocks_recovery_until_corrected() {
    let api = FakeApi::with_cluster(3);
    let ctrl = controller(&api, Arc::new(CountingReconciler::default()));
    {
        let mut world = api.world.lock().unwrap();
        let cluster = world.clusters.get_mut(KEY).unwrap();
        cluster.status = Some(MariaDBClusterStatus {
            phase: ClusterPhase::Recovery,
            ..Default::default()
        });
    }

    api.report(vec![
        PodCondition::new("prod-server-0", 0),
        PodCondition::new("prod-server-1", 7),
        PodCondition::new("prod-server-2", 3),
    ]);
    pass(&ctrl).await;
    let status = api.status();
    assert_eq!(status.stage, ClusterStage::InvalidReport);
    assert_eq!(status.bootstrap_from, None);

    api.report(vec![
        PodCondition::new("prod-server-0", 6),
        PodCondition::new("prod-server-1", 7),
        PodCondition::new("prod-server-2", 3),
    ]);
    pass(&ctrl).await;
    let status = api.status();
    assert_eq!(status.stage, ClusterStage::None);
    assert_eq!(status.bootstrap_from.as_deref(), Some("prod-server-1"));
}

#[tokio::test]
async fn missing_bootstrap_pod_is_retried() {
    let api = FakeApi::with_cluster(3);
    let ctrl = controller(&api, Arc::new(CountingReconciler::default()));
    {
        let mut world = api.world.lock().unwrap();
        let cluster = world.clusters.get_mut(KEY).unwrap();
        cluster.status = Some(MariaDBClusterStatus {
            phase: ClusterPhase::Recovery,
            bootstrap_from: Some("prod-server-1".into()),
            ..Default::default()
        });
    }

    let err = ctrl.sync_handler(KEY).await.unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn worker_pool_processes_queue_and_drains_on_shutdown() {
    let api = FakeApi::with_cluster(3);
    let reconciler = Arc::new(CountingReconciler::default());
    let ctrl = controller(&api, Arc::clone(&reconciler));

    let runner = tokio::spawn(Arc::clone(&ctrl).run(3));
    ctrl.queue().add(KEY.to_string());

    tokio::time::timeout(Duration::from_secs(5), async {
        while api.status().phase != ClusterPhase::PreFlight {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    ctrl.queue().shutdown();
    tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .unwrap()
        .unwrap();
    assert!(reconciler.calls.load(Ordering::SeqCst) >= 1);
}
