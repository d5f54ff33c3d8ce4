//! Sync loop for MariaDBCluster.
//!
//! Workers pull cluster keys from the [`WorkQueue`] and run one sync pass
//! per key:
//!
//! 1. load the cluster from the cache (gone means deleted: drop the key)
//! 2. observe dependents and compute the next status
//! 3. write back only the changed status fields
//! 4. run every dependent reconciler against the persisted state
//!
//! Step 4 runs even when steps 2-3 fail, so dependents keep converging while
//! the status write is retried. The queue guarantees one worker per key, so
//! any number of workers can run side by side.

use std::sync::Arc;

use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::EventType;
use kube::{Client, Resource};
use tracing::{debug, error, info, instrument, warn};

use galera_common::crd::{ClusterPhase, MariaDBCluster, MariaDBClusterStatus};
use galera_common::events::{actions, reasons, EventPublisher, KubeEventPublisher};
use galera_common::{split_key, Error, Result};

use crate::cache::{ClusterCache, KubePodClient, PodClient};
use crate::conflict::check_conflicts;
use crate::patch::{patch_if_changed, KubeStatusWriter, PatchOutcome, StatusWriter};
use crate::phases::{observe, transform, TransitionOutcome};
use crate::queue::WorkQueue;
use crate::reconcilers::Reconcilers;

/// Name reported on Kubernetes events
pub const CONTROLLER_NAME: &str = "galera-operator";

/// Shared collaborators of every sync pass
///
/// Use [`Context::builder`] for a Kubernetes-backed context, or
/// [`Context::from_parts`] to plug in other implementations.
pub struct Context {
    /// Cached cluster, StatefulSet and ConfigMap lookups
    pub cache: Arc<dyn ClusterCache>,
    /// Live pod lookups
    pub pods: Arc<dyn PodClient>,
    /// Status reads and writes
    pub writer: Arc<dyn StatusWriter>,
    /// Dependent resources in run order
    pub reconcilers: Reconcilers,
    /// Kubernetes event publishing
    pub events: Arc<dyn EventPublisher>,
}

impl Context {
    /// Builder with Kubernetes-backed defaults
    pub fn builder(client: Client, cache: Arc<dyn ClusterCache>) -> ContextBuilder {
        ContextBuilder::new(client, cache)
    }

    /// Assemble a context from explicit collaborators
    pub fn from_parts(
        cache: Arc<dyn ClusterCache>,
        pods: Arc<dyn PodClient>,
        writer: Arc<dyn StatusWriter>,
        reconcilers: Reconcilers,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            cache,
            pods,
            writer,
            reconcilers,
            events,
        }
    }
}

/// Builder for [`Context`]
pub struct ContextBuilder {
    client: Client,
    cache: Arc<dyn ClusterCache>,
    pods: Option<Arc<dyn PodClient>>,
    writer: Option<Arc<dyn StatusWriter>>,
    reconcilers: Option<Reconcilers>,
    events: Option<Arc<dyn EventPublisher>>,
}

impl ContextBuilder {
    fn new(client: Client, cache: Arc<dyn ClusterCache>) -> Self {
        Self {
            client,
            cache,
            pods: None,
            writer: None,
            reconcilers: None,
            events: None,
        }
    }

    /// Override the pod client
    pub fn pods(mut self, pods: Arc<dyn PodClient>) -> Self {
        self.pods = Some(pods);
        self
    }

    /// Override the status writer
    pub fn writer(mut self, writer: Arc<dyn StatusWriter>) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Override the dependent reconcilers
    pub fn reconcilers(mut self, reconcilers: Reconcilers) -> Self {
        self.reconcilers = Some(reconcilers);
        self
    }

    /// Override the event publisher
    pub fn events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        let client = self.client;
        Context {
            cache: self.cache,
            pods: self
                .pods
                .unwrap_or_else(|| Arc::new(KubePodClient::new(client.clone()))),
            writer: self
                .writer
                .unwrap_or_else(|| Arc::new(KubeStatusWriter::new(client.clone()))),
            reconcilers: self
                .reconcilers
                .unwrap_or_else(|| Reconcilers::standard(client.clone())),
            events: self
                .events
                .unwrap_or_else(|| Arc::new(KubeEventPublisher::new(client, CONTROLLER_NAME))),
        }
    }
}

/// How a sync pass ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The cluster no longer exists
    Deleted,
    /// Pass completed; `changed` tells whether status was written
    Synced {
        /// Phase after the pass
        phase: ClusterPhase,
        /// Whether the status was patched
        changed: bool,
    },
}

/// Result of the state-machine half of a pass
enum StatePass {
    /// Cluster vanished between read and write
    Gone,
    /// Status as persisted after the pass
    Persisted {
        status: MariaDBClusterStatus,
        changed: bool,
    },
}

/// Worker pool draining the cluster queue
pub struct Controller {
    queue: WorkQueue<String>,
    ctx: Arc<Context>,
}

impl Controller {
    /// Controller consuming `queue`
    pub fn new(queue: WorkQueue<String>, ctx: Arc<Context>) -> Self {
        Self { queue, ctx }
    }

    /// The queue event handlers feed
    pub fn queue(&self) -> &WorkQueue<String> {
        &self.queue
    }

    /// Run `workers` workers until the queue shuts down.
    ///
    /// Returns once every worker has finished its in-flight key.
    pub async fn run(self: Arc<Self>, workers: usize) {
        let workers = workers.max(1);
        info!(workers, "starting sync workers");
        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let this = Arc::clone(&self);
                tokio::spawn(async move {
                    while this.process_next_item().await {}
                    debug!(worker, "sync worker stopped");
                })
            })
            .collect();

        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!(error = %e, "sync worker panicked");
            }
        }
        info!("sync workers drained");
    }

    /// Handle one key. Returns `false` once the queue is shutting down.
    pub async fn process_next_item(&self) -> bool {
        let Some(key) = self.queue.dequeue().await else {
            return false;
        };

        match self.sync_handler(&key).await {
            Ok(outcome) => {
                debug!(cluster = %key, ?outcome, "sync finished");
                self.queue.forget(&key);
            }
            Err(e) if e.is_retryable() => {
                warn!(
                    cluster = %key,
                    error = %e,
                    requeues = self.queue.num_requeues(&key),
                    "sync failed, retrying"
                );
                self.queue.retry(key.clone());
            }
            Err(e) => {
                error!(cluster = %key, error = %e, "sync failed permanently, dropping key");
                self.queue.forget(&key);
            }
        }

        self.queue.done(&key);
        true
    }

    /// One sync pass for `key`.
    #[instrument(skip(self, key), fields(cluster = %key))]
    pub async fn sync_handler(&self, key: &str) -> Result<SyncOutcome> {
        let (namespace, name) = split_key(key)?;
        let Some(cluster) = self.ctx.cache.get_cluster(namespace, name)? else {
            debug!("cluster no longer exists");
            return Ok(SyncOutcome::Deleted);
        };
        cluster.spec.validate().map_err(|e| match e {
            Error::Validation { message, .. } => Error::validation_for(key, message),
            other => other,
        })?;

        debug!(phase = %cluster.phase(), "sync pass");
        let state = self.run_state_machine(key, &cluster).await;

        let persisted = match &state {
            Ok(StatePass::Gone) => return Ok(SyncOutcome::Deleted),
            Ok(StatePass::Persisted { status, .. }) => {
                let mut persisted = cluster.clone();
                persisted.status = Some(status.clone());
                persisted
            }
            Err(_) => cluster.clone(),
        };
        let reconciled = self.ctx.reconcilers.reconcile_all(&persisted).await;

        let StatePass::Persisted { status, changed } = state? else {
            return Ok(SyncOutcome::Deleted);
        };
        reconciled?;
        Ok(SyncOutcome::Synced {
            phase: status.phase,
            changed,
        })
    }

    async fn run_state_machine(&self, key: &str, cluster: &MariaDBCluster) -> Result<StatePass> {
        let status = cluster.status_or_default();

        if status.phase == ClusterPhase::PreFlight {
            self.report_conflicts(key, cluster).await;
        }

        let observed = observe(
            self.ctx.cache.as_ref(),
            self.ctx.pods.as_ref(),
            cluster,
            &status,
        )
        .await?;
        let transition = transform(&cluster.spec, &status, &observed);

        if !status.phase.can_transition_to(transition.status.phase) {
            return Err(Error::internal_with_context(
                "phases",
                format!(
                    "{key}: illegal transition {} -> {}",
                    status.phase, transition.status.phase
                ),
            ));
        }

        let changed = match patch_if_changed(self.ctx.writer.as_ref(), cluster, &transition.status)
            .await?
        {
            PatchOutcome::Gone => return Ok(StatePass::Gone),
            PatchOutcome::Unchanged => false,
            PatchOutcome::Applied { .. } => true,
        };

        if changed {
            self.announce(key, cluster, &transition.outcome).await;
        } else if let TransitionOutcome::Waiting { reason } = &transition.outcome {
            debug!(phase = %status.phase, reason, "waiting");
        }

        Ok(StatePass::Persisted {
            status: transition.status,
            changed,
        })
    }

    /// Advisory only: a collision is reported but provisioning continues.
    async fn report_conflicts(&self, key: &str, cluster: &MariaDBCluster) {
        match check_conflicts(self.ctx.cache.as_ref(), cluster) {
            Ok(report) if report.is_clear() => {}
            Ok(report) => {
                warn!(cluster = %key, kinds = %report, "resources with the cluster's name already exist");
                self.ctx
                    .events
                    .publish(
                        &object_ref(cluster),
                        EventType::Warning,
                        reasons::CONFLICTING_RESOURCES,
                        actions::PREFLIGHT,
                        Some(format!("Existing resources share the cluster name: {report}")),
                    )
                    .await;
            }
            Err(e) => warn!(cluster = %key, error = %e, "conflict check failed"),
        }
    }

    async fn announce(&self, key: &str, cluster: &MariaDBCluster, outcome: &TransitionOutcome) {
        let (type_, reason, action, note) = match outcome {
            TransitionOutcome::Waiting { .. } => return,
            TransitionOutcome::PhaseChanged { from, to } => {
                info!(
                    cluster = %key,
                    event = "phaseTransition",
                    from = %from,
                    to = %to,
                    "phase changed"
                );
                let (reason, action) = match (from, to) {
                    (ClusterPhase::Operational, ClusterPhase::Recovery) => {
                        (reasons::RECOVERY_STARTED, actions::RECOVER)
                    }
                    (_, to) if to.is_bootstrapping() => (reasons::PHASE_TRANSITION, actions::BOOTSTRAP),
                    _ => (reasons::PHASE_TRANSITION, actions::RECONCILE),
                };
                let type_ = if *to == ClusterPhase::Recovery {
                    EventType::Warning
                } else {
                    EventType::Normal
                };
                (type_, reason, action, format!("Phase {from} -> {to}"))
            }
            TransitionOutcome::Synced => {
                info!(cluster = %key, "all replicas ready");
                (
                    EventType::Normal,
                    reasons::CLUSTER_SYNCED,
                    actions::RECONCILE,
                    "All replicas ready".to_string(),
                )
            }
            TransitionOutcome::SourceSelected { hostname, seq_no } => {
                info!(cluster = %key, hostname = %hostname, seq_no, "bootstrap source selected");
                (
                    EventType::Normal,
                    reasons::BOOTSTRAP_SOURCE_SELECTED,
                    actions::RECOVER,
                    format!("Bootstrapping from {hostname} (seqno {seq_no})"),
                )
            }
            TransitionOutcome::InvalidReport { hostnames } => {
                warn!(cluster = %key, ?hostnames, "replicas reported unusable sequence numbers");
                (
                    EventType::Warning,
                    reasons::INVALID_REPORT,
                    actions::RECOVER,
                    format!(
                        "Non-positive sequence numbers from {}; manual intervention required",
                        hostnames.join(", ")
                    ),
                )
            }
            TransitionOutcome::PrimaryRecovered { hostname } => {
                info!(cluster = %key, hostname = %hostname, "primary component recovered");
                (
                    EventType::Normal,
                    reasons::PRIMARY_RECOVERED,
                    actions::RECOVER,
                    format!("{hostname} formed a new primary component"),
                )
            }
            TransitionOutcome::RecoveryRestarted => {
                warn!(cluster = %key, "no replica ready after recovery, selecting again");
                (
                    EventType::Warning,
                    reasons::RECOVERY_RESTARTED,
                    actions::RECOVER,
                    "No replica ready after recovery; selecting a new source".to_string(),
                )
            }
        };

        self.ctx
            .events
            .publish(&object_ref(cluster), type_, reason, action, Some(note))
            .await;
    }
}

fn object_ref(cluster: &MariaDBCluster) -> ObjectReference {
    cluster.object_ref(&())
}
