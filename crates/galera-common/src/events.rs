//! Kubernetes Event recording for the Galera controller.
//!
//! Wraps `kube::runtime::events::Recorder` behind a trait so phase
//! transitions and recovery decisions show up in `kubectl describe mdbc`.
//!
//! Events are fire-and-forget: failures are logged and never propagate. A
//! failed event must never fail a sync pass.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Trait for publishing Kubernetes Events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a Kubernetes Event on the given resource.
    ///
    /// # Arguments
    ///
    /// * `resource_ref` - The Kubernetes object this event is about
    /// * `type_` - Normal or Warning
    /// * `reason` - Machine-readable reason string (e.g. "PhaseTransition")
    /// * `action` - What action was taken (e.g. "Reconcile")
    /// * `note` - Optional human-readable message
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Production implementation wrapping `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a new publisher reporting as `controller_name`.
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = kube::runtime::events::Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// No-op implementation for tests.
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Well-known event reason strings.
pub mod reasons {
    /// The cluster moved to a new lifecycle phase
    pub const PHASE_TRANSITION: &str = "PhaseTransition";
    /// The cluster is operational and every replica is ready
    pub const CLUSTER_SYNCED: &str = "ClusterSynced";
    /// All replicas lost readiness; recovery started
    pub const RECOVERY_STARTED: &str = "RecoveryStarted";
    /// A replica was chosen to re-seed the cluster
    pub const BOOTSTRAP_SOURCE_SELECTED: &str = "BootstrapSourceSelected";
    /// At least one replica reported a non-positive sequence number
    pub const INVALID_REPORT: &str = "InvalidReport";
    /// The designated replica formed a new primary component
    pub const PRIMARY_RECOVERED: &str = "PrimaryRecovered";
    /// The re-formed cluster lost every replica again
    pub const RECOVERY_RESTARTED: &str = "RecoveryRestarted";
    /// Resources with the cluster's name already exist
    pub const CONFLICTING_RESOURCES: &str = "ConflictingResources";
}

/// Well-known event action strings.
pub mod actions {
    /// Standard reconciliation pass
    pub const RECONCILE: &str = "Reconcile";
    /// Bootstrap sequencing
    pub const BOOTSTRAP: &str = "Bootstrap";
    /// Primary component recovery
    pub const RECOVER: &str = "Recover";
    /// Pre-provisioning checks
    pub const PREFLIGHT: &str = "PreFlight";
}
