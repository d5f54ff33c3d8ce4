//! Phase state machine for MariaDBCluster.
//!
//! A sync pass runs in two halves:
//!
//! 1. [`observe`] gathers whatever the current phase needs to look at (the
//!    server StatefulSet, or the designated bootstrap pod). This is the only
//!    part that does I/O and the only part that can fail.
//! 2. [`transform`] is a pure function from `(spec, status, observed)` to the
//!    next status. It either produces the complete mutation for one case of
//!    the transition table or hands the status back untouched.
//!
//! Keeping the second half pure means every transition can be tested without
//! a cluster and no pass ever writes a half-applied status.
//!
//! ```text
//! "" -> PreFlight -> BootstrapFirst -> BootstrapFirstRestart
//!    -> BootstrapSecond -> BootstrapThird -> Operational <-> Recovery
//! ```

mod bootstrap;
mod operational;
mod recovery;
mod workload;

pub use workload::{PodView, WorkloadView};

use galera_common::crd::{
    ClusterPhase, MariaDBCluster, MariaDBClusterSpec, MariaDBClusterStatus, RecoveryStep,
};
use galera_common::{join_key, Error, Result};
use kube::ResourceExt;
use tracing::trace;

use crate::cache::{ClusterCache, PodClient};

/// Dependent state observed for one pass
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Observed {
    /// The server StatefulSet, when the phase looks at it and it exists
    pub workload: Option<WorkloadView>,
    /// The designated bootstrap replica, during recovery verification
    pub bootstrap_pod: Option<PodView>,
}

/// What a pass decided, for logs and events
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// Nothing to do yet
    Waiting {
        /// Short description of the unmet condition
        reason: &'static str,
    },
    /// The phase advanced
    PhaseChanged {
        /// Phase before the pass
        from: ClusterPhase,
        /// Phase after the pass
        to: ClusterPhase,
    },
    /// Operational with every replica ready
    Synced,
    /// Recovery picked the replica to re-seed from
    SourceSelected {
        /// Pod hostname
        hostname: String,
        /// Its sequence number
        seq_no: i64,
    },
    /// Recovery found reports it cannot compare
    InvalidReport {
        /// Offending hostnames
        hostnames: Vec<String>,
    },
    /// The bootstrap replica formed a new primary component
    PrimaryRecovered {
        /// Pod hostname
        hostname: String,
    },
    /// The re-formed cluster lost every replica; selection starts over
    RecoveryRestarted,
}

/// Result of [`transform`]
#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    /// Complete status to persist
    pub status: MariaDBClusterStatus,
    /// What happened
    pub outcome: TransitionOutcome,
}

impl Transition {
    fn wait(status: &MariaDBClusterStatus, reason: &'static str) -> Self {
        Self {
            status: status.clone(),
            outcome: TransitionOutcome::Waiting { reason },
        }
    }

    fn advance(status: MariaDBClusterStatus, from: ClusterPhase) -> Self {
        let to = status.phase;
        Self {
            status,
            outcome: TransitionOutcome::PhaseChanged { from, to },
        }
    }
}

/// Compute the status that follows `status` given what was observed.
pub fn transform(
    spec: &MariaDBClusterSpec,
    status: &MariaDBClusterStatus,
    observed: &Observed,
) -> Transition {
    match status.phase {
        ClusterPhase::New => {
            let mut next = status.clone();
            next.phase = ClusterPhase::PreFlight;
            Transition::advance(next, status.phase)
        }
        // No provisioning checks gate this phase; the conflict guard
        // only reports.
        ClusterPhase::PreFlight => {
            let mut next = status.clone();
            next.phase = ClusterPhase::BootstrapFirst;
            Transition::advance(next, status.phase)
        }
        ClusterPhase::BootstrapFirst
        | ClusterPhase::BootstrapFirstRestart
        | ClusterPhase::BootstrapSecond
        | ClusterPhase::BootstrapThird => bootstrap::step(spec, status, observed.workload.as_ref()),
        ClusterPhase::Operational => operational::step(status, observed.workload.as_ref()),
        ClusterPhase::Recovery => recovery::step(spec, status, observed),
    }
}

/// Whether the current phase judges the server StatefulSet
fn needs_workload(status: &MariaDBClusterStatus) -> bool {
    match status.phase {
        ClusterPhase::Operational => true,
        ClusterPhase::Recovery => status.recovery_step() == RecoveryStep::Reforming,
        phase => phase.is_bootstrapping(),
    }
}

/// Gather the dependent state the current phase needs.
///
/// A StatefulSet that does not exist yet is not an error; the phase simply
/// waits. The bootstrap pod must exist once it has been designated, so its
/// absence is a retryable error.
pub async fn observe(
    cache: &dyn ClusterCache,
    pods: &dyn PodClient,
    cluster: &MariaDBCluster,
    status: &MariaDBClusterStatus,
) -> Result<Observed> {
    let namespace = cluster.namespace().unwrap_or_default();
    let mut observed = Observed::default();

    if needs_workload(status) {
        let server = cluster.server_name();
        observed.workload = cache
            .get_stateful_set(&namespace, &server)?
            .as_ref()
            .map(WorkloadView::from);
        trace!(statefulset = %server, workload = ?observed.workload, "observed workload");
    }

    if status.phase == ClusterPhase::Recovery {
        if let RecoveryStep::Verifying { bootstrap_from } = status.recovery_step() {
            let pod = pods
                .get_pod(&namespace, bootstrap_from)
                .await?
                .ok_or_else(|| Error::not_found("Pod", join_key(&namespace, bootstrap_from)))?;
            observed.bootstrap_pod = Some(PodView::from(&pod));
        }
    }

    Ok(observed)
}
