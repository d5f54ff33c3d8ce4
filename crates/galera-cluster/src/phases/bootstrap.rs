//! Bootstrap chain: bring replicas up one at a time.
//!
//! The first node starts a new cluster, restarts without the new-cluster
//! flag, then the second and third nodes join. Every step after the first
//! waits until the StatefulSet controller has acted on the spec change that
//! produced it, so readiness is never judged against the previous rollout.
//! No step completes before the StatefulSet asks for, and runs, the number
//! of nodes that step is about.

use galera_common::crd::{ClusterPhase, MariaDBClusterSpec, MariaDBClusterStatus};

use super::{Transition, WorkloadView};

/// Spec replica count a phase requires before it may complete
fn min_replicas_exclusive(phase: ClusterPhase) -> i32 {
    match phase {
        ClusterPhase::BootstrapSecond | ClusterPhase::BootstrapThird => 2,
        _ => 1,
    }
}

/// Nodes that must be desired and ready for a phase to complete
fn nodes_for_phase(phase: ClusterPhase) -> i32 {
    match phase {
        ClusterPhase::BootstrapSecond => 2,
        ClusterPhase::BootstrapThird => 3,
        _ => 1,
    }
}

pub(super) fn step(
    spec: &MariaDBClusterSpec,
    status: &MariaDBClusterStatus,
    workload: Option<&WorkloadView>,
) -> Transition {
    let Some(workload) = workload else {
        return Transition::wait(status, "server statefulset not observed");
    };
    if spec.replicas <= min_replicas_exclusive(status.phase) {
        return Transition::wait(status, "not enough replicas requested for this step");
    }
    // The first step has no earlier rollout to tell apart
    if status.phase != ClusterPhase::BootstrapFirst
        && !workload.is_updated(status.stateful_set_observed_generation)
    {
        return Transition::wait(status, "statefulset has not picked up the last change");
    }
    let nodes = nodes_for_phase(status.phase);
    if workload.desired_replicas < nodes || workload.ready_replicas < nodes {
        return Transition::wait(status, "bootstrap node not running yet");
    }
    if !workload.is_ready() {
        return Transition::wait(status, "statefulset not ready");
    }

    let mut next = status.clone();
    next.phase = status.phase.successor();
    next.stateful_set_observed_generation = workload.observed_generation;
    Transition::advance(next, status.phase)
}
