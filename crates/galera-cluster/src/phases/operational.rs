//! Operational monitoring: flag full sync, fall into recovery on total loss.

use galera_common::crd::{ClusterPhase, ClusterStage, MariaDBClusterStatus};

use super::{Transition, TransitionOutcome, WorkloadView};

pub(super) fn step(status: &MariaDBClusterStatus, workload: Option<&WorkloadView>) -> Transition {
    let Some(workload) = workload else {
        return Transition::wait(status, "server statefulset not observed");
    };

    if workload.ready_replicas == 0 {
        let mut next = status.clone();
        next.phase = ClusterPhase::Recovery;
        next.stage = ClusterStage::None;
        return Transition::advance(next, status.phase);
    }

    if workload.is_ready() {
        let mut next = status.clone();
        next.stage = ClusterStage::Synced;
        next.stateful_set_pod_conditions.clear();
        next.bootstrap_from = None;
        return Transition {
            status: next,
            outcome: TransitionOutcome::Synced,
        };
    }

    Transition::wait(status, "replicas still rolling")
}
