//! Recovery after losing the primary component.
//!
//! Three steps, told apart by [`RecoveryStep`]:
//!
//! - **Selecting**: replicas report their sequence numbers into the status;
//!   once all have reported the quorum selector names a bootstrap source.
//! - **Verifying**: wait until every container of that replica is ready,
//!   which means it formed a new primary component.
//! - **Reforming**: wait for the remaining replicas to rejoin. If the whole
//!   set goes down again, selection starts over.

use galera_common::crd::{
    ClusterPhase, ClusterStage, MariaDBClusterSpec, MariaDBClusterStatus, RecoveryStep,
};

use super::{Observed, Transition, TransitionOutcome};
use crate::quorum::{select_bootstrap_source, QuorumDecision};

pub(super) fn step(
    spec: &MariaDBClusterSpec,
    status: &MariaDBClusterStatus,
    observed: &Observed,
) -> Transition {
    match status.recovery_step() {
        RecoveryStep::Selecting => select(spec, status),
        RecoveryStep::Verifying { bootstrap_from } => verify(status, bootstrap_from, observed),
        RecoveryStep::Reforming => reform(status, observed),
    }
}

fn select(spec: &MariaDBClusterSpec, status: &MariaDBClusterStatus) -> Transition {
    match select_bootstrap_source(&status.stateful_set_pod_conditions, spec.replicas) {
        QuorumDecision::Pending { .. } => Transition::wait(status, "waiting for replica reports"),
        QuorumDecision::Selected { hostname, seq_no } => {
            let mut next = status.clone();
            next.bootstrap_from = Some(hostname.clone());
            if next.stage == ClusterStage::InvalidReport {
                next.stage = ClusterStage::None;
            }
            Transition {
                status: next,
                outcome: TransitionOutcome::SourceSelected { hostname, seq_no },
            }
        }
        QuorumDecision::InvalidReport { hostnames } => {
            let mut next = status.clone();
            next.stage = ClusterStage::InvalidReport;
            Transition {
                status: next,
                outcome: TransitionOutcome::InvalidReport { hostnames },
            }
        }
    }
}

fn verify(status: &MariaDBClusterStatus, bootstrap_from: &str, observed: &Observed) -> Transition {
    match &observed.bootstrap_pod {
        Some(pod) if pod.containers_ready => {
            let mut next = status.clone();
            next.stage = ClusterStage::PrimaryRecovered;
            next.bootstrap_from = None;
            Transition {
                status: next,
                outcome: TransitionOutcome::PrimaryRecovered {
                    hostname: bootstrap_from.to_string(),
                },
            }
        }
        Some(_) => Transition::wait(status, "bootstrap replica not ready"),
        None => Transition::wait(status, "bootstrap replica not observed"),
    }
}

fn reform(status: &MariaDBClusterStatus, observed: &Observed) -> Transition {
    let Some(workload) = observed.workload.as_ref() else {
        return Transition::wait(status, "server statefulset not observed");
    };

    if workload.ready_replicas == 0 {
        let mut next = status.clone();
        next.stage = ClusterStage::None;
        return Transition {
            status: next,
            outcome: TransitionOutcome::RecoveryRestarted,
        };
    }

    if workload.is_ready() {
        let mut next = status.clone();
        next.phase = ClusterPhase::Operational;
        next.stage = ClusterStage::Degraded;
        next.stateful_set_pod_conditions.clear();
        next.bootstrap_from = None;
        return Transition::advance(next, status.phase);
    }

    Transition::wait(status, "replicas rejoining")
}

#[cfg(test)]
mod tests {
    use super::super::tests::{in_phase, ready, spec};
    use super::super::PodView;
    use super::*;
    use galera_common::crd::PodCondition;

    fn reporting(seq: &[i64]) -> MariaDBClusterStatus {
        let mut status = in_phase(ClusterPhase::Recovery);
        status.stateful_set_pod_conditions = seq
            .iter()
            .enumerate()
            .map(|(i, s)| PodCondition::new(format!("prod-server-{i}"), *s))
            .collect();
        status
    }

    fn pod(ready: bool) -> Observed {
        Observed {
            workload: None,
            bootstrap_pod: Some(PodView {
                name: "prod-server-2".into(),
                containers_ready: ready,
            }),
        }
    }

    #[test]
    fn incomplete_reports_keep_waiting() {
        let status = reporting(&[4, 7]);
        let t = step(&spec(3), &status, &Observed::default());
        assert_eq!(t.status, status);
    }

    #[test]
    fn complete_positive_reports_designate_the_most_advanced_replica() {
        let t = step(&spec(3), &reporting(&[4, 7, 11]), &Observed::default());
        assert_eq!(t.status.bootstrap_from.as_deref(), Some("prod-server-2"));
        assert_eq!(
            t.outcome,
            TransitionOutcome::SourceSelected {
                hostname: "prod-server-2".into(),
                seq_no: 11
            }
        );
    }

    #[test]
    fn non_positive_report_flags_invalid_and_selects_nothing() {
        let t = step(&spec(3), &reporting(&[4, -1, 11]), &Observed::default());
        assert_eq!(t.status.stage, ClusterStage::InvalidReport);
        assert_eq!(t.status.bootstrap_from, None);
    }

    #[test]
    fn corrected_report_clears_invalid_flag() {
        let mut status = reporting(&[4, 6, 11]);
        status.stage = ClusterStage::InvalidReport;
        let t = step(&spec(3), &status, &Observed::default());
        assert_eq!(t.status.stage, ClusterStage::None);
        assert_eq!(t.status.bootstrap_from.as_deref(), Some("prod-server-2"));
    }

    #[test]
    fn ready_bootstrap_replica_becomes_primary() {
        let mut status = reporting(&[4, 7, 11]);
        status.bootstrap_from = Some("prod-server-2".into());

        let t = step(&spec(3), &status, &pod(false));
        assert_eq!(t.status, status);

        let t = step(&spec(3), &status, &pod(true));
        assert_eq!(t.status.stage, ClusterStage::PrimaryRecovered);
        assert_eq!(t.status.bootstrap_from, None);
        assert_eq!(t.status.stateful_set_pod_conditions.len(), 3);
    }

    #[test]
    fn reformed_cluster_returns_to_operational_degraded() {
        let mut status = reporting(&[4, 7, 11]);
        status.stage = ClusterStage::PrimaryRecovered;
        let observed = Observed {
            workload: Some(ready(3, 9)),
            bootstrap_pod: None,
        };

        let t = step(&spec(3), &status, &observed);
        assert_eq!(t.status.phase, ClusterPhase::Operational);
        assert_eq!(t.status.stage, ClusterStage::Degraded);
        assert!(t.status.stateful_set_pod_conditions.is_empty());
        assert_eq!(t.status.bootstrap_from, None);
    }

    #[test]
    fn total_loss_while_reforming_restarts_selection() {
        let mut status = reporting(&[4, 7, 11]);
        status.stage = ClusterStage::PrimaryRecovered;
        let mut view = ready(3, 9);
        view.ready_replicas = 0;
        let observed = Observed {
            workload: Some(view),
            bootstrap_pod: None,
        };

        let t = step(&spec(3), &status, &observed);
        assert_eq!(t.outcome, TransitionOutcome::RecoveryRestarted);
        assert_eq!(t.status.phase, ClusterPhase::Recovery);
        assert_eq!(t.status.stage, ClusterStage::None);
        assert_eq!(t.status.stateful_set_pod_conditions.len(), 3);
    }
}
