//! Condensed views of the dependent resources the state machine judges.

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;

/// Replica counters and rollout markers of the server StatefulSet
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkloadView {
    /// `spec.replicas` (Kubernetes defaults an unset value to 1)
    pub desired_replicas: i32,
    /// Pods created from the current revision
    pub current_replicas: i32,
    /// Pods created by the StatefulSet controller
    pub replicas: i32,
    /// Pods reporting Ready
    pub ready_replicas: i32,
    /// Revision the current pods were created from
    pub current_revision: Option<String>,
    /// Revision the StatefulSet is rolling towards
    pub update_revision: Option<String>,
    /// Most recent generation the StatefulSet controller has acted on
    pub observed_generation: i64,
}

impl WorkloadView {
    /// All counters match the desired count and no rollout is pending.
    pub fn is_ready(&self) -> bool {
        self.desired_replicas == self.current_replicas
            && self.desired_replicas == self.replicas
            && self.desired_replicas == self.ready_replicas
            && self.current_revision == self.update_revision
    }

    /// The StatefulSet controller has picked up a generation newer than
    /// `recorded`.
    pub fn is_updated(&self, recorded: i64) -> bool {
        self.observed_generation > recorded
    }
}

impl From<&StatefulSet> for WorkloadView {
    fn from(sts: &StatefulSet) -> Self {
        let desired_replicas = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        let Some(status) = sts.status.as_ref() else {
            return Self {
                desired_replicas,
                ..Default::default()
            };
        };
        Self {
            desired_replicas,
            current_replicas: status.current_replicas.unwrap_or(0),
            replicas: status.replicas,
            ready_replicas: status.ready_replicas.unwrap_or(0),
            current_revision: status.current_revision.clone(),
            update_revision: status.update_revision.clone(),
            observed_generation: status.observed_generation.unwrap_or(0),
        }
    }
}

/// Readiness of the designated bootstrap replica
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PodView {
    /// Pod name
    pub name: String,
    /// Every container reports ready
    pub containers_ready: bool,
}

impl From<&Pod> for PodView {
    fn from(pod: &Pod) -> Self {
        let statuses = pod
            .status
            .as_ref()
            .and_then(|s| s.container_statuses.as_deref())
            .unwrap_or_default();
        // A pod whose containers have not reported yet is not ready
        let containers_ready = !statuses.is_empty() && statuses.iter().all(|c| c.ready);
        Self {
            name: pod.name_any(),
            containers_ready,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::{StatefulSetSpec, StatefulSetStatus};
    use k8s_openapi::api::core::v1::{ContainerStatus, PodStatus};
    use kube::api::ObjectMeta;
    use proptest::prelude::*;

    fn ready_view() -> WorkloadView {
        WorkloadView {
            desired_replicas: 3,
            current_replicas: 3,
            replicas: 3,
            ready_replicas: 3,
            current_revision: Some("rev-1".into()),
            update_revision: Some("rev-1".into()),
            observed_generation: 4,
        }
    }

    #[test]
    fn fully_rolled_out_workload_is_ready() {
        assert!(ready_view().is_ready());
    }

    #[test]
    fn pending_rollout_is_not_ready() {
        let view = WorkloadView {
            update_revision: Some("rev-2".into()),
            ..ready_view()
        };
        assert!(!view.is_ready());
    }

    #[test]
    fn updated_requires_strictly_newer_generation() {
        let view = ready_view();
        assert!(view.is_updated(3));
        assert!(!view.is_updated(4));
        assert!(!view.is_updated(5));
    }

    proptest! {
        #[test]
        fn readiness_matches_counter_and_revision_equality(
            desired in 0i32..5,
            current in 0i32..5,
            total in 0i32..5,
            ready in 0i32..5,
            current_rev in prop::option::of(0u8..3),
            update_rev in prop::option::of(0u8..3),
        ) {
            let view = WorkloadView {
                desired_replicas: desired,
                current_replicas: current,
                replicas: total,
                ready_replicas: ready,
                current_revision: current_rev.map(|r| format!("rev-{r}")),
                update_revision: update_rev.map(|r| format!("rev-{r}")),
                observed_generation: 1,
            };
            let expected = desired == current
                && desired == total
                && desired == ready
                && current_rev == update_rev;
            prop_assert_eq!(view.is_ready(), expected);
        }

        #[test]
        fn updated_iff_generation_advanced(observed in -2i64..10, recorded in -2i64..10) {
            let view = WorkloadView { observed_generation: observed, ..Default::default() };
            prop_assert_eq!(view.is_updated(recorded), observed > recorded);
        }
    }

    #[test]
    fn view_from_stateful_set_reads_spec_and_status() {
        let sts = StatefulSet {
            metadata: ObjectMeta::default(),
            spec: Some(StatefulSetSpec {
                replicas: Some(3),
                ..Default::default()
            }),
            status: Some(StatefulSetStatus {
                replicas: 3,
                current_replicas: Some(2),
                ready_replicas: Some(1),
                current_revision: Some("a".into()),
                update_revision: Some("b".into()),
                observed_generation: Some(7),
                ..Default::default()
            }),
        };
        let view = WorkloadView::from(&sts);
        assert_eq!(view.desired_replicas, 3);
        assert_eq!(view.current_replicas, 2);
        assert_eq!(view.ready_replicas, 1);
        assert_eq!(view.observed_generation, 7);
        assert!(!view.is_ready());
    }

    #[test]
    fn stateful_set_without_status_is_not_ready() {
        let sts = StatefulSet {
            spec: Some(StatefulSetSpec::default()),
            ..Default::default()
        };
        let view = WorkloadView::from(&sts);
        assert_eq!(view.desired_replicas, 1);
        assert!(!view.is_ready());
    }

    fn pod_with(ready: &[bool]) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("prod-server-2".into()),
                ..Default::default()
            },
            status: Some(PodStatus {
                container_statuses: Some(
                    ready
                        .iter()
                        .enumerate()
                        .map(|(i, r)| ContainerStatus {
                            name: format!("c{i}"),
                            ready: *r,
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn pod_ready_only_when_every_container_is() {
        assert!(PodView::from(&pod_with(&[true, true])).containers_ready);
        assert!(!PodView::from(&pod_with(&[true, false])).containers_ready);
        assert!(!PodView::from(&pod_with(&[])).containers_ready);
        assert_eq!(PodView::from(&pod_with(&[true])).name, "prod-server-2");
    }
}
