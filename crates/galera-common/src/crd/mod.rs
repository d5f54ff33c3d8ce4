//! Custom Resource Definitions for the Galera operator

mod cluster;
mod types;

pub use cluster::{
    components, MariaDBCluster, MariaDBClusterSpec, MariaDBClusterStatus, SnapshotSpec,
    DEFAULT_IMAGE, DEFAULT_STORAGE_SIZE,
};
pub use types::{ClusterPhase, ClusterStage, GraState, PodCondition, RecoveryStep};
