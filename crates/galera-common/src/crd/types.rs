//! Status vocabulary shared by the MariaDBCluster CRD and the controller

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Top-level lifecycle phase of a MariaDBCluster
///
/// Bootstrap phases only move forward. Once `Operational` is reached the
/// cluster cycles between `Operational` and `Recovery` for its lifetime.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum ClusterPhase {
    /// Freshly created, nothing observed yet
    #[default]
    #[serde(rename = "")]
    New,
    /// Pre-provisioning checks
    PreFlight,
    /// First node started with a new cluster (`--wsrep-new-cluster`)
    BootstrapFirst,
    /// First node restarted without the new-cluster flag
    BootstrapFirstRestart,
    /// Second node joining
    BootstrapSecond,
    /// Third node joining
    BootstrapThird,
    /// Cluster formed; readiness is monitored
    Operational,
    /// Primary component lost; re-seeding from the most advanced replica
    Recovery,
}

impl ClusterPhase {
    /// String form as stored in the resource status
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "",
            Self::PreFlight => "PreFlight",
            Self::BootstrapFirst => "BootstrapFirst",
            Self::BootstrapFirstRestart => "BootstrapFirstRestart",
            Self::BootstrapSecond => "BootstrapSecond",
            Self::BootstrapThird => "BootstrapThird",
            Self::Operational => "Operational",
            Self::Recovery => "Recovery",
        }
    }

    /// The only phase this one may advance to, if any
    ///
    /// `Operational` and `Recovery` point at each other; every bootstrap
    /// phase has exactly one successor so no phase can be skipped.
    pub fn successor(&self) -> ClusterPhase {
        match self {
            Self::New => Self::PreFlight,
            Self::PreFlight => Self::BootstrapFirst,
            Self::BootstrapFirst => Self::BootstrapFirstRestart,
            Self::BootstrapFirstRestart => Self::BootstrapSecond,
            Self::BootstrapSecond => Self::BootstrapThird,
            Self::BootstrapThird => Self::Operational,
            Self::Operational => Self::Recovery,
            Self::Recovery => Self::Operational,
        }
    }

    /// Whether moving from `self` to `next` follows the transition graph.
    ///
    /// Staying in the same phase is always allowed.
    pub fn can_transition_to(&self, next: ClusterPhase) -> bool {
        *self == next || self.successor() == next
    }

    /// True for the phases that sequence the initial cluster formation
    pub fn is_bootstrapping(&self) -> bool {
        matches!(
            self,
            Self::BootstrapFirst
                | Self::BootstrapFirstRestart
                | Self::BootstrapSecond
                | Self::BootstrapThird
        )
    }
}

impl std::fmt::Display for ClusterPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "<new>"),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

/// Secondary qualifier within a phase
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum ClusterStage {
    /// No qualifier
    #[default]
    #[serde(rename = "")]
    None,
    /// Operational and every replica is ready
    Synced,
    /// Operational again after recovery; a full sync pass is still pending
    Degraded,
    /// Recovery: the bootstrap replica formed a new primary component
    PrimaryRecovered,
    /// Recovery: a replica reported an unusable sequence number
    InvalidReport,
}

impl ClusterStage {
    /// String form as stored in the resource status
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Synced => "Synced",
            Self::Degraded => "Degraded",
            Self::PrimaryRecovered => "PrimaryRecovered",
            Self::InvalidReport => "InvalidReport",
        }
    }
}

impl std::fmt::Display for ClusterStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "<none>"),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

/// Galera replication state as written to `grastate.dat`
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GraState {
    /// Last committed sequence number; `-1` when unknown
    #[serde(rename = "seqno")]
    pub seq_no: i64,

    /// Cluster state UUID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,

    /// Whether the node considers itself safe to bootstrap from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safe_to_bootstrap: Option<bool>,
}

/// A replica's self-report during recovery
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PodCondition {
    /// Pod hostname of the reporting replica
    pub hostname: String,

    /// Replication position of the replica
    #[serde(rename = "graState")]
    pub gra_state: GraState,
}

impl PodCondition {
    /// Convenience constructor
    pub fn new(hostname: impl Into<String>, seq_no: i64) -> Self {
        Self {
            hostname: hostname.into(),
            gra_state: GraState {
                seq_no,
                ..Default::default()
            },
        }
    }

    /// The reported sequence number
    pub fn seq_no(&self) -> i64 {
        self.gra_state.seq_no
    }
}

/// Where the recovery sub-machine currently stands.
///
/// Derived from `stage` and `bootstrap_from`; a designated bootstrap source
/// always takes precedence over the stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecoveryStep<'a> {
    /// Waiting for every replica to report, then picking a source
    Selecting,
    /// A source was picked; waiting for it to become ready
    Verifying {
        /// Hostname of the designated replica
        bootstrap_from: &'a str,
    },
    /// The source is primary; waiting for the rest to rejoin
    Reforming,
}
