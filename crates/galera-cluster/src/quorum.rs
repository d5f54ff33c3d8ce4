//! Bootstrap source selection after a primary-component loss.
//!
//! Every replica writes its last committed sequence number into the cluster
//! status. Once all of them have reported, the most advanced replica is the
//! only safe one to re-seed from. A replica that reports an unknown or
//! non-positive position makes the comparison meaningless, so no source is
//! picked until an operator intervenes.

use galera_common::crd::PodCondition;

/// Result of a selection attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QuorumDecision {
    /// Not every replica has reported yet
    Pending {
        /// Reports collected so far
        reported: usize,
        /// Reports required
        desired: i32,
    },
    /// The replica to bootstrap from
    Selected {
        /// Hostname of the most advanced replica
        hostname: String,
        /// Its sequence number
        seq_no: i64,
    },
    /// At least one report carries a non-positive sequence number
    InvalidReport {
        /// Hostnames of the offending reports, in report order
        hostnames: Vec<String>,
    },
}

/// Pick the replica with the highest sequence number.
///
/// Only decides once exactly `desired` reports are present. Ties go to the
/// earliest report.
pub fn select_bootstrap_source(reports: &[PodCondition], desired: i32) -> QuorumDecision {
    if reports.is_empty() || i64::try_from(reports.len()) != Ok(i64::from(desired)) {
        return QuorumDecision::Pending {
            reported: reports.len(),
            desired,
        };
    }

    let invalid: Vec<String> = reports
        .iter()
        .filter(|r| r.seq_no() <= 0)
        .map(|r| r.hostname.clone())
        .collect();
    if !invalid.is_empty() {
        return QuorumDecision::InvalidReport { hostnames: invalid };
    }

    let mut best = &reports[0];
    for report in &reports[1..] {
        if report.seq_no() > best.seq_no() {
            best = report;
        }
    }
    QuorumDecision::Selected {
        hostname: best.hostname.clone(),
        seq_no: best.seq_no(),
    }
}
