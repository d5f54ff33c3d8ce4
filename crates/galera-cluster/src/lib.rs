//! Reconciliation core for MariaDB Galera clusters
//!
//! Event handlers feed cluster keys into a [`queue::WorkQueue`]; the
//! [`controller::Controller`] worker pool drains it, running the
//! [`phases`] state machine, persisting status changes through [`patch`],
//! and applying the dependent resources in [`reconcilers`].

pub mod cache;
pub mod conflict;
pub mod controller;
pub mod patch;
pub mod phases;
pub mod queue;
pub mod quorum;
pub mod rate_limiter;
pub mod reconcilers;

pub use cache::{ClusterCache, KubePodClient, PodClient, ReflectorCache};
pub use controller::{Context, ContextBuilder, Controller, SyncOutcome};
pub use queue::WorkQueue;
pub use rate_limiter::RateLimiterConfig;
