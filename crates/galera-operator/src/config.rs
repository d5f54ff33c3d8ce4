//! Controller settings collected from the command line and environment

use std::time::Duration;

use clap::Args;

use galera_cluster::RateLimiterConfig;

/// Flags of the `controller` subcommand
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct ControllerArgs {
    /// Number of concurrent sync workers
    #[arg(long, env = "GALERA_WORKERS", default_value_t = 1)]
    pub workers: usize,

    /// Only watch this namespace (all namespaces when unset)
    #[arg(long, env = "GALERA_WATCH_NAMESPACE")]
    pub namespace: Option<String>,

    /// Give up startup if the caches have not synced within this many seconds
    #[arg(long, default_value_t = 120)]
    pub cache_sync_timeout_secs: u64,

    /// First retry delay for a failing cluster, in milliseconds
    #[arg(long, default_value_t = 5)]
    pub backoff_base_ms: u64,

    /// Upper bound on the retry delay, in seconds
    #[arg(long, default_value_t = 1000)]
    pub backoff_max_secs: u64,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,
}

impl Default for ControllerArgs {
    fn default() -> Self {
        Self {
            workers: 1,
            namespace: None,
            cache_sync_timeout_secs: 120,
            backoff_base_ms: 5,
            backoff_max_secs: 1000,
            log_json: false,
        }
    }
}

/// Resolved controller configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Concurrent sync workers, at least one
    pub workers: usize,
    /// Namespace to watch; `None` watches all namespaces
    pub namespace: Option<String>,
    /// How long startup waits for the caches before giving up
    pub cache_sync_timeout: Duration,
    /// Per-key backoff for requeued clusters
    pub rate_limiter: RateLimiterConfig,
}

impl From<&ControllerArgs> for ControllerConfig {
    fn from(args: &ControllerArgs) -> Self {
        let base_delay = Duration::from_millis(args.backoff_base_ms);
        let max_delay = Duration::from_secs(args.backoff_max_secs).max(base_delay);
        Self {
            workers: args.workers.max(1),
            namespace: args.namespace.clone().filter(|ns| !ns.is_empty()),
            cache_sync_timeout: Duration::from_secs(args.cache_sync_timeout_secs),
            rate_limiter: RateLimiterConfig::new(base_delay, max_delay),
        }
    }
}
