//! Common types for the MariaDB Galera operator: CRDs, errors, and events

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager used for every server-side apply and status patch
pub const FIELD_MANAGER: &str = "galera-operator";

/// Label carrying the owning cluster's name on every managed resource
pub const CLUSTER_LABEL_KEY: &str = "galera.dev/cluster";

/// Label carrying the managed component (server, proxy, snapshot)
pub const COMPONENT_LABEL_KEY: &str = "galera.dev/component";

/// Standard managed-by label key
pub const MANAGED_BY_LABEL_KEY: &str = "app.kubernetes.io/managed-by";

/// Split a `namespace/name` queue key into its parts.
///
/// Keys without a namespace (`name`) are cluster-scoped and yield an empty
/// namespace. Anything with more than one separator, or an empty name, is
/// rejected.
pub fn split_key(key: &str) -> Result<(&str, &str)> {
    let mut parts = key.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(name), None, None) if !name.is_empty() => Ok(("", name)),
        (Some(namespace), Some(name), None) if !name.is_empty() => Ok((namespace, name)),
        _ => Err(Error::invalid_key(key)),
    }
}

/// Build a `namespace/name` queue key.
pub fn join_key(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}/{name}")
    }
}
