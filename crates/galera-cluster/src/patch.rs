//! Write back only what a pass changed.
//!
//! The sync loop keeps the object it read from the cache untouched and hands
//! the writer the status the state machine produced. The writer turns the
//! difference into one JSON patch operation per changed status field and
//! applies it to the status subresource, guarded by a `test` on the
//! resourceVersion of the latest stored object. Nothing is written when the
//! status did not change, so a settled cluster does not generate update
//! events that would feed straight back into the queue.

use async_trait::async_trait;
use json_patch::{AddOperation, PatchOperation, RemoveOperation, TestOperation};
use jsonptr::PointerBuf;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use serde_json::{Map, Value};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use galera_common::crd::{MariaDBCluster, MariaDBClusterStatus};
use galera_common::{join_key, Error, Result, FIELD_MANAGER};

/// Reads and writes the authoritative copy of a cluster's status
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StatusWriter: Send + Sync {
    /// Read the latest stored object, bypassing any cache
    async fn get_latest(&self, namespace: &str, name: &str) -> Result<Option<MariaDBCluster>>;

    /// Apply a JSON patch to the status subresource
    async fn apply_status_patch(
        &self,
        namespace: &str,
        name: &str,
        patch: json_patch::Patch,
    ) -> Result<()>;
}

/// [`StatusWriter`] talking to the API server
pub struct KubeStatusWriter {
    client: Client,
}

impl KubeStatusWriter {
    /// Create a writer using `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<MariaDBCluster> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl StatusWriter for KubeStatusWriter {
    async fn get_latest(&self, namespace: &str, name: &str) -> Result<Option<MariaDBCluster>> {
        Ok(self.api(namespace).get_opt(name).await?)
    }

    async fn apply_status_patch(
        &self,
        namespace: &str,
        name: &str,
        patch: json_patch::Patch,
    ) -> Result<()> {
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        self.api(namespace)
            .patch_status(name, &params, &Patch::Json::<()>(patch))
            .await
            .map_err(|e| match e {
                // 422 is what a failed `test` operation comes back as
                kube::Error::Api(ae) if ae.code == 409 || ae.code == 422 => {
                    Error::conflict(join_key(namespace, name), ae.message)
                }
                other => Error::from(other),
            })?;
        Ok(())
    }
}

fn status_path(field: &str) -> PointerBuf {
    PointerBuf::from_tokens(["status", field])
}

fn to_object(status: &MariaDBClusterStatus) -> Result<Map<String, Value>> {
    match serde_json::to_value(status)? {
        Value::Object(map) => Ok(map),
        other => Err(Error::serialization(format!(
            "status serialized to a non-object: {other}"
        ))),
    }
}

/// Operations turning `original` into `mutated`, one per changed field.
///
/// Changed and new fields are both written with `add`, which overwrites an
/// existing member and creates a missing one. The stored object may omit
/// fields that still deserialize to a default, so `replace` could target a
/// path that is not there. An object that never had a status gets the whole
/// status in a single `add /status`.
pub fn diff_status(
    original: Option<&MariaDBClusterStatus>,
    mutated: &MariaDBClusterStatus,
) -> Result<Vec<PatchOperation>> {
    let Some(original) = original else {
        if *mutated == MariaDBClusterStatus::default() {
            return Ok(Vec::new());
        }
        return Ok(vec![PatchOperation::Add(AddOperation {
            path: PointerBuf::from_tokens(["status"]),
            value: serde_json::to_value(mutated)?,
        })]);
    };

    let before = to_object(original)?;
    let after = to_object(mutated)?;
    let mut ops = Vec::new();

    for (field, value) in &after {
        if before.get(field) != Some(value) {
            ops.push(PatchOperation::Add(AddOperation {
                path: status_path(field),
                value: value.clone(),
            }));
        }
    }
    for field in before.keys().filter(|f| !after.contains_key(*f)) {
        ops.push(PatchOperation::Remove(RemoveOperation {
            path: status_path(field),
        }));
    }

    Ok(ops)
}

/// What [`patch_if_changed`] did
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PatchOutcome {
    /// Status unchanged; nothing written
    Unchanged,
    /// Patch applied
    Applied {
        /// Number of field operations, excluding the version guard
        operations: usize,
    },
    /// The object was deleted before the write
    Gone,
}

/// Persist `mutated` if it differs from the status `original` was read with.
///
/// The write targets the latest stored version. If that version's status
/// no longer matches the snapshot someone else changed it in between, and
/// the pass is retried from fresh state instead of overwriting it.
pub async fn patch_if_changed(
    writer: &dyn StatusWriter,
    original: &MariaDBCluster,
    mutated: &MariaDBClusterStatus,
) -> Result<PatchOutcome> {
    let ops = diff_status(original.status.as_ref(), mutated)?;
    if ops.is_empty() {
        return Ok(PatchOutcome::Unchanged);
    }

    let namespace = original.namespace().unwrap_or_default();
    let name = original.name_any();
    let key = join_key(&namespace, &name);

    let Some(latest) = writer.get_latest(&namespace, &name).await? else {
        debug!(cluster = %key, "cluster deleted before status write");
        return Ok(PatchOutcome::Gone);
    };
    if latest.status != original.status {
        return Err(Error::conflict(key, "status changed since it was read"));
    }
    let resource_version = latest.resource_version().ok_or_else(|| {
        Error::internal_with_context("patch", format!("{key} has no resourceVersion"))
    })?;

    let operations = ops.len();
    let mut guarded = Vec::with_capacity(operations + 1);
    guarded.push(PatchOperation::Test(TestOperation {
        path: PointerBuf::from_tokens(["metadata", "resourceVersion"]),
        value: Value::String(resource_version),
    }));
    guarded.extend(ops);

    writer
        .apply_status_patch(&namespace, &name, json_patch::Patch(guarded))
        .await?;
    debug!(cluster = %key, operations, "status patched");
    Ok(PatchOutcome::Applied { operations })
}
