//! CRD installation on startup

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};

use galera_common::crd::MariaDBCluster;
use galera_common::FIELD_MANAGER;

/// Server-side apply the `MariaDBCluster` CRD so it always matches this binary
pub async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();
    let crd = MariaDBCluster::crd();
    let name = MariaDBCluster::crd_name();

    tracing::info!(crd = name, "Installing CRD");
    crds.patch(name, &params, &Patch::Apply(&crd))
        .await
        .map_err(|e| anyhow::anyhow!("failed to install {name} CRD: {e}"))?;
    tracing::info!(crd = name, "CRD installed/updated");
    Ok(())
}

/// CRD manifest as YAML for `--crd`
pub fn crd_yaml() -> anyhow::Result<String> {
    serde_yaml::to_string(&MariaDBCluster::crd())
        .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {e}"))
}
