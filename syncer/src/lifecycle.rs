//! Lifecycle Controller: pause/resume a whole virtual cluster by quiescing
//! its own workloads (and three known auxiliary ones) via replica-count
//! bookkeeping. Separate from the per-resource syncers above — there is no
//! vObj/pObj pair here, only Deployments/StatefulSets in the target
//! namespace.
//!
//! Grounded on `pkg/lifecycle/lifecycle.go`: `PauseVCluster`/`ResumeVCluster`
//! try the vcluster's own StatefulSet first, falling back to a Deployment,
//! then apply the same operation to three auxiliary label selectors
//! (`vcluster-api`, `vcluster-controller`, `vcluster-etcd`). Already-paused
//! is a no-op success; resuming something not currently paused reports
//! failure so the CLI can surface a clear error.

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};

use translate::consts::{PAUSED_ANNOTATION, PAUSED_REPLICAS_ANNOTATION};

use crate::consts::{DEFAULT_RESUME_REPLICAS, FIELD_MANAGER, LIFECYCLE_POLL_INTERVAL, LIFECYCLE_POLL_TIMEOUT};
use crate::error::{Result, SyncError};

/// Pauses the virtual cluster named `name` in `namespace`: scales its own
/// StatefulSet (or, failing that, Deployment) to zero, then does the same
/// for the `vcluster-api`/`vcluster-controller`/`vcluster-etcd` auxiliary
/// workloads if the main one was found as a Deployment (a StatefulSet-only
/// deployment mode has no separate control-plane processes to quiesce).
pub async fn pause(client: &Client, name: &str, namespace: &str) -> Result<()> {
    let main_selector = format!("app=vcluster,release={name}");
    if scale_down_statefulsets(client, &main_selector, namespace).await? {
        return Ok(());
    }
    if !scale_down_deployments(client, &main_selector, namespace).await? {
        return Err(SyncError::NotFound(format!(
            "couldn't find vcluster {name} in namespace {namespace}"
        )));
    }
    scale_down_deployments(client, &format!("app=vcluster-api,release={name}"), namespace).await?;
    scale_down_deployments(client, &format!("app=vcluster-controller,release={name}"), namespace).await?;
    scale_down_statefulsets(client, &format!("app=vcluster-etcd,release={name}"), namespace).await?;
    Ok(())
}

/// Inverse of [`pause`]. Reports [`SyncError::NotFound`] if the main
/// workload either doesn't exist or isn't currently paused.
pub async fn resume(client: &Client, name: &str, namespace: &str) -> Result<()> {
    let main_selector = format!("app=vcluster,release={name}");
    if scale_up_statefulsets(client, &main_selector, namespace).await? {
        return Ok(());
    }
    if !scale_up_deployments(client, &main_selector, namespace).await? {
        return Err(SyncError::NotFound(format!(
            "couldn't find a paused vcluster {name} in namespace {namespace}"
        )));
    }
    scale_up_deployments(client, &format!("app=vcluster-api,release={name}"), namespace).await?;
    scale_up_deployments(client, &format!("app=vcluster-controller,release={name}"), namespace).await?;
    scale_up_statefulsets(client, &format!("app=vcluster-etcd,release={name}"), namespace).await?;
    Ok(())
}

/// Returns `true` if any matching Deployment existed (paused or not).
async fn scale_down_deployments(client: &Client, label_selector: &str, namespace: &str) -> Result<bool> {
    let api: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let list = api.list(&kube::api::ListParams::default().labels(label_selector)).await?;
    if list.items.is_empty() {
        return Ok(false);
    }
    for item in list.items {
        if item.annotations().get(PAUSED_ANNOTATION).map(String::as_str) == Some("true") {
            tracing::info!(deployment = %item.name_any(), "already paused");
            return Ok(true);
        }
        let replicas = item.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        if replicas == 0 {
            continue;
        }
        let name = item.name_any();
        let patch = serde_json::json!({
            "metadata": {
                "annotations": {
                    PAUSED_ANNOTATION: "true",
                    PAUSED_REPLICAS_ANNOTATION: replicas.to_string(),
                }
            },
            "spec": { "replicas": 0 }
        });
        tracing::info!(deployment = %name, "scaling down");
        api.patch(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Merge(&patch))
            .await?;
        wait_replicas_zero(&api, &name).await?;
    }
    Ok(true)
}

async fn scale_down_statefulsets(client: &Client, label_selector: &str, namespace: &str) -> Result<bool> {
    let api: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
    let list = api.list(&kube::api::ListParams::default().labels(label_selector)).await?;
    if list.items.is_empty() {
        return Ok(false);
    }
    for item in list.items {
        if item.annotations().get(PAUSED_ANNOTATION).map(String::as_str) == Some("true") {
            tracing::info!(statefulset = %item.name_any(), "already paused");
            return Ok(true);
        }
        let replicas = item.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        if replicas == 0 {
            continue;
        }
        let name = item.name_any();
        let patch = serde_json::json!({
            "metadata": {
                "annotations": {
                    PAUSED_ANNOTATION: "true",
                    PAUSED_REPLICAS_ANNOTATION: replicas.to_string(),
                }
            },
            "spec": { "replicas": 0 }
        });
        tracing::info!(statefulset = %name, "scaling down");
        api.patch(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Merge(&patch))
            .await?;
        wait_replicas_zero(&api, &name).await?;
    }
    Ok(true)
}

async fn scale_up_deployments(client: &Client, label_selector: &str, namespace: &str) -> Result<bool> {
    let api: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let list = api.list(&kube::api::ListParams::default().labels(label_selector)).await?;
    if list.items.is_empty() {
        return Ok(false);
    }
    for item in list.items {
        if item.annotations().get(PAUSED_ANNOTATION).map(String::as_str) != Some("true") {
            return Ok(false);
        }
        let replicas = item
            .annotations()
            .get(PAUSED_REPLICAS_ANNOTATION)
            .and_then(|v| v.parse::<i32>().ok())
            .unwrap_or(DEFAULT_RESUME_REPLICAS);
        let name = item.name_any();
        let patch = serde_json::json!({
            "metadata": { "annotations": { PAUSED_ANNOTATION: null, PAUSED_REPLICAS_ANNOTATION: null } },
            "spec": { "replicas": replicas }
        });
        tracing::info!(deployment = %name, %replicas, "scaling up");
        api.patch(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Merge(&patch))
            .await?;
    }
    Ok(true)
}

async fn scale_up_statefulsets(client: &Client, label_selector: &str, namespace: &str) -> Result<bool> {
    let api: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
    let list = api.list(&kube::api::ListParams::default().labels(label_selector)).await?;
    if list.items.is_empty() {
        return Ok(false);
    }
    for item in list.items {
        if item.annotations().get(PAUSED_ANNOTATION).map(String::as_str) != Some("true") {
            return Ok(false);
        }
        let replicas = item
            .annotations()
            .get(PAUSED_REPLICAS_ANNOTATION)
            .and_then(|v| v.parse::<i32>().ok())
            .unwrap_or(DEFAULT_RESUME_REPLICAS);
        let name = item.name_any();
        let patch = serde_json::json!({
            "metadata": { "annotations": { PAUSED_ANNOTATION: null, PAUSED_REPLICAS_ANNOTATION: null } },
            "spec": { "replicas": replicas }
        });
        tracing::info!(statefulset = %name, %replicas, "scaling up");
        api.patch(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Merge(&patch))
            .await?;
    }
    Ok(true)
}

/// Polls at [`LIFECYCLE_POLL_INTERVAL`] until `status.replicas == 0` or
/// [`LIFECYCLE_POLL_TIMEOUT`] elapses. Cancellation-aware: the caller's
/// surrounding task can be aborted at any `.await` point here without
/// leaving a stray timer behind.
async fn wait_replicas_zero<K>(api: &Api<K>, name: &str) -> Result<()>
where
    K: kube::Resource<DynamicType = ()> + Clone + std::fmt::Debug + serde::de::DeserializeOwned + ReplicaStatus,
{
    let deadline = tokio::time::Instant::now() + LIFECYCLE_POLL_TIMEOUT;
    loop {
        let obj = api.get(name).await?;
        if obj.status_replicas() == 0 {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(SyncError::Transient(format!("{name} did not scale down within {LIFECYCLE_POLL_TIMEOUT:?}")));
        }
        tokio::time::sleep(LIFECYCLE_POLL_INTERVAL).await;
    }
}

trait ReplicaStatus {
    fn status_replicas(&self) -> i32;
}

impl ReplicaStatus for Deployment {
    fn status_replicas(&self) -> i32 {
        self.status.as_ref().and_then(|s| s.replicas).unwrap_or(0)
    }
}

impl ReplicaStatus for StatefulSet {
    fn status_replicas(&self) -> i32 {
        self.status.as_ref().map(|s| s.replicas).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_resume_replicas_is_one() {
        assert_eq!(DEFAULT_RESUME_REPLICAS, 1);
    }
}
