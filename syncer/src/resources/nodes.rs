//! Node syncer. The second kind (besides PersistentVolume) that cannot be
//! expressed as a pure Down/Up dispatch over [`crate::framework::reconcile`]:
//! `is_managed` here means "should this physical node currently be
//! projected at all", not "does it carry the marker label" (a physical
//! node is never created or owned by this syncer), and the orphan-cleanup
//! branch the generic framework takes for an unmanaged pObj — deleting the
//! physical object — would delete a real host-cluster node. This module
//! drives its own reconcile loop instead.
//!
//! Grounded on `nodes/syncer.go`: `shouldSync`, `isNodeNeededByPod`,
//! `filterOutVirtualDaemonSets`/`filterOutPhysicalDaemonSets`,
//! `PhysicalToVirtual` (identity name).

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::{Node, NodeStatus, Pod};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::runtime::{watcher, WatchStreamExt};
use kube::ResourceExt;

use crate::consts::FIELD_MANAGER;
use crate::context::RegisterContext;
use crate::error::Result;
use crate::nodeservice::NodeServiceProvider;
use crate::queue::Queue;
use translate::mapping::NamespacedName;

/// Bespoke reconcile entry point for Node keys (`key.namespace` is always
/// empty; Nodes are cluster-scoped).
pub async fn reconcile(ctx: &RegisterContext, node_service: &NodeServiceProvider, key: &NamespacedName) -> Result<()> {
    let v_api: Api<Node> = Api::all(ctx.virtual_client.clone());
    let p_api: Api<Node> = Api::all(ctx.physical_client.clone());

    let v_obj = v_api.get_opt(&key.name).await?;
    let p_obj = p_api.get_opt(&key.name).await?;

    match (v_obj, p_obj) {
        (Some(_), Some(p_obj)) => {
            if !should_sync(ctx, &p_obj).await? {
                tracing::info!(node = %key.name, "delete virtual node, no longer needed by any pod");
                v_api.delete(&key.name, &DeleteParams::default()).await?;
                node_service.remove(&key.name).await?;
                return Ok(());
            }
            sync(ctx, node_service, &p_obj).await
        }
        (Some(_), None) => {
            tracing::info!(node = %key.name, "delete virtual node, physical node is gone");
            v_api.delete(&key.name, &DeleteParams::default()).await?;
            node_service.remove(&key.name).await?;
            Ok(())
        }
        (None, Some(p_obj)) => {
            if should_sync(ctx, &p_obj).await? {
                sync_up(ctx, &p_obj).await
            } else {
                Ok(())
            }
        }
        (None, None) => Ok(()),
    }
}

/// Creates a vNode mirroring `p_obj`'s labels/annotations verbatim; Node
/// names are identity-mapped (no tenancy suffix), so there is nothing else
/// to translate on create.
async fn sync_up(ctx: &RegisterContext, p_obj: &Node) -> Result<()> {
    let v_api: Api<Node> = Api::all(ctx.virtual_client.clone());
    tracing::info!(node = %p_obj.name_any(), "create virtual node, needed by a virtual pod");
    let desired = Node {
        metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
            name: Some(p_obj.name_any()),
            labels: Some(p_obj.labels().clone()),
            annotations: Some(p_obj.annotations().clone()),
            ..Default::default()
        },
        spec: None,
        status: None,
    };
    let _created = v_api
        .patch(&p_obj.name_any(), &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&desired))
        .await?;
    Ok(())
}

/// Backflows status (and labels that moved) from the physical node, and
/// rewrites the kubelet-facing addresses to the Node-Service Provider's
/// per-node Service ClusterIP when fake kubelets are enabled.
async fn sync(ctx: &RegisterContext, node_service: &NodeServiceProvider, p_obj: &Node) -> Result<()> {
    let v_api: Api<Node> = Api::all(ctx.virtual_client.clone());
    let name = p_obj.name_any();

    let mut status = p_obj.status.clone().unwrap_or_default();
    if !ctx.options.disable_fake_kubelets {
        let cluster_ip = node_service.ensure(&name).await?;
        if !cluster_ip.is_empty() {
            status = rewrite_kubelet_address(status, &cluster_ip);
        }
    }

    let status_patch = serde_json::json!({ "status": status });
    v_api
        .patch_status(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Merge(&status_patch))
        .await?;

    let desired_meta = k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
        labels: Some(p_obj.labels().clone()),
        annotations: Some(p_obj.annotations().clone()),
        ..Default::default()
    };
    let meta_patch = serde_json::json!({ "metadata": { "labels": desired_meta.labels, "annotations": desired_meta.annotations } });
    v_api
        .patch(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Merge(&meta_patch))
        .await?;
    Ok(())
}

fn rewrite_kubelet_address(mut status: NodeStatus, cluster_ip: &str) -> NodeStatus {
    if let Some(addresses) = status.addresses.as_mut() {
        for address in addresses.iter_mut() {
            if address.type_ == "InternalIP" {
                address.address = cluster_ip.to_owned();
            }
        }
    }
    status
}

/// `shouldSync`: true if the administrator-configured node selector matches,
/// or (when no selector is configured / `sync_all_nodes` is false) if a
/// non-DaemonSet pod is currently assigned to this node in either store.
async fn should_sync(ctx: &RegisterContext, p_node: &Node) -> Result<bool> {
    if ctx.options.sync_all_nodes {
        return Ok(true);
    }
    if let Some(selector) = ctx.options.node_selector.as_deref() {
        return Ok(matches_selector(p_node.labels(), selector));
    }
    is_node_needed_by_pod(ctx, &p_node.name_any()).await
}

fn matches_selector(labels: &std::collections::BTreeMap<String, String>, selector: &str) -> bool {
    selector.split(',').map(str::trim).filter(|s| !s.is_empty()).all(|requirement| {
        match requirement.split_once('=') {
            Some((key, value)) => labels.get(key).map(String::as_str) == Some(value),
            None => labels.contains_key(requirement),
        }
    })
}

async fn is_node_needed_by_pod(ctx: &RegisterContext, node_name: &str) -> Result<bool> {
    let field_selector = format!("spec.nodeName={node_name}");
    let list_params = ListParams::default().fields(&field_selector);

    let v_pods: Api<Pod> = Api::all(ctx.virtual_client.clone());
    let v_list = v_pods.list(&list_params).await?;
    if v_list.items.iter().any(|pod| !is_daemonset_pod(pod)) {
        return Ok(true);
    }

    let p_pods: Api<Pod> = Api::namespaced(ctx.physical_client.clone(), &ctx.target_namespace);
    let p_list = p_pods.list(&list_params).await?;
    Ok(p_list.items.iter().any(|pod| !is_daemonset_pod(pod)))
}

fn is_daemonset_pod(pod: &Pod) -> bool {
    pod.owner_references().iter().any(|owner| owner.kind == "DaemonSet")
}

/// Spawns workers draining `queue` through this module's bespoke
/// [`reconcile`].
pub fn spawn_workers(
    ctx: Arc<RegisterContext>,
    node_service: Arc<NodeServiceProvider>,
    queue: Arc<Queue<NamespacedName>>,
    worker_count: usize,
) -> Vec<tokio::task::JoinHandle<()>> {
    (0..worker_count)
        .map(|_| {
            let ctx = Arc::clone(&ctx);
            let node_service = Arc::clone(&node_service);
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                while let Some(key) = queue.pop().await {
                    let timer = crate::metrics::reconcile_timer();
                    let result = reconcile(ctx.as_ref(), node_service.as_ref(), &key).await;
                    timer.observe_duration();
                    queue.done(key.clone()).await;
                    if let Err(err) = result {
                        tracing::error!(kind = "Node", key = %key, error = %err, "reconcile failed");
                        crate::metrics::record_failure("Node");
                        if let Some(delay) = err.requeue_after() {
                            queue.add_after(key, delay);
                        }
                    }
                }
                tracing::debug!(kind = "Node", "worker shut down");
            })
        })
        .collect()
}

/// Spawns the four watches feeding the Node queue: vNodes and pNodes
/// directly by name, and vPods/pPods indirectly by `spec.nodeName` — a pod
/// assignment changing is itself a reason to re-evaluate `shouldSync` for
/// the node it now does (or no longer does) reference.
pub fn spawn_watches(ctx: Arc<RegisterContext>, queue: Arc<Queue<NamespacedName>>) -> Vec<tokio::task::JoinHandle<()>> {
    vec![
        spawn_node_watch(Arc::clone(&ctx), Arc::clone(&queue), true),
        spawn_node_watch(Arc::clone(&ctx), Arc::clone(&queue), false),
        spawn_pod_watch(Arc::clone(&ctx), Arc::clone(&queue), true),
        spawn_pod_watch(ctx, queue, false),
    ]
}

fn spawn_node_watch(ctx: Arc<RegisterContext>, queue: Arc<Queue<NamespacedName>>, virtual_side: bool) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let client = if virtual_side { ctx.virtual_client.clone() } else { ctx.physical_client.clone() };
        let api: Api<Node> = Api::all(client);
        let stream = watcher(api, watcher::Config::default()).default_backoff().touched_objects();
        futures::pin_mut!(stream);
        while let Some(event) = stream.next().await {
            match event {
                Ok(node) => {
                    queue.add(NamespacedName { namespace: String::new(), name: node.name_any() }).await;
                }
                Err(err) => {
                    tracing::warn!(kind = "Node", side = if virtual_side { "virtual" } else { "physical" }, error = %err, "watch error");
                }
            }
        }
    })
}

fn spawn_pod_watch(ctx: Arc<RegisterContext>, queue: Arc<Queue<NamespacedName>>, virtual_side: bool) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let api: Api<Pod> = if virtual_side {
            Api::all(ctx.virtual_client.clone())
        } else {
            Api::namespaced(ctx.physical_client.clone(), &ctx.target_namespace)
        };
        let stream = watcher(api, watcher::Config::default()).default_backoff().touched_objects();
        futures::pin_mut!(stream);
        while let Some(event) = stream.next().await {
            match event {
                Ok(pod) => {
                    if let Some(node_name) = pod.spec.as_ref().and_then(|s| s.node_name.clone()) {
                        queue.add(NamespacedName { namespace: String::new(), name: node_name }).await;
                    }
                }
                Err(err) => {
                    tracing::warn!(kind = "Node", side = if virtual_side { "virtual-pod" } else { "physical-pod" }, error = %err, "watch error");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_matches_exact_key_value() {
        let mut labels = std::collections::BTreeMap::new();
        labels.insert("kubernetes.io/role".to_owned(), "worker".to_owned());
        assert!(matches_selector(&labels, "kubernetes.io/role=worker"));
        assert!(!matches_selector(&labels, "kubernetes.io/role=control-plane"));
    }

    #[test]
    fn selector_bare_key_checks_presence() {
        let mut labels = std::collections::BTreeMap::new();
        labels.insert("gpu".to_owned(), "true".to_owned());
        assert!(matches_selector(&labels, "gpu"));
        assert!(!matches_selector(&labels, "tpu"));
    }

    #[test]
    fn daemonset_pods_are_filtered_out() {
        let mut pod = Pod::default();
        pod.metadata.owner_references = Some(vec![k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference {
            kind: "DaemonSet".to_owned(),
            name: "ds".to_owned(),
            uid: "uid".to_owned(),
            api_version: "apps/v1".to_owned(),
            ..Default::default()
        }]);
        assert!(is_daemonset_pod(&pod));
    }
}
