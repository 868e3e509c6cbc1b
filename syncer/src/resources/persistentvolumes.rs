//! PersistentVolume syncer. The one kind in this implementation that cannot
//! be expressed through the generic [`crate::framework::reconcile`] dispatch:
//! a PV may be bound either by a virtual-originated PVC (forward direction,
//! `physicalName` applies as usual) or by a host-originated dynamic
//! provisioner (reverse direction; the pPV keeps its provisioner-assigned
//! name verbatim and carries no marker label). The two directions disagree
//! about what "the physical name of this key" even means, so this module
//! drives its own reconcile loop instead of implementing [`KindSyncer`]'s
//! `physical_name` as a single total function.
//!
//! Grounded on `persistentvolumes/translate.go`: `translate`/`translateUpdate`
//! for the forward direction, `translateBackwards`/`translateUpdateBackwards`
//! for the reverse one.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{ObjectReference, PersistentVolume, PersistentVolumeClaim, PersistentVolumeSpec};
use kube::api::{Api, DeleteParams, Patch, PatchParams};
use kube::runtime::{watcher, WatchStreamExt};
use kube::ResourceExt;
use translate::consts::HOST_PV_ANNOTATION;
use translate::mapping::NamespacedName;
use translate::metadata::{original_identity, translate_metadata_update, VirtualIdentity};
use translate::name::physical_name_cluster_scoped;

use crate::consts::FIELD_MANAGER;
use crate::context::RegisterContext;
use crate::error::Result;
use crate::framework::{Capabilities, KindSyncer};
use crate::queue::Queue;

/// Syncer for the forward (V-originated) direction of `PersistentVolume`.
/// Only ever driven through [`reconcile`] in this module, never through
/// [`crate::framework::reconcile`].
pub struct PersistentVolumeSyncer;

fn identity_of(v_obj: &PersistentVolume) -> VirtualIdentity {
    VirtualIdentity {
        name: v_obj.name_any(),
        namespace: String::new(),
        uid: v_obj.uid(),
        labels: v_obj.labels().clone(),
        annotations: std::collections::BTreeMap::new(),
    }
}

#[async_trait]
impl KindSyncer for PersistentVolumeSyncer {
    type Virtual = PersistentVolume;
    type Physical = PersistentVolume;

    const NAME: &'static str = "PersistentVolume";
    const CAPABILITIES: Capabilities = Capabilities::DOWN | Capabilities::UP;
    const CLUSTER_SCOPED: bool = true;

    fn physical_name(&self, ctx: &RegisterContext, v_key: &NamespacedName) -> String {
        physical_name_cluster_scoped(&v_key.name, &ctx.target_namespace, &ctx.suffix)
    }

    async fn sync_down(&self, ctx: &RegisterContext, v_obj: &PersistentVolume) -> Result<()> {
        apply_forward(self, ctx, None, v_obj).await
    }

    async fn sync(&self, ctx: &RegisterContext, p_obj: &PersistentVolume, v_obj: &PersistentVolume) -> Result<()> {
        apply_forward(self, ctx, Some(p_obj), v_obj).await
    }

    async fn sync_up(&self, ctx: &RegisterContext, p_obj: &PersistentVolume) -> Result<()> {
        reverse_from_physical(ctx, p_obj).await
    }
}

/// Forward direction: vPV exists, drives a managed pPV. Clears `claimRef`
/// (the host scheduler rebinds it once the packed pPVC shows up) and
/// rewrites `storageClassName` through the cluster-scoped name function.
async fn apply_forward(
    syncer: &PersistentVolumeSyncer,
    ctx: &RegisterContext,
    p_obj: Option<&PersistentVolume>,
    v_obj: &PersistentVolume,
) -> Result<()> {
    let v_key = NamespacedName {
        namespace: String::new(),
        name: v_obj.name_any(),
    };
    let p_name = syncer.physical_name(ctx, &v_key);
    let identity = identity_of(v_obj);
    let existing_annotations = p_obj.map(kube::ResourceExt::annotations).cloned().unwrap_or_default();
    let metadata = translate_metadata_update(&identity, &p_name, None, &ctx.suffix, &existing_annotations);

    let v_spec = v_obj.spec.clone().unwrap_or_default();
    let storage_class_name = v_spec
        .storage_class_name
        .as_deref()
        .filter(|name| !name.is_empty())
        .map(|name| physical_name_cluster_scoped(name, &ctx.target_namespace, &ctx.suffix));

    let desired = PersistentVolume {
        metadata,
        spec: Some(PersistentVolumeSpec {
            persistent_volume_source: v_spec.persistent_volume_source,
            capacity: v_spec.capacity,
            access_modes: v_spec.access_modes,
            persistent_volume_reclaim_policy: v_spec.persistent_volume_reclaim_policy,
            storage_class_name,
            node_affinity: v_spec.node_affinity,
            volume_mode: v_spec.volume_mode,
            mount_options: v_spec.mount_options,
            // the host scheduler/provisioner rebinds this; never copied
            // forward from the vPV's own claimRef.
            claim_ref: None,
            ..PersistentVolumeSpec::default()
        }),
        status: None,
    };

    let api: Api<PersistentVolume> = Api::all(ctx.physical_client.clone());
    let _patched = api
        .patch(&p_name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&desired))
        .await?;
    Ok(())
}

/// Reverse direction: `p_obj` is an unmanaged pPV (no marker label), i.e. a
/// host dynamic provisioner created it directly. Resolves the vPVC it is
/// bound to (via the pPVC it actually names, whose own identity annotations
/// point back to V), then creates or reconciles a vPV of the same name,
/// overwriting `claimRef` to reference the vPVC and annotating
/// `HOST_PV_ANNOTATION` so subsequent reconciles recognize the mapping.
async fn reverse_from_physical(ctx: &RegisterContext, p_obj: &PersistentVolume) -> Result<()> {
    let p_name = p_obj.name_any();
    let v_api: Api<PersistentVolume> = Api::all(ctx.virtual_client.clone());

    let Some(p_spec) = p_obj.spec.clone() else {
        return Ok(());
    };
    let Some(claim_ref) = p_spec.claim_ref.clone() else {
        return Ok(());
    };

    let v_pvc = resolve_bound_virtual_pvc(ctx, &claim_ref).await?;

    let existing_v_pv = v_api.get_opt(&p_name).await?;
    let existing_annotations = existing_v_pv.as_ref().map(|v| v.annotations().clone()).unwrap_or_default();

    let mut annotations = existing_annotations;
    annotations.insert(HOST_PV_ANNOTATION.to_owned(), p_name.clone());

    let mut spec = p_spec.clone();
    if let Some(vpvc) = v_pvc.as_ref() {
        spec.claim_ref = Some(ObjectReference {
            kind: claim_ref.kind.clone(),
            api_version: claim_ref.api_version.clone(),
            name: Some(vpvc.name_any()),
            namespace: vpvc.namespace(),
            uid: vpvc.uid(),
            resource_version: vpvc.resource_version(),
            ..ObjectReference::default()
        });
        if let Some(storage_class) = vpvc.spec.as_ref().and_then(|s| s.storage_class_name.clone()) {
            spec.storage_class_name = Some(storage_class);
        }
        // capacity only flows P->V once this mapping is established; a vPV
        // created without a bound vPVC yet has nothing to compare against.
        if existing_v_pv.is_some() {
            spec.capacity = p_spec.capacity.clone();
        }
    }

    let desired = PersistentVolume {
        metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
            name: Some(p_name.clone()),
            labels: Some(p_obj.labels().clone()),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: Some(spec),
        status: None,
    };

    let _patched = v_api
        .patch(&p_name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&desired))
        .await?;
    Ok(())
}

async fn resolve_bound_virtual_pvc(
    ctx: &RegisterContext,
    claim_ref: &ObjectReference,
) -> Result<Option<PersistentVolumeClaim>> {
    let Some(p_pvc_name) = claim_ref.name.as_deref() else {
        return Ok(None);
    };
    let p_pvc_api: Api<PersistentVolumeClaim> = Api::namespaced(ctx.physical_client.clone(), &ctx.target_namespace);
    let Some(p_pvc) = p_pvc_api.get_opt(p_pvc_name).await? else {
        return Ok(None);
    };
    let Some((v_name, v_namespace)) = original_identity(p_pvc.annotations(), p_pvc_name) else {
        return Ok(None);
    };
    let v_pvc_api: Api<PersistentVolumeClaim> = Api::namespaced(ctx.virtual_client.clone(), &v_namespace);
    Ok(v_pvc_api.get_opt(&v_name).await?)
}

/// Whether a pPV carries the forward-sync marker label (created by
/// [`apply_forward`]) rather than being host-provisioner owned.
fn is_forward_managed(p_obj: &PersistentVolume) -> bool {
    p_obj.labels().contains_key(translate::consts::MARKER_LABEL)
}

/// What the forward-direction half of [`reconcile`] should do, given whether
/// a vPV and its forward-managed pPV currently exist. A vPV with no pPV yet
/// is a create; a pPV with no vPV left is an orphan this syncer's own prior
/// `apply_forward` call created and must now garbage-collect — it is never
/// routed through [`reverse_from_physical`], which is for host-provisioner
/// pPVs only.
#[derive(Debug, PartialEq, Eq)]
enum ForwardAction {
    Sync,
    Create,
    Gc,
    None,
}

fn forward_action(v_exists: bool, p_exists: bool) -> ForwardAction {
    match (v_exists, p_exists) {
        (true, true) => ForwardAction::Sync,
        (true, false) => ForwardAction::Create,
        (false, true) => ForwardAction::Gc,
        (false, false) => ForwardAction::None,
    }
}

/// Bespoke reconcile loop for PV keys. `key.name` is interpreted two ways in
/// sequence: first as a vPV name (forward direction, looked up against the
/// translated physical name), then, if that yields nothing, as a pPV name
/// directly (reverse direction, looked up only if unmanaged).
pub async fn reconcile(ctx: &RegisterContext, key: &NamespacedName) -> Result<()> {
    let syncer = PersistentVolumeSyncer;
    let v_api: Api<PersistentVolume> = Api::all(ctx.virtual_client.clone());
    let p_api: Api<PersistentVolume> = Api::all(ctx.physical_client.clone());

    let v_obj = v_api.get_opt(&key.name).await?;
    let forward_p_name = syncer.physical_name(ctx, key);
    let forward_p_obj = p_api.get_opt(&forward_p_name).await?;

    match (forward_action(v_obj.is_some(), forward_p_obj.is_some()), v_obj) {
        (ForwardAction::Sync, Some(v_obj)) => return apply_forward(&syncer, ctx, forward_p_obj.as_ref(), &v_obj).await,
        (ForwardAction::Create, Some(v_obj)) => return apply_forward(&syncer, ctx, None, &v_obj).await,
        (ForwardAction::Gc, _) => {
            tracing::info!(pv = %forward_p_name, "deleting orphaned forward-managed physical volume");
            p_api.delete(&forward_p_name, &DeleteParams::default()).await?;
            return Ok(());
        }
        _ => {}
    }

    // Not a (known) forward key; check whether `key.name` names an unmanaged
    // pPV directly (reverse direction).
    if let Some(p_obj) = p_api.get_opt(&key.name).await? {
        if !is_forward_managed(&p_obj) {
            reverse_from_physical(ctx, &p_obj).await?;
        }
    }
    Ok(())
}

/// Spawns workers draining `queue` through this module's bespoke
/// [`reconcile`] rather than [`crate::framework::reconcile`].
pub fn spawn_workers(
    ctx: Arc<RegisterContext>,
    queue: Arc<Queue<NamespacedName>>,
    worker_count: usize,
) -> Vec<tokio::task::JoinHandle<()>> {
    (0..worker_count)
        .map(|_| {
            let ctx = Arc::clone(&ctx);
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                while let Some(key) = queue.pop().await {
                    let timer = crate::metrics::reconcile_timer();
                    let result = reconcile(ctx.as_ref(), &key).await;
                    timer.observe_duration();
                    queue.done(key.clone()).await;
                    if let Err(err) = result {
                        tracing::error!(kind = "PersistentVolume", key = %key, error = %err, "reconcile failed");
                        crate::metrics::record_failure("PersistentVolume");
                        if let Some(delay) = err.requeue_after() {
                            queue.add_after(key, delay);
                        }
                    }
                }
                tracing::debug!(kind = "PersistentVolume", "worker shut down");
            })
        })
        .collect()
}

/// Spawns the vPV and pPV watches feeding the PV queue. The vPV side always
/// keys by its own (bare) name; the pPV side keys by the bare pPV name too —
/// [`reconcile`] itself is what decides whether that name is a forward
/// (translated) physical name or an unmanaged reverse name, so the watch
/// loop does not need to replicate that branch.
pub fn spawn_watches(ctx: Arc<RegisterContext>, queue: Arc<Queue<NamespacedName>>) -> Vec<tokio::task::JoinHandle<()>> {
    vec![
        spawn_virtual_watch(Arc::clone(&ctx), Arc::clone(&queue)),
        spawn_physical_watch(ctx, queue),
    ]
}

fn spawn_virtual_watch(ctx: Arc<RegisterContext>, queue: Arc<Queue<NamespacedName>>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let api: Api<PersistentVolume> = Api::all(ctx.virtual_client.clone());
        let stream = watcher(api, watcher::Config::default()).default_backoff().touched_objects();
        futures::pin_mut!(stream);
        while let Some(event) = stream.next().await {
            match event {
                Ok(v_obj) => queue.add(NamespacedName { namespace: String::new(), name: v_obj.name_any() }).await,
                Err(err) => tracing::warn!(kind = "PersistentVolume", side = "virtual", error = %err, "watch error"),
            }
        }
    })
}

fn spawn_physical_watch(ctx: Arc<RegisterContext>, queue: Arc<Queue<NamespacedName>>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let api: Api<PersistentVolume> = Api::all(ctx.physical_client.clone());
        let stream = watcher(api, watcher::Config::default()).default_backoff().touched_objects();
        futures::pin_mut!(stream);
        while let Some(event) = stream.next().await {
            match event {
                Ok(p_obj) => {
                    let key = if is_forward_managed(&p_obj) {
                        original_identity(p_obj.annotations(), &p_obj.name_any())
                            .map(|(name, _namespace)| name)
                            .unwrap_or_else(|| p_obj.name_any())
                    } else {
                        p_obj.name_any()
                    };
                    queue.add(NamespacedName { namespace: String::new(), name: key }).await;
                }
                Err(err) => tracing::warn!(kind = "PersistentVolume", side = "physical", error = %err, "watch error"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_managed_requires_marker_label() {
        let mut pv = PersistentVolume::default();
        assert!(!is_forward_managed(&pv));
        pv.metadata.labels = Some(BTreeMap::from([(
            translate::consts::MARKER_LABEL.to_owned(),
            "vc1".to_owned(),
        )]));
        assert!(is_forward_managed(&pv));
    }

    #[test]
    fn forward_action_gcs_orphaned_physical_volume() {
        // vPV gone, its forward-managed pPV still present: must be deleted,
        // never handed to reverse_from_physical.
        assert_eq!(forward_action(false, true), ForwardAction::Gc);
    }

    #[test]
    fn forward_action_covers_remaining_cases() {
        assert_eq!(forward_action(true, true), ForwardAction::Sync);
        assert_eq!(forward_action(true, false), ForwardAction::Create);
        assert_eq!(forward_action(false, false), ForwardAction::None);
    }
}
