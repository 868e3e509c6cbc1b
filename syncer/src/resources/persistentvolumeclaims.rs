//! PersistentVolumeClaim syncer. Down-only: the vPVC's `storageClassName`
//! is rewritten through the cluster-scoped name function (StorageClasses are
//! cluster-scoped), `volumeName` is left for the host scheduler/provisioner
//! to bind rather than copied across verbatim, and `status` flows P→V so the
//! tenant observes `phase`/`capacity`/`accessModes` as the host cluster
//! binds the claim.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, PersistentVolumeClaimSpec, PersistentVolumeClaimStatus};
use kube::api::{Patch, PatchParams};
use kube::ResourceExt;
use translate::mapping::NamespacedName;
use translate::metadata::{translate_metadata_update, VirtualIdentity};
use translate::name::{physical_name, physical_name_cluster_scoped};

use crate::consts::FIELD_MANAGER;
use crate::context::RegisterContext;
use crate::error::Result;
use crate::framework::{Capabilities, KindSyncer};

/// Syncer for `PersistentVolumeClaim`.
pub struct PersistentVolumeClaimSyncer;

fn identity_of(v_obj: &PersistentVolumeClaim) -> VirtualIdentity {
    VirtualIdentity {
        name: v_obj.name_any(),
        namespace: v_obj.namespace().unwrap_or_default(),
        uid: v_obj.uid(),
        labels: v_obj.labels().clone(),
        annotations: std::collections::BTreeMap::new(),
    }
}

#[async_trait]
impl KindSyncer for PersistentVolumeClaimSyncer {
    type Virtual = PersistentVolumeClaim;
    type Physical = PersistentVolumeClaim;

    const NAME: &'static str = "PersistentVolumeClaim";
    const CAPABILITIES: Capabilities = Capabilities::DOWN;

    fn physical_name(&self, ctx: &RegisterContext, v_key: &NamespacedName) -> String {
        physical_name(&v_key.name, &v_key.namespace, &ctx.suffix)
    }

    async fn sync_down(&self, ctx: &RegisterContext, v_obj: &PersistentVolumeClaim) -> Result<()> {
        apply(self, ctx, None, v_obj).await
    }

    async fn sync(&self, ctx: &RegisterContext, p_obj: &PersistentVolumeClaim, v_obj: &PersistentVolumeClaim) -> Result<()> {
        apply(self, ctx, Some(p_obj), v_obj).await
    }
}

async fn apply(
    syncer: &PersistentVolumeClaimSyncer,
    ctx: &RegisterContext,
    p_obj: Option<&PersistentVolumeClaim>,
    v_obj: &PersistentVolumeClaim,
) -> Result<()> {
    let v_key = NamespacedName {
        namespace: v_obj.namespace().unwrap_or_default(),
        name: v_obj.name_any(),
    };
    let p_name = syncer.physical_name(ctx, &v_key);
    let identity = identity_of(v_obj);
    let existing_annotations = p_obj.map(kube::ResourceExt::annotations).cloned().unwrap_or_default();
    let metadata = translate_metadata_update(
        &identity,
        &p_name,
        Some(&ctx.target_namespace),
        &ctx.suffix,
        &existing_annotations,
    );

    let v_spec = v_obj.spec.clone().unwrap_or_default();
    let storage_class_name = v_spec
        .storage_class_name
        .as_deref()
        .map(|name| physical_name_cluster_scoped(name, &ctx.target_namespace, &ctx.suffix));

    let desired = PersistentVolumeClaim {
        metadata,
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: v_spec.access_modes,
            resources: v_spec.resources,
            selector: v_spec.selector,
            storage_class_name,
            volume_mode: v_spec.volume_mode,
            // volumeName is left unset on create; the host-side provisioner
            // or dynamic binding fills it in, same as a freshly created vPVC.
            volume_name: p_obj.and_then(|p| p.spec.as_ref().and_then(|s| s.volume_name.clone())),
            ..PersistentVolumeClaimSpec::default()
        }),
        status: None,
    };

    let api = syncer.physical_api(ctx);
    let patched = api
        .patch(&p_name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&desired))
        .await?;

    if let Some(status) = patched.status {
        backflow_status(ctx, &v_key, status).await?;
    }
    Ok(())
}

/// Copies `phase`/`capacity`/`accessModes` from the pPVC's status subresource
/// back onto the vPVC, so the tenant observes binding progress.
async fn backflow_status(
    ctx: &RegisterContext,
    v_key: &NamespacedName,
    p_status: PersistentVolumeClaimStatus,
) -> Result<()> {
    let v_api: kube::Api<PersistentVolumeClaim> = kube::Api::namespaced(ctx.virtual_client.clone(), &v_key.namespace);
    let patch = serde_json::json!({
        "status": {
            "phase": p_status.phase,
            "capacity": p_status.capacity,
            "accessModes": p_status.access_modes,
            "conditions": p_status.conditions,
        }
    });
    v_api
        .patch_status(&v_key.name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}
