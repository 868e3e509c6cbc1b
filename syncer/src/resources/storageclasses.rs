//! StorageClass syncer. Cluster-scoped, down-only.

use async_trait::async_trait;
use k8s_openapi::api::storage::v1::StorageClass;
use kube::api::{Patch, PatchParams};
use kube::ResourceExt;
use translate::mapping::NamespacedName;
use translate::metadata::{translate_metadata_update, VirtualIdentity};
use translate::name::physical_name_cluster_scoped;

use crate::consts::FIELD_MANAGER;
use crate::context::RegisterContext;
use crate::error::Result;
use crate::framework::{Capabilities, KindSyncer};

/// Syncer for `StorageClass`.
pub struct StorageClassSyncer;

fn identity_of(v_obj: &StorageClass) -> VirtualIdentity {
    VirtualIdentity {
        name: v_obj.name_any(),
        namespace: String::new(),
        uid: v_obj.uid(),
        labels: v_obj.labels().clone(),
        annotations: std::collections::BTreeMap::new(),
    }
}

#[async_trait]
impl KindSyncer for StorageClassSyncer {
    type Virtual = StorageClass;
    type Physical = StorageClass;

    const NAME: &'static str = "StorageClass";
    const CAPABILITIES: Capabilities = Capabilities::DOWN;
    const CLUSTER_SCOPED: bool = true;

    fn physical_name(&self, ctx: &RegisterContext, v_key: &NamespacedName) -> String {
        physical_name_cluster_scoped(&v_key.name, &ctx.target_namespace, &ctx.suffix)
    }

    async fn sync_down(&self, ctx: &RegisterContext, v_obj: &StorageClass) -> Result<()> {
        apply(self, ctx, None, v_obj).await
    }

    async fn sync(&self, ctx: &RegisterContext, p_obj: &StorageClass, v_obj: &StorageClass) -> Result<()> {
        apply(self, ctx, Some(p_obj), v_obj).await
    }
}

async fn apply(
    syncer: &StorageClassSyncer,
    ctx: &RegisterContext,
    p_obj: Option<&StorageClass>,
    v_obj: &StorageClass,
) -> Result<()> {
    let v_key = NamespacedName {
        namespace: String::new(),
        name: v_obj.name_any(),
    };
    let p_name = syncer.physical_name(ctx, &v_key);
    let identity = identity_of(v_obj);
    let existing_annotations = p_obj.map(kube::ResourceExt::annotations).cloned().unwrap_or_default();
    let metadata = translate_metadata_update(&identity, &p_name, None, &ctx.suffix, &existing_annotations);

    let desired = StorageClass {
        metadata,
        provisioner: v_obj.provisioner.clone(),
        parameters: v_obj.parameters.clone(),
        reclaim_policy: v_obj.reclaim_policy.clone(),
        mount_options: v_obj.mount_options.clone(),
        allow_volume_expansion: v_obj.allow_volume_expansion,
        volume_binding_mode: v_obj.volume_binding_mode.clone(),
        allowed_topologies: v_obj.allowed_topologies.clone(),
    };

    let api = syncer.physical_api(ctx);
    let _patched = api
        .patch(&p_name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&desired))
        .await?;
    Ok(())
}
