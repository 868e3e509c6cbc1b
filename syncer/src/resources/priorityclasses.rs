//! PriorityClass syncer. Cluster-scoped, down-only: vPriorityClasses get a
//! cluster-scoped pPriorityClass so pPods can reference a translated
//! `priorityClassName`.

use async_trait::async_trait;
use k8s_openapi::api::scheduling::v1::PriorityClass;
use kube::api::{Patch, PatchParams};
use kube::ResourceExt;
use translate::mapping::NamespacedName;
use translate::metadata::{translate_metadata_update, VirtualIdentity};
use translate::name::physical_name_cluster_scoped;

use crate::consts::FIELD_MANAGER;
use crate::context::RegisterContext;
use crate::error::Result;
use crate::framework::{Capabilities, KindSyncer};

/// Syncer for `PriorityClass`.
pub struct PriorityClassSyncer;

fn identity_of(v_obj: &PriorityClass) -> VirtualIdentity {
    VirtualIdentity {
        name: v_obj.name_any(),
        namespace: String::new(),
        uid: v_obj.uid(),
        labels: v_obj.labels().clone(),
        annotations: std::collections::BTreeMap::new(),
    }
}

#[async_trait]
impl KindSyncer for PriorityClassSyncer {
    type Virtual = PriorityClass;
    type Physical = PriorityClass;

    const NAME: &'static str = "PriorityClass";
    const CAPABILITIES: Capabilities = Capabilities::DOWN;
    const CLUSTER_SCOPED: bool = true;

    fn physical_name(&self, ctx: &RegisterContext, v_key: &NamespacedName) -> String {
        physical_name_cluster_scoped(&v_key.name, &ctx.target_namespace, &ctx.suffix)
    }

    async fn sync_down(&self, ctx: &RegisterContext, v_obj: &PriorityClass) -> Result<()> {
        apply(self, ctx, None, v_obj).await
    }

    async fn sync(&self, ctx: &RegisterContext, p_obj: &PriorityClass, v_obj: &PriorityClass) -> Result<()> {
        apply(self, ctx, Some(p_obj), v_obj).await
    }
}

async fn apply(
    syncer: &PriorityClassSyncer,
    ctx: &RegisterContext,
    p_obj: Option<&PriorityClass>,
    v_obj: &PriorityClass,
) -> Result<()> {
    let v_key = NamespacedName {
        namespace: String::new(),
        name: v_obj.name_any(),
    };
    let p_name = syncer.physical_name(ctx, &v_key);
    let identity = identity_of(v_obj);
    let existing_annotations = p_obj.map(kube::ResourceExt::annotations).cloned().unwrap_or_default();
    let metadata = translate_metadata_update(&identity, &p_name, None, &ctx.suffix, &existing_annotations);

    let desired = PriorityClass {
        metadata,
        value: v_obj.value,
        global_default: v_obj.global_default,
        description: v_obj.description.clone(),
        preemption_policy: v_obj.preemption_policy.clone(),
    };

    let api = syncer.physical_api(ctx);
    let _patched = api
        .patch(&p_name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&desired))
        .await?;
    Ok(())
}
