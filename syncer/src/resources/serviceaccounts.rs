//! ServiceAccount syncer. Down-only: the pSA exists purely so translated
//! pPods have something to reference; its `secrets`/`imagePullSecrets` are
//! intentionally not mirrored, since those would leak host-issued tokens
//! into whatever the tenant can read back through the virtual API server.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ServiceAccount;
use kube::api::{Patch, PatchParams};
use kube::ResourceExt;
use translate::mapping::NamespacedName;
use translate::metadata::{translate_metadata_update, VirtualIdentity};
use translate::name::physical_name;

use crate::consts::FIELD_MANAGER;
use crate::context::RegisterContext;
use crate::error::Result;
use crate::framework::{Capabilities, KindSyncer};

/// Syncer for `ServiceAccount`.
pub struct ServiceAccountSyncer;

fn identity_of(v_obj: &ServiceAccount) -> VirtualIdentity {
    VirtualIdentity {
        name: v_obj.name_any(),
        namespace: v_obj.namespace().unwrap_or_default(),
        uid: v_obj.uid(),
        labels: v_obj.labels().clone(),
        annotations: std::collections::BTreeMap::new(),
    }
}

#[async_trait]
impl KindSyncer for ServiceAccountSyncer {
    type Virtual = ServiceAccount;
    type Physical = ServiceAccount;

    const NAME: &'static str = "ServiceAccount";
    const CAPABILITIES: Capabilities = Capabilities::DOWN;

    fn physical_name(&self, ctx: &RegisterContext, v_key: &NamespacedName) -> String {
        physical_name(&v_key.name, &v_key.namespace, &ctx.suffix)
    }

    async fn sync_down(&self, ctx: &RegisterContext, v_obj: &ServiceAccount) -> Result<()> {
        apply(self, ctx, None, v_obj).await
    }

    async fn sync(&self, ctx: &RegisterContext, p_obj: &ServiceAccount, v_obj: &ServiceAccount) -> Result<()> {
        apply(self, ctx, Some(p_obj), v_obj).await
    }
}

async fn apply(
    syncer: &ServiceAccountSyncer,
    ctx: &RegisterContext,
    p_obj: Option<&ServiceAccount>,
    v_obj: &ServiceAccount,
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

    let desired = ServiceAccount {
        metadata,
        automount_service_account_token: v_obj.automount_service_account_token,
        secrets: None,
        image_pull_secrets: None,
    };

    let api = syncer.physical_api(ctx);
    let _patched = api
        .patch(&p_name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&desired))
        .await?;
    Ok(())
}
