//! Endpoints syncer. Down-only: mirrors a vService's own Endpoints object
//! (subset addresses a user manages by hand for a Service without a
//! selector) into the packed namespace with addresses left untranslated —
//! endpoint IPs already live in whichever network the workload they name is
//! actually reachable on, so unlike a Service selector there is nothing
//! here for the syncer to rewrite except identity/metadata.
//!
//! The virtual `kubernetes` default-Endpoints object is excluded from this
//! generic path entirely; it's maintained by
//! [`crate::defaultendpoint`] instead, which flows in the opposite
//! direction (host API server address into V).

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Endpoints;
use kube::api::{Patch, PatchParams};
use kube::ResourceExt;
use translate::mapping::NamespacedName;
use translate::metadata::{translate_metadata_update, VirtualIdentity};
use translate::name::physical_name;

use crate::consts::FIELD_MANAGER;
use crate::context::RegisterContext;
use crate::error::Result;
use crate::framework::{Capabilities, KindSyncer};

/// Syncer for `Endpoints`.
pub struct EndpointsSyncer;

fn identity_of(v_obj: &Endpoints) -> VirtualIdentity {
    VirtualIdentity {
        name: v_obj.name_any(),
        namespace: v_obj.namespace().unwrap_or_default(),
        uid: v_obj.uid(),
        labels: v_obj.labels().clone(),
        annotations: std::collections::BTreeMap::new(),
    }
}

#[async_trait]
impl KindSyncer for EndpointsSyncer {
    type Virtual = Endpoints;
    type Physical = Endpoints;

    const NAME: &'static str = "Endpoints";
    const CAPABILITIES: Capabilities = Capabilities::DOWN;

    fn physical_name(&self, ctx: &RegisterContext, v_key: &NamespacedName) -> String {
        physical_name(&v_key.name, &v_key.namespace, &ctx.suffix)
    }

    async fn sync_down(&self, ctx: &RegisterContext, v_obj: &Endpoints) -> Result<()> {
        apply(self, ctx, None, v_obj).await
    }

    async fn sync(&self, ctx: &RegisterContext, p_obj: &Endpoints, v_obj: &Endpoints) -> Result<()> {
        apply(self, ctx, Some(p_obj), v_obj).await
    }
}

async fn apply(syncer: &EndpointsSyncer, ctx: &RegisterContext, p_obj: Option<&Endpoints>, v_obj: &Endpoints) -> Result<()> {
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

    let desired = Endpoints {
        metadata,
        subsets: v_obj.subsets.clone(),
    };

    let api = syncer.physical_api(ctx);
    let _patched = api
        .patch(&p_name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&desired))
        .await?;
    Ok(())
}
