//! PodDisruptionBudget syncer. Down-only; the pod selector gets the marker
//! and namespace labels added for the same reason Service/NetworkPolicy
//! selectors do: a PDB must only ever count this tenant's own translated
//! pods toward its disruption budget.

use async_trait::async_trait;
use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use kube::api::{Patch, PatchParams};
use kube::ResourceExt;
use translate::consts::{MARKER_LABEL, NAMESPACE_LABEL};
use translate::mapping::NamespacedName;
use translate::metadata::{translate_labels, translate_metadata_update, VirtualIdentity};
use translate::name::physical_name;

use crate::consts::FIELD_MANAGER;
use crate::context::RegisterContext;
use crate::error::Result;
use crate::framework::{Capabilities, KindSyncer};

/// Syncer for `PodDisruptionBudget`.
pub struct PodDisruptionBudgetSyncer;

fn identity_of(v_obj: &PodDisruptionBudget) -> VirtualIdentity {
    VirtualIdentity {
        name: v_obj.name_any(),
        namespace: v_obj.namespace().unwrap_or_default(),
        uid: v_obj.uid(),
        labels: v_obj.labels().clone(),
        annotations: std::collections::BTreeMap::new(),
    }
}

#[async_trait]
impl KindSyncer for PodDisruptionBudgetSyncer {
    type Virtual = PodDisruptionBudget;
    type Physical = PodDisruptionBudget;

    const NAME: &'static str = "PodDisruptionBudget";
    const CAPABILITIES: Capabilities = Capabilities::DOWN;

    fn physical_name(&self, ctx: &RegisterContext, v_key: &NamespacedName) -> String {
        physical_name(&v_key.name, &v_key.namespace, &ctx.suffix)
    }

    async fn sync_down(&self, ctx: &RegisterContext, v_obj: &PodDisruptionBudget) -> Result<()> {
        apply(self, ctx, None, v_obj).await
    }

    async fn sync(&self, ctx: &RegisterContext, p_obj: &PodDisruptionBudget, v_obj: &PodDisruptionBudget) -> Result<()> {
        apply(self, ctx, Some(p_obj), v_obj).await
    }
}

async fn apply(
    syncer: &PodDisruptionBudgetSyncer,
    ctx: &RegisterContext,
    p_obj: Option<&PodDisruptionBudget>,
    v_obj: &PodDisruptionBudget,
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
    let selector = v_spec.selector.map(|selector| {
        let mut match_labels = translate_labels(selector.match_labels.as_ref().unwrap_or(&Default::default()));
        match_labels.insert(MARKER_LABEL.to_owned(), ctx.suffix.clone());
        match_labels.insert(NAMESPACE_LABEL.to_owned(), v_key.namespace.clone());
        k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector {
            match_labels: Some(match_labels),
            match_expressions: selector.match_expressions,
        }
    });

    let desired = PodDisruptionBudget {
        metadata,
        spec: Some(PodDisruptionBudgetSpec {
            min_available: v_spec.min_available,
            max_unavailable: v_spec.max_unavailable,
            selector,
            ..PodDisruptionBudgetSpec::default()
        }),
        status: None,
    };

    let api = syncer.physical_api(ctx);
    let _patched = api
        .patch(&p_name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&desired))
        .await?;
    Ok(())
}
