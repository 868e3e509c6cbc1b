//! Service syncer. Down-only: every vService gets a pService so pods and
//! env-var computation can resolve it on the host side. The pService's
//! selector gets the marker and namespace labels added so it only ever
//! matches this tenant's own translated pods inside the packed namespace,
//! never another tenant's pods that happen to share a selector label.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Service, ServiceSpec};
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

/// Syncer for `Service`.
pub struct ServiceSyncer;

fn identity_of(v_obj: &Service) -> VirtualIdentity {
    VirtualIdentity {
        name: v_obj.name_any(),
        namespace: v_obj.namespace().unwrap_or_default(),
        uid: v_obj.uid(),
        labels: v_obj.labels().clone(),
        annotations: std::collections::BTreeMap::new(),
    }
}

/// Rewrites a vService's selector so it only matches this tenant's own
/// translated pods.
fn translate_selector(
    v_selector: &BTreeMap<String, String>,
    namespace: &str,
    suffix: &str,
) -> BTreeMap<String, String> {
    let mut selector = translate_labels(v_selector);
    selector.insert(MARKER_LABEL.to_owned(), suffix.to_owned());
    selector.insert(NAMESPACE_LABEL.to_owned(), namespace.to_owned());
    selector
}

#[async_trait]
impl KindSyncer for ServiceSyncer {
    type Virtual = Service;
    type Physical = Service;

    const NAME: &'static str = "Service";
    const CAPABILITIES: Capabilities = Capabilities::DOWN;

    fn physical_name(&self, ctx: &RegisterContext, v_key: &NamespacedName) -> String {
        physical_name(&v_key.name, &v_key.namespace, &ctx.suffix)
    }

    async fn sync_down(&self, ctx: &RegisterContext, v_obj: &Service) -> Result<()> {
        apply(self, ctx, None, v_obj).await
    }

    async fn sync(&self, ctx: &RegisterContext, p_obj: &Service, v_obj: &Service) -> Result<()> {
        apply(self, ctx, Some(p_obj), v_obj).await
    }
}

async fn apply(syncer: &ServiceSyncer, ctx: &RegisterContext, p_obj: Option<&Service>, v_obj: &Service) -> Result<()> {
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
    let is_headless = v_spec.cluster_ip.as_deref() == Some("None");
    let selector = v_spec
        .selector
        .as_ref()
        .map(|s| translate_selector(s, &v_key.namespace, &ctx.suffix));

    let desired = Service {
        metadata,
        spec: Some(ServiceSpec {
            cluster_ip: is_headless.then(|| "None".to_owned()),
            ports: v_spec.ports,
            selector,
            type_: v_spec.type_,
            ..ServiceSpec::default()
        }),
        status: None,
    };

    let api = syncer.physical_api(ctx);
    let _patched = api
        .patch(&p_name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&desired))
        .await?;
    Ok(())
}
