//! Ingress syncer (networking.k8s.io/v1 only — the legacy v1beta1 API is not
//! shipped; see the Open Question resolution in `DESIGN.md`). Down-only:
//! backend service names and TLS secret names are rewritten through
//! [`physical_name`] so a pIngress always references the packed pService
//! and pSecret this syncer itself created.

use async_trait::async_trait;
use k8s_openapi::api::networking::v1::{
    HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule, IngressServiceBackend, IngressSpec, IngressTLS,
};
use kube::api::{Patch, PatchParams};
use kube::ResourceExt;
use translate::mapping::NamespacedName;
use translate::metadata::{translate_metadata_update, VirtualIdentity};
use translate::name::physical_name;

use crate::consts::FIELD_MANAGER;
use crate::context::RegisterContext;
use crate::error::Result;
use crate::framework::{Capabilities, KindSyncer};

/// Syncer for `Ingress`.
pub struct IngressSyncer;

fn identity_of(v_obj: &Ingress) -> VirtualIdentity {
    VirtualIdentity {
        name: v_obj.name_any(),
        namespace: v_obj.namespace().unwrap_or_default(),
        uid: v_obj.uid(),
        labels: v_obj.labels().clone(),
        annotations: std::collections::BTreeMap::new(),
    }
}

fn translate_backend(backend: IngressBackend, namespace: &str, suffix: &str) -> IngressBackend {
    IngressBackend {
        service: backend.service.map(|svc| IngressServiceBackend {
            name: physical_name(&svc.name, namespace, suffix),
            port: svc.port,
        }),
        resource: backend.resource,
    }
}

#[async_trait]
impl KindSyncer for IngressSyncer {
    type Virtual = Ingress;
    type Physical = Ingress;

    const NAME: &'static str = "Ingress";
    const CAPABILITIES: Capabilities = Capabilities::DOWN;

    fn physical_name(&self, ctx: &RegisterContext, v_key: &NamespacedName) -> String {
        physical_name(&v_key.name, &v_key.namespace, &ctx.suffix)
    }

    async fn sync_down(&self, ctx: &RegisterContext, v_obj: &Ingress) -> Result<()> {
        apply(self, ctx, None, v_obj).await
    }

    async fn sync(&self, ctx: &RegisterContext, p_obj: &Ingress, v_obj: &Ingress) -> Result<()> {
        apply(self, ctx, Some(p_obj), v_obj).await
    }
}

async fn apply(syncer: &IngressSyncer, ctx: &RegisterContext, p_obj: Option<&Ingress>, v_obj: &Ingress) -> Result<()> {
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
    let rules = v_spec.rules.map(|rules| {
        rules
            .into_iter()
            .map(|rule| IngressRule {
                host: rule.host,
                http: rule.http.map(|http| HTTPIngressRuleValue {
                    paths: http
                        .paths
                        .into_iter()
                        .map(|path| k8s_openapi::api::networking::v1::HTTPIngressPath {
                            path: path.path,
                            path_type: path.path_type,
                            backend: translate_backend(path.backend, &v_key.namespace, &ctx.suffix),
                        })
                        .collect(),
                }),
            })
            .collect()
    });
    let tls = v_spec.tls.map(|tls| {
        tls.into_iter()
            .map(|entry| IngressTLS {
                hosts: entry.hosts,
                secret_name: entry
                    .secret_name
                    .map(|name| physical_name(&name, &v_key.namespace, &ctx.suffix)),
            })
            .collect()
    });

    let desired = Ingress {
        metadata,
        spec: Some(IngressSpec {
            ingress_class_name: v_spec.ingress_class_name,
            default_backend: v_spec
                .default_backend
                .map(|backend| translate_backend(backend, &v_key.namespace, &ctx.suffix)),
            rules,
            tls,
        }),
        status: None,
    };

    let api = syncer.physical_api(ctx);
    let _patched = api
        .patch(&p_name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&desired))
        .await?;
    Ok(())
}
