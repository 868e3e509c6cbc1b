//! Pod syncer — the most intricate kind. Down-only: the tenant's vPod is
//! always the source of truth for spec; only `status` and a best-effort
//! `nodeName` flow back P→V.
//!
//! Forward translation follows spec section 4.3 step for step: service
//! account substitution, volume reference rewriting, node-selection policy,
//! service environment variables, DNS HostAliases for the in-cluster
//! kubernetes service, namespace-label propagation, and the
//! `automountServiceAccountToken`/`enableServiceLinks`/`Hostname` triad that
//! keeps a pod's own view of itself unchanged even though it now runs under
//! a translated identity.
//!
//! Service-account *token* issuance (minting a token the virtual control
//! plane would accept) is outside this syncer's scope — the virtual control
//! plane's own certificate/token machinery is listed as an external
//! collaborator, not something this crate reimplements — so a
//! `projected.sources[].serviceAccountToken` volume is passed through
//! unchanged rather than re-signed.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    Container, EnvVar, HostAlias, Namespace, Pod, PodSpec, Service, Volume,
};
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::ResourceExt;

use translate::consts::{
    CLUSTER_AUTOSCALER_ANNOTATION, MARKER_LABEL, NAMESPACE_LABEL, SERVICE_ACCOUNT_NAME_ANNOTATION,
};
use translate::envvar::{expand, service_env_vars, ServicePort as TranslateServicePort};
use translate::mapping::NamespacedName;
use translate::metadata::{namespace_label_key, translate_metadata_update, VirtualIdentity};
use translate::name::physical_name;
use translate::podsecurity::evaluate;

use crate::consts::FIELD_MANAGER;
use crate::context::RegisterContext;
use crate::error::{Result, SyncError};
use crate::framework::{Capabilities, KindSyncer};

const AUTOSCALER_SOURCE_ANNOTATION: &str = "cluster-autoscaler.kubernetes.io/safe-to-evict";

/// Syncer for `Pod`.
pub struct PodSyncer;

fn identity_of(v_obj: &Pod) -> VirtualIdentity {
    VirtualIdentity {
        name: v_obj.name_any(),
        namespace: v_obj.namespace().unwrap_or_default(),
        uid: v_obj.uid(),
        labels: v_obj.labels().clone(),
        annotations: std::collections::BTreeMap::new(),
    }
}

#[async_trait]
impl KindSyncer for PodSyncer {
    type Virtual = Pod;
    type Physical = Pod;

    const NAME: &'static str = "Pod";
    const CAPABILITIES: Capabilities = Capabilities::DOWN;

    fn physical_name(&self, ctx: &RegisterContext, v_key: &NamespacedName) -> String {
        physical_name(&v_key.name, &v_key.namespace, &ctx.suffix)
    }

    async fn sync_down(&self, ctx: &RegisterContext, v_obj: &Pod) -> Result<()> {
        apply(self, ctx, None, v_obj).await
    }

    async fn sync(&self, ctx: &RegisterContext, p_obj: &Pod, v_obj: &Pod) -> Result<()> {
        apply(self, ctx, Some(p_obj), v_obj).await
    }
}

async fn apply(syncer: &PodSyncer, ctx: &RegisterContext, p_obj: Option<&Pod>, v_obj: &Pod) -> Result<()> {
    let v_key = NamespacedName {
        namespace: v_obj.namespace().unwrap_or_default(),
        name: v_obj.name_any(),
    };
    let v_spec = v_obj.spec.clone().unwrap_or_default();

    let violations = evaluate(&v_spec, ctx.options.pod_security_standard);
    if !violations.is_empty() {
        return Err(SyncError::PolicyViolation(violations.join("; ")));
    }

    let p_name = syncer.physical_name(ctx, &v_key);
    let identity = identity_of(v_obj);
    let existing_annotations = p_obj.map(kube::ResourceExt::annotations).cloned().unwrap_or_default();
    let mut metadata = translate_metadata_update(
        &identity,
        &p_name,
        Some(&ctx.target_namespace),
        &ctx.suffix,
        &existing_annotations,
    );

    let original_sa = v_spec.service_account_name.clone().unwrap_or_else(|| "default".to_owned());
    let autoscaler_enabled = v_obj.annotations().contains_key(AUTOSCALER_SOURCE_ANNOTATION);
    {
        let annotations = metadata.annotations.get_or_insert_with(BTreeMap::new);
        annotations.insert(SERVICE_ACCOUNT_NAME_ANNOTATION.to_owned(), original_sa.clone());
        annotations.insert(CLUSTER_AUTOSCALER_ANNOTATION.to_owned(), autoscaler_enabled.to_string());
    }

    let labels = metadata.labels.get_or_insert_with(BTreeMap::new);
    copy_namespace_labels(ctx, &v_key.namespace, labels).await?;

    let mut desired_spec = v_spec.clone();
    desired_spec.service_account_name = Some(physical_name(&original_sa, &v_key.namespace, &ctx.suffix));
    desired_spec.automount_service_account_token = Some(false);
    desired_spec.enable_service_links = Some(false);
    desired_spec.hostname = Some(v_key.name.clone());
    desired_spec.volumes = translate_volumes(v_spec.volumes, &v_key.namespace, &ctx.suffix);
    translate_node_selection(ctx, p_obj, &mut desired_spec);

    let mut host_aliases = desired_spec.host_aliases.take().unwrap_or_default();
    if let Some(alias) = kubernetes_service_host_alias(ctx).await? {
        host_aliases.push(alias);
    }
    desired_spec.host_aliases = Some(host_aliases);

    let svc_env = collect_service_env_vars(ctx, &v_key.namespace).await?;
    desired_spec.containers = desired_spec
        .containers
        .into_iter()
        .map(|c| expand_container_env(c, &svc_env))
        .collect();

    let metadata = crate::pluginhook::mutate_metadata_with_timeout(ctx.hook.as_ref(), "Pod", metadata).await?;

    let desired = Pod {
        metadata,
        spec: Some(desired_spec),
        status: None,
    };

    let api = syncer.physical_api(ctx);
    let patched = api
        .patch(&p_name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&desired))
        .await?;

    if let Some(status) = patched.status {
        let v_api: Api<Pod> = Api::namespaced(ctx.virtual_client.clone(), &v_key.namespace);
        let patch = serde_json::json!({ "status": status });
        v_api
            .patch_status(&v_key.name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Merge(&patch))
            .await?;
    }
    Ok(())
}

/// Rewrites configMap/secret/PVC volume references; a projected
/// service-account-token source is left untouched (see module docs).
fn translate_volumes(volumes: Option<Vec<Volume>>, namespace: &str, suffix: &str) -> Option<Vec<Volume>> {
    volumes.map(|vols| {
        vols.into_iter()
            .map(|mut vol| {
                if let Some(cm) = vol.config_map.as_mut() {
                    if let Some(name) = cm.name.as_ref() {
                        cm.name = Some(physical_name(name, namespace, suffix));
                    }
                }
                if let Some(secret) = vol.secret.as_mut() {
                    if let Some(name) = secret.secret_name.as_ref() {
                        secret.secret_name = Some(physical_name(name, namespace, suffix));
                    }
                }
                if let Some(pvc) = vol.persistent_volume_claim.as_mut() {
                    pvc.claim_name = physical_name(&pvc.claim_name, namespace, suffix);
                }
                vol
            })
            .collect()
    })
}

/// `nodeName` precedence: the host scheduler normally clears it on create so
/// the host picks; when `enable_scheduler` is set the virtual scheduler's
/// own assignment is honored verbatim instead. `nodeSelector` gets the
/// administrator overlay merged in, admin keys winning on collision, when
/// `enforce_node_selector` is set.
fn translate_node_selection(ctx: &RegisterContext, p_obj: Option<&Pod>, spec: &mut PodSpec) {
    if ctx.options.enable_scheduler {
        // vPod's own nodeName (already scheduled by the virtual scheduler)
        // passes through untouched.
    } else if p_obj.is_none() {
        spec.node_name = None;
    } else {
        // pPod already exists and was scheduled by the host; keep whatever
        // the host assigned rather than clearing a live pod's node.
        spec.node_name = p_obj.and_then(|p| p.spec.as_ref().and_then(|s| s.node_name.clone()));
    }

    if ctx.options.enforce_node_selector {
        let mut selector = spec.node_selector.clone().unwrap_or_default();
        for (key, value) in &ctx.options.admin_node_selector {
            selector.insert(key.clone(), value.clone());
        }
        spec.node_selector = Some(selector);
    }
}

async fn copy_namespace_labels(
    ctx: &RegisterContext,
    namespace: &str,
    pod_labels: &mut BTreeMap<String, String>,
) -> Result<()> {
    let ns_api: Api<Namespace> = Api::all(ctx.virtual_client.clone());
    if let Some(ns) = ns_api.get_opt(namespace).await? {
        for (key, value) in ns.labels() {
            pod_labels.insert(namespace_label_key(key), value.clone());
        }
    }
    Ok(())
}

/// Builds the `kubernetes`/`kubernetes.default`/`kubernetes.default.svc`
/// HostAliases entry pointing at the host Service fronting the virtual API
/// server, so in-pod DNS for the API server keeps resolving after the pod
/// moves to the host network namespace's view of the world.
async fn kubernetes_service_host_alias(ctx: &RegisterContext) -> Result<Option<HostAlias>> {
    if ctx.options.service_name.is_empty() {
        return Ok(None);
    }
    let svc_api: Api<Service> = Api::namespaced(ctx.physical_client.clone(), &ctx.options.service_namespace);
    let Some(svc) = svc_api.get_opt(&ctx.options.service_name).await? else {
        return Ok(None);
    };
    let Some(cluster_ip) = svc.spec.and_then(|s| s.cluster_ip).filter(|ip| ip != "None") else {
        return Ok(None);
    };
    Ok(Some(HostAlias {
        ip: cluster_ip,
        hostnames: vec![
            "kubernetes".to_owned(),
            "kubernetes.default".to_owned(),
            "kubernetes.default.svc".to_owned(),
        ],
    }))
}

/// Computes `<SVC>_SERVICE_HOST`/`_PORT` style variables for every pService
/// visible in the vPod's namespace, using the host-side ClusterIP the
/// matching pService actually got.
async fn collect_service_env_vars(ctx: &RegisterContext, namespace: &str) -> Result<Vec<(String, String)>> {
    let svc_api: Api<Service> = Api::namespaced(ctx.physical_client.clone(), &ctx.target_namespace);
    let label_selector = format!("{MARKER_LABEL}={},{NAMESPACE_LABEL}={namespace}", ctx.suffix);
    let services = svc_api.list(&ListParams::default().labels(&label_selector)).await?;

    let mut vars = Vec::new();
    for svc in services.items {
        let Some(name) = svc.annotations().get(translate::consts::NAME_ANNOTATION).cloned() else {
            continue;
        };
        let Some(spec) = svc.spec.as_ref() else { continue };
        let Some(cluster_ip) = spec.cluster_ip.as_deref() else { continue };
        let ports: Vec<TranslateServicePort> = spec
            .ports
            .iter()
            .flatten()
            .map(|p| TranslateServicePort {
                name: p.name.clone(),
                port: p.port,
            })
            .collect();
        vars.extend(service_env_vars(&name, cluster_ip, &ports));
    }
    Ok(vars)
}

/// Applies service env vars ahead of the container's own declared vars, then
/// expands `$(VAR)` references left-to-right the way the kubelet does:
/// each variable can reference any variable defined earlier in the same
/// container (including the service vars seeded first).
fn expand_container_env(mut container: Container, svc_env: &[(String, String)]) -> Container {
    let mut resolved: BTreeMap<String, String> = svc_env.iter().cloned().collect();
    let mut out = Vec::new();
    for (name, value) in &resolved.clone() {
        out.push(EnvVar {
            name: name.clone(),
            value: Some(value.clone()),
            value_from: None,
        });
    }

    for env in container.env.take().into_iter().flatten() {
        if let Some(raw) = env.value.as_ref() {
            let expanded = expand(raw, |var| resolved.get(var).cloned());
            resolved.insert(env.name.clone(), expanded.clone());
            out.push(EnvVar {
                name: env.name,
                value: Some(expanded),
                value_from: None,
            });
        } else {
            out.push(env);
        }
    }

    container.env = Some(out);
    container
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ConfigMapVolumeSource, PersistentVolumeClaimVolumeSource};

    #[test]
    fn translates_configmap_and_pvc_volume_names() {
        let volumes = vec![
            Volume {
                name: "cfg".to_owned(),
                config_map: Some(ConfigMapVolumeSource {
                    name: Some("app-config".to_owned()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            Volume {
                name: "data".to_owned(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: "data".to_owned(),
                    read_only: None,
                }),
                ..Default::default()
            },
        ];
        let translated = translate_volumes(Some(volumes), "app", "vc1").unwrap();
        assert_eq!(
            translated[0].config_map.as_ref().unwrap().name,
            Some("app-config-x-app-x-vc1".to_owned())
        );
        assert_eq!(translated[1].persistent_volume_claim.as_ref().unwrap().claim_name, "data-x-app-x-vc1");
    }

    #[test]
    fn expands_container_env_against_service_vars() {
        let svc_env = vec![("WEB_SERVICE_HOST".to_owned(), "10.0.0.5".to_owned())];
        let container = Container {
            name: "app".to_owned(),
            env: Some(vec![EnvVar {
                name: "UPSTREAM".to_owned(),
                value: Some("http://$(WEB_SERVICE_HOST)".to_owned()),
                value_from: None,
            }]),
            ..Default::default()
        };
        let translated = expand_container_env(container, &svc_env);
        let env = translated.env.unwrap();
        let upstream = env.iter().find(|e| e.name == "UPSTREAM").unwrap();
        assert_eq!(upstream.value.as_deref(), Some("http://10.0.0.5"));
    }
}
