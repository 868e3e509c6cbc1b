//! NetworkPolicy syncer. Down-only. `podSelector` and any peer
//! `podSelector` get the marker and namespace labels added, same reasoning
//! as the Service selector: a NetworkPolicy's peer selectors must only ever
//! resolve to this tenant's own translated pods in the packed namespace.

use async_trait::async_trait;
use k8s_openapi::api::networking::v1::{NetworkPolicy, NetworkPolicyEgressRule, NetworkPolicyIngressRule, NetworkPolicyPeer, NetworkPolicySpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
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

/// Syncer for `NetworkPolicy`.
pub struct NetworkPolicySyncer;

fn identity_of(v_obj: &NetworkPolicy) -> VirtualIdentity {
    VirtualIdentity {
        name: v_obj.name_any(),
        namespace: v_obj.namespace().unwrap_or_default(),
        uid: v_obj.uid(),
        labels: v_obj.labels().clone(),
        annotations: std::collections::BTreeMap::new(),
    }
}

fn translate_selector(selector: &LabelSelector, namespace: &str, suffix: &str) -> LabelSelector {
    let mut match_labels = translate_labels(selector.match_labels.as_ref().unwrap_or(&Default::default()));
    match_labels.insert(MARKER_LABEL.to_owned(), suffix.to_owned());
    match_labels.insert(NAMESPACE_LABEL.to_owned(), namespace.to_owned());
    LabelSelector {
        match_labels: Some(match_labels),
        match_expressions: selector.match_expressions.clone(),
    }
}

fn translate_peer(peer: &NetworkPolicyPeer, namespace: &str, suffix: &str) -> NetworkPolicyPeer {
    NetworkPolicyPeer {
        pod_selector: peer.pod_selector.as_ref().map(|s| translate_selector(s, namespace, suffix)),
        namespace_selector: peer.namespace_selector.clone(),
        ip_block: peer.ip_block.clone(),
    }
}

#[async_trait]
impl KindSyncer for NetworkPolicySyncer {
    type Virtual = NetworkPolicy;
    type Physical = NetworkPolicy;

    const NAME: &'static str = "NetworkPolicy";
    const CAPABILITIES: Capabilities = Capabilities::DOWN;

    fn physical_name(&self, ctx: &RegisterContext, v_key: &NamespacedName) -> String {
        physical_name(&v_key.name, &v_key.namespace, &ctx.suffix)
    }

    async fn sync_down(&self, ctx: &RegisterContext, v_obj: &NetworkPolicy) -> Result<()> {
        apply(self, ctx, None, v_obj).await
    }

    async fn sync(&self, ctx: &RegisterContext, p_obj: &NetworkPolicy, v_obj: &NetworkPolicy) -> Result<()> {
        apply(self, ctx, Some(p_obj), v_obj).await
    }
}

async fn apply(
    syncer: &NetworkPolicySyncer,
    ctx: &RegisterContext,
    p_obj: Option<&NetworkPolicy>,
    v_obj: &NetworkPolicy,
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
    let pod_selector = translate_selector(&v_spec.pod_selector, &v_key.namespace, &ctx.suffix);
    let ingress = v_spec.ingress.as_ref().map(|rules| {
        rules
            .iter()
            .map(|rule| NetworkPolicyIngressRule {
                from: rule
                    .from
                    .as_ref()
                    .map(|peers| peers.iter().map(|peer| translate_peer(peer, &v_key.namespace, &ctx.suffix)).collect()),
                ports: rule.ports.clone(),
            })
            .collect()
    });
    let egress = v_spec.egress.as_ref().map(|rules| {
        rules
            .iter()
            .map(|rule| NetworkPolicyEgressRule {
                to: rule
                    .to
                    .as_ref()
                    .map(|peers| peers.iter().map(|peer| translate_peer(peer, &v_key.namespace, &ctx.suffix)).collect()),
                ports: rule.ports.clone(),
            })
            .collect()
    });

    let desired = NetworkPolicy {
        metadata,
        spec: Some(NetworkPolicySpec {
            pod_selector,
            ingress,
            egress,
            policy_types: v_spec.policy_types,
        }),
    };

    let api = syncer.physical_api(ctx);
    let _patched = api
        .patch(&p_name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&desired))
        .await?;
    Ok(())
}
