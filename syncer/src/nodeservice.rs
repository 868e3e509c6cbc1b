//! Node-Service Provider: for each currently-projected vNode, maintains a
//! per-node host-cluster `Service` whose ClusterIP is advertised as the
//! node's kubelet endpoint address. The service carries no selector of its
//! own — it exists purely to reserve a stable, routable ClusterIP; the
//! request router (outside this syncer's scope) maps an inbound
//! host→node hostname back to a virtual node name via [`NODE_LABEL`].
//!
//! Creation is serialized by an internal mutex: two reconciles racing to
//! provision the same node's service would otherwise both see "absent" and
//! both attempt a create, and only one survives the apply anyway, so the
//! lock turns that race into simple sequencing.

use std::collections::BTreeMap;

use kube::api::{Api, Patch, PatchParams};
use tokio::sync::Mutex;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};

use translate::consts::NODE_LABEL;
use translate::name::physical_name_cluster_scoped;

use crate::consts::FIELD_MANAGER;
use crate::context::RegisterContext;
use crate::error::Result;

/// Standard kubelet API port; the service exists to give this port a stable
/// ClusterIP, not to proxy it itself.
const KUBELET_PORT: i32 = 10250;

pub struct NodeServiceProvider {
    ctx: RegisterContext,
    lock: Mutex<()>,
}

impl NodeServiceProvider {
    #[must_use]
    pub fn new(ctx: RegisterContext) -> Self {
        Self {
            ctx,
            lock: Mutex::new(()),
        }
    }

    fn service_name(&self, node_name: &str) -> String {
        physical_name_cluster_scoped(node_name, &self.ctx.target_namespace, &self.ctx.suffix)
    }

    fn api(&self) -> Api<Service> {
        Api::namespaced(self.ctx.physical_client.clone(), &self.ctx.target_namespace)
    }

    /// Ensures a per-node service exists for `node_name`, creating it if
    /// absent, and returns its ClusterIP.
    pub async fn ensure(&self, node_name: &str) -> Result<String> {
        let _guard = self.lock.lock().await;
        let api = self.api();
        let name = self.service_name(node_name);

        if let Some(existing) = api.get_opt(&name).await? {
            if let Some(cluster_ip) = existing.spec.as_ref().and_then(|s| s.cluster_ip.clone()) {
                return Ok(cluster_ip);
            }
        }

        let mut labels = BTreeMap::new();
        labels.insert(NODE_LABEL.to_owned(), node_name.to_owned());

        let desired = Service {
            metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
                name: Some(name.clone()),
                labels: Some(labels),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                ports: Some(vec![ServicePort {
                    port: KUBELET_PORT,
                    target_port: Some(k8s_openapi::apimachinery::pkg::util::intstr::IntOrString::Int(KUBELET_PORT)),
                    ..ServicePort::default()
                }]),
                ..ServiceSpec::default()
            }),
            status: None,
        };

        let applied = api
            .patch(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&desired))
            .await?;
        Ok(applied.spec.and_then(|s| s.cluster_ip).unwrap_or_default())
    }

    /// Deletes the per-node service once a vNode is no longer projected.
    pub async fn remove(&self, node_name: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let api = self.api();
        let name = self.service_name(node_name);
        if api.get_opt(&name).await?.is_some() {
            api.delete(&name, &kube::api::DeleteParams::default()).await?;
        }
        Ok(())
    }
}
