//! Service Sync: two optional, independently configured controllers that
//! expose a named Service across the V/P boundary outside of the tenant's
//! own namespace, each driven by a `namespace/name -> namespace/name`
//! [`ServiceMapping`] entry rather than the usual identity-derived key.
//!
//! - **Host→Virtual**: watches an arbitrary host-cluster Service (not
//!   necessarily in the target namespace `T`) and mirrors it, together with
//!   its Endpoints, into the virtual cluster — creating the destination
//!   V-namespace if it doesn't exist yet.
//! - **Virtual→Host**: watches a vService and mirrors it (Service only, no
//!   Endpoints — the pods it fronts already live in the host cluster and
//!   are reachable there) into a host namespace of the administrator's
//!   choosing.
//!
//! Each configured mapping gets its own watch+reconcile pair; this is
//! deliberately not folded into the generic [`crate::framework::KindSyncer`]
//! dispatch, since the physical/virtual identity here is an explicit
//! administrator mapping, not a suffix-derived name.

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::{Endpoints, Namespace, Service, ServiceSpec};
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::{watcher, WatchStreamExt};
use kube::ResourceExt;

use translate::mapping::ServiceMapping;

use crate::consts::FIELD_MANAGER;
use crate::context::RegisterContext;
use crate::error::Result;

/// Mirrors `mapping.from` (a host Service) onto `mapping.to` (a vService),
/// along with its Endpoints, creating the destination V-namespace first if
/// it's absent.
pub async fn reconcile_host_to_virtual(ctx: &RegisterContext, mapping: &ServiceMapping) -> Result<()> {
    let host_api: Api<Service> = Api::namespaced(ctx.physical_client.clone(), &mapping.from.namespace);
    let Some(host_svc) = host_api.get_opt(&mapping.from.name).await? else {
        return Ok(());
    };

    ensure_virtual_namespace(ctx, &mapping.to.namespace).await?;

    let v_spec = host_svc.spec.clone().unwrap_or_default();
    let is_headless = v_spec.cluster_ip.as_deref() == Some("None");
    let desired_svc = Service {
        metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
            name: Some(mapping.to.name.clone()),
            namespace: Some(mapping.to.namespace.clone()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: is_headless.then(|| "None".to_owned()),
            ports: v_spec.ports,
            ..ServiceSpec::default()
        }),
        status: None,
    };

    let v_api: Api<Service> = Api::namespaced(ctx.virtual_client.clone(), &mapping.to.namespace);
    v_api
        .patch(&mapping.to.name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&desired_svc))
        .await?;

    let host_endpoints_api: Api<Endpoints> = Api::namespaced(ctx.physical_client.clone(), &mapping.from.namespace);
    if let Some(host_endpoints) = host_endpoints_api.get_opt(&mapping.from.name).await? {
        let desired_endpoints = Endpoints {
            metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
                name: Some(mapping.to.name.clone()),
                namespace: Some(mapping.to.namespace.clone()),
                ..Default::default()
            },
            subsets: host_endpoints.subsets,
        };
        let v_endpoints_api: Api<Endpoints> = Api::namespaced(ctx.virtual_client.clone(), &mapping.to.namespace);
        v_endpoints_api
            .patch(
                &mapping.to.name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&desired_endpoints),
            )
            .await?;
    }
    Ok(())
}

/// Mirrors `mapping.from` (a vService) onto `mapping.to` (a host Service).
/// Endpoints are never mirrored in this direction.
pub async fn reconcile_virtual_to_host(ctx: &RegisterContext, mapping: &ServiceMapping) -> Result<()> {
    let v_api: Api<Service> = Api::namespaced(ctx.virtual_client.clone(), &mapping.from.namespace);
    let Some(v_svc) = v_api.get_opt(&mapping.from.name).await? else {
        return Ok(());
    };

    let v_spec = v_svc.spec.clone().unwrap_or_default();
    let is_headless = v_spec.cluster_ip.as_deref() == Some("None");
    let desired = Service {
        metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
            name: Some(mapping.to.name.clone()),
            namespace: Some(mapping.to.namespace.clone()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: is_headless.then(|| "None".to_owned()),
            ports: v_spec.ports,
            ..ServiceSpec::default()
        }),
        status: None,
    };

    let host_api: Api<Service> = Api::namespaced(ctx.physical_client.clone(), &mapping.to.namespace);
    host_api
        .patch(&mapping.to.name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&desired))
        .await?;
    Ok(())
}

async fn ensure_virtual_namespace(ctx: &RegisterContext, namespace: &str) -> Result<()> {
    let api: Api<Namespace> = Api::all(ctx.virtual_client.clone());
    if api.get_opt(namespace).await?.is_some() {
        return Ok(());
    }
    let desired = Namespace {
        metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
            name: Some(namespace.to_owned()),
            ..Default::default()
        },
        spec: None,
        status: None,
    };
    api.patch(namespace, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&desired))
        .await?;
    Ok(())
}

/// Spawns one watch+reconcile task per configured mapping, in both
/// directions. Each watch is scoped to the single named object the mapping
/// names, by field selector, rather than watching every Service in the
/// source namespace.
pub fn spawn(ctx: Arc<RegisterContext>) -> Vec<tokio::task::JoinHandle<()>> {
    let mut handles = Vec::new();
    for mapping in ctx.options.map_host_services.clone() {
        handles.push(spawn_host_to_virtual(Arc::clone(&ctx), mapping));
    }
    for mapping in ctx.options.map_virtual_services.clone() {
        handles.push(spawn_virtual_to_host(Arc::clone(&ctx), mapping));
    }
    handles
}

fn spawn_host_to_virtual(ctx: Arc<RegisterContext>, mapping: ServiceMapping) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let field_selector = format!("metadata.name={}", mapping.from.name);
        let api: Api<Service> = Api::namespaced(ctx.physical_client.clone(), &mapping.from.namespace);
        let config = watcher::Config::default().fields(&field_selector);
        let stream = watcher(api, config).default_backoff().touched_objects();
        futures::pin_mut!(stream);
        while let Some(event) = stream.next().await {
            match event {
                Ok(_) => {
                    if let Err(err) = reconcile_host_to_virtual(ctx.as_ref(), &mapping).await {
                        tracing::error!(mapping = %mapping.from, error = %err, "host-to-virtual service mapping reconcile failed");
                    }
                }
                Err(err) => tracing::warn!(mapping = %mapping.from, error = %err, "host-to-virtual service mapping watch error"),
            }
        }
    })
}

fn spawn_virtual_to_host(ctx: Arc<RegisterContext>, mapping: ServiceMapping) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let field_selector = format!("metadata.name={}", mapping.from.name);
        let api: Api<Service> = Api::namespaced(ctx.virtual_client.clone(), &mapping.from.namespace);
        let config = watcher::Config::default().fields(&field_selector);
        let stream = watcher(api, config).default_backoff().touched_objects();
        futures::pin_mut!(stream);
        while let Some(event) = stream.next().await {
            match event {
                Ok(_) => {
                    if let Err(err) = reconcile_virtual_to_host(ctx.as_ref(), &mapping).await {
                        tracing::error!(mapping = %mapping.from, error = %err, "virtual-to-host service mapping reconcile failed");
                    }
                }
                Err(err) => tracing::warn!(mapping = %mapping.from, error = %err, "virtual-to-host service mapping watch error"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use translate::mapping::NamespacedName;

    #[test]
    fn field_selector_names_exactly_the_mapped_service() {
        let mapping = ServiceMapping {
            from: NamespacedName { namespace: "kube-public".to_owned(), name: "ingress-gateway".to_owned() },
            to: NamespacedName { namespace: "default".to_owned(), name: "ingress-gateway".to_owned() },
        };
        assert_eq!(format!("metadata.name={}", mapping.from.name), "metadata.name=ingress-gateway");
    }
}
