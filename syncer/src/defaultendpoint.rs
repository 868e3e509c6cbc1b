//! Default-Endpoint maintainer: keeps the virtual cluster's own
//! `default/kubernetes` Endpoints pointed at the host Service fronting the
//! virtual API server, so in-cluster clients resolving
//! `kubernetes.default.svc` land on a real, reachable address instead of
//! whatever the virtual API server itself last wrote there.
//!
//! P-side watcher: it watches the host Endpoints object named by
//! `ctx.options.service_name`/`service_namespace`, translates its subsets
//! (addresses as-is, port forced to the standard HTTPS API port) and
//! reconciles them onto V's `default/kubernetes`. Also re-reconciles on a
//! fixed interval in addition to being watch-driven, per
//! `k8sdefaultendpoint`'s watch+requeue combination.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::{Endpoints, EndpointsAddress, EndpointsPort, EndpointsSubset};
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::{watcher, WatchStreamExt};

use crate::consts::FIELD_MANAGER;
use crate::context::RegisterContext;
use crate::error::Result;

const VIRTUAL_API_PORT: i32 = 443;
const RECONCILE_INTERVAL: Duration = Duration::from_secs(60);

/// Reconciles V's `default/kubernetes` Endpoints to mirror the host
/// Service's own Endpoints right now.
pub async fn reconcile(ctx: &RegisterContext) -> Result<()> {
    let host_api: Api<Endpoints> = Api::namespaced(ctx.physical_client.clone(), &ctx.options.service_namespace);
    let Some(host_endpoints) = host_api.get_opt(&ctx.options.service_name).await? else {
        tracing::warn!(
            service = %ctx.options.service_name,
            namespace = %ctx.options.service_namespace,
            "host service endpoints not found, skipping default-endpoint reconcile"
        );
        return Ok(());
    };

    let subsets = translate_subsets(host_endpoints.subsets.unwrap_or_default());
    let desired = Endpoints {
        metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
            name: Some("kubernetes".to_owned()),
            namespace: Some("default".to_owned()),
            ..Default::default()
        },
        subsets: Some(subsets),
    };

    let v_api: Api<Endpoints> = Api::namespaced(ctx.virtual_client.clone(), "default");
    v_api
        .patch("kubernetes", &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&desired))
        .await?;
    Ok(())
}

fn translate_subsets(host_subsets: Vec<EndpointsSubset>) -> Vec<EndpointsSubset> {
    let addresses: Vec<EndpointsAddress> = host_subsets
        .into_iter()
        .flat_map(|subset| subset.addresses.unwrap_or_default())
        .map(|addr| EndpointsAddress {
            ip: addr.ip,
            hostname: None,
            node_name: None,
            target_ref: None,
        })
        .collect();
    if addresses.is_empty() {
        return Vec::new();
    }
    vec![EndpointsSubset {
        addresses: Some(addresses),
        not_ready_addresses: None,
        ports: Some(vec![EndpointsPort {
            name: Some("https".to_owned()),
            port: VIRTUAL_API_PORT,
            protocol: Some("TCP".to_owned()),
            app_protocol: None,
        }]),
    }]
}

/// Spawns the watch-driven and interval-driven reconcile loops. Both feed
/// the same [`reconcile`] function; the interval loop exists only to paper
/// over a watch that silently stops delivering events, not as the primary
/// trigger.
pub fn spawn(ctx: Arc<RegisterContext>) -> Vec<tokio::task::JoinHandle<()>> {
    vec![spawn_watch(Arc::clone(&ctx)), spawn_ticker(ctx)]
}

fn spawn_watch(ctx: Arc<RegisterContext>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let api: Api<Endpoints> = Api::namespaced(ctx.physical_client.clone(), &ctx.options.service_namespace);
        let stream = watcher(api, watcher::Config::default()).default_backoff().touched_objects();
        futures::pin_mut!(stream);
        while let Some(event) = stream.next().await {
            match event {
                Ok(endpoints) if endpoints.metadata.name.as_deref() == Some(ctx.options.service_name.as_str()) => {
                    if let Err(err) = reconcile(ctx.as_ref()).await {
                        tracing::error!(error = %err, "default-endpoint reconcile failed");
                    }
                }
                Ok(_) => {}
                Err(err) => tracing::warn!(error = %err, "default-endpoint watch error"),
            }
        }
    })
}

fn spawn_ticker(ctx: Arc<RegisterContext>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(RECONCILE_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(err) = reconcile(ctx.as_ref()).await {
                tracing::error!(error = %err, "default-endpoint reconcile failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_host_subsets_translate_to_empty_virtual_subsets() {
        assert!(translate_subsets(Vec::new()).is_empty());
    }

    #[test]
    fn translated_subset_forces_the_https_api_port() {
        let host_subsets = vec![EndpointsSubset {
            addresses: Some(vec![EndpointsAddress {
                ip: "10.0.0.5".to_owned(),
                hostname: None,
                node_name: None,
                target_ref: None,
            }]),
            not_ready_addresses: None,
            ports: Some(vec![EndpointsPort {
                name: None,
                port: 6443,
                protocol: Some("TCP".to_owned()),
                app_protocol: None,
            }]),
        }];
        let translated = translate_subsets(host_subsets);
        assert_eq!(translated.len(), 1);
        let ports = translated[0].ports.as_ref().unwrap();
        assert_eq!(ports[0].port, VIRTUAL_API_PORT);
        let addresses = translated[0].addresses.as_ref().unwrap();
        assert_eq!(addresses[0].ip, "10.0.0.5");
    }
}
