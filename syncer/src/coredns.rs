//! CoreDNS NodeHosts maintainer: keeps a ConfigMap listing every currently
//! projected virtual node and its advertised address, in the `/etc/hosts`-style
//! format CoreDNS's `hosts` plugin expects, so DNS lookups of a node's
//! hostname resolve inside the virtual cluster the same way they do on the
//! host.
//!
//! V-side watcher: the node list it reads from is the virtual cluster's own
//! projected Nodes (each one already carries the address the Node syncer
//! wrote into its status), not the physical cluster's. Also re-reconciles
//! on a fixed interval, matching `coredns`'s watch+requeue combination.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Node};
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::{watcher, WatchStreamExt};
use kube::ResourceExt;

use crate::consts::{
    COREDNS_CONFIGMAP_NAME, COREDNS_CONFIGMAP_NAMESPACE, COREDNS_NODEHOSTS_KEY, COREDNS_RECONCILE_INTERVAL,
    FIELD_MANAGER,
};
use crate::context::RegisterContext;
use crate::error::Result;

/// Recomputes the NodeHosts entry from the virtual cluster's current node
/// list and reconciles it onto the CoreDNS ConfigMap.
pub async fn reconcile(ctx: &RegisterContext) -> Result<()> {
    let v_nodes: Api<Node> = Api::all(ctx.virtual_client.clone());
    let nodes = v_nodes.list(&kube::api::ListParams::default()).await?;
    let node_hosts = render_node_hosts(&nodes.items);

    let mut data = BTreeMap::new();
    data.insert(COREDNS_NODEHOSTS_KEY.to_owned(), node_hosts);

    let desired = ConfigMap {
        metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
            name: Some(COREDNS_CONFIGMAP_NAME.to_owned()),
            namespace: Some(COREDNS_CONFIGMAP_NAMESPACE.to_owned()),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    };

    let api: Api<ConfigMap> = Api::namespaced(ctx.virtual_client.clone(), COREDNS_CONFIGMAP_NAMESPACE);
    api.patch(
        COREDNS_CONFIGMAP_NAME,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(&desired),
    )
    .await?;
    Ok(())
}

/// Renders one `<address> <hostname>` line per node that has an
/// `InternalIP`, sorted by hostname for a stable diff. Nodes without a
/// resolvable address are skipped rather than emitting a blank entry.
fn render_node_hosts(nodes: &[Node]) -> String {
    let mut lines: Vec<(String, String)> = nodes
        .iter()
        .filter_map(|node| {
            let name = node.name_any();
            let address = node
                .status
                .as_ref()
                .and_then(|s| s.addresses.as_ref())
                .and_then(|addrs| addrs.iter().find(|a| a.type_ == "InternalIP"))
                .map(|a| a.address.clone())?;
            Some((name, address))
        })
        .map(|(name, address)| (address, name))
        .collect();
    lines.sort();
    lines
        .into_iter()
        .map(|(address, name)| format!("{address} {name}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Spawns the watch-driven and interval-driven reconcile loops.
pub fn spawn(ctx: Arc<RegisterContext>) -> Vec<tokio::task::JoinHandle<()>> {
    vec![spawn_watch(Arc::clone(&ctx)), spawn_ticker(ctx)]
}

fn spawn_watch(ctx: Arc<RegisterContext>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let api: Api<Node> = Api::all(ctx.virtual_client.clone());
        let stream = watcher(api, watcher::Config::default()).default_backoff().touched_objects();
        futures::pin_mut!(stream);
        while let Some(event) = stream.next().await {
            match event {
                Ok(_) => {
                    if let Err(err) = reconcile(ctx.as_ref()).await {
                        tracing::error!(error = %err, "coredns node-hosts reconcile failed");
                    }
                }
                Err(err) => tracing::warn!(error = %err, "coredns node watch error"),
            }
        }
    })
}

fn spawn_ticker(ctx: Arc<RegisterContext>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(COREDNS_RECONCILE_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(err) = reconcile(ctx.as_ref()).await {
                tracing::error!(error = %err, "coredns node-hosts reconcile failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{NodeAddress, NodeStatus};

    fn node(name: &str, ip: &str) -> Node {
        Node {
            metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
                name: Some(name.to_owned()),
                ..Default::default()
            },
            spec: None,
            status: Some(NodeStatus {
                addresses: Some(vec![NodeAddress {
                    type_: "InternalIP".to_owned(),
                    address: ip.to_owned(),
                }]),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn renders_sorted_hosts_lines() {
        let nodes = vec![node("b", "10.0.0.2"), node("a", "10.0.0.1")];
        assert_eq!(render_node_hosts(&nodes), "10.0.0.1 a\n10.0.0.2 b");
    }

    #[test]
    fn skips_nodes_without_internal_ip() {
        let mut n = node("c", "");
        n.status.as_mut().unwrap().addresses = None;
        assert_eq!(render_node_hosts(&[n]), "");
    }
}
