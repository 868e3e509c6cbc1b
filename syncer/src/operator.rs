//! Daemon wiring: builds the [`RegisterContext`], gives every enabled kind
//! its own queue/watch/worker set, starts the two kinds that drive their own
//! bespoke reconcile loop (Nodes, PersistentVolumes), the Service Sync and
//! Default-Endpoint/CoreDNS maintainers, and serves the ambient metrics/
//! healthz surface until the process receives a shutdown signal.

use std::net::SocketAddr;
use std::sync::Arc;

use translate::mapping::NamespacedName;

use crate::config::Config;
use crate::context::RegisterContext;
use crate::framework::KindSyncer;
use crate::nodeservice::NodeServiceProvider;
use crate::queue::Queue;
use crate::resources::configmaps::ConfigMapSyncer;
use crate::resources::endpoints::EndpointsSyncer;
use crate::resources::ingresses::IngressSyncer;
use crate::resources::networkpolicies::NetworkPolicySyncer;
use crate::resources::nodes;
use crate::resources::persistentvolumeclaims::PersistentVolumeClaimSyncer;
use crate::resources::persistentvolumes;
use crate::resources::poddisruptionbudgets::PodDisruptionBudgetSyncer;
use crate::resources::pods::PodSyncer;
use crate::resources::priorityclasses::PriorityClassSyncer;
use crate::resources::secrets::SecretSyncer;
use crate::resources::serviceaccounts::ServiceAccountSyncer;
use crate::resources::services::ServiceSyncer;
use crate::resources::storageclasses::StorageClassSyncer;
use crate::{coredns, defaultendpoint, metrics, router, servicemapping, watch};

/// Runs the syncer daemon to completion: wires every enabled subsystem and
/// blocks until `ctrl-c` (or the platform's equivalent) is received.
pub async fn run(config: Config) -> anyhow::Result<()> {
    metrics::init();

    let listen_addr: SocketAddr = config.listen_addr.parse()?;
    let workers_per_kind = config.workers_per_kind;
    let (virtual_client, physical_client) = config.build_clients().await?;
    let target_namespace = config.target_namespace.clone();
    let suffix = config.suffix.clone();
    let options = config.into_options()?;

    let ctx = Arc::new(RegisterContext::new(virtual_client, physical_client, target_namespace, suffix, options));

    let mut handles = Vec::new();

    handles.extend(spawn_kind(ConfigMapSyncer, Arc::clone(&ctx), workers_per_kind));
    handles.extend(spawn_kind(SecretSyncer, Arc::clone(&ctx), workers_per_kind));
    handles.extend(spawn_kind(ServiceSyncer, Arc::clone(&ctx), workers_per_kind));
    handles.extend(spawn_kind(EndpointsSyncer, Arc::clone(&ctx), workers_per_kind));
    handles.extend(spawn_kind(ServiceAccountSyncer, Arc::clone(&ctx), workers_per_kind));
    handles.extend(spawn_kind(PodSyncer, Arc::clone(&ctx), workers_per_kind));
    handles.extend(spawn_kind(PersistentVolumeClaimSyncer, Arc::clone(&ctx), workers_per_kind));
    handles.extend(spawn_kind(NetworkPolicySyncer, Arc::clone(&ctx), workers_per_kind));
    handles.extend(spawn_kind(IngressSyncer, Arc::clone(&ctx), workers_per_kind));
    handles.extend(spawn_kind(PriorityClassSyncer, Arc::clone(&ctx), workers_per_kind));
    handles.extend(spawn_kind(StorageClassSyncer, Arc::clone(&ctx), workers_per_kind));
    handles.extend(spawn_kind(PodDisruptionBudgetSyncer, Arc::clone(&ctx), workers_per_kind));

    if ctx.controller_enabled("PersistentVolume") {
        let queue: Arc<Queue<NamespacedName>> = Queue::new();
        handles.extend(persistentvolumes::spawn_watches(Arc::clone(&ctx), Arc::clone(&queue)));
        handles.extend(persistentvolumes::spawn_workers(Arc::clone(&ctx), queue, workers_per_kind));
    }

    if ctx.controller_enabled("Node") {
        let queue: Arc<Queue<NamespacedName>> = Queue::new();
        let node_service = Arc::new(NodeServiceProvider::new((*ctx).clone()));
        handles.extend(nodes::spawn_watches(Arc::clone(&ctx), Arc::clone(&queue)));
        handles.extend(nodes::spawn_workers(Arc::clone(&ctx), node_service, queue, workers_per_kind));
    }

    handles.extend(defaultendpoint::spawn(Arc::clone(&ctx)));
    handles.extend(coredns::spawn(Arc::clone(&ctx)));
    handles.extend(servicemapping::spawn(Arc::clone(&ctx)));

    let app = router::build();
    let server_handle = tokio::spawn(async move {
        if let Err(err) = axum::Server::bind(&listen_addr).serve(app.into_make_service()).await {
            tracing::error!(error = %err, "metrics/healthz server exited");
        }
    });

    tracing::info!(%listen_addr, "syncer started");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, draining in-flight reconciles");

    server_handle.abort();
    for handle in handles {
        handle.abort();
    }
    Ok(())
}

/// Builds a queue, watches, and worker pool for one kind if it's enabled in
/// `ctx.options.controllers`; returns an empty vector otherwise, so callers
/// can unconditionally `.extend()` the result.
fn spawn_kind<S: KindSyncer>(syncer: S, ctx: Arc<RegisterContext>, workers: usize) -> Vec<tokio::task::JoinHandle<()>> {
    if !ctx.controller_enabled(S::NAME) {
        return Vec::new();
    }
    let syncer = Arc::new(syncer);
    let queue: Arc<Queue<NamespacedName>> = Queue::new();
    let mut handles = watch::spawn_watches(Arc::clone(&syncer), Arc::clone(&ctx), Arc::clone(&queue));
    handles.extend(crate::framework::spawn_workers(syncer, ctx, queue, workers));
    handles
}
