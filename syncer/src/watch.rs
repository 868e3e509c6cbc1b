//! Watch-driven queue population for the generic [`crate::framework::KindSyncer`]
//! dispatch. Each kind gets two watches — one over its vObjs, one over its
//! pObjs — both translated into the same virtual-identity key the
//! framework's `reconcile` expects, and fed into one shared [`Queue`].
//!
//! Grounded on the `watcher`/`WatchStreamExt::touched_objects` idiom (not
//! `kube::runtime::Controller`, which bundles its own queue and dispatch we
//! already have a purpose-built replacement for — see `queue.rs` and
//! `framework.rs`'s module docs on replacing watch-driven event streams
//! with "a push channel per kind plus a coalescing work-queue"). Watch
//! re-establishment on a dropped connection is handled by `default_backoff`
//! internally; this module only has to turn touched objects into keys.

use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::{watcher, WatchStreamExt};
use kube::ResourceExt;

use translate::mapping::NamespacedName;
use translate::metadata::original_identity;

use crate::context::RegisterContext;
use crate::framework::KindSyncer;
use crate::queue::Queue;

/// Spawns the vObj- and pObj-side watches for one [`KindSyncer`], enqueueing
/// the affected virtual-identity key on every touched object. Returns both
/// task handles so the caller can join them at shutdown.
pub fn spawn_watches<S: KindSyncer>(
    syncer: Arc<S>,
    ctx: Arc<RegisterContext>,
    queue: Arc<Queue<NamespacedName>>,
) -> Vec<tokio::task::JoinHandle<()>> {
    vec![
        spawn_virtual_watch(Arc::clone(&syncer), Arc::clone(&ctx), Arc::clone(&queue)),
        spawn_physical_watch(syncer, ctx, queue),
    ]
}

fn spawn_virtual_watch<S: KindSyncer>(
    _syncer: Arc<S>,
    ctx: Arc<RegisterContext>,
    queue: Arc<Queue<NamespacedName>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let api = kube::Api::<S::Virtual>::all(ctx.virtual_client.clone());
        let stream = watcher(api, watcher::Config::default()).default_backoff().touched_objects();
        futures::pin_mut!(stream);
        while let Some(event) = stream.next().await {
            match event {
                Ok(v_obj) => {
                    let key = NamespacedName {
                        namespace: v_obj.namespace().unwrap_or_default(),
                        name: v_obj.name_any(),
                    };
                    queue.add(key).await;
                }
                Err(err) => {
                    tracing::warn!(kind = S::NAME, side = "virtual", error = %err, "watch error");
                }
            }
        }
    })
}

fn spawn_physical_watch<S: KindSyncer>(
    syncer: Arc<S>,
    ctx: Arc<RegisterContext>,
    queue: Arc<Queue<NamespacedName>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let api = syncer.physical_api(&ctx);
        let stream = watcher(api, watcher::Config::default()).default_backoff().touched_objects();
        futures::pin_mut!(stream);
        while let Some(event) = stream.next().await {
            match event {
                Ok(p_obj) => {
                    if !syncer.is_managed(&p_obj) {
                        continue;
                    }
                    let p_name = p_obj.name_any();
                    let Some((name, namespace)) = original_identity(p_obj.annotations(), &p_name) else {
                        continue;
                    };
                    queue.add(NamespacedName { namespace, name }).await;
                }
                Err(err) => {
                    tracing::warn!(kind = S::NAME, side = "physical", error = %err, "watch error");
                }
            }
        }
    })
}
