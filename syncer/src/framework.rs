//! The generic syncer framework: a capability bit-set replacing runtime
//! "is-a" detection, a five-step reconcile dispatch routine shared by every
//! kind, and the worker pool that drains each kind's queue.
//!
//! Each kind is handled by its own monomorphic [`KindSyncer`] implementor;
//! the framework is generic over `S: KindSyncer` rather than boxing
//! heterogeneous syncers behind a single object-safe trait, so the
//! translator for each kind stays fully typed all the way down.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use translate::consts::MARKER_LABEL;
use translate::mapping::NamespacedName;

use crate::context::RegisterContext;
use crate::error::{Result, SyncError};
use crate::queue::Queue;

/// Direction capability bit flags. Checked once at registration/dispatch
/// time; a kind that does not declare `UP` will never have `sync_up`
/// invoked, regardless of what the pObj looks like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities(u8);

impl Capabilities {
    /// V is source of truth: `SyncDown`/`Sync` apply.
    pub const DOWN: Self = Self(1 << 0);
    /// P is source of truth: `SyncUp`/`Sync` apply.
    pub const UP: Self = Self(1 << 1);
    /// No pObj is ever created; vObj is synthesized from P-side observation.
    pub const FAKE: Self = Self(1 << 2);

    /// Combines two capability sets.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Whether this set contains every flag in `other`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Capabilities {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// A `Resource` bound usable for both the virtual and physical object
/// types every kind syncer works with.
pub trait SyncObject:
    Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Serialize + Send + Sync + 'static
{
}
impl<T> SyncObject for T where
    T: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Serialize + Send + Sync + 'static
{
}

/// Per-kind translate/reconcile rules. One implementor per Kubernetes kind;
/// the framework's [`reconcile`] routine is generic over this trait rather
/// than dispatching through a trait object, so translation stays
/// monomorphic.
#[async_trait]
pub trait KindSyncer: Send + Sync + 'static {
    /// The vObj type.
    type Virtual: SyncObject;
    /// The pObj type.
    type Physical: SyncObject;

    /// Stable name used in logs, metrics, and the `controllers` feature
    /// flag set.
    const NAME: &'static str;
    /// Direction capability set this kind implements.
    const CAPABILITIES: Capabilities;
    /// Whether this kind is cluster-scoped on both sides (Nodes,
    /// PersistentVolumes, StorageClasses, PriorityClasses, ...).
    const CLUSTER_SCOPED: bool = false;

    /// Computes the physical object name for a given virtual key.
    fn physical_name(&self, ctx: &RegisterContext, v_key: &NamespacedName) -> String;

    /// `SyncDown`: vObj exists, pObj does not. Creates the pObj.
    async fn sync_down(&self, ctx: &RegisterContext, v_obj: &Self::Virtual) -> Result<()>;

    /// Both sides exist: diff and write back the minimum field set that
    /// changed, in whichever direction this kind's translation flows.
    async fn sync(&self, ctx: &RegisterContext, p_obj: &Self::Physical, v_obj: &Self::Virtual) -> Result<()>;

    /// `SyncUp`: pObj exists and is managed, vObj does not. Only called
    /// when `CAPABILITIES` includes [`Capabilities::UP`].
    async fn sync_up(&self, ctx: &RegisterContext, p_obj: &Self::Physical) -> Result<()> {
        let _ = (ctx, p_obj);
        Err(SyncError::ConfigError(format!("{} does not implement SyncUp", Self::NAME)))
    }

    /// Whether `p_obj` carries the marker label, i.e. is syncer-owned
    /// rather than some unrelated object that happens to share a name.
    fn is_managed(&self, p_obj: &Self::Physical) -> bool {
        p_obj.labels().contains_key(MARKER_LABEL)
    }

    /// Builds the `Api` for the vObj's own namespace (or all namespaces for
    /// cluster-scoped kinds).
    fn virtual_api(&self, ctx: &RegisterContext, namespace: &str) -> Api<Self::Virtual> {
        if Self::CLUSTER_SCOPED {
            Api::all(ctx.virtual_client.clone())
        } else {
            Api::namespaced(ctx.virtual_client.clone(), namespace)
        }
    }

    /// Builds the `Api` for the pObj, always scoped to the target
    /// namespace `T` (or cluster-wide for cluster-scoped kinds).
    fn physical_api(&self, ctx: &RegisterContext) -> Api<Self::Physical> {
        if Self::CLUSTER_SCOPED {
            Api::all(ctx.physical_client.clone())
        } else {
            Api::namespaced(ctx.physical_client.clone(), &ctx.target_namespace)
        }
    }
}

/// The framework's five-step reconcile routine, identical for every kind:
/// load both sides by key, then dispatch to `sync`/`sync_down`/`sync_up`/
/// orphan-cleanup depending on which side exists and what capabilities the
/// kind declares.
pub async fn reconcile<S: KindSyncer>(syncer: &S, ctx: &RegisterContext, key: &NamespacedName) -> Result<()> {
    let physical_name = syncer.physical_name(ctx, key);
    let v_api = syncer.virtual_api(ctx, &key.namespace);
    let p_api = syncer.physical_api(ctx);

    let v_obj = v_api.get_opt(&key.name).await?;
    let p_obj = p_api.get_opt(&physical_name).await?;

    match (v_obj, p_obj) {
        (Some(v_obj), Some(p_obj)) => syncer.sync(ctx, &p_obj, &v_obj).await,
        (Some(v_obj), None) => {
            if S::CAPABILITIES.contains(Capabilities::DOWN) {
                syncer.sync_down(ctx, &v_obj).await
            } else {
                Ok(())
            }
        }
        (None, Some(p_obj)) if syncer.is_managed(&p_obj) => {
            if S::CAPABILITIES.contains(Capabilities::UP) {
                syncer.sync_up(ctx, &p_obj).await
            } else {
                p_api.delete(&physical_name, &DeleteParams::default()).await?;
                Ok(())
            }
        }
        _ => Ok(()),
    }
}

/// Spawns `worker_count` tasks draining `queue`, each running [`reconcile`]
/// to completion for one key at a time before picking up the next. Errors
/// are logged with `(kind, key)` context and drive a requeue per
/// [`SyncError::requeue_after`]; they never panic the worker.
pub fn spawn_workers<S: KindSyncer>(
    syncer: Arc<S>,
    ctx: Arc<RegisterContext>,
    queue: Arc<Queue<NamespacedName>>,
    worker_count: usize,
) -> Vec<tokio::task::JoinHandle<()>> {
    (0..worker_count)
        .map(|_| {
            let syncer = Arc::clone(&syncer);
            let ctx = Arc::clone(&ctx);
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                while let Some(key) = queue.pop().await {
                    let timer = crate::metrics::reconcile_timer();
                    let result = reconcile(syncer.as_ref(), ctx.as_ref(), &key).await;
                    timer.observe_duration();
                    queue.done(key.clone()).await;
                    if let Err(err) = result {
                        tracing::error!(kind = S::NAME, key = %key, error = %err, "reconcile failed");
                        crate::metrics::record_failure(S::NAME);
                        if let Some(delay) = err.requeue_after() {
                            queue.add_after(key, delay);
                        }
                    }
                }
                tracing::debug!(kind = S::NAME, "worker shut down");
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_union_and_contains() {
        let both = Capabilities::DOWN | Capabilities::UP;
        assert!(both.contains(Capabilities::DOWN));
        assert!(both.contains(Capabilities::UP));
        assert!(!both.contains(Capabilities::FAKE));
    }
}
