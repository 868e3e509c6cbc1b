//! Plugin hook seam. A registered plugin can mutate a translated object
//! just before it is written; every call is wrapped in a timeout so a
//! misbehaving plugin cannot stall a reconcile indefinitely. The gRPC
//! transport a real plugin would use to implement this trait is outside
//! the syncer's scope; this only defines the seam.

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::consts::PLUGIN_HOOK_TIMEOUT;
use crate::error::{Result, SyncError};

/// A hook a plugin registers to mutate pObj metadata (or, for kinds that
/// need it, the object's serialized spec) before the syncer writes it.
#[async_trait]
pub trait PluginHook: Send + Sync {
    /// Called after `translate_metadata`/`translate_metadata_update`, with
    /// the metadata the syncer is about to write. Returns the
    /// (possibly unchanged) metadata to actually write.
    async fn mutate_metadata(&self, kind: &str, meta: ObjectMeta) -> ObjectMeta {
        let _ = kind;
        meta
    }
}

/// The hook used when no plugin is registered.
pub struct NoopHook;

#[async_trait]
impl PluginHook for NoopHook {
    async fn mutate_metadata(&self, _kind: &str, meta: ObjectMeta) -> ObjectMeta {
        meta
    }
}

/// Invokes `hook.mutate_metadata`, bounding it to [`PLUGIN_HOOK_TIMEOUT`].
/// A hook that does not return in time fails the reconcile with a
/// `Transient` error rather than hanging the worker forever.
pub async fn mutate_metadata_with_timeout(
    hook: &dyn PluginHook,
    kind: &str,
    meta: ObjectMeta,
) -> Result<ObjectMeta> {
    tokio::time::timeout(PLUGIN_HOOK_TIMEOUT, hook.mutate_metadata(kind, meta))
        .await
        .map_err(|_| SyncError::Transient(format!("plugin hook timed out for kind {kind}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_hook_passes_metadata_through_unchanged() {
        let meta = ObjectMeta {
            name: Some("web".to_owned()),
            ..ObjectMeta::default()
        };
        let got = mutate_metadata_with_timeout(&NoopHook, "Pod", meta.clone()).await.unwrap();
        assert_eq!(got.name, meta.name);
    }
}
