//! The Register Context: everything a `KindSyncer` needs and nothing it
//! should ever read from a process global. Constructed once at startup and
//! handed to every syncer and subsystem by `Arc` reference.

use std::collections::BTreeSet;
use std::sync::Arc;

use kube::Client;
use translate::mapping::ServiceMapping;
use translate::podsecurity::Standard;

use crate::pluginhook::{NoopHook, PluginHook};

/// Administrator-controlled node projection and pod scheduling policy, plus
/// the other process-wide knobs enumerated in the external interfaces.
#[derive(Debug, Clone, Default)]
pub struct SyncerOptions {
    /// Project every physical node regardless of pod placement.
    pub sync_all_nodes: bool,
    /// Label selector restricting which physical nodes are eligible for
    /// projection even when `sync_all_nodes` is false.
    pub node_selector: Option<String>,
    /// Whether `admin_node_selector` is merged onto every vPod's
    /// `nodeSelector`, with admin keys overriding tenant keys on collision.
    pub enforce_node_selector: bool,
    /// The administrator-enforced selector overlay.
    pub admin_node_selector: std::collections::BTreeMap<String, String>,
    /// If true, the virtual scheduler assigns `nodeName` and the syncer
    /// must not overwrite it; if false (the default), `nodeName` is cleared
    /// on create so the host scheduler picks.
    pub enable_scheduler: bool,
    /// Skip the Node-Service Provider entirely.
    pub disable_fake_kubelets: bool,
    /// Pod Security Standard enforced before any pPod is created.
    pub pod_security_standard: Standard,
    /// Host-namespace services mirrored into the virtual cluster.
    pub map_host_services: Vec<ServiceMapping>,
    /// Virtual-cluster services mirrored into the host namespace.
    pub map_virtual_services: Vec<ServiceMapping>,
    /// Which per-kind syncers are enabled.
    pub controllers: BTreeSet<String>,
    /// Name of the host Service fronting the virtual API server.
    pub service_name: String,
    /// Namespace of the host Service fronting the virtual API server.
    pub service_namespace: String,
}

/// Holds references to both object stores, the target namespace `T`, the
/// tenancy suffix `S`, and the options every translator and syncer
/// consults. Lives for the life of the process; never mutated after
/// construction.
#[derive(Clone)]
pub struct RegisterContext {
    /// Client against the virtual cluster's API server.
    pub virtual_client: Client,
    /// Client against the host cluster, scoped (by RBAC, not by this
    /// struct) to the target namespace for namespaced kinds.
    pub physical_client: Client,
    /// The single host namespace all of this tenant's pObjs live in.
    pub target_namespace: String,
    /// The tenancy suffix `S`, read-only after process start.
    pub suffix: String,
    /// Administrator policy knobs.
    pub options: SyncerOptions,
    /// The registered plugin hook, invoked just before a translated pObj's
    /// metadata is written. Defaults to [`NoopHook`] when no plugin is
    /// configured.
    pub hook: Arc<dyn PluginHook>,
}

impl RegisterContext {
    /// Constructs a new context. `suffix` and `target_namespace` are fixed
    /// for the lifetime of the process.
    #[must_use]
    pub fn new(
        virtual_client: Client,
        physical_client: Client,
        target_namespace: String,
        suffix: String,
        options: SyncerOptions,
    ) -> Self {
        Self {
            virtual_client,
            physical_client,
            target_namespace,
            suffix,
            options,
            hook: Arc::new(NoopHook),
        }
    }

    /// Whether the named per-kind syncer is enabled.
    #[must_use]
    pub fn controller_enabled(&self, name: &str) -> bool {
        self.options.controllers.is_empty() || self.options.controllers.contains(name)
    }
}

impl std::fmt::Debug for RegisterContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterContext")
            .field("target_namespace", &self.target_namespace)
            .field("suffix", &self.suffix)
            .field("options", &self.options)
            .finish()
    }
}
