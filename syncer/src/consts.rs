use std::time::Duration;

/// Field manager identifier used on every server-side apply / patch the
/// syncer issues.
pub(crate) const FIELD_MANAGER: &str = "vcluster-syncer";
/// Default requeue delay applied to transient I/O errors absent a more
/// specific backoff.
pub(crate) const DEFAULT_REQUEUE_DURATION: Duration = Duration::from_secs(5);
/// Default number of worker tasks draining each kind's queue.
pub(crate) const DEFAULT_WORKERS_PER_KIND: usize = 1;
/// Plugin hook RPC calls time out at this duration.
pub(crate) const PLUGIN_HOOK_TIMEOUT: Duration = Duration::from_secs(10);
/// Lifecycle pause/resume poll tick.
pub(crate) const LIFECYCLE_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Lifecycle pause/resume poll cap, per workload.
pub(crate) const LIFECYCLE_POLL_TIMEOUT: Duration = Duration::from_secs(180);
/// Replica count restored by `resume` when the paused-replicas annotation
/// is missing or unparseable.
pub(crate) const DEFAULT_RESUME_REPLICAS: i32 = 1;
/// Namespace the CoreDNS NodeHosts ConfigMap lives in, virtual-cluster side.
pub(crate) const COREDNS_CONFIGMAP_NAMESPACE: &str = "kube-system";
/// Name of the CoreDNS NodeHosts ConfigMap, virtual-cluster side.
pub(crate) const COREDNS_CONFIGMAP_NAME: &str = "coredns";
/// Data key inside the CoreDNS ConfigMap the `hosts` plugin reads its extra
/// NodeHosts entries from.
pub(crate) const COREDNS_NODEHOSTS_KEY: &str = "NodeHosts";
/// CoreDNS NodeHosts maintainer re-reconcile cadence, in addition to being
/// watch-driven.
pub(crate) const COREDNS_RECONCILE_INTERVAL: Duration = Duration::from_secs(60);
