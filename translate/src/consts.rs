//! Annotation and label keys the syncer reads and writes.
//!
//! All of these are authoritative: their presence and values are how the
//! syncer recovers state across restarts (there is no sidecar database).

/// Marker label attached to every pObj created by the syncer. Its value is
/// the tenancy suffix `S`.
pub const MARKER_LABEL: &str = "vcluster.loft.sh/managed-by";
/// Records the pObj's origin V-namespace.
pub const NAMESPACE_LABEL: &str = "vcluster.loft.sh/namespace";

/// Records the original V-name on a pObj.
pub const NAME_ANNOTATION: &str = "vcluster.loft.sh/name";
/// Records the original V-namespace on a pObj.
pub const NAMESPACE_ANNOTATION: &str = "vcluster.loft.sh/namespace";
/// CSV of annotation keys the syncer itself added, so later diffs can tell
/// syncer-added annotations apart from user-added ones.
pub const MANAGED_ANNOTATIONS_ANNOTATION: &str = "vcluster.loft.sh/managed-annotations";
/// Marks a vPV that was created by reverse (P→V) translation; value is the
/// physical PV name it mirrors.
pub const HOST_PV_ANNOTATION: &str = "vcluster.loft.sh/host-pv";
/// Set to `"true"` on a paused virtual-cluster workload.
pub const PAUSED_ANNOTATION: &str = "vcluster.loft.sh/paused";
/// Records the replica count a paused workload had before it was scaled to 0.
pub const PAUSED_REPLICAS_ANNOTATION: &str = "vcluster.loft.sh/paused-replicas";
/// The host-cluster Service account name the syncer substituted, recorded so
/// the original vPod value can be recovered.
pub const SERVICE_ACCOUNT_NAME_ANNOTATION: &str = "vcluster.loft.sh/service-account-name";
/// Records whether the cluster-autoscaler annotation was present on the vPod.
pub const CLUSTER_AUTOSCALER_ANNOTATION: &str = "vcluster.loft.sh/cluster-autoscaler-enabled";
/// CSV-encoded copy of the original vObj's labels, so `translateLabels` can
/// be replayed without re-reading the vObj.
pub const LABELS_ANNOTATION: &str = "vcluster.loft.sh/labels";
/// Records the original vObj UID for reverse-mapping diagnostics.
pub const UID_ANNOTATION: &str = "vcluster.loft.sh/uid";

/// Label placed on the per-node host-cluster Service maintained by the
/// Node-Service Provider; value is the virtual node name.
pub const NODE_LABEL: &str = "vcluster.loft.sh/node";

/// Prefix used when copying virtual namespace labels onto a pPod, so that
/// NetworkPolicy peer selectors phrased against namespace labels remain
/// expressible on the host side without colliding with host namespace
/// labels of the same name.
pub const NAMESPACE_LABEL_PREFIX: &str = "vcluster.loft.sh/ns-label-";

/// Name-translator join token. `physicalName(name, ns) = name + JOIN + ns + JOIN + S`.
pub const NAME_JOIN: &str = "-x-";

/// Most Kubernetes kinds cap `metadata.name` at this many characters.
pub const MAX_NAME_LENGTH: usize = 63;
