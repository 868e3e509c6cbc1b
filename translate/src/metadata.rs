//! Metadata translation: labels, annotations and the managed-annotations
//! bookkeeping that makes diffs able to distinguish syncer-added state from
//! tenant- or operator-added state. Pure functions; no I/O.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use sha2::{Digest, Sha256};

use crate::consts::{
    LABELS_ANNOTATION, MANAGED_ANNOTATIONS_ANNOTATION, MARKER_LABEL, NAMESPACE_ANNOTATION,
    NAMESPACE_LABEL, NAMESPACE_LABEL_PREFIX, NAME_ANNOTATION, UID_ANNOTATION,
};
use crate::name::parse_physical_name;

/// Everything [`translate_metadata`] needs to know about the vObj side.
#[derive(Debug, Clone)]
pub struct VirtualIdentity {
    /// vObj name.
    pub name: String,
    /// vObj namespace (empty for cluster-scoped kinds).
    pub namespace: String,
    /// vObj UID, when known.
    pub uid: Option<String>,
    /// vObj labels, copied forward through [`translate_labels`].
    pub labels: BTreeMap<String, String>,
    /// vObj annotations the syncer should preserve verbatim on the pObj
    /// (distinct from the annotations this module itself manages).
    pub annotations: BTreeMap<String, String>,
}

/// Rewrites a vObj's label keys for use on a pObj: reserved-prefix keys are
/// escaped so they cannot collide with the syncer's own marker/namespace
/// labels; everything else, including values, passes through unchanged.
#[must_use]
pub fn translate_labels(v_labels: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    v_labels
        .iter()
        .map(|(key, value)| (escape_reserved_label_key(key), value.clone()))
        .collect()
}

/// Reserved label-key prefix the syncer owns; a tenant label under this
/// prefix would otherwise collide with the marker/namespace labels.
const RESERVED_LABEL_PREFIX: &str = "vcluster.loft.sh/";

fn escape_reserved_label_key(key: &str) -> String {
    if !key.starts_with(RESERVED_LABEL_PREFIX) {
        return key.to_owned();
    }
    let digest = Sha256::digest(key.as_bytes());
    let mut hex = String::with_capacity(8);
    for byte in digest.iter().take(4) {
        hex.push_str(&format!("{byte:02x}"));
    }
    format!("{NAMESPACE_LABEL_PREFIX}escaped-{hex}")
}

/// Builds the namespace-label key used to re-expose a virtual namespace's
/// labels on a pPod so that namespace-label selectors (NetworkPolicy peer
/// selectors, in particular) remain expressible on the host side.
#[must_use]
pub fn namespace_label_key(v_namespace_label_key: &str) -> String {
    format!("{NAMESPACE_LABEL_PREFIX}{v_namespace_label_key}")
}

/// Builds pObj metadata for a freshly created mirror of `identity`.
///
/// Sets: `name`, `namespace` (the target namespace `T`, or empty for
/// cluster-scoped kinds), the marker label, the namespace label, the
/// name/namespace annotations, and the managed-annotations annotation that
/// lists every annotation key this call wrote, so a later
/// [`translate_metadata_update`] can tell them apart from annotations a
/// human or another controller added directly to the pObj.
#[must_use]
pub fn translate_metadata(
    identity: &VirtualIdentity,
    physical_name: &str,
    target_namespace: Option<&str>,
    suffix: &str,
) -> ObjectMeta {
    let mut annotations = identity.annotations.clone();
    let mut managed: Vec<String> = Vec::new();

    let mut set = |key: &str, value: String| {
        annotations.insert(key.to_owned(), value);
        managed.push(key.to_owned());
    };
    set(NAME_ANNOTATION, identity.name.clone());
    set(NAMESPACE_ANNOTATION, identity.namespace.clone());
    if let Some(uid) = identity.uid.as_ref() {
        set(UID_ANNOTATION, uid.clone());
    }
    if !identity.labels.is_empty() {
        set(LABELS_ANNOTATION, encode_labels(&identity.labels));
    }
    managed.sort();
    managed.dedup();
    annotations.insert(MANAGED_ANNOTATIONS_ANNOTATION.to_owned(), managed.join(","));

    let mut labels = translate_labels(&identity.labels);
    labels.insert(MARKER_LABEL.to_owned(), suffix.to_owned());
    labels.insert(NAMESPACE_LABEL.to_owned(), identity.namespace.clone());

    ObjectMeta {
        name: Some(physical_name.to_owned()),
        namespace: target_namespace.map(str::to_owned),
        labels: Some(labels),
        annotations: Some(annotations),
        ..ObjectMeta::default()
    }
}

/// Reconciles an existing pObj's metadata toward what [`translate_metadata`]
/// would produce today, while preserving any annotation a human or another
/// controller added to the pObj directly (i.e. any key absent from the
/// pObj's own recorded managed-annotations set).
///
/// Returns the full desired `ObjectMeta`. Callers diff this against the
/// live pObj and only issue a write if it actually changed, which is what
/// makes down-sync idempotent when nothing on the vObj side moved.
#[must_use]
pub fn translate_metadata_update(
    identity: &VirtualIdentity,
    physical_name: &str,
    target_namespace: Option<&str>,
    suffix: &str,
    existing_p_annotations: &BTreeMap<String, String>,
) -> ObjectMeta {
    let desired = translate_metadata(identity, physical_name, target_namespace, suffix);
    let previously_managed: Vec<&str> = existing_p_annotations
        .get(MANAGED_ANNOTATIONS_ANNOTATION)
        .map(|csv| csv.split(',').filter(|key| !key.is_empty()).collect())
        .unwrap_or_default();

    let mut merged = existing_p_annotations.clone();
    for key in &previously_managed {
        merged.remove(*key);
    }
    if let Some(desired_annotations) = desired.annotations.clone() {
        merged.extend(desired_annotations);
    }

    let mut out = desired;
    out.annotations = Some(merged);
    out
}

fn encode_labels(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Recovers the original V identity of a pObj: the name/namespace
/// annotations are authoritative; parsing the packed physical name is only
/// a fallback for pObjs that predate those annotations.
#[must_use]
pub fn original_identity(
    p_annotations: &BTreeMap<String, String>,
    physical_name: &str,
) -> Option<(String, String)> {
    match (
        p_annotations.get(NAME_ANNOTATION),
        p_annotations.get(NAMESPACE_ANNOTATION),
    ) {
        (Some(name), Some(namespace)) => Some((name.clone(), namespace.clone())),
        _ => parse_physical_name(physical_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> VirtualIdentity {
        VirtualIdentity {
            name: "web".to_owned(),
            namespace: "app".to_owned(),
            uid: Some("abc-123".to_owned()),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
        }
    }

    #[test]
    fn sets_marker_and_namespace_labels() {
        let meta = translate_metadata(&identity(), "web-x-app-x-vc1", Some("tenant-ns"), "vc1");
        let labels = meta.labels.unwrap();
        assert_eq!(labels.get(MARKER_LABEL), Some(&"vc1".to_owned()));
        assert_eq!(labels.get(NAMESPACE_LABEL), Some(&"app".to_owned()));
    }

    #[test]
    fn records_reversible_identity_annotations() {
        let meta = translate_metadata(&identity(), "web-x-app-x-vc1", Some("tenant-ns"), "vc1");
        let annotations = meta.annotations.unwrap();
        assert_eq!(annotations.get(NAME_ANNOTATION), Some(&"web".to_owned()));
        assert_eq!(annotations.get(NAMESPACE_ANNOTATION), Some(&"app".to_owned()));
    }

    #[test]
    fn update_preserves_user_added_annotations() {
        let mut existing = BTreeMap::new();
        existing.insert("team-owner".to_owned(), "payments".to_owned());
        existing.insert(
            MANAGED_ANNOTATIONS_ANNOTATION.to_owned(),
            format!("{NAME_ANNOTATION},{NAMESPACE_ANNOTATION}"),
        );
        existing.insert(NAME_ANNOTATION.to_owned(), "web".to_owned());
        existing.insert(NAMESPACE_ANNOTATION.to_owned(), "app".to_owned());

        let updated = translate_metadata_update(
            &identity(),
            "web-x-app-x-vc1",
            Some("tenant-ns"),
            "vc1",
            &existing,
        );
        let annotations = updated.annotations.unwrap();
        assert_eq!(annotations.get("team-owner"), Some(&"payments".to_owned()));
    }

    #[test]
    fn update_is_idempotent_absent_vobj_changes() {
        let first = translate_metadata(&identity(), "web-x-app-x-vc1", Some("tenant-ns"), "vc1");
        let second = translate_metadata_update(
            &identity(),
            "web-x-app-x-vc1",
            Some("tenant-ns"),
            "vc1",
            first.annotations.as_ref().unwrap(),
        );
        assert_eq!(first.annotations, second.annotations);
        assert_eq!(first.labels, second.labels);
    }

    #[test]
    fn escapes_colliding_reserved_label_keys() {
        let mut labels = BTreeMap::new();
        labels.insert(MARKER_LABEL.to_owned(), "tenant-supplied".to_owned());
        let translated = translate_labels(&labels);
        assert!(!translated.contains_key(MARKER_LABEL));
        assert_eq!(translated.len(), 1);
    }

    #[test]
    fn original_identity_prefers_annotations_over_parsed_name() {
        let mut annotations = BTreeMap::new();
        annotations.insert(NAME_ANNOTATION.to_owned(), "real-name".to_owned());
        annotations.insert(NAMESPACE_ANNOTATION.to_owned(), "real-ns".to_owned());
        let got = original_identity(&annotations, "web-x-app-x-vc1").unwrap();
        assert_eq!(got, ("real-name".to_owned(), "real-ns".to_owned()));
    }

    #[test]
    fn original_identity_falls_back_to_parsed_name() {
        let got = original_identity(&BTreeMap::new(), "web-x-app-x-vc1").unwrap();
        assert_eq!(got, ("web".to_owned(), "app".to_owned()));
    }
}
