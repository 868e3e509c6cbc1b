//! Deterministic, collision-resistant name translation between the virtual
//! and physical object stores. Pure functions; no I/O.

use sha2::{Digest, Sha256};

use crate::consts::{MAX_NAME_LENGTH, NAME_JOIN};

/// `physicalName(name, namespace) = name + "-x-" + namespace + "-x-" + S`,
/// truncated with a stable hash suffix if the joined string would exceed
/// [`MAX_NAME_LENGTH`].
#[must_use]
pub fn physical_name(name: &str, namespace: &str, suffix: &str) -> String {
    join_and_truncate(name, namespace, suffix)
}

/// Variant for cluster-scoped kinds: the target namespace `T` takes the
/// place of a virtual namespace.
#[must_use]
pub fn physical_name_cluster_scoped(name: &str, target_namespace: &str, suffix: &str) -> String {
    join_and_truncate(name, target_namespace, suffix)
}

fn join_and_truncate(name: &str, middle: &str, suffix: &str) -> String {
    let full = format!("{name}{NAME_JOIN}{middle}{NAME_JOIN}{suffix}");
    if full.chars().count() <= MAX_NAME_LENGTH {
        return full;
    }
    digest_truncate(&full)
}

/// Truncates `full` to fit [`MAX_NAME_LENGTH`], appending an 8-hex-char
/// digest of the untruncated string so that distinct over-long inputs keep
/// producing distinct names.
fn digest_truncate(full: &str) -> String {
    let digest = Sha256::digest(full.as_bytes());
    let hash_suffix = hex_prefix(&digest, 8);
    let keep = MAX_NAME_LENGTH.saturating_sub(hash_suffix.len() + 1);
    let truncated: String = full.chars().take(keep).collect();
    format!("{truncated}-{hash_suffix}")
}

fn hex_prefix(bytes: &[u8], chars: usize) -> String {
    let mut out = String::with_capacity(chars);
    for byte in bytes {
        if out.len() >= chars {
            break;
        }
        out.push_str(&format!("{byte:02x}"));
    }
    out.truncate(chars);
    out
}

/// Best-effort reverse of [`physical_name`] when no name/namespace
/// annotations are available: splits the packed name back into
/// `(name, namespace)`. Returns `None` once the name has been through
/// [`digest_truncate`], since the hash suffix is not reversible; callers
/// should treat the name/namespace annotations as authoritative and only
/// fall back to this for legacy objects predating the annotations.
#[must_use]
pub fn parse_physical_name(physical_name: &str) -> Option<(String, String)> {
    let mut parts = physical_name.rsplitn(3, NAME_JOIN);
    let _suffix = parts.next()?;
    let namespace = parts.next()?;
    let name = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    Some((name.to_owned(), namespace.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_without_truncation_when_short() {
        let got = physical_name("web", "app", "vc1");
        assert_eq!(got, "web-x-app-x-vc1");
    }

    #[test]
    fn is_deterministic() {
        assert_eq!(physical_name("web", "app", "vc1"), physical_name("web", "app", "vc1"));
    }

    #[test]
    fn distinct_inputs_produce_distinct_outputs() {
        assert_ne!(physical_name("web", "app", "vc1"), physical_name("web", "appx", "vc1"));
    }

    #[test]
    fn truncates_overlong_names_with_stable_hash() {
        let long_name = "a".repeat(80);
        let got = physical_name(&long_name, "app", "vc1");
        assert!(got.chars().count() <= MAX_NAME_LENGTH);
        // same input always yields the same truncated name
        assert_eq!(got, physical_name(&long_name, "app", "vc1"));
    }

    #[test]
    fn overlong_collision_pair_still_distinguished_by_hash() {
        let a = "x".repeat(70);
        let mut b = "x".repeat(69);
        b.push('y');
        let got_a = physical_name(&a, "ns", "vc1");
        let got_b = physical_name(&b, "ns", "vc1");
        assert_ne!(got_a, got_b);
    }

    #[test]
    fn cluster_scoped_uses_target_namespace_in_place_of_namespace() {
        let got = physical_name_cluster_scoped("fast", "tenant-ns", "vc1");
        assert_eq!(got, "fast-x-tenant-ns-x-vc1");
    }

    #[test]
    fn parses_packed_name_back() {
        let packed = physical_name("web", "app", "vc1");
        assert_eq!(parse_physical_name(&packed), Some(("web".to_owned(), "app".to_owned())));
    }
}
