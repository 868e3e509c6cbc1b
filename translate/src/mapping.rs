//! Parser for Service Sync mapping strings (`mapHostServices` /
//! `mapVirtualServices`). Pure function; no I/O.

use std::fmt;

/// A fully-qualified `namespace/name` pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NamespacedName {
    /// Namespace component.
    pub namespace: String,
    /// Name component.
    pub name: String,
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// One `source = target` entry from a mapping list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceMapping {
    /// The service being watched.
    pub from: NamespacedName,
    /// Where its mirror should be created.
    pub to: NamespacedName,
}

/// Why a mapping string was rejected.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum MappingParseError {
    /// The string had no `=`, and the bare form did not resolve to exactly
    /// one path segment.
    #[error("invalid mapping {0:?}: expected \"ns/svc=ns/svc\" or a bare service name")]
    InvalidShape(String),
    /// A `namespace/name` component had the wrong number of `/`-separated
    /// segments.
    #[error("invalid mapping {0:?}: expected \"namespace/name\"")]
    InvalidNamespacedName(String),
}

/// Parses a single mapping entry. Accepts `ns1/svc1=ns2/svc2` or a bare
/// `svc`, which is resolved against `default_namespace` on both sides.
/// Any other shape is rejected explicitly rather than guessed at.
pub fn parse_mapping(raw: &str, default_namespace: &str) -> Result<ServiceMapping, MappingParseError> {
    let raw = raw.trim();
    match raw.split_once('=') {
        Some((from, to)) => {
            let from = parse_namespaced_name(from, default_namespace)?;
            let to = parse_namespaced_name(to, default_namespace)?;
            Ok(ServiceMapping { from, to })
        }
        None => {
            if raw.is_empty() || raw.contains('/') {
                return Err(MappingParseError::InvalidShape(raw.to_owned()));
            }
            let name = NamespacedName {
                namespace: default_namespace.to_owned(),
                name: raw.to_owned(),
            };
            Ok(ServiceMapping { from: name.clone(), to: name })
        }
    }
}

fn parse_namespaced_name(
    raw: &str,
    default_namespace: &str,
) -> Result<NamespacedName, MappingParseError> {
    let raw = raw.trim();
    match raw.split_once('/') {
        Some((namespace, name)) => {
            if namespace.is_empty() || name.is_empty() || name.contains('/') {
                return Err(MappingParseError::InvalidNamespacedName(raw.to_owned()));
            }
            Ok(NamespacedName {
                namespace: namespace.to_owned(),
                name: name.to_owned(),
            })
        }
        None => {
            if raw.is_empty() {
                return Err(MappingParseError::InvalidNamespacedName(raw.to_owned()));
            }
            Ok(NamespacedName {
                namespace: default_namespace.to_owned(),
                name: raw.to_owned(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fully_qualified_mapping() {
        let got = parse_mapping("ns1/svc1=ns2/svc2", "default").unwrap();
        assert_eq!(got.from, NamespacedName { namespace: "ns1".into(), name: "svc1".into() });
        assert_eq!(got.to, NamespacedName { namespace: "ns2".into(), name: "svc2".into() });
    }

    #[test]
    fn bare_name_resolves_against_default_namespace_both_sides() {
        let got = parse_mapping("svc", "default").unwrap();
        assert_eq!(got.from, NamespacedName { namespace: "default".into(), name: "svc".into() });
        assert_eq!(got.to, got.from);
    }

    #[test]
    fn rejects_malformed_shapes() {
        assert!(parse_mapping("ns1/svc1/extra=ns2/svc2", "default").is_err());
        assert!(parse_mapping("/svc1=ns2/svc2", "default").is_err());
        assert!(parse_mapping("", "default").is_err());
    }

    #[test]
    fn one_sided_namespace_falls_back_to_default() {
        let got = parse_mapping("svc1=ns2/svc2", "default").unwrap();
        assert_eq!(got.from, NamespacedName { namespace: "default".into(), name: "svc1".into() });
    }
}
