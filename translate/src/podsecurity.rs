//! Pod Security Standard evaluation, run against a vPod before it is
//! forward-translated. Pure function; no I/O. This implements the subset of
//! the `baseline` and `restricted` profiles that can be checked from
//! `PodSpec` alone (no admission-time cluster context), which is sufficient
//! for the syncer's own gate before it ever creates a pObj.

use k8s_openapi::api::core::v1::PodSpec;

/// Which Pod Security Standard, if any, the syncer should enforce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Standard {
    /// No enforcement.
    #[default]
    None,
    /// Blocks known privilege escalations.
    Baseline,
    /// Restricted, hardened profile; a superset of `Baseline`'s checks.
    Restricted,
}

impl Standard {
    /// Parses the `enforcePodSecurityStandard` configuration value.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "" => Some(Self::None),
            "baseline" => Some(Self::Baseline),
            "restricted" => Some(Self::Restricted),
            _ => None,
        }
    }
}

/// Returns the list of violations of `standard` found in `spec`. An empty
/// vector means the pod is compliant and forward translation may proceed.
#[must_use]
pub fn evaluate(spec: &PodSpec, standard: Standard) -> Vec<String> {
    let mut violations = Vec::new();
    if standard == Standard::None {
        return violations;
    }

    if spec.host_network == Some(true) {
        violations.push("hostNetwork is not allowed".to_owned());
    }
    if spec.host_pid == Some(true) {
        violations.push("hostPID is not allowed".to_owned());
    }
    if spec.host_ipc == Some(true) {
        violations.push("hostIPC is not allowed".to_owned());
    }

    for container in spec.containers.iter().chain(spec.init_containers.iter().flatten()) {
        for port in container.ports.iter().flatten() {
            if port.host_port.is_some() {
                violations.push(format!(
                    "container {:?} sets hostPort, which is not allowed",
                    container.name
                ));
            }
        }
        let Some(security_context) = container.security_context.as_ref() else {
            if standard == Standard::Restricted {
                violations.push(format!(
                    "container {:?} must set a securityContext under the restricted profile",
                    container.name
                ));
            }
            continue;
        };
        if security_context.privileged == Some(true) {
            violations.push(format!("container {:?} must not run privileged", container.name));
        }
        if security_context.allow_privilege_escalation == Some(true) && standard == Standard::Restricted {
            violations.push(format!(
                "container {:?} must not allow privilege escalation under the restricted profile",
                container.name
            ));
        }
        if standard == Standard::Restricted {
            if security_context.run_as_non_root != Some(true) {
                violations.push(format!(
                    "container {:?} must set runAsNonRoot=true under the restricted profile",
                    container.name
                ));
            }
            let added = security_context
                .capabilities
                .as_ref()
                .and_then(|caps| caps.add.as_ref())
                .map(|added| added.iter().any(|cap| cap != "NET_BIND_SERVICE"))
                .unwrap_or(false);
            if added {
                violations.push(format!(
                    "container {:?} adds capabilities beyond NET_BIND_SERVICE under the restricted profile",
                    container.name
                ));
            }
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Container, ContainerPort, SecurityContext};

    #[test]
    fn none_standard_allows_anything() {
        let spec = PodSpec {
            host_network: Some(true),
            ..PodSpec::default()
        };
        assert!(evaluate(&spec, Standard::None).is_empty());
    }

    #[test]
    fn restricted_rejects_host_port() {
        let spec = PodSpec {
            containers: vec![Container {
                name: "nginx".to_owned(),
                ports: Some(vec![ContainerPort { host_port: Some(80), ..ContainerPort::default() }]),
                security_context: Some(SecurityContext {
                    run_as_non_root: Some(true),
                    ..SecurityContext::default()
                }),
                ..Container::default()
            }],
            ..PodSpec::default()
        };
        let violations = evaluate(&spec, Standard::Restricted);
        assert!(violations.iter().any(|v| v.contains("hostPort")));
    }

    #[test]
    fn baseline_ignores_missing_run_as_non_root() {
        let spec = PodSpec {
            containers: vec![Container {
                name: "nginx".to_owned(),
                security_context: Some(SecurityContext::default()),
                ..Container::default()
            }],
            ..PodSpec::default()
        };
        assert!(evaluate(&spec, Standard::Baseline).is_empty());
    }

    #[test]
    fn parses_known_standards() {
        assert_eq!(Standard::parse(""), Some(Standard::None));
        assert_eq!(Standard::parse("restricted"), Some(Standard::Restricted));
        assert_eq!(Standard::parse("bogus"), None);
    }
}
