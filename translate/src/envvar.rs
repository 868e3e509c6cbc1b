//! Service environment variables and `$(VAR)` dependent-variable expansion,
//! computed the way the host cluster's kubelet would, but against host-side
//! service IPs. Pure functions; no I/O.

/// A named container port on a service, as exposed to `service_env_vars`.
#[derive(Debug, Clone)]
pub struct ServicePort {
    /// Port name, if the service declared one.
    pub name: Option<String>,
    /// Port number.
    pub port: i32,
}

/// Computes the `<SVC>_SERVICE_HOST`/`_PORT`/`_PORT_<NAME>` and
/// `<SVC>_PORT[_<PORT>_TCP...]` family of environment variables for a
/// service visible in the pod's namespace, exactly as the kubelet would for
/// a same-namespace service, except `cluster_ip` is the *host*-side
/// ClusterIP rather than the virtual one.
#[must_use]
pub fn service_env_vars(service_name: &str, cluster_ip: &str, ports: &[ServicePort]) -> Vec<(String, String)> {
    if cluster_ip.is_empty() || cluster_ip == "None" {
        return Vec::new();
    }
    let prefix = make_env_var_name_prefix(service_name);
    let mut vars = vec![(format!("{prefix}_SERVICE_HOST"), cluster_ip.to_owned())];

    if let Some(first) = ports.first() {
        vars.push((format!("{prefix}_SERVICE_PORT"), first.port.to_string()));
        vars.push((
            format!("{prefix}_PORT"),
            format!("tcp://{cluster_ip}:{}", first.port),
        ));
    }
    for port in ports {
        if let Some(name) = port.name.as_ref().filter(|n| !n.is_empty()) {
            let port_prefix = make_env_var_name_prefix(name);
            vars.push((
                format!("{prefix}_SERVICE_PORT_{port_prefix}"),
                port.port.to_string(),
            ));
        }
        let port_suffix = format!("{}_TCP", port.port);
        vars.push((
            format!("{prefix}_PORT_{port_suffix}"),
            format!("tcp://{cluster_ip}:{}", port.port),
        ));
        vars.push((format!("{prefix}_PORT_{port_suffix}_PROTO"), "tcp".to_owned()));
        vars.push((format!("{prefix}_PORT_{port_suffix}_PORT"), port.port.to_string()));
        vars.push((format!("{prefix}_PORT_{port_suffix}_ADDR"), cluster_ip.to_owned()));
    }
    vars
}

fn make_env_var_name_prefix(name: &str) -> String {
    name.chars()
        .map(|c| if c == '-' { '_' } else { c.to_ascii_uppercase() })
        .collect()
}

const OPERATOR: u8 = b'$';
const OPENER: u8 = b'(';
const CLOSER: u8 = b')';

/// Expands `$(VAR)` references in `input` by looking each `VAR` up via
/// `mapping`; unresolved references are left as literal text, and `$$` is
/// the escape for a literal `$`. Mirrors the dependent-variable expansion
/// the host cluster's kubelet applies to pod env var values.
#[must_use]
pub fn expand(input: &str, mapping: impl Fn(&str) -> Option<String>) -> String {
    let bytes = input.as_bytes();
    let mut out = String::with_capacity(input.len());
    let mut checkpoint = 0usize;
    let mut cursor = 0usize;
    while cursor < bytes.len() {
        if bytes[cursor] == OPERATOR && cursor + 1 < bytes.len() {
            out.push_str(&input[checkpoint..cursor]);
            let rest = &input[cursor + 1..];
            let (literal, var_name, advance) = try_read_variable_name(rest);
            if let Some(name) = var_name {
                match mapping(name) {
                    Some(value) => out.push_str(&value),
                    None => out.push_str(&input[cursor..=cursor + advance]),
                }
            } else {
                out.push_str(literal);
            }
            cursor += advance;
            checkpoint = cursor + 1;
        }
        cursor += 1;
    }
    out.push_str(&input[checkpoint.min(input.len())..]);
    out
}

/// Returns `(literal-to-emit, variable-name-if-any, bytes-to-advance-past-operator)`.
fn try_read_variable_name(rest: &str) -> (&str, Option<&str>, usize) {
    let bytes = rest.as_bytes();
    if bytes.is_empty() {
        return ("$", None, 0);
    }
    match bytes[0] {
        OPERATOR => ("$", None, 1),
        OPENER => {
            for (i, b) in bytes.iter().enumerate().skip(1) {
                if *b == CLOSER {
                    return ("", Some(&rest[1..i]), i + 1);
                }
            }
            ("$(", None, 1)
        }
        _ => ("$", None, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn expands_known_variable() {
        let mut env = HashMap::new();
        env.insert("MYSERVICE_SERVICE_HOST".to_owned(), "10.0.0.5".to_owned());
        env.insert("MYSERVICE_SERVICE_PORT".to_owned(), "80".to_owned());
        let got = expand("$(MYSERVICE_SERVICE_HOST):$(MYSERVICE_SERVICE_PORT)", |name| {
            env.get(name).cloned()
        });
        assert_eq!(got, "10.0.0.5:80");
    }

    #[test]
    fn double_dollar_escapes_to_literal_dollar_paren() {
        let got = expand("$$(FIRST)", |_| None);
        assert_eq!(got, "$(FIRST)");
    }

    #[test]
    fn unresolved_reference_is_left_literal() {
        let got = expand("$(NOT_SET)", |_| None);
        assert_eq!(got, "$(NOT_SET)");
    }

    #[test]
    fn trailing_dollar_is_passed_through() {
        let got = expand("price: $", |_| None);
        assert_eq!(got, "price: $");
    }

    #[test]
    fn computes_host_port_and_tcp_family() {
        let ports = vec![ServicePort { name: Some("http".to_owned()), port: 80 }];
        let vars = service_env_vars("myservice", "10.0.0.5", &ports);
        let map: HashMap<_, _> = vars.into_iter().collect();
        assert_eq!(map.get("MYSERVICE_SERVICE_HOST"), Some(&"10.0.0.5".to_owned()));
        assert_eq!(map.get("MYSERVICE_SERVICE_PORT"), Some(&"80".to_owned()));
        assert_eq!(map.get("MYSERVICE_PORT"), Some(&"tcp://10.0.0.5:80".to_owned()));
        assert_eq!(map.get("MYSERVICE_SERVICE_PORT_HTTP"), Some(&"80".to_owned()));
    }

    #[test]
    fn headless_service_has_no_env_vars() {
        let vars = service_env_vars("myservice", "None", &[]);
        assert!(vars.is_empty());
    }
}
