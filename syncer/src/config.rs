use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use clap::Parser;
use kube::Client;
use translate::mapping::{parse_mapping, ServiceMapping};
use translate::podsecurity::Standard;

use crate::error::SyncError;

/// Syncer configuration, enumerated exactly as the external interfaces
/// specify: one field per recognized configuration item.
#[derive(Debug, Parser)]
#[non_exhaustive]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Host namespace hosting this tenant's pObjs.
    #[arg(long)]
    pub target_namespace: String,
    /// Tenancy suffix `S`.
    #[arg(long)]
    pub suffix: String,
    /// The address on which the metrics/healthz HTTP server will listen.
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub listen_addr: String,
    /// Project every physical node regardless of pod placement.
    #[arg(long, default_value = "false")]
    pub sync_all_nodes: bool,
    /// Label selector restricting which physical nodes are eligible for
    /// projection.
    #[arg(long)]
    pub node_selector: Option<String>,
    /// Merge the administrator node selector overlay onto every vPod.
    #[arg(long, default_value = "false")]
    pub enforce_node_selector: bool,
    /// Administrator node selector overlay, `key=value,key2=value2`.
    #[arg(long, default_value = "")]
    pub admin_node_selector: String,
    /// If set, the virtual scheduler assigns `nodeName`; the syncer must
    /// not overwrite it. If unset (the default), the host scheduler picks.
    #[arg(long, default_value = "false")]
    pub enable_scheduler: bool,
    /// Skip the Node-Service Provider.
    #[arg(long, default_value = "false")]
    pub disable_fake_kubelets: bool,
    /// `""` | `baseline` | `restricted`.
    #[arg(long, default_value = "")]
    pub enforce_pod_security_standard: String,
    /// Host-namespace services mirrored into the virtual cluster, each
    /// `ns1/svc1=ns2/svc2` or a bare `svc`.
    #[arg(long)]
    pub map_host_services: Vec<String>,
    /// Virtual-cluster services mirrored into the host namespace.
    #[arg(long)]
    pub map_virtual_services: Vec<String>,
    /// Default namespace a bare mapping entry resolves against.
    #[arg(long, default_value = "default")]
    pub mapping_default_namespace: String,
    /// Per-kind syncers enabled; empty means all.
    #[arg(long)]
    pub controllers: Vec<String>,
    /// Name of the host Service fronting the virtual API server.
    #[arg(long)]
    pub service_name: String,
    /// Namespace of the host Service fronting the virtual API server.
    #[arg(long)]
    pub service_namespace: String,
    /// Worker tasks per kind.
    #[arg(long, default_value = "1")]
    pub workers_per_kind: usize,
    /// Path to the virtual cluster's kubeconfig. Unset means the virtual
    /// API server is reachable the same way the physical one is (the
    /// process's own in-cluster identity) — the case when the syncer runs
    /// as a sidecar of the virtual API server itself.
    #[arg(long)]
    pub virtual_kubeconfig: Option<PathBuf>,
}

impl Config {
    /// Parses the free-form string fields into the typed
    /// [`crate::context::SyncerOptions`] the rest of the syncer consumes.
    /// A malformed mapping string or selector aborts initialization with
    /// [`SyncError::ConfigError`], per the error taxonomy's propagation
    /// policy for startup errors.
    pub fn into_options(self) -> Result<crate::context::SyncerOptions, SyncError> {
        let pod_security_standard = Standard::parse(&self.enforce_pod_security_standard)
            .ok_or_else(|| {
                SyncError::ConfigError(format!(
                    "invalid --enforce-pod-security-standard {:?}",
                    self.enforce_pod_security_standard
                ))
            })?;
        let admin_node_selector = parse_key_value_list(&self.admin_node_selector)?;
        let map_host_services = parse_mappings(&self.map_host_services, &self.mapping_default_namespace)?;
        let map_virtual_services =
            parse_mappings(&self.map_virtual_services, &self.mapping_default_namespace)?;

        Ok(crate::context::SyncerOptions {
            sync_all_nodes: self.sync_all_nodes,
            node_selector: self.node_selector,
            enforce_node_selector: self.enforce_node_selector,
            admin_node_selector,
            enable_scheduler: self.enable_scheduler,
            disable_fake_kubelets: self.disable_fake_kubelets,
            pod_security_standard,
            map_host_services,
            map_virtual_services,
            controllers: self.controllers.into_iter().collect::<BTreeSet<_>>(),
            service_name: self.service_name,
            service_namespace: self.service_namespace,
        })
    }
}

impl Config {
    /// Builds the two `kube::Client`s the [`crate::context::RegisterContext`]
    /// holds. The physical client always uses in-cluster config (the syncer
    /// runs as a pod in the host cluster); the virtual client does too
    /// unless `--virtual-kubeconfig` points it at a different API server.
    pub async fn build_clients(&self) -> Result<(Client, Client), SyncError> {
        let physical_client = Client::try_default()
            .await
            .map_err(|err| SyncError::ConfigError(format!("building physical-cluster client: {err}")))?;

        let virtual_client = match &self.virtual_kubeconfig {
            Some(path) => {
                let kubeconfig = kube::config::Kubeconfig::read_from(path)
                    .map_err(|err| SyncError::ConfigError(format!("reading {path:?}: {err}")))?;
                let config = kube::Config::from_custom_kubeconfig(kubeconfig, &kube::config::KubeConfigOptions::default())
                    .await
                    .map_err(|err| SyncError::ConfigError(format!("parsing {path:?}: {err}")))?;
                Client::try_from(config)
                    .map_err(|err| SyncError::ConfigError(format!("building virtual-cluster client: {err}")))?
            }
            None => physical_client.clone(),
        };

        Ok((virtual_client, physical_client))
    }
}

fn parse_key_value_list(raw: &str) -> Result<BTreeMap<String, String>, SyncError> {
    let mut out = BTreeMap::new();
    for pair in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            SyncError::ConfigError(format!("invalid selector entry {pair:?}, expected key=value"))
        })?;
        out.insert(key.to_owned(), value.to_owned());
    }
    Ok(out)
}

fn parse_mappings(raw: &[String], default_namespace: &str) -> Result<Vec<ServiceMapping>, SyncError> {
    raw.iter()
        .map(|entry| {
            parse_mapping(entry, default_namespace)
                .map_err(|err| SyncError::ConfigError(err.to_string()))
        })
        .collect()
}
