//! §6 Environment/CLI — everything the binary needs before reconciliation
//! starts. Flag parsing itself sits outside the reconciliation core (§1),
//! but the resulting `Config` value is threaded through `reconcile::build`
//! and the configurator for the rest of the process lifetime.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "controller", about = "Ingress controller reconciliation engine")]
pub struct Config {
    /// Path to the proxy binary, invoked for start/`-s reload`/`-s quit` (§6).
    #[arg(long, env = "PROXY_BINARY", default_value = "/usr/sbin/nginx")]
    pub proxy_binary: PathBuf,

    /// Proxy config root; `conf.d/`, `secrets/`, `nginx.conf` and
    /// `config-version.conf` all live under here (§6 filesystem layout).
    #[arg(long, env = "PROXY_CONFIG_ROOT", default_value = "/etc/nginx")]
    pub proxy_config_root: PathBuf,

    /// Unix-domain socket the proxy serves `GET /configVersion` over (§6).
    #[arg(long, env = "PROXY_VERIFY_SOCKET", default_value = "/var/run/nginx-config-version.sock")]
    pub proxy_verify_socket: PathBuf,

    /// `ingress-class` annotation value this controller answers to (§4.A).
    #[arg(long, env = "INGRESS_CLASS", default_value = "nginx")]
    pub ingress_class: String,

    /// When set, ingresses without a matching ingress-class annotation are
    /// dropped rather than accepted by default (§4.A).
    #[arg(long, env = "CLASS_ONLY")]
    pub class_only: bool,

    /// Restrict watches to a single namespace; unset watches all namespaces.
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    /// Namespace the controller itself runs in (leader-election Lease,
    /// status reporter identity).
    #[arg(long, env = "POD_NAMESPACE", default_value = "default")]
    pub pod_namespace: String,

    /// This pod's name, used as the leader-election lock identity (§4.H).
    #[arg(long, env = "POD_NAME")]
    pub pod_name: Option<String>,

    /// Enable the single-writer leader election gate on the status
    /// reporter (§4.G, §4.H).
    #[arg(long, env = "ENABLE_LEADER_ELECTION")]
    pub enable_leader_election: bool,

    /// Enable the status reporter at all (§4.G). Independent of leader
    /// election: without election, every replica updates.
    #[arg(long, env = "REPORT_STATUS")]
    pub report_status: bool,

    /// Name of the service whose load-balancer address is mirrored onto
    /// managed ingresses by the status reporter (§4.D syncService, §4.G).
    #[arg(long, env = "EXTERNAL_SERVICE")]
    pub external_service: Option<String>,

    /// Name of the watched global ConfigMap (§4.A, §6).
    #[arg(long, env = "CONFIG_MAP_NAME", default_value = "nginx-config")]
    pub config_map_name: String,

    /// Proxy-plus mode: enables JWK secret resolution and health-check
    /// probe synthesis (§4.D build).
    #[arg(long, env = "PROXY_PLUS")]
    pub proxy_plus: bool,

    /// Directory holding the bootstrap template files (§4.I).
    #[arg(long, env = "TEMPLATES_DIR", default_value = "/etc/nginx/templates")]
    pub templates_dir: PathBuf,

    /// Name of a fixed default-server TLS secret, preserved on disk even
    /// when deleted from the API (§4.D syncSecret, §6).
    #[arg(long, env = "DEFAULT_SERVER_TLS_SECRET")]
    pub default_server_secret: Option<String>,

    /// Name of a fixed wildcard TLS secret, same preservation rule as the
    /// default-server secret.
    #[arg(long, env = "WILDCARD_TLS_SECRET")]
    pub wildcard_tls_secret: Option<String>,
}

impl Config {
    pub fn parse_from_env() -> Self {
        Config::parse()
    }

    pub fn pod_name_or_hostname(&self) -> String {
        self.pod_name.clone().unwrap_or_else(|| {
            std::env::var("HOSTNAME").unwrap_or_else(|_| "controller".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_is_well_formed() {
        Config::command().debug_assert();
    }
}
