//! §3 DATA MODEL — the materialised types the reconciler builds and the
//! configurator owns. Routing/service/endpoint/secret/config-map objects
//! themselves are the orchestrator's own `k8s_openapi` types; we only model
//! what the source spec adds on top of them.

use std::collections::{BTreeMap, HashMap, HashSet};

use k8s_openapi::api::networking::v1::Ingress;

use crate::key::Key;

/// §3 MergeRole — annotation-derived role of a routing object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeRole {
    None,
    Master,
    Minion,
}

impl MergeRole {
    pub fn from_annotation(value: Option<&str>) -> Self {
        match value {
            Some("master") => MergeRole::Master,
            Some("minion") => MergeRole::Minion,
            _ => MergeRole::None,
        }
    }
}

/// §3 BackendRef — a resolved-to-be target service/port pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendRef {
    pub service_name: String,
    pub service_port: ServicePort,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServicePort {
    Number(i32),
    Name(String),
}

/// A resolved `(host, path)` rule ready for rendering, after endpoint
/// resolution has run (§4.D build).
#[derive(Debug, Clone)]
pub struct ResolvedRule {
    pub host: String,
    pub path: String,
    pub backend: BackendRef,
    /// Flat `"ip:port"` endpoint list, or the fallback upstream per §7/§8 P4.
    pub endpoints: Vec<String>,
}

/// §3 IngressEx — the materialised, endpoint-resolved form of an ingress.
#[derive(Debug, Clone)]
pub struct IngressEx {
    pub key: Key,
    pub source: Ingress,
    pub rules: Vec<ResolvedRule>,
    pub default_backend: Option<ResolvedRule>,
    /// host -> secret-name -> (cert, key) PEM bytes, pre-validated TLS shape.
    pub tls_secrets: BTreeMap<String, TlsSecret>,
    pub jwk_secret: Option<JwkSecret>,
    /// service name -> HTTP health-check probe path, proxy-plus only.
    pub health_checks: HashMap<String, HealthCheck>,
    /// service names that resolved through an `ExternalName` service.
    pub external_names: HashSet<String>,
}

#[derive(Debug, Clone)]
pub struct TlsSecret {
    pub cert: Vec<u8>,
    pub key: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct JwkSecret {
    pub key: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct HealthCheck {
    pub path: String,
    pub port: i32,
}

/// §3 MergeableIngresses — one master plus its ordered minions.
#[derive(Debug, Clone)]
pub struct MergeableIngresses {
    pub master: IngressEx,
    pub minions: Vec<IngressEx>,
}

impl MergeableIngresses {
    pub fn master_key(&self) -> &Key {
        &self.master.key
    }
}

/// §3 MaterialisedConfig — rendered bytes plus derived file path, owned by
/// the configurator.
#[derive(Debug, Clone)]
pub struct MaterialisedConfig {
    pub key: Key,
    pub file_stem: String,
    pub bytes: Vec<u8>,
}

/// §3 GlobalConfig — proxy-level parameters rebuilt on every ConfigMap event.
#[derive(Debug, Clone, Default)]
pub struct GlobalConfig {
    pub proxy_connect_timeout: String,
    pub proxy_read_timeout: String,
    pub proxy_send_timeout: String,
    pub client_max_body_size: String,
    pub worker_processes: String,
    pub worker_connections: String,
    pub server_names_hash_max_size: Option<String>,
    pub server_names_hash_bucket_size: Option<String>,
    pub variables_hash_max_size: Option<String>,
    pub variables_hash_bucket_size: Option<String>,
    pub ssl_protocols: Option<String>,
    pub ssl_ciphers: Option<String>,
    pub resolver: Option<String>,
    pub error_log_level: String,
    pub keepalive_timeout: String,
    pub main_snippets: Vec<String>,
    pub http_snippets: Vec<String>,
    pub stream_snippets: Vec<String>,
    /// name of a hot-swapped template override, if the config-map sets one.
    pub custom_main_template: Option<String>,
    pub custom_ingress_template: Option<String>,
}

/// §3 ConfigVersion — strictly increasing within a process lifetime (P5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ConfigVersion(pub u64);

impl ConfigVersion {
    pub const INITIAL: ConfigVersion = ConfigVersion(0);

    pub fn next(self) -> ConfigVersion {
        ConfigVersion(self.0 + 1)
    }
}

impl std::fmt::Display for ConfigVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The fallback upstream substituted when endpoint resolution fails for a
/// non-plus proxy (§7, §8 P4, §9 "endpoint fallback").
pub const FALLBACK_SERVER: &str = "127.0.0.1:8181";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_role_reads_annotation() {
        assert_eq!(MergeRole::from_annotation(Some("master")), MergeRole::Master);
        assert_eq!(MergeRole::from_annotation(Some("minion")), MergeRole::Minion);
        assert_eq!(MergeRole::from_annotation(Some("bogus")), MergeRole::None);
        assert_eq!(MergeRole::from_annotation(None), MergeRole::None);
    }

    #[test]
    fn config_version_is_monotonic() {
        let v = ConfigVersion::INITIAL;
        let v2 = v.next();
        assert!(v2 > v);
        assert_eq!(v2.to_string(), "1");
    }
}
