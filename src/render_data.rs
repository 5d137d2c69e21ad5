//! Data models handed across the `render(kind, data) -> bytes` boundary
//! (§4.I). Kept separate from the template engine itself since building
//! these is reconciliation-engine logic (how an `IngressEx` becomes
//! upstreams/servers), while turning them into bytes is the external
//! engine's job.

use serde::Serialize;

use crate::model::{GlobalConfig, IngressEx, MergeableIngresses, FALLBACK_SERVER};

#[derive(Debug, Serialize)]
pub struct UpstreamServer {
    pub address: String,
}

#[derive(Debug, Serialize)]
pub struct Upstream {
    pub name: String,
    pub servers: Vec<UpstreamServer>,
}

#[derive(Debug, Serialize)]
pub struct Location {
    pub path: String,
    pub upstream: String,
}

#[derive(Debug, Serialize)]
pub struct HealthCheckData {
    pub upstream: String,
    pub path: String,
    pub port: i32,
}

#[derive(Debug, Serialize)]
pub struct ServerBlock {
    pub server_name: String,
    pub locations: Vec<Location>,
    pub ssl_certificate: Option<String>,
    pub ssl_certificate_key: Option<String>,
    pub health_checks: Vec<HealthCheckData>,
}

#[derive(Debug, Serialize)]
pub struct IngressTemplateData {
    pub name: String,
    pub upstreams: Vec<Upstream>,
    pub servers: Vec<ServerBlock>,
    pub jwt_key_file: Option<String>,
}

fn upstream_name(ingress_key: &str, host: &str, path: &str) -> String {
    let slug = path.replace('/', "_");
    format!("{ingress_key}-{host}-{slug}")
}

fn servers_for(ex: &IngressEx, tls_dir: &str) -> (Vec<Upstream>, Vec<ServerBlock>) {
    let mut upstreams = Vec::new();
    let mut by_host: std::collections::BTreeMap<&str, ServerBlock> = std::collections::BTreeMap::new();

    let mut push_rule = |host: &str, path: &str, service_name: &str, endpoints: &[String]| {
        let name = upstream_name(&ex.key.to_string(), host, path);
        let servers = if endpoints.is_empty() {
            vec![UpstreamServer {
                address: FALLBACK_SERVER.to_string(),
            }]
        } else {
            endpoints
                .iter()
                .map(|e| UpstreamServer { address: e.clone() })
                .collect()
        };
        upstreams.push(Upstream {
            name: name.clone(),
            servers,
        });
        let entry = by_host.entry(host).or_insert_with(|| ServerBlock {
            server_name: host.to_string(),
            locations: Vec::new(),
            ssl_certificate: None,
            ssl_certificate_key: None,
            health_checks: Vec::new(),
        });
        entry.locations.push(Location {
            path: path.to_string(),
            upstream: name.clone(),
        });
        if let Some(hc) = ex.health_checks.get(service_name) {
            entry.health_checks.push(HealthCheckData {
                upstream: name,
                path: hc.path.clone(),
                port: hc.port,
            });
        }
    };

    for rule in &ex.rules {
        push_rule(&rule.host, &rule.path, &rule.backend.service_name, &rule.endpoints);
    }
    if let Some(default) = &ex.default_backend {
        push_rule(&default.host, &default.path, &default.backend.service_name, &default.endpoints);
    }

    for (host, secret) in &ex.tls_secrets {
        if let Some(server) = by_host.get_mut(host.as_str()) {
            server.ssl_certificate = Some(format!("{tls_dir}/{}.crt", ex.key.file_stem()));
            server.ssl_certificate_key = Some(format!("{tls_dir}/{}.key", ex.key.file_stem()));
            let _ = secret;
        }
    }

    (upstreams, by_host.into_values().collect())
}

pub fn from_ingress(ex: &IngressEx, tls_dir: &str) -> IngressTemplateData {
    let (upstreams, servers) = servers_for(ex, tls_dir);
    IngressTemplateData {
        name: ex.key.to_string(),
        upstreams,
        servers,
        jwt_key_file: ex.jwk_secret.as_ref().map(|_| format!("{tls_dir}/{}.jwk", ex.key.file_stem())),
    }
}

/// §4.D merge: the master's rendered path set is the deduplicated union of
/// its minions' paths under the master's single host (§3 MergeRole
/// invariant, §8 P3).
pub fn from_mergeable(m: &MergeableIngresses, tls_dir: &str) -> IngressTemplateData {
    let (mut upstreams, mut servers) = servers_for(&m.master, tls_dir);
    for minion in &m.minions {
        let (minion_upstreams, minion_servers) = servers_for(minion, tls_dir);
        upstreams.extend(minion_upstreams);
        for minion_server in minion_servers {
            match servers.iter_mut().find(|s| s.server_name == minion_server.server_name) {
                Some(existing) => {
                    existing.locations.extend(minion_server.locations);
                    existing.health_checks.extend(minion_server.health_checks);
                }
                None => servers.push(minion_server),
            }
        }
    }
    IngressTemplateData {
        name: m.master.key.to_string(),
        upstreams,
        servers,
        jwt_key_file: None,
    }
}

#[derive(Debug, Serialize)]
pub struct MainTemplateData {
    pub global: GlobalConfigData,
}

#[derive(Debug, Serialize)]
pub struct GlobalConfigData {
    pub proxy_connect_timeout: String,
    pub proxy_read_timeout: String,
    pub proxy_send_timeout: String,
    pub client_max_body_size: String,
    pub worker_processes: String,
    pub worker_connections: String,
    pub error_log_level: String,
    pub keepalive_timeout: String,
    pub main_snippets: Vec<String>,
    pub http_snippets: Vec<String>,
}

pub fn from_global(global: &GlobalConfig) -> MainTemplateData {
    MainTemplateData {
        global: GlobalConfigData {
            proxy_connect_timeout: global.proxy_connect_timeout.clone(),
            proxy_read_timeout: global.proxy_read_timeout.clone(),
            proxy_send_timeout: global.proxy_send_timeout.clone(),
            client_max_body_size: global.client_max_body_size.clone(),
            worker_processes: global.worker_processes.clone(),
            worker_connections: global.worker_connections.clone(),
            error_log_level: global.error_log_level.clone(),
            keepalive_timeout: global.keepalive_timeout.clone(),
            main_snippets: global.main_snippets.clone(),
            http_snippets: global.http_snippets.clone(),
        },
    }
}

#[derive(Debug, Serialize)]
pub struct VersionTemplateData {
    pub version: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Key;

    fn ex(key: &str, host: &str, path: &str, endpoints: Vec<String>) -> IngressEx {
        IngressEx {
            key: key.parse().unwrap(),
            source: Default::default(),
            rules: vec![crate::model::ResolvedRule {
                host: host.to_string(),
                path: path.to_string(),
                backend: crate::model::BackendRef {
                    service_name: "svc".into(),
                    service_port: crate::model::ServicePort::Number(80),
                },
                endpoints,
            }],
            default_backend: None,
            tls_secrets: Default::default(),
            jwk_secret: None,
            health_checks: Default::default(),
            external_names: Default::default(),
        }
    }

    #[test]
    fn empty_endpoints_render_fallback_upstream() {
        let ex = ex("default/cafe", "cafe.example.com", "/coffee", vec![]);
        let data = from_ingress(&ex, "/etc/proxy/secrets");
        assert_eq!(data.upstreams.len(), 1);
        assert_eq!(data.upstreams[0].servers.len(), 1);
        assert_eq!(data.upstreams[0].servers[0].address, FALLBACK_SERVER);
    }

    #[test]
    fn non_empty_endpoints_render_all_servers() {
        let ex = ex(
            "default/cafe",
            "cafe.example.com",
            "/coffee",
            vec!["10.0.0.1:80".into(), "10.0.0.2:80".into()],
        );
        let data = from_ingress(&ex, "/etc/proxy/secrets");
        assert_eq!(data.upstreams[0].servers.len(), 2);
    }

    #[test]
    fn mergeable_combines_minion_paths_under_master_host() {
        use crate::model::MergeableIngresses;
        let master = ex("default/cafe-master", "cafe.example.com", "__unused__", vec![]);
        let mut master = master;
        master.rules.clear();
        let tea = ex("default/cafe-tea", "cafe.example.com", "/tea", vec!["10.0.0.3:80".into()]);
        let coffee = ex(
            "default/cafe-coffee",
            "cafe.example.com",
            "/coffee",
            vec!["10.0.0.4:80".into()],
        );
        let mergeable = MergeableIngresses {
            master,
            minions: vec![coffee, tea],
        };
        let data = from_mergeable(&mergeable, "/etc/proxy/secrets");
        assert_eq!(data.servers.len(), 1);
        let paths: Vec<_> = data.servers[0].locations.iter().map(|l| l.path.as_str()).collect();
        assert_eq!(paths, vec!["/coffee", "/tea"]);
    }
}
