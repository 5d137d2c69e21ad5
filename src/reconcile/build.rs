//! §4.D `build(ingress) -> IngressEx` — resolves TLS/JWK secrets and
//! endpoint-backed upstreams for a single (non-merged) routing object.

use std::collections::{BTreeMap, HashSet};

use k8s_openapi::api::core::v1::Endpoints;
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use tracing::warn;

use crate::index::{backend_ref_from_service_backend, Indexes};
use crate::key::Key;
use crate::model::{HealthCheck, IngressEx, JwkSecret, ResolvedRule, ServicePort, TlsSecret};
use crate::{annotations, config::Config};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no valid rules: every rule has an empty host or empty HTTP paths")]
    NoValidRules,
}

pub struct BuildOptions<'a> {
    pub config: &'a Config,
    pub jwk_fetcher: Option<&'a dyn JwkFetcher>,
}

/// JWT keys are fetched directly from the API, not the object index
/// (§4.D build: "fetch JWK secret directly from the API (not from the
/// index)"). Kept as a narrow trait so `build` stays unit-testable without
/// a live client.
#[async_trait::async_trait]
pub trait JwkFetcher: Send + Sync {
    async fn fetch_jwk(&self, key: &Key) -> Option<Vec<u8>>;
}

/// §4.D build: health-check probes are fetched from the live pod API, not
/// the object index — pods are not one of the indexed kinds (§4.C).
#[async_trait::async_trait]
pub trait HealthCheckProbe: Send + Sync {
    async fn probe(&self, namespace: &str, selector: &BTreeMap<String, String>, port: &ServicePort) -> Option<HealthCheck>;
}

pub async fn build(
    ing: &Ingress,
    key: Key,
    idx: &Indexes,
    opts: &BuildOptions<'_>,
    health_prober: Option<&dyn HealthCheckProbe>,
) -> Result<IngressEx, BuildError> {
    let ns = key.namespace.clone();
    let annotations_map: BTreeMap<String, String> = ing.annotations().clone();

    let mut tls_secrets = BTreeMap::new();
    for tls in ing.spec.as_ref().and_then(|s| s.tls.as_ref()).into_iter().flatten() {
        let Some(secret_name) = tls.secret_name.as_ref() else {
            continue;
        };
        let secret_key = Key::new(&ns, secret_name);
        let Some(secret) = idx.get_secret(&secret_key) else {
            warn!(%secret_key, "tls secret not found");
            continue;
        };
        let Some(data) = secret.data.as_ref() else {
            warn!(%secret_key, "tls secret has no data, skipping");
            continue;
        };
        let (Some(cert), Some(cert_key)) = (data.get("tls.crt"), data.get("tls.key")) else {
            warn!(%secret_key, "tls secret missing tls.crt/tls.key, skipping");
            continue;
        };
        for host in tls.hosts.iter().flatten() {
            tls_secrets.insert(
                host.clone(),
                TlsSecret {
                    cert: cert.0.clone(),
                    key: cert_key.0.clone(),
                },
            );
        }
    }

    let mut jwk_secret = None;
    if opts.config.proxy_plus {
        if let Some(jwt_key_name) = annotations::get(&annotations_map, annotations::JWT_KEY) {
            if let Some(fetcher) = opts.jwk_fetcher {
                let secret_key = Key::new(&ns, jwt_key_name);
                if let Some(bytes) = fetcher.fetch_jwk(&secret_key).await {
                    jwk_secret = Some(JwkSecret { key: bytes });
                } else {
                    warn!(%secret_key, "jwk secret not found or invalid");
                }
            }
        }
    }

    let health_checks_enabled = opts.config.proxy_plus && annotations::get_bool(&annotations_map, annotations::HEALTH_CHECKS);

    let mut rules = Vec::new();
    let mut external_names = HashSet::new();
    let mut default_backend = None;
    let mut health_checks: std::collections::HashMap<String, HealthCheck> = std::collections::HashMap::new();

    if let Some(spec) = ing.spec.as_ref() {
        if let Some(backend) = spec.default_backend.as_ref() {
            if let Some(svc) = backend.service.as_ref() {
                let backend_ref = backend_ref_from_service_backend(svc);
                let endpoints = resolve_backend(&ns, &backend_ref, idx, &mut external_names);
                default_backend = Some(ResolvedRule {
                    host: String::new(),
                    path: "/".to_string(),
                    backend: backend_ref,
                    endpoints,
                });
            }
        }

        for rule in spec.rules.iter().flatten() {
            let Some(host) = rule.host.as_ref() else {
                continue;
            };
            let Some(http) = rule.http.as_ref() else {
                continue;
            };
            for path in &http.paths {
                let Some(svc) = path.backend.service.as_ref() else {
                    continue;
                };
                let backend_ref = backend_ref_from_service_backend(svc);
                let endpoints = resolve_backend(&ns, &backend_ref, idx, &mut external_names);

                if health_checks_enabled && !health_checks.contains_key(&svc.name) {
                    if let (Some(prober), Some(service)) = (health_prober, idx.get_service(&Key::new(&ns, &svc.name))) {
                        if let Some(selector) = service.spec.as_ref().and_then(|s| s.selector.as_ref()) {
                            if let Some(hc) = prober.probe(&ns, selector, &backend_ref.service_port).await {
                                health_checks.insert(svc.name.clone(), hc);
                            }
                        }
                    }
                }

                rules.push(ResolvedRule {
                    host: host.clone(),
                    path: path.path.clone().unwrap_or_else(|| "/".to_string()),
                    backend: backend_ref,
                    endpoints,
                });
            }
        }
    }

    if rules.is_empty() && default_backend.is_none() {
        return Err(BuildError::NoValidRules);
    }

    Ok(IngressEx {
        key,
        source: ing.clone(),
        rules,
        default_backend,
        tls_secrets,
        jwk_secret,
        health_checks,
        external_names,
    })
}

fn resolve_backend(
    namespace: &str,
    backend: &BackendRef,
    idx: &Indexes,
    external_names: &mut HashSet<String>,
) -> Vec<String> {
    let service_key = Key::new(namespace, &backend.service_name);
    let Some(service) = idx.get_service(&service_key) else {
        return Vec::new();
    };
    let Some(spec) = service.spec.as_ref() else {
        return Vec::new();
    };

    if spec.type_.as_deref() == Some("ExternalName") {
        if let Some(external_name) = spec.external_name.as_ref() {
            external_names.insert(backend.service_name.clone());
            let port = match &backend.service_port {
                ServicePort::Number(n) => *n,
                ServicePort::Name(_) => 80,
            };
            return vec![format!("{external_name}:{port}")];
        }
        return Vec::new();
    }

    let Some(service_port) = find_service_port(spec, &backend.service_port) else {
        return Vec::new();
    };

    let Some(endpoints) = idx.get_endpoints(&service_key) else {
        return Vec::new();
    };

    flatten_endpoints(&endpoints, &service_port)
}

fn find_service_port<'a>(
    spec: &'a k8s_openapi::api::core::v1::ServiceSpec,
    wanted: &ServicePort,
) -> Option<&'a k8s_openapi::api::core::v1::ServicePort> {
    spec.ports.as_ref()?.iter().find(|p| match wanted {
        ServicePort::Name(name) => p.name.as_deref() == Some(name.as_str()),
        ServicePort::Number(number) => p.port == *number,
    })
}

fn flatten_endpoints(endpoints: &Endpoints, service_port: &k8s_openapi::api::core::v1::ServicePort) -> Vec<String> {
    let mut out = Vec::new();
    for subset in endpoints.subsets.iter().flatten() {
        let Some(ports) = subset.ports.as_ref() else {
            continue;
        };
        let matching_port = ports.iter().find(|p| match &service_port.target_port {
            Some(IntOrString::String(name)) => p.name.as_deref() == Some(name.as_str()),
            Some(IntOrString::Int(n)) => p.port == *n,
            None => p.port == service_port.port,
        });
        let Some(matching_port) = matching_port else {
            continue;
        };
        for addr in subset.addresses.iter().flatten() {
            out.push(format!("{}:{}", addr.ip, matching_port.port));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        EndpointAddress, EndpointPort, EndpointSubset, Service, ServicePort as K8sServicePort, ServiceSpec,
    };

    fn svc_with_port(name: &str, port: i32, target: Option<IntOrString>) -> Service {
        Service {
            metadata: Default::default(),
            spec: Some(ServiceSpec {
                ports: Some(vec![K8sServicePort {
                    name: Some(name.to_string()),
                    port,
                    target_port: target,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            status: None,
        }
    }

    #[test]
    fn flattens_matching_port_addresses() {
        let svc = svc_with_port("http", 80, Some(IntOrString::Int(8080)));
        let eps = Endpoints {
            subsets: Some(vec![EndpointSubset {
                addresses: Some(vec![
                    EndpointAddress {
                        ip: "10.0.0.1".into(),
                        ..Default::default()
                    },
                    EndpointAddress {
                        ip: "10.0.0.2".into(),
                        ..Default::default()
                    },
                ]),
                ports: Some(vec![EndpointPort {
                    port: 8080,
                    ..Default::default()
                }]),
                not_ready_addresses: None,
            }]),
            metadata: Default::default(),
        };
        let result = flatten_endpoints(&eps, svc.spec.as_ref().unwrap().ports.as_ref().unwrap().first().unwrap());
        assert_eq!(result, vec!["10.0.0.1:8080", "10.0.0.2:8080"]);
    }

    #[test]
    fn no_matching_subset_port_yields_empty() {
        let svc = svc_with_port("http", 80, Some(IntOrString::Int(9999)));
        let eps = Endpoints {
            subsets: Some(vec![EndpointSubset {
                addresses: Some(vec![EndpointAddress {
                    ip: "10.0.0.1".into(),
                    ..Default::default()
                }]),
                ports: Some(vec![EndpointPort {
                    port: 8080,
                    ..Default::default()
                }]),
                not_ready_addresses: None,
            }]),
            metadata: Default::default(),
        };
        let result = flatten_endpoints(&eps, svc.spec.as_ref().unwrap().ports.as_ref().unwrap().first().unwrap());
        assert!(result.is_empty());
    }
}
