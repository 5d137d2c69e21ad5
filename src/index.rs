//! §4.C Object index — per-kind key→object store with secondary lookups.
//!
//! The underlying key→object cache per kind is the orchestrator client's
//! own informer/reflector machinery (§1 "informer/cache machinery...
//! assumed to deliver add/update/delete callbacks and a thread-safe
//! in-memory index" is explicitly out of scope): we hold one
//! `kube::runtime::reflector::Store` per kind, which is read-concurrently
//! and thread-safe by construction. What belongs to the reconciliation
//! engine, and lives here, are the derived secondary queries the source
//! needs on top of that cache: `IngressByService` and `EndpointsByService`.

use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::runtime::reflector::Store;
use kube::ResourceExt;

use crate::key::Key;
use crate::model::{BackendRef, ServicePort};

#[derive(Clone)]
pub struct Indexes {
    pub ingresses: Store<Ingress>,
    pub services: Store<Service>,
    pub endpoints: Store<Endpoints>,
    pub secrets: Store<Secret>,
    pub config_maps: Store<ConfigMap>,
}

impl Indexes {
    pub fn get_ingress(&self, key: &Key) -> Option<std::sync::Arc<Ingress>> {
        self.get(&self.ingresses, key)
    }

    pub fn get_service(&self, key: &Key) -> Option<std::sync::Arc<Service>> {
        self.get(&self.services, key)
    }

    pub fn get_endpoints(&self, key: &Key) -> Option<std::sync::Arc<Endpoints>> {
        self.get(&self.endpoints, key)
    }

    pub fn get_secret(&self, key: &Key) -> Option<std::sync::Arc<Secret>> {
        self.get(&self.secrets, key)
    }

    pub fn get_config_map(&self, key: &Key) -> Option<std::sync::Arc<ConfigMap>> {
        self.get(&self.config_maps, key)
    }

    fn get<K>(&self, store: &Store<K>, key: &Key) -> Option<std::sync::Arc<K>>
    where
        K: kube::Resource + Clone + 'static,
        K::DynamicType: Default + Eq + std::hash::Hash + Clone,
    {
        let obj_ref = kube::runtime::reflector::ObjectRef::new(&key.name)
            .within(&key.namespace);
        store.get(&obj_ref)
    }

    pub fn list_ingresses(&self) -> Vec<std::sync::Arc<Ingress>> {
        self.ingresses.state()
    }

    /// §4.C IngressByService: linear scan matching the default backend or
    /// any path backend whose `serviceName` equals `service` in the same
    /// namespace.
    pub fn ingress_by_service(&self, namespace: &str, service: &str) -> Vec<std::sync::Arc<Ingress>> {
        self.list_ingresses()
            .into_iter()
            .filter(|ing| {
                ing.namespace().as_deref() == Some(namespace) && ingress_references_service(ing, service)
            })
            .collect()
    }

    /// §4.C EndpointsByService: name+namespace match — trivial since
    /// `Endpoints` objects share identity with their `Service`.
    pub fn endpoints_by_service(&self, key: &Key) -> Option<std::sync::Arc<Endpoints>> {
        self.get_endpoints(key)
    }
}

fn ingress_references_service(ing: &Ingress, service: &str) -> bool {
    let Some(spec) = ing.spec.as_ref() else {
        return false;
    };
    if let Some(default_backend) = spec.default_backend.as_ref() {
        if let Some(svc) = default_backend.service.as_ref() {
            if svc.name == service {
                return true;
            }
        }
    }
    spec.rules.iter().flatten().any(|rule| {
        rule.http
            .as_ref()
            .map(|http| {
                http.paths.iter().any(|p| {
                    p.backend
                        .service
                        .as_ref()
                        .is_some_and(|svc| svc.name == service)
                })
            })
            .unwrap_or(false)
    })
}

pub fn backend_ref_from_service_backend(
    svc: &k8s_openapi::api::networking::v1::IngressServiceBackend,
) -> BackendRef {
    let port = match (&svc.port.as_ref().and_then(|p| p.name.clone()), &svc.port.as_ref().and_then(|p| p.number)) {
        (Some(name), _) => ServicePort::Name(name.clone()),
        (None, Some(number)) => ServicePort::Number(*number),
        (None, None) => ServicePort::Number(0),
    };
    BackendRef {
        service_name: svc.name.clone(),
        service_port: port,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::networking::v1::{
        HTTPIngressPath, HTTPIngressRuleValue, IngressBackend, IngressRule, IngressServiceBackend,
        IngressSpec, ServiceBackendPort,
    };

    fn ingress_with_path(service: &str) -> Ingress {
        Ingress {
            spec: Some(IngressSpec {
                rules: Some(vec![IngressRule {
                    host: Some("cafe.example.com".into()),
                    http: Some(HTTPIngressRuleValue {
                        paths: vec![HTTPIngressPath {
                            path: Some("/coffee".into()),
                            path_type: "Prefix".into(),
                            backend: IngressBackend {
                                service: Some(IngressServiceBackend {
                                    name: service.into(),
                                    port: Some(ServiceBackendPort {
                                        number: Some(80),
                                        name: None,
                                    }),
                                }),
                                resource: None,
                            },
                        }],
                    }),
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn matches_path_backend() {
        let ing = ingress_with_path("coffee");
        assert!(ingress_references_service(&ing, "coffee"));
        assert!(!ingress_references_service(&ing, "tea"));
    }
}
