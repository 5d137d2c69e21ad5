//! §6 "Annotations understood by the reconciler" — namespace-prefixed keys.
//! Unrecognised annotations are ignored, per spec.

use std::collections::BTreeMap;

pub const PREFIX: &str = "nginx.org";

pub const INGRESS_CLASS: &str = "kubernetes.io/ingress.class";
pub const MERGEABLE_TYPE: &str = "nginx.org/mergeable-ingress-type";
pub const JWT_KEY: &str = "nginx.com/jwt-key";
pub const JWT_REALM: &str = "nginx.com/jwt-realm";
pub const JWT_TOKEN: &str = "nginx.com/jwt-token";
pub const JWT_LOGIN_URL: &str = "nginx.com/jwt-login-url";
pub const HEALTH_CHECKS: &str = "nginx.com/health-checks";
pub const PROXY_CONNECT_TIMEOUT: &str = "nginx.org/proxy-connect-timeout";
pub const PROXY_READ_TIMEOUT: &str = "nginx.org/proxy-read-timeout";
pub const CLIENT_MAX_BODY_SIZE: &str = "nginx.org/client-max-body-size";
pub const SERVER_SNIPPETS: &str = "nginx.org/server-snippets";
pub const LOCATION_SNIPPETS: &str = "nginx.org/location-snippets";

pub fn get<'a>(annotations: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    annotations.get(key).map(String::as_str)
}

pub fn get_bool(annotations: &BTreeMap<String, String>, key: &str) -> bool {
    get(annotations, key)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// ConfigMap keys, mirroring the annotation keys plus the global-only ones
/// (§6 "ConfigMap keys"). Values are read with [`get`]/[`get_bool`] against
/// the config-map's string map, same as annotations.
pub mod config_map {
    pub const PROXY_CONNECT_TIMEOUT: &str = "proxy-connect-timeout";
    pub const PROXY_READ_TIMEOUT: &str = "proxy-read-timeout";
    pub const PROXY_SEND_TIMEOUT: &str = "proxy-send-timeout";
    pub const CLIENT_MAX_BODY_SIZE: &str = "client-max-body-size";
    pub const WORKER_PROCESSES: &str = "worker-processes";
    pub const WORKER_CONNECTIONS: &str = "worker-connections";
    pub const SERVER_NAMES_HASH_MAX_SIZE: &str = "server-names-hash-max-size";
    pub const SERVER_NAMES_HASH_BUCKET_SIZE: &str = "server-names-hash-bucket-size";
    pub const VARIABLES_HASH_MAX_SIZE: &str = "variables-hash-max-size";
    pub const VARIABLES_HASH_BUCKET_SIZE: &str = "variables-hash-bucket-size";
    pub const SSL_PROTOCOLS: &str = "ssl-protocols";
    pub const SSL_CIPHERS: &str = "ssl-ciphers";
    pub const RESOLVER_ADDRESSES: &str = "resolver-addresses";
    pub const ERROR_LOG_LEVEL: &str = "error-log-level";
    pub const KEEPALIVE_TIMEOUT: &str = "keepalive-timeout";
    pub const MAIN_SNIPPETS: &str = "main-snippets";
    pub const HTTP_SNIPPETS: &str = "http-snippets";
    pub const STREAM_SNIPPETS: &str = "stream-snippets";
    pub const MAIN_TEMPLATE: &str = "main-template";
    pub const INGRESS_TEMPLATE: &str = "ingress-template";
    pub const EXTERNAL_STATUS_ADDRESS: &str = "external-status-address";
}
