//! §4.D Reconciler — the task-queue worker's per-kind sync procedures.
//! Everything here runs on the single queue-worker thread (§5): no locking
//! is needed around configurator state because this is the only caller.

pub mod build;
pub mod merge;

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::{Pod, Secret};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, ListParams};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, ResourceExt};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::annotations;
use crate::config::Config;
use crate::configurator::Configurator;
use crate::error::{Error, Result};
use crate::index::Indexes;
use crate::key::Key;
use crate::model::{GlobalConfig, HealthCheck, MergeRole, ServicePort};
use crate::queue::{Task, TaskKind, TaskQueue};
use crate::status::StatusReporter;
use crate::template::{TemplateEngine, TemplateKind, TemplatePaths};

use build::{BuildOptions, HealthCheckProbe, JwkFetcher};
use merge::{MergeOutcome, MinionCandidate};

#[derive(Debug, thiserror::Error)]
enum BuildOrMergeError {
    #[error(transparent)]
    Build(#[from] build::BuildError),
    #[error(transparent)]
    Merge(#[from] merge::MergeError),
    #[error("master ingress carries no host rule")]
    MissingHost,
}

struct ApiJwkFetcher {
    client: Client,
}

/// §4.D build: "fetch JWK secret directly from the API (not from the
/// index)". Validation here assumes the conventional `jwk` data key, same
/// shape as the TLS secret's `tls.crt`/`tls.key` convention.
#[async_trait::async_trait]
impl JwkFetcher for ApiJwkFetcher {
    async fn fetch_jwk(&self, key: &Key) -> Option<Vec<u8>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &key.namespace);
        let secret = api.get(&key.name).await.ok()?;
        let data = secret.data.as_ref()?;
        Some(data.get("jwk")?.0.clone())
    }
}

struct ApiHealthCheckProbe {
    client: Client,
}

/// §4.D build: health checks are synthesised from the live pod API, not
/// the object index (pods are not one of the indexed kinds, §4.C). A
/// missing readiness probe yields no health check rather than a fallback
/// one (§9 open question b — see DESIGN.md).
#[async_trait::async_trait]
impl HealthCheckProbe for ApiHealthCheckProbe {
    async fn probe(&self, namespace: &str, selector: &BTreeMap<String, String>, port: &ServicePort) -> Option<HealthCheck> {
        if selector.is_empty() {
            return None;
        }
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let label_selector = selector.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(",");
        let pods = api.list(&ListParams::default().labels(&label_selector)).await.ok()?;
        let pod = pods.items.first()?;
        let spec = pod.spec.as_ref()?;
        for container in &spec.containers {
            for cp in container.ports.iter().flatten() {
                let matches = match port {
                    ServicePort::Number(n) => cp.container_port == *n,
                    ServicePort::Name(name) => cp.name.as_deref() == Some(name.as_str()),
                };
                if !matches {
                    continue;
                }
                if let Some(http_get) = container.readiness_probe.as_ref().and_then(|p| p.http_get.as_ref()) {
                    return Some(HealthCheck {
                        path: http_get.path.clone().unwrap_or_else(|| "/".to_string()),
                        port: cp.container_port,
                    });
                }
            }
        }
        None
    }
}

#[derive(Default)]
struct TemplateOverrideState {
    main: Option<String>,
    ingress: Option<String>,
}

pub struct Reconciler {
    client: Client,
    config: Config,
    idx: Arc<Indexes>,
    configurator: Arc<Configurator>,
    queue: Arc<TaskQueue>,
    status: Arc<StatusReporter>,
    template: Arc<TemplateEngine>,
    template_paths: Arc<TemplatePaths>,
    template_overrides: Mutex<TemplateOverrideState>,
    jwk_fetcher: ApiJwkFetcher,
    health_prober: ApiHealthCheckProbe,
}

impl Reconciler {
    pub fn new(
        client: Client,
        config: Config,
        idx: Arc<Indexes>,
        configurator: Arc<Configurator>,
        queue: Arc<TaskQueue>,
        status: Arc<StatusReporter>,
        template: Arc<TemplateEngine>,
        template_paths: Arc<TemplatePaths>,
    ) -> Self {
        Self {
            jwk_fetcher: ApiJwkFetcher { client: client.clone() },
            health_prober: ApiHealthCheckProbe { client: client.clone() },
            client,
            config,
            idx,
            configurator,
            queue,
            status,
            template,
            template_paths,
            template_overrides: Mutex::new(TemplateOverrideState::default()),
        }
    }

    fn build_opts(&self) -> BuildOptions<'_> {
        BuildOptions {
            config: &self.config,
            jwk_fetcher: Some(&self.jwk_fetcher),
        }
    }

    /// The worker loop's single entry point: processes one task to
    /// completion, then marks it done and lets the queue re-deliver if
    /// it was dirtied mid-flight (§4.B, §8 P7).
    pub async fn dispatch(&self, task: Task) {
        let result = self.process(&task).await;
        self.queue.done(&task);
        if let Err(err) = result {
            self.queue.requeue(task, &err);
        }
    }

    async fn process(&self, task: &Task) -> Result<()> {
        match task.kind {
            TaskKind::Ingress => self.sync_ingress(&task.key).await,
            TaskKind::Endpoints => self.sync_endpoints(&task.key).await,
            TaskKind::Service => self.sync_service(&task.key).await,
            TaskKind::ConfigMap => self.sync_config(&task.key).await,
            TaskKind::Secret => self.sync_secret(&task.key).await,
        }
    }

    #[instrument(skip(self))]
    async fn sync_ingress(&self, key: &Key) -> Result<()> {
        let Some(ing) = self.idx.get_ingress(key) else {
            return self.configurator.delete_ingress(key).await;
        };

        let role = MergeRole::from_annotation(annotations::get(ing.annotations(), annotations::MERGEABLE_TYPE));
        match role {
            MergeRole::Master => self.handle_master(key, &ing).await,
            MergeRole::Minion => self.handle_minion(key, &ing).await,
            MergeRole::None => self.handle_regular(key, &ing).await,
        }
    }

    async fn handle_regular(&self, key: &Key, ing: &Ingress) -> Result<()> {
        let opts = self.build_opts();
        match build::build(ing, key.clone(), &self.idx, &opts, Some(&self.health_prober)).await {
            Ok(ex) => {
                self.configurator.add_or_update(&ex).await?;
                self.emit(key, EventType::Normal, "Updated", "ingress configuration updated").await;
                self.report_status(&[key.clone()]).await;
                Ok(())
            }
            Err(e) => self.reject(key, &e.to_string()).await,
        }
    }

    async fn handle_master(&self, key: &Key, ing: &Ingress) -> Result<()> {
        let opts = self.build_opts();
        match self.build_mergeable(key, ing, &opts).await {
            Ok(outcome) => {
                for rejected in &outcome.rejected {
                    self.emit(&rejected.minion_key, EventType::Warning, "Rejected", rejected.reason).await;
                    self.clear_status(&rejected.minion_key).await;
                }
                for dropped in &outcome.dropped {
                    self.emit(
                        &dropped.minion_key,
                        EventType::Warning,
                        "DroppedPath",
                        &format!("duplicate path {} dropped; an older minion already owns it", dropped.path),
                    )
                    .await;
                }
                self.configurator.add_or_update_mergeable(&outcome.mergeable).await?;
                self.emit(key, EventType::Normal, "Updated", "mergeable ingress configuration updated").await;
                let mut keys: Vec<Key> = vec![key.clone()];
                keys.extend(outcome.mergeable.minions.iter().map(|m| m.key.clone()));
                self.report_status(&keys).await;
                Ok(())
            }
            Err(e) => self.reject(key, &e.to_string()).await,
        }
    }

    async fn handle_minion(&self, key: &Key, ing: &Ingress) -> Result<()> {
        let Some(host) = first_host(ing) else {
            return self.reject(key, "minion carries no host rule").await;
        };
        match self.find_master(&key.namespace, &host) {
            Some(master_key) => {
                let Some(master_ing) = self.idx.get_ingress(&master_key) else {
                    self.queue.enqueue_after(Task::new(TaskKind::Ingress, key.clone()), Duration::from_secs(5));
                    return Ok(());
                };
                self.handle_master(&master_key, &master_ing).await
            }
            None => {
                warn!(%key, host, "no master found for minion, retrying shortly");
                self.queue.enqueue_after(Task::new(TaskKind::Ingress, key.clone()), Duration::from_secs(5));
                Ok(())
            }
        }
    }

    async fn build_mergeable(&self, master_key: &Key, master_ing: &Ingress, opts: &BuildOptions<'_>) -> std::result::Result<MergeOutcome, BuildOrMergeError> {
        let master_ex = build::build(master_ing, master_key.clone(), &self.idx, opts, Some(&self.health_prober)).await?;
        let host_count = host_rule_count(master_ing);
        let master_host = first_host(master_ing).ok_or(BuildOrMergeError::MissingHost)?;
        let candidates = self.gather_minions(&master_key.namespace, opts).await;
        let outcome = merge::merge(&master_host, host_count, master_ex, candidates)?;
        Ok(outcome)
    }

    async fn gather_minions(&self, namespace: &str, opts: &BuildOptions<'_>) -> Vec<MinionCandidate> {
        let mut out = Vec::new();
        for ing in self.idx.list_ingresses() {
            if ing.namespace().as_deref() != Some(namespace) {
                continue;
            }
            if MergeRole::from_annotation(annotations::get(ing.annotations(), annotations::MERGEABLE_TYPE)) != MergeRole::Minion {
                continue;
            }
            let minion_key = Key::new(namespace, ing.name_any());
            match build::build(&ing, minion_key.clone(), &self.idx, opts, Some(&self.health_prober)).await {
                Ok(ex) => {
                    let creation_timestamp = ing.meta().creation_timestamp.as_ref().map(|t| t.0.timestamp()).unwrap_or(0);
                    out.push(MinionCandidate { creation_timestamp, ex });
                }
                Err(e) => warn!(key = %minion_key, error = %e, "minion failed to build, skipping"),
            }
        }
        out
    }

    fn find_master(&self, namespace: &str, host: &str) -> Option<Key> {
        self.idx.list_ingresses().into_iter().find_map(|ing| {
            if ing.namespace().as_deref() != Some(namespace) {
                return None;
            }
            if MergeRole::from_annotation(annotations::get(ing.annotations(), annotations::MERGEABLE_TYPE)) != MergeRole::Master {
                return None;
            }
            if first_host(&ing).as_deref() != Some(host) {
                return None;
            }
            Some(Key::new(namespace, ing.name_any()))
        })
    }

    /// §4.D "Rejection emits a Rejected event and clears status for this
    /// ingress." We also drop any stale rendered file so the filesystem
    /// stays convergent with the set of currently-valid objects (§8 P1).
    async fn reject(&self, key: &Key, reason: &str) -> Result<()> {
        self.emit(key, EventType::Warning, "Rejected", reason).await;
        self.clear_status(key).await;
        self.configurator.delete_ingress(key).await
    }

    async fn report_status(&self, keys: &[Key]) {
        if !self.status.is_active() {
            return;
        }
        let Some(address) = self.status.external_address() else {
            return;
        };
        for key in keys {
            if let Err(e) = self.status.update(key, &address).await {
                warn!(%key, error = %e, "status update failed");
            }
        }
    }

    async fn clear_status(&self, key: &Key) {
        if !self.status.is_active() {
            return;
        }
        if let Err(e) = self.status.clear(key).await {
            warn!(%key, error = %e, "status clear failed");
        }
    }

    async fn emit(&self, key: &Key, type_: EventType, reason: &str, note: &str) {
        let Some(ing) = self.idx.get_ingress(key) else {
            return;
        };
        let reporter = Reporter {
            controller: "ingress-proxy-controller".into(),
            instance: self.config.pod_name.clone(),
        };
        let object_ref = ing.object_ref(&());
        let recorder = Recorder::new(self.client.clone(), reporter, object_ref);
        let event = Event {
            type_,
            reason: reason.to_string(),
            note: Some(note.to_string()),
            action: reason.to_string(),
            secondary: None,
        };
        if let Err(e) = recorder.publish(event).await {
            warn!(%key, error = %e, "failed to publish event");
        }
    }

    #[instrument(skip(self))]
    async fn sync_endpoints(&self, key: &Key) -> Result<()> {
        let referencing = self.idx.ingress_by_service(&key.namespace, &key.name);
        if referencing.is_empty() {
            return Ok(());
        }
        let opts = self.build_opts();
        let mut ings = Vec::new();
        let mut mergeables = Vec::new();
        let mut seen_masters: HashSet<Key> = HashSet::new();

        for ing in referencing {
            let ing_key = Key::new(key.namespace.clone(), ing.name_any());
            match MergeRole::from_annotation(annotations::get(ing.annotations(), annotations::MERGEABLE_TYPE)) {
                MergeRole::None => match build::build(&ing, ing_key.clone(), &self.idx, &opts, Some(&self.health_prober)).await {
                    Ok(ex) => ings.push(ex),
                    Err(e) => warn!(key = %ing_key, error = %e, "endpoint resync build failed"),
                },
                MergeRole::Master => {
                    if seen_masters.insert(ing_key.clone()) {
                        if let Ok(outcome) = self.build_mergeable(&ing_key, &ing, &opts).await {
                            mergeables.push(outcome.mergeable);
                        }
                    }
                }
                MergeRole::Minion => {
                    if let Some(host) = first_host(&ing) {
                        if let Some(master_key) = self.find_master(&key.namespace, &host) {
                            if seen_masters.insert(master_key.clone()) {
                                if let Some(master_ing) = self.idx.get_ingress(&master_key) {
                                    if let Ok(outcome) = self.build_mergeable(&master_key, &master_ing, &opts).await {
                                        mergeables.push(outcome.mergeable);
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        self.configurator.update_endpoints(&ings, &mergeables).await
    }

    #[instrument(skip(self))]
    async fn sync_config(&self, key: &Key) -> Result<()> {
        if key.name != self.config.config_map_name {
            return Ok(());
        }
        let Some(cm) = self.idx.get_config_map(key) else {
            return Ok(());
        };
        let data = cm.data.clone().unwrap_or_default();
        let global = build_global_config(&data);
        self.apply_template_overrides(&data).await;

        let opts = self.build_opts();
        let mut ings = Vec::new();
        let mut mergeables = Vec::new();
        for ing in self.idx.list_ingresses() {
            let Some(namespace) = ing.namespace() else { continue };
            let ing_key = Key::new(namespace, ing.name_any());
            match MergeRole::from_annotation(annotations::get(ing.annotations(), annotations::MERGEABLE_TYPE)) {
                MergeRole::None => {
                    if let Ok(ex) = build::build(&ing, ing_key.clone(), &self.idx, &opts, Some(&self.health_prober)).await {
                        ings.push(ex);
                    }
                }
                MergeRole::Master => {
                    if let Ok(outcome) = self.build_mergeable(&ing_key, &ing, &opts).await {
                        mergeables.push(outcome.mergeable);
                    }
                }
                MergeRole::Minion => {}
            }
        }
        self.configurator.update_config(global, &ings, &mergeables).await?;
        for ex in &ings {
            self.emit(&ex.key, EventType::Normal, "Updated", "ingress configuration updated").await;
        }
        for m in &mergeables {
            self.emit(m.master_key(), EventType::Normal, "Updated", "mergeable ingress configuration updated").await;
            for minion in &m.minions {
                self.emit(&minion.key, EventType::Normal, "Updated", "mergeable ingress configuration updated").await;
            }
        }
        info!("global configuration reloaded");
        Ok(())
    }

    async fn apply_template_overrides(&self, data: &BTreeMap<String, String>) {
        let main_val = data.get(annotations::config_map::MAIN_TEMPLATE).cloned();
        let ingress_val = data.get(annotations::config_map::INGRESS_TEMPLATE).cloned();
        let mut prev = self.template_overrides.lock().await;
        self.apply_one_override(TemplateKind::Main, &self.template_paths.main, prev.main.as_deref(), main_val.as_deref())
            .await;
        self.apply_one_override(TemplateKind::Ingress, &self.template_paths.ingress, prev.ingress.as_deref(), ingress_val.as_deref())
            .await;
        prev.main = main_val;
        prev.ingress = ingress_val;
    }

    async fn apply_one_override(&self, kind: TemplateKind, bootstrap_path: &Path, prev: Option<&str>, current: Option<&str>) {
        match (prev, current) {
            (_, Some(src)) if prev != current => {
                if let Err(e) = self.template.reload(kind, src) {
                    warn!(?kind, error = %e, "custom template failed to compile, keeping previous");
                }
            }
            (Some(_), None) => {
                if let Err(e) = self.template.revert_to_bootstrap(kind, bootstrap_path) {
                    warn!(?kind, error = %e, "failed to revert template to bootstrap");
                }
            }
            _ => {}
        }
    }

    #[instrument(skip(self))]
    async fn sync_secret(&self, key: &Key) -> Result<()> {
        if let Some(name) = &self.config.default_server_secret {
            if key.namespace == self.config.pod_namespace && key.name == *name {
                return self.sync_fixed_secret(key, "default-server").await;
            }
        }
        if let Some(name) = &self.config.wildcard_tls_secret {
            if key.namespace == self.config.pod_namespace && key.name == *name {
                return self.sync_fixed_secret(key, "wildcard").await;
            }
        }

        let referencing = self.ingresses_referencing_secret(key);
        if referencing.is_empty() {
            return Ok(());
        }
        let opts = self.build_opts();
        let mut ings = Vec::new();
        let mut mergeables = Vec::new();
        let mut seen_masters: HashSet<Key> = HashSet::new();
        for ing in referencing {
            let Some(namespace) = ing.namespace() else { continue };
            let ing_key = Key::new(namespace, ing.name_any());
            match MergeRole::from_annotation(annotations::get(ing.annotations(), annotations::MERGEABLE_TYPE)) {
                MergeRole::None => match build::build(&ing, ing_key.clone(), &self.idx, &opts, Some(&self.health_prober)).await {
                    Ok(ex) => ings.push(ex),
                    Err(e) => warn!(key = %ing_key, error = %e, "secret resync build failed"),
                },
                MergeRole::Master => {
                    if seen_masters.insert(ing_key.clone()) {
                        if let Ok(outcome) = self.build_mergeable(&ing_key, &ing, &opts).await {
                            mergeables.push(outcome.mergeable);
                        }
                    }
                }
                MergeRole::Minion => {}
            }
        }

        match self.idx.get_secret(key) {
            Some(secret) if secret_shape(&secret).is_some() => {
                let (cert_and_key, jwk) = material(&secret);
                self.configurator
                    .add_or_update_secret(
                        key,
                        cert_and_key.as_ref().map(|(c, k)| (c.as_slice(), k.as_slice())),
                        jwk.as_deref(),
                        &ings,
                        &mergeables,
                    )
                    .await
            }
            _ => {
                for ing in &ings {
                    self.emit(&ing.key, EventType::Warning, "UpdatedWithError", "referenced secret is missing or invalid").await;
                }
                self.configurator.delete_secret(key, &ings, &mergeables).await
            }
        }
    }

    async fn sync_fixed_secret(&self, key: &Key, file_name: &str) -> Result<()> {
        let Some(secret) = self.idx.get_secret(key) else {
            // preserved on disk even when deleted from the API (§6, §4.D)
            return Ok(());
        };
        let Some((cert, cert_key)) = material(&secret).0 else {
            warn!(%key, "fixed secret present but missing tls.crt/tls.key");
            return Ok(());
        };
        self.configurator.add_or_update_fixed_secret(file_name, &cert, &cert_key).await
    }

    fn ingresses_referencing_secret(&self, key: &Key) -> Vec<std::sync::Arc<Ingress>> {
        self.idx
            .list_ingresses()
            .into_iter()
            .filter(|ing| {
                if ing.namespace().as_deref() != Some(key.namespace.as_str()) {
                    return false;
                }
                let tls_match = ing
                    .spec
                    .as_ref()
                    .and_then(|s| s.tls.as_ref())
                    .into_iter()
                    .flatten()
                    .any(|t| t.secret_name.as_deref() == Some(key.name.as_str()));
                let jwt_match = annotations::get(ing.annotations(), annotations::JWT_KEY) == Some(key.name.as_str());
                tls_match || jwt_match
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn sync_service(&self, key: &Key) -> Result<()> {
        let Some(external) = &self.config.external_service else {
            return Ok(());
        };
        if key.name != *external {
            return Ok(());
        }
        let Some(svc) = self.idx.get_service(key) else {
            self.status.set_external_address(None);
            return Ok(());
        };
        let address = svc
            .status
            .as_ref()
            .and_then(|s| s.load_balancer.as_ref())
            .and_then(|lb| lb.ingress.as_ref())
            .and_then(|ingress| ingress.first())
            .and_then(|i| i.ip.clone().or_else(|| i.hostname.clone()));
        self.status.set_external_address(address);

        if self.status.is_active() {
            for ing_key in self.managed_ingress_keys() {
                self.queue.enqueue(Task::new(TaskKind::Ingress, ing_key));
            }
        }
        Ok(())
    }

    fn managed_ingress_keys(&self) -> Vec<Key> {
        self.idx
            .list_ingresses()
            .into_iter()
            .filter(|ing| MergeRole::from_annotation(annotations::get(ing.annotations(), annotations::MERGEABLE_TYPE)) != MergeRole::Minion)
            .filter_map(|ing| ing.namespace().map(|ns| Key::new(ns, ing.name_any())))
            .collect()
    }
}

fn first_host(ing: &Ingress) -> Option<String> {
    ing.spec.as_ref()?.rules.as_ref()?.first()?.host.clone()
}

/// Number of host rules the master's raw spec carries (§3 MergeRole
/// invariant: "a master holds at most one host rule with no paths").
/// `build_mergeable` rejects anything other than exactly one rather than
/// silently taking the first via `first_host`.
fn host_rule_count(ing: &Ingress) -> usize {
    ing.spec.as_ref().and_then(|s| s.rules.as_ref()).map(|r| r.len()).unwrap_or(0)
}

fn secret_shape(secret: &Secret) -> Option<&'static str> {
    let data = secret.data.as_ref()?;
    if data.contains_key("tls.crt") && data.contains_key("tls.key") {
        return Some("tls");
    }
    if data.contains_key("jwk") {
        return Some("jwk");
    }
    None
}

fn material(secret: &Secret) -> (Option<(Vec<u8>, Vec<u8>)>, Option<Vec<u8>>) {
    let Some(data) = secret.data.as_ref() else {
        return (None, None);
    };
    let cert_and_key = match (data.get("tls.crt"), data.get("tls.key")) {
        (Some(cert), Some(key)) => Some((cert.0.clone(), key.0.clone())),
        _ => None,
    };
    let jwk = data.get("jwk").map(|v| v.0.clone());
    (cert_and_key, jwk)
}

fn build_global_config(data: &BTreeMap<String, String>) -> GlobalConfig {
    GlobalConfig {
        proxy_connect_timeout: data.get(annotations::config_map::PROXY_CONNECT_TIMEOUT).cloned().unwrap_or_else(|| "60s".into()),
        proxy_read_timeout: data.get(annotations::config_map::PROXY_READ_TIMEOUT).cloned().unwrap_or_else(|| "60s".into()),
        proxy_send_timeout: data.get(annotations::config_map::PROXY_SEND_TIMEOUT).cloned().unwrap_or_else(|| "60s".into()),
        client_max_body_size: data.get(annotations::config_map::CLIENT_MAX_BODY_SIZE).cloned().unwrap_or_else(|| "1m".into()),
        worker_processes: data.get(annotations::config_map::WORKER_PROCESSES).cloned().unwrap_or_else(|| "auto".into()),
        worker_connections: data.get(annotations::config_map::WORKER_CONNECTIONS).cloned().unwrap_or_else(|| "1024".into()),
        server_names_hash_max_size: data.get(annotations::config_map::SERVER_NAMES_HASH_MAX_SIZE).cloned(),
        server_names_hash_bucket_size: data.get(annotations::config_map::SERVER_NAMES_HASH_BUCKET_SIZE).cloned(),
        variables_hash_max_size: data.get(annotations::config_map::VARIABLES_HASH_MAX_SIZE).cloned(),
        variables_hash_bucket_size: data.get(annotations::config_map::VARIABLES_HASH_BUCKET_SIZE).cloned(),
        ssl_protocols: data.get(annotations::config_map::SSL_PROTOCOLS).cloned(),
        ssl_ciphers: data.get(annotations::config_map::SSL_CIPHERS).cloned(),
        resolver: data.get(annotations::config_map::RESOLVER_ADDRESSES).cloned(),
        error_log_level: data.get(annotations::config_map::ERROR_LOG_LEVEL).cloned().unwrap_or_else(|| "notice".into()),
        keepalive_timeout: data.get(annotations::config_map::KEEPALIVE_TIMEOUT).cloned().unwrap_or_else(|| "65s".into()),
        main_snippets: split_snippets(data.get(annotations::config_map::MAIN_SNIPPETS)),
        http_snippets: split_snippets(data.get(annotations::config_map::HTTP_SNIPPETS)),
        stream_snippets: split_snippets(data.get(annotations::config_map::STREAM_SNIPPETS)),
        custom_main_template: data.get(annotations::config_map::MAIN_TEMPLATE).cloned(),
        custom_ingress_template: data.get(annotations::config_map::INGRESS_TEMPLATE).cloned(),
    }
}

fn split_snippets(v: Option<&String>) -> Vec<String> {
    v.map(|s| s.lines().map(str::to_string).filter(|l| !l.trim().is_empty()).collect()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_config_falls_back_to_defaults() {
        let global = build_global_config(&BTreeMap::new());
        assert_eq!(global.worker_processes, "auto");
        assert_eq!(global.proxy_connect_timeout, "60s");
        assert!(global.main_snippets.is_empty());
    }

    #[test]
    fn snippets_split_on_newline_and_drop_blank_lines() {
        let raw = "add_header X-One 1;\n\nadd_header X-Two 2;\n".to_string();
        let snippets = split_snippets(Some(&raw));
        assert_eq!(snippets, vec!["add_header X-One 1;", "add_header X-Two 2;"]);
    }

    #[test]
    fn secret_shape_detects_tls_and_jwk() {
        use k8s_openapi::ByteString;
        let mut tls = Secret::default();
        tls.data = Some(BTreeMap::from([
            ("tls.crt".to_string(), ByteString(vec![1])),
            ("tls.key".to_string(), ByteString(vec![2])),
        ]));
        assert_eq!(secret_shape(&tls), Some("tls"));

        let mut jwk = Secret::default();
        jwk.data = Some(BTreeMap::from([("jwk".to_string(), ByteString(vec![3]))]));
        assert_eq!(secret_shape(&jwk), Some("jwk"));

        assert_eq!(secret_shape(&Secret::default()), None);
    }
}
