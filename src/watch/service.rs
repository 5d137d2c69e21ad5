//! §4.A service watcher — enqueues the `Endpoints` sync path for any
//! ingress that references the service (endpoint resolution and service
//! lookups share the same code, see `reconcile::sync_endpoints`), and
//! additionally enqueues `Service` itself when it is the configured
//! external-status-address source (§4.D syncService, §4.G).

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::reflector::{self, Store};
use kube::runtime::watcher;
use kube::runtime::WatchStreamExt;
use kube::{Api, Client, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::key::Key;
use crate::queue::{Task, TaskKind, TaskQueue};

pub fn spawn(
    client: Client,
    namespace: Option<String>,
    external_service: Option<String>,
    queue: Arc<TaskQueue>,
    cancel: CancellationToken,
) -> (Store<Service>, tokio::task::JoinHandle<()>) {
    let api: Api<Service> = match &namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };
    let (store, writer) = reflector::store();
    let stream = reflector::reflector(writer, watcher::watcher(api, watcher::Config::default())).default_backoff();
    let handle = tokio::spawn(run(stream, queue, cancel, external_service));
    (store, handle)
}

async fn run(
    mut stream: impl futures::Stream<Item = Result<watcher::Event<Service>, watcher::Error>> + Unpin,
    queue: Arc<TaskQueue>,
    cancel: CancellationToken,
    external_service: Option<String>,
) {
    let mut last_seen: HashMap<Key, u64> = HashMap::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            item = stream.next() => {
                match item {
                    Some(Ok(watcher::Event::Applied(svc))) => apply(svc, &queue, &mut last_seen, &external_service),
                    Some(Ok(watcher::Event::Deleted(svc))) => delete(svc, &queue, &mut last_seen),
                    Some(Ok(watcher::Event::Restarted(list))) => {
                        for svc in list {
                            apply(svc, &queue, &mut last_seen, &external_service);
                        }
                    }
                    Some(Err(e)) => warn!(error = %e, "service watch error"),
                    None => return,
                }
            }
        }
    }
}

fn apply(svc: Service, queue: &TaskQueue, last_seen: &mut HashMap<Key, u64>, external_service: &Option<String>) {
    let Some(namespace) = svc.namespace() else { return };
    let key = Key::new(namespace, svc.name_any());

    let hash = shape_hash(&svc);
    let changed = last_seen.get(&key) != Some(&hash);
    last_seen.insert(key.clone(), hash);

    if changed {
        queue.enqueue(Task::new(TaskKind::Endpoints, key.clone()));
    }
    if external_service.as_deref() == Some(key.name.as_str()) {
        queue.enqueue(Task::new(TaskKind::Service, key));
    }
}

fn delete(svc: Service, queue: &TaskQueue, last_seen: &mut HashMap<Key, u64>) {
    let Some(namespace) = svc.namespace() else { return };
    let key = Key::new(namespace, svc.name_any());
    last_seen.remove(&key);
    queue.enqueue(Task::new(TaskKind::Endpoints, key));
}

/// Hashes the bits of a `Service` that change upstream resolution: its
/// port list and `ExternalName` target. Status-only writes (e.g. our own
/// load-balancer address patches) don't touch either.
fn shape_hash(svc: &Service) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    format!("{:?}", svc.spec.as_ref().map(|s| (&s.ports, &s.external_name, &s.type_))).hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_services_hash_equal() {
        assert_eq!(shape_hash(&Service::default()), shape_hash(&Service::default()));
    }
}
