//! §4.A endpoints watcher — every non-equal update enqueues a sync; there
//! is no class filtering since membership is derived from the ingresses
//! that reference a service, not from the `Endpoints` object itself.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Endpoints;
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
    queue: Arc<TaskQueue>,
    cancel: CancellationToken,
) -> (Store<Endpoints>, tokio::task::JoinHandle<()>) {
    let api: Api<Endpoints> = match &namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };
    let (store, writer) = reflector::store();
    let stream = reflector::reflector(writer, watcher::watcher(api, watcher::Config::default())).default_backoff();
    let handle = tokio::spawn(run(stream, queue, cancel));
    (store, handle)
}

async fn run(
    mut stream: impl futures::Stream<Item = Result<watcher::Event<Endpoints>, watcher::Error>> + Unpin,
    queue: Arc<TaskQueue>,
    cancel: CancellationToken,
) {
    let mut last_seen: HashMap<Key, u64> = HashMap::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            item = stream.next() => {
                match item {
                    Some(Ok(watcher::Event::Applied(ep))) => apply(ep, &queue, &mut last_seen),
                    Some(Ok(watcher::Event::Deleted(ep))) => delete(ep, &queue, &mut last_seen),
                    Some(Ok(watcher::Event::Restarted(list))) => {
                        for ep in list {
                            apply(ep, &queue, &mut last_seen);
                        }
                    }
                    Some(Err(e)) => warn!(error = %e, "endpoints watch error"),
                    None => return,
                }
            }
        }
    }
}

fn apply(ep: Endpoints, queue: &TaskQueue, last_seen: &mut HashMap<Key, u64>) {
    let Some(namespace) = ep.namespace() else { return };
    let key = Key::new(namespace, ep.name_any());
    let hash = subsets_hash(&ep);
    if last_seen.get(&key) == Some(&hash) {
        return;
    }
    last_seen.insert(key.clone(), hash);
    queue.enqueue(Task::new(TaskKind::Endpoints, key));
}

fn delete(ep: Endpoints, queue: &TaskQueue, last_seen: &mut HashMap<Key, u64>) {
    let Some(namespace) = ep.namespace() else { return };
    let key = Key::new(namespace, ep.name_any());
    last_seen.remove(&key);
    queue.enqueue(Task::new(TaskKind::Endpoints, key));
}

fn subsets_hash(ep: &Endpoints) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    format!("{:?}", ep.subsets).hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_subsets_hash_equal() {
        let a = Endpoints::default();
        let b = Endpoints::default();
        assert_eq!(subsets_hash(&a), subsets_hash(&b));
    }
}
