//! §4.A ingress watcher — the filtering policy is the most involved of the
//! five: ingress-class selection, semantic-change suppression, and
//! routing a minion's delete onto its master.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use futures::StreamExt;
use k8s_openapi::api::networking::v1::Ingress;
use kube::runtime::reflector::{self, Store};
use kube::runtime::watcher;
use kube::runtime::WatchStreamExt;
use kube::{Api, Client, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::annotations;
use crate::key::Key;
use crate::model::MergeRole;
use crate::queue::{Task, TaskKind, TaskQueue};

pub fn spawn(
    client: Client,
    namespace: Option<String>,
    ingress_class: String,
    class_only: bool,
    queue: std::sync::Arc<TaskQueue>,
    cancel: CancellationToken,
) -> (Store<Ingress>, tokio::task::JoinHandle<()>) {
    let api: Api<Ingress> = match &namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };
    let (store, writer) = reflector::store();
    let stream = reflector::reflector(writer, watcher::watcher(api, watcher::Config::default())).default_backoff();

    let handle = tokio::spawn(run(stream, queue, cancel, ingress_class, class_only, store.clone()));
    (store, handle)
}

async fn run(
    mut stream: impl futures::Stream<Item = Result<watcher::Event<Ingress>, watcher::Error>> + Unpin,
    queue: std::sync::Arc<TaskQueue>,
    cancel: CancellationToken,
    ingress_class: String,
    class_only: bool,
    store: Store<Ingress>,
) {
    let mut last_seen: HashMap<Key, u64> = HashMap::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            item = stream.next() => {
                match item {
                    Some(Ok(event)) => handle_event(event, &queue, &mut last_seen, &ingress_class, class_only, &store),
                    Some(Err(e)) => warn!(error = %e, "ingress watch error"),
                    None => return,
                }
            }
        }
    }
}

fn handle_event(
    event: watcher::Event<Ingress>,
    queue: &TaskQueue,
    last_seen: &mut HashMap<Key, u64>,
    ingress_class: &str,
    class_only: bool,
    store: &Store<Ingress>,
) {
    match event {
        watcher::Event::Applied(ing) => apply(ing, queue, last_seen, ingress_class, class_only),
        watcher::Event::Deleted(ing) => delete(ing, queue, last_seen, store),
        watcher::Event::Restarted(list) => {
            for ing in list {
                apply(ing, queue, last_seen, ingress_class, class_only);
            }
        }
    }
}

fn apply(ing: Ingress, queue: &TaskQueue, last_seen: &mut HashMap<Key, u64>, ingress_class: &str, class_only: bool) {
    let Some(namespace) = ing.namespace() else { return };
    let key = Key::new(namespace, ing.name_any());

    if class_only && !class_matches(&ing, ingress_class) {
        last_seen.remove(&key);
        return;
    }

    let hash = semantic_hash(&ing);
    if last_seen.get(&key) == Some(&hash) {
        return;
    }
    last_seen.insert(key.clone(), hash);
    queue.enqueue(Task::new(TaskKind::Ingress, key));
}

fn delete(ing: Ingress, queue: &TaskQueue, last_seen: &mut HashMap<Key, u64>, store: &Store<Ingress>) {
    let Some(namespace) = ing.namespace() else { return };
    let key = Key::new(namespace.clone(), ing.name_any());
    last_seen.remove(&key);

    let role = MergeRole::from_annotation(annotations::get(ing.annotations(), annotations::MERGEABLE_TYPE));
    if role == MergeRole::Minion {
        if let Some(host) = ing.spec.as_ref().and_then(|s| s.rules.as_ref()?.first()?.host.clone()) {
            let master = store.state().into_iter().find(|other| {
                other.namespace().as_deref() == Some(namespace.as_str())
                    && MergeRole::from_annotation(annotations::get(other.annotations(), annotations::MERGEABLE_TYPE)) == MergeRole::Master
                    && other.spec.as_ref().and_then(|s| s.rules.as_ref()?.first()?.host.clone()).as_deref() == Some(host.as_str())
            });
            if let Some(master) = master {
                if let Some(master_ns) = master.namespace() {
                    queue.enqueue(Task::new(TaskKind::Ingress, Key::new(master_ns, master.name_any())));
                    return;
                }
            }
        }
    }
    queue.enqueue(Task::new(TaskKind::Ingress, key));
}

fn class_matches(ing: &Ingress, ingress_class: &str) -> bool {
    match annotations::get(ing.annotations(), annotations::INGRESS_CLASS) {
        Some(v) => v == ingress_class,
        None => true,
    }
}

/// Hashes the fields that drive reconciliation, deliberately excluding
/// `status` and `metadata.resourceVersion` so a status-only round trip
/// from our own reporter doesn't re-trigger a sync (§4.A).
fn semantic_hash(ing: &Ingress) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    format!("{:?}", ing.spec).hash(&mut hasher);
    format!("{:?}", ing.annotations()).hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_matches_when_absent_or_equal() {
        let mut ing = Ingress::default();
        assert!(class_matches(&ing, "nginx"));
        ing.metadata.annotations = Some(std::collections::BTreeMap::from([(
            annotations::INGRESS_CLASS.to_string(),
            "nginx".to_string(),
        )]));
        assert!(class_matches(&ing, "nginx"));
        assert!(!class_matches(&ing, "other"));
    }

    #[test]
    fn semantic_hash_ignores_status() {
        let mut a = Ingress::default();
        a.metadata.resource_version = Some("1".into());
        let mut b = Ingress::default();
        b.metadata.resource_version = Some("2".into());
        assert_eq!(semantic_hash(&a), semantic_hash(&b));
    }
}
