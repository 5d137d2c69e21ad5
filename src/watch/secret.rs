//! §4.A secret watcher — validates shape on entry. An invalid secret that
//! was already invalid produces no task (§4.A "silently drop invalid");
//! a transition in either direction, or any delete, still needs a sync so
//! referencing ingresses can pick up the change.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
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
) -> (Store<Secret>, tokio::task::JoinHandle<()>) {
    let api: Api<Secret> = match &namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };
    let (store, writer) = reflector::store();
    let stream = reflector::reflector(writer, watcher::watcher(api, watcher::Config::default())).default_backoff();
    let handle = tokio::spawn(run(stream, queue, cancel));
    (store, handle)
}

async fn run(
    mut stream: impl futures::Stream<Item = Result<watcher::Event<Secret>, watcher::Error>> + Unpin,
    queue: Arc<TaskQueue>,
    cancel: CancellationToken,
) {
    let mut was_valid: HashMap<Key, bool> = HashMap::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            item = stream.next() => {
                match item {
                    Some(Ok(watcher::Event::Applied(secret))) => apply(secret, &queue, &mut was_valid),
                    Some(Ok(watcher::Event::Deleted(secret))) => delete(secret, &queue, &mut was_valid),
                    Some(Ok(watcher::Event::Restarted(list))) => {
                        for secret in list {
                            apply(secret, &queue, &mut was_valid);
                        }
                    }
                    Some(Err(e)) => warn!(error = %e, "secret watch error"),
                    None => return,
                }
            }
        }
    }
}

fn apply(secret: Secret, queue: &TaskQueue, was_valid: &mut HashMap<Key, bool>) {
    let Some(namespace) = secret.namespace() else { return };
    let key = Key::new(namespace, secret.name_any());

    let valid_now = recognised_shape(&secret);
    let valid_before = was_valid.get(&key).copied().unwrap_or(false);
    was_valid.insert(key.clone(), valid_now);

    if !valid_now && !valid_before {
        return;
    }
    queue.enqueue(Task::new(TaskKind::Secret, key));
}

fn delete(secret: Secret, queue: &TaskQueue, was_valid: &mut HashMap<Key, bool>) {
    let Some(namespace) = secret.namespace() else { return };
    let key = Key::new(namespace, secret.name_any());
    was_valid.remove(&key);
    queue.enqueue(Task::new(TaskKind::Secret, key));
}

fn recognised_shape(secret: &Secret) -> bool {
    let Some(data) = secret.data.as_ref() else { return false };
    (data.contains_key("tls.crt") && data.contains_key("tls.key")) || data.contains_key("jwk")
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;

    #[test]
    fn recognises_tls_and_jwk_shapes() {
        let mut tls = Secret::default();
        tls.data = Some(BTreeMap::from([
            ("tls.crt".to_string(), ByteString(vec![1])),
            ("tls.key".to_string(), ByteString(vec![2])),
        ]));
        assert!(recognised_shape(&tls));

        let mut jwk = Secret::default();
        jwk.data = Some(BTreeMap::from([("jwk".to_string(), ByteString(vec![3]))]));
        assert!(recognised_shape(&jwk));

        assert!(!recognised_shape(&Secret::default()));
    }

    #[test]
    fn repeated_invalid_updates_suppressed() {
        let mut was_valid = HashMap::new();
        let key = Key::new("default", "bogus");
        was_valid.insert(key.clone(), false);
        assert!(!recognised_shape(&Secret::default()));
        assert_eq!(was_valid.get(&key), Some(&false));
    }
}
