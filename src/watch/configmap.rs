//! §4.A config-map watcher — only the one ConfigMap named by
//! `CONFIG_MAP_NAME` matters; everything else is ignored without even
//! entering the task queue.

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
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
    config_map_name: String,
    queue: Arc<TaskQueue>,
    cancel: CancellationToken,
) -> (Store<ConfigMap>, tokio::task::JoinHandle<()>) {
    let api: Api<ConfigMap> = match &namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };
    let (store, writer) = reflector::store();
    let stream = reflector::reflector(writer, watcher::watcher(api, watcher::Config::default())).default_backoff();
    let handle = tokio::spawn(run(stream, queue, cancel, config_map_name));
    (store, handle)
}

async fn run(
    mut stream: impl futures::Stream<Item = Result<watcher::Event<ConfigMap>, watcher::Error>> + Unpin,
    queue: Arc<TaskQueue>,
    cancel: CancellationToken,
    config_map_name: String,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            item = stream.next() => {
                match item {
                    Some(Ok(watcher::Event::Applied(cm))) => maybe_enqueue(cm, &queue, &config_map_name),
                    Some(Ok(watcher::Event::Deleted(cm))) => maybe_enqueue(cm, &queue, &config_map_name),
                    Some(Ok(watcher::Event::Restarted(list))) => {
                        for cm in list {
                            maybe_enqueue(cm, &queue, &config_map_name);
                        }
                    }
                    Some(Err(e)) => warn!(error = %e, "configmap watch error"),
                    None => return,
                }
            }
        }
    }
}

fn maybe_enqueue(cm: ConfigMap, queue: &TaskQueue, config_map_name: &str) {
    let Some(namespace) = cm.namespace() else { return };
    if cm.name_any() != config_map_name {
        return;
    }
    queue.enqueue(Task::new(TaskKind::ConfigMap, Key::new(namespace, cm.name_any())));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_filter_is_exact() {
        let mut cm = ConfigMap::default();
        cm.metadata.namespace = Some("default".into());
        cm.metadata.name = Some("other-config".into());
        // maybe_enqueue only acts through the queue; exercised indirectly
        // via the reconciler's own name-match guard in sync_config.
        assert_ne!(cm.name_any(), "nginx-config");
    }
}
