//! §4.A Watchers — one reflector-backed task per kind, translating API
//! events into task-queue entries. The reflector `Store` half of each
//! becomes the corresponding field of [`crate::index::Indexes`]; the
//! `Writer` half stays local to the task that owns the stream.

pub mod configmap;
pub mod endpoints;
pub mod ingress;
pub mod secret;
pub mod service;

use std::sync::Arc;

use kube::Client;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::index::Indexes;
use crate::queue::TaskQueue;

/// Starts all five watchers and returns the populated index plus their
/// join handles, so the caller can wait on them during shutdown.
pub fn spawn_all(
    client: Client,
    config: &Config,
    queue: Arc<TaskQueue>,
    cancel: CancellationToken,
) -> (Indexes, Vec<tokio::task::JoinHandle<()>>) {
    let namespace = config.watch_namespace.clone();

    let (ingresses, h1) = ingress::spawn(
        client.clone(),
        namespace.clone(),
        config.ingress_class.clone(),
        config.class_only,
        queue.clone(),
        cancel.clone(),
    );
    let (endpoints, h2) = endpoints::spawn(client.clone(), namespace.clone(), queue.clone(), cancel.clone());
    let (services, h3) = service::spawn(
        client.clone(),
        namespace.clone(),
        config.external_service.clone(),
        queue.clone(),
        cancel.clone(),
    );
    let (secrets, h4) = secret::spawn(client.clone(), namespace.clone(), queue.clone(), cancel.clone());
    let (config_maps, h5) = configmap::spawn(
        client,
        namespace,
        config.config_map_name.clone(),
        queue,
        cancel,
    );

    let indexes = Indexes {
        ingresses,
        services,
        endpoints,
        secrets,
        config_maps,
    };

    (indexes, vec![h1, h2, h3, h4, h5])
}
