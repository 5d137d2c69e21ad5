//! Bootstrap and wiring (§1 "CLI flag parsing; logging initialisation" are
//! explicitly out of the reconciliation core's scope, but the binary still
//! needs to assemble every component named in §4 and start the worker
//! loop). Mirrors the teacher's `main.rs` shape: set up tracing, build a
//! client, spawn the long-running pieces, wait for a shutdown signal.

mod annotations;
mod atomic_file;
mod config;
mod configurator;
mod error;
mod index;
mod key;
mod leader;
mod model;
mod proxy;
mod queue;
mod reconcile;
mod render_data;
mod status;
mod template;
mod watch;

use std::sync::Arc;

use kube::ResourceExt;
use tokio::signal::{self, unix::SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::Config;
use configurator::Configurator;
use index::Indexes;
use key::Key;
use model::{GlobalConfig, MergeRole};
use proxy::ProxyDriver;
use queue::{Task, TaskKind, TaskQueue};
use reconcile::Reconciler;
use status::StatusReporter;
use template::{TemplateEngine, TemplatePaths};

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler")
    };
    let terminate = async {
        signal::unix::signal(SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };
    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn template_paths(config: &Config) -> TemplatePaths {
    TemplatePaths {
        main: config.templates_dir.join("main.tmpl"),
        ingress: config.templates_dir.join("ingress.tmpl"),
        ingress_plus: config.templates_dir.join("ingress-plus.tmpl"),
        main_plus: config.templates_dir.join("main-plus.tmpl"),
        version: config.templates_dir.join("version.tmpl"),
    }
}

/// All ingress keys the status reporter / leader elector treat as managed:
/// every non-minion ingress (minions ride along with their master, §4.G).
fn managed_ingress_keys(idx: &Indexes) -> Vec<Key> {
    idx.list_ingresses()
        .into_iter()
        .filter(|ing| {
            MergeRole::from_annotation(annotations::get(ing.annotations(), annotations::MERGEABLE_TYPE))
                != MergeRole::Minion
        })
        .filter_map(|ing| ing.namespace().map(|ns| Key::new(ns, ing.name_any())))
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let logger = tracing_subscriber::fmt::layer().compact();
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info")).unwrap();
    tracing_subscriber::Registry::default().with(env_filter).with(logger).init();

    let config = Config::parse_from_env();
    let cancel = CancellationToken::new();

    let client = kube::Client::try_default().await?;

    let queue = TaskQueue::new();
    let (idx, watch_handles) = watch::spawn_all(client.clone(), &config, queue.clone(), cancel.clone());
    let idx = Arc::new(idx);

    // Bootstrap template parse failure is fatal (§6).
    let paths = template_paths(&config);
    let template = Arc::new(TemplateEngine::bootstrap(&paths).map_err(|e| {
        error!(error = %e, "failed to parse bootstrap templates");
        e
    })?);

    let version_file = config.proxy_config_root.join("config-version.conf");
    let proxy = Arc::new(ProxyDriver::new(
        config.proxy_binary.clone(),
        config.proxy_verify_socket.clone(),
        version_file,
    ));

    // Proxy start failure is fatal (§6).
    proxy.start().await.map_err(|e| {
        error!(error = %e, "failed to start proxy");
        e
    })?;

    let configurator = Arc::new(Configurator::new(config.proxy_config_root.clone(), template.clone(), proxy.clone()));

    // Materialise main.conf + the initial config-version stanza before
    // accepting events, so the verify socket is serving something the
    // moment the proxy comes up. Failure to converge here is the
    // "reload never converging at start-up" fatal case (§6, §7).
    configurator
        .update_config(GlobalConfig::default(), &[], &[])
        .await
        .map_err(|e| {
            error!(error = %e, "initial reload did not converge");
            e
        })?;

    let is_leader = leader::shared_flag(config.enable_leader_election);
    let status = Arc::new(StatusReporter::new(client.clone(), config.report_status, is_leader.clone()));

    let leader_handle = if config.enable_leader_election {
        let on_acquire_idx = idx.clone();
        let on_acquire_queue = queue.clone();
        Some(leader::LeaderElector::spawn(
            client.clone(),
            config.pod_namespace.clone(),
            config.pod_name_or_hostname(),
            is_leader.clone(),
            move || {
                // §4.H: "a callback runs one full status refresh over all
                // managed ingresses" — ride the normal sync path.
                for key in managed_ingress_keys(&on_acquire_idx) {
                    on_acquire_queue.enqueue(Task::new(TaskKind::Ingress, key));
                }
            },
            cancel.clone(),
        ))
    } else {
        None
    };

    let reconciler = Arc::new(Reconciler::new(
        client.clone(),
        config.clone(),
        idx.clone(),
        configurator.clone(),
        queue.clone(),
        status.clone(),
        template.clone(),
        Arc::new(paths),
    ));

    let worker = {
        let queue = queue.clone();
        let reconciler = reconciler.clone();
        tokio::spawn(async move {
            while let Some(task) = queue.next().await {
                reconciler.dispatch(task).await;
            }
            info!("worker loop drained, shutting down");
        })
    };

    shutdown_signal().await;
    info!("shutdown signal received, draining in-flight work");
    cancel.cancel();
    queue.shutdown();

    worker.await?;
    for handle in watch_handles {
        handle.abort();
    }
    if let Some(handle) = leader_handle {
        handle.abort();
    }

    if let Err(e) = proxy.quit().await {
        warn!(error = %e, "proxy quit signal failed during shutdown");
    }

    Ok(())
}
