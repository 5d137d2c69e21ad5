//! §4.E Configurator — owns the in-memory map of materialised ingress
//! configs, renders templates, and coordinates atomic file updates plus
//! proxy reloads. All mutations are serialised by a single lock, which
//! mirrors the single-worker discipline upstream (§5) rather than
//! defending against real contention.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::atomic_file;
use crate::error::Error;
use crate::key::Key;
use crate::model::{GlobalConfig, IngressEx, MaterialisedConfig, MergeableIngresses};
use crate::proxy::ProxyDriver;
use crate::render_data;
use crate::template::{TemplateEngine, TemplateKind};

struct State {
    configs: HashMap<Key, MaterialisedConfig>,
    mergeables: HashMap<Key, MergeableIngresses>,
    global: GlobalConfig,
}

pub struct Configurator {
    conf_d: PathBuf,
    secrets_dir: PathBuf,
    main_conf_path: PathBuf,
    template: Arc<TemplateEngine>,
    proxy: Arc<ProxyDriver>,
    state: Mutex<State>,
}

impl Configurator {
    pub fn new(root: PathBuf, template: Arc<TemplateEngine>, proxy: Arc<ProxyDriver>) -> Self {
        Self {
            conf_d: root.join("conf.d"),
            secrets_dir: root.join("secrets"),
            main_conf_path: root.join("nginx.conf"),
            template,
            proxy,
            state: Mutex::new(State {
                configs: HashMap::new(),
                mergeables: HashMap::new(),
                global: GlobalConfig::default(),
            }),
        }
    }

    fn conf_path(&self, key: &Key) -> PathBuf {
        self.conf_d.join(format!("{}.conf", key.file_stem()))
    }

    fn secret_path(&self, key: &Key, suffix: &str) -> PathBuf {
        self.secrets_dir.join(format!("{}{suffix}", key.file_stem()))
    }

    async fn reload(&self) -> Result<(), Error> {
        let version_bytes = self
            .template
            .render(TemplateKind::Version, &render_data::VersionTemplateData {
                version: self.proxy.current_version().next().0,
            })
            .map_err(Error::Render)?;
        self.proxy.reload(&version_bytes).await?;
        Ok(())
    }

    /// §4.E `AddOrUpdate`: render, write atomically, update the map,
    /// trigger a reload. On failure the prior file and map entry are left
    /// intact (§8 invariant, §7 table).
    pub async fn add_or_update(&self, ex: &IngressEx) -> Result<(), Error> {
        let data = render_data::from_ingress(ex, self.secrets_dir.to_string_lossy().as_ref());
        let bytes = self
            .template
            .render(TemplateKind::Ingress, &data)
            .map_err(Error::Render)?;

        let path = self.conf_path(&ex.key);
        atomic_file::write_atomic(&path, &bytes, 0o644).await?;

        let mut state = self.state.lock().await;
        state.configs.insert(
            ex.key.clone(),
            MaterialisedConfig {
                key: ex.key.clone(),
                file_stem: ex.key.file_stem(),
                bytes,
            },
        );
        drop(state);

        self.reload().await?;
        info!(key = %ex.key, "ingress config written");
        Ok(())
    }

    /// §4.E `AddOrUpdateMergeable`: same, keyed on the master.
    pub async fn add_or_update_mergeable(&self, m: &MergeableIngresses) -> Result<(), Error> {
        let data = render_data::from_mergeable(m, self.secrets_dir.to_string_lossy().as_ref());
        let bytes = self
            .template
            .render(TemplateKind::Ingress, &data)
            .map_err(Error::Render)?;

        let key = m.master_key().clone();
        let path = self.conf_path(&key);
        atomic_file::write_atomic(&path, &bytes, 0o644).await?;

        let mut state = self.state.lock().await;
        state.configs.insert(
            key.clone(),
            MaterialisedConfig {
                key: key.clone(),
                file_stem: key.file_stem(),
                bytes,
            },
        );
        state.mergeables.insert(key.clone(), m.clone());
        drop(state);

        self.reload().await?;
        info!(key = %key, "mergeable ingress config written");
        Ok(())
    }

    /// §4.E `DeleteIngress`: removes file and map entry; idempotent.
    pub async fn delete_ingress(&self, key: &Key) -> Result<(), Error> {
        let path = self.conf_path(key);
        atomic_file::remove_if_present(&path).await?;

        let mut state = self.state.lock().await;
        let existed = state.configs.remove(key).is_some();
        state.mergeables.remove(key);
        drop(state);

        if existed {
            self.reload().await?;
            info!(%key, "ingress config deleted");
        }
        Ok(())
    }

    /// §4.E `UpdateEndpoints`: re-renders every ingress passed in (the
    /// reconciler has already resolved their new endpoint sets) and
    /// reloads once for the whole batch.
    pub async fn update_endpoints(
        &self,
        ingresses: &[IngressEx],
        mergeables: &[MergeableIngresses],
    ) -> Result<(), Error> {
        if ingresses.is_empty() && mergeables.is_empty() {
            return Ok(());
        }
        for ex in ingresses {
            let data = render_data::from_ingress(ex, self.secrets_dir.to_string_lossy().as_ref());
            let bytes = self.template.render(TemplateKind::Ingress, &data).map_err(Error::Render)?;
            let path = self.conf_path(&ex.key);
            atomic_file::write_atomic(&path, &bytes, 0o644).await?;
            let mut state = self.state.lock().await;
            state.configs.insert(
                ex.key.clone(),
                MaterialisedConfig {
                    key: ex.key.clone(),
                    file_stem: ex.key.file_stem(),
                    bytes,
                },
            );
        }
        for m in mergeables {
            let data = render_data::from_mergeable(m, self.secrets_dir.to_string_lossy().as_ref());
            let bytes = self.template.render(TemplateKind::Ingress, &data).map_err(Error::Render)?;
            let key = m.master_key().clone();
            let path = self.conf_path(&key);
            atomic_file::write_atomic(&path, &bytes, 0o644).await?;
            let mut state = self.state.lock().await;
            state.configs.insert(
                key.clone(),
                MaterialisedConfig {
                    key: key.clone(),
                    file_stem: key.file_stem(),
                    bytes,
                },
            );
            state.mergeables.insert(key, m.clone());
        }
        self.reload().await?;
        Ok(())
    }

    /// §4.E `UpdateConfig`: regenerates the main configuration file and
    /// every ingress file, then reloads once (§8 scenario: config-map
    /// edits affect every managed ingress).
    pub async fn update_config(
        &self,
        global: GlobalConfig,
        ings: &[IngressEx],
        mergeables: &[MergeableIngresses],
    ) -> Result<(), Error> {
        let main_data = render_data::from_global(&global);
        let main_bytes = self.template.render(TemplateKind::Main, &main_data).map_err(Error::Render)?;
        atomic_file::write_atomic(&self.main_conf_path, &main_bytes, 0o644).await?;

        {
            let mut state = self.state.lock().await;
            state.global = global;
        }

        for ex in ings {
            let data = render_data::from_ingress(ex, self.secrets_dir.to_string_lossy().as_ref());
            let bytes = self.template.render(TemplateKind::Ingress, &data).map_err(Error::Render)?;
            let path = self.conf_path(&ex.key);
            atomic_file::write_atomic(&path, &bytes, 0o644).await?;
            let mut state = self.state.lock().await;
            state.configs.insert(
                ex.key.clone(),
                MaterialisedConfig {
                    key: ex.key.clone(),
                    file_stem: ex.key.file_stem(),
                    bytes,
                },
            );
        }
        for m in mergeables {
            let data = render_data::from_mergeable(m, self.secrets_dir.to_string_lossy().as_ref());
            let bytes = self.template.render(TemplateKind::Ingress, &data).map_err(Error::Render)?;
            let key = m.master_key().clone();
            let path = self.conf_path(&key);
            atomic_file::write_atomic(&path, &bytes, 0o644).await?;
            let mut state = self.state.lock().await;
            state.configs.insert(
                key.clone(),
                MaterialisedConfig {
                    key: key.clone(),
                    file_stem: key.file_stem(),
                    bytes,
                },
            );
            state.mergeables.insert(key, m.clone());
        }

        self.reload().await?;
        info!("global config regenerated");
        Ok(())
    }

    /// §4.E `AddOrUpdateSecret`: writes secret material with the mode the
    /// shape dictates (TLS 0600, JWK 0644), re-renders affected ingresses,
    /// reloads.
    pub async fn add_or_update_secret(
        &self,
        key: &Key,
        cert_and_key: Option<(&[u8], &[u8])>,
        jwk: Option<&[u8]>,
        affected: &[IngressEx],
        affected_mergeables: &[MergeableIngresses],
    ) -> Result<(), Error> {
        if let Some((cert, cert_key)) = cert_and_key {
            atomic_file::write_atomic(&self.secret_path(key, ".crt"), cert, 0o600).await?;
            atomic_file::write_atomic(&self.secret_path(key, ".key"), cert_key, 0o600).await?;
        }
        if let Some(jwk_bytes) = jwk {
            atomic_file::write_atomic(&self.secret_path(key, ".jwk"), jwk_bytes, 0o644).await?;
        }
        self.update_endpoints(affected, affected_mergeables).await
    }

    /// §4.E `DeleteSecret`: removes the secret file, re-renders affected
    /// ingresses, reloads.
    pub async fn delete_secret(
        &self,
        key: &Key,
        affected: &[IngressEx],
        affected_mergeables: &[MergeableIngresses],
    ) -> Result<(), Error> {
        atomic_file::remove_if_present(&self.secret_path(key, ".crt")).await?;
        atomic_file::remove_if_present(&self.secret_path(key, ".key")).await?;
        atomic_file::remove_if_present(&self.secret_path(key, ".jwk")).await?;
        if affected.is_empty() && affected_mergeables.is_empty() {
            warn!(%key, "deleted secret had no referencing ingress to re-render");
            return Ok(());
        }
        self.update_endpoints(affected, affected_mergeables).await
    }

    /// Fixed-name special secrets (§6: default-server / wildcard TLS) are
    /// preserved on disk even when deleted from the API (§4.D syncSecret).
    pub async fn add_or_update_fixed_secret(&self, file_name: &str, cert: &[u8], key: &[u8]) -> Result<(), Error> {
        atomic_file::write_atomic(&self.secrets_dir.join(format!("{file_name}.crt")), cert, 0o600).await?;
        atomic_file::write_atomic(&self.secrets_dir.join(format!("{file_name}.key")), key, 0o600).await?;
        self.reload().await
    }

    /// Current set of managed file stems, for §8 P1 (filesystem
    /// convergence) checks and tests.
    pub async fn managed_keys(&self) -> Vec<Key> {
        self.state.lock().await.configs.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::TemplatePaths;

    async fn test_configurator() -> (Configurator, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(dir.path().join("conf.d")).await.unwrap();
        tokio::fs::create_dir_all(dir.path().join("secrets")).await.unwrap();

        let tmpl_dir = dir.path().join("templates");
        tokio::fs::create_dir_all(&tmpl_dir).await.unwrap();
        for (name, contents) in [
            ("main.tmpl", "worker_processes {{global.worker_processes}};"),
            ("ingress.tmpl", "# {{name}}\n{{#each servers}}server {{server_name}}{{/each}}"),
            ("version.tmpl", "{{version}}"),
        ] {
            tokio::fs::write(tmpl_dir.join(name), contents).await.unwrap();
        }
        let paths = TemplatePaths {
            main: tmpl_dir.join("main.tmpl"),
            ingress: tmpl_dir.join("ingress.tmpl"),
            ingress_plus: tmpl_dir.join("ingress.tmpl"),
            main_plus: tmpl_dir.join("main.tmpl"),
            version: tmpl_dir.join("version.tmpl"),
        };
        let template = Arc::new(TemplateEngine::bootstrap(&paths).unwrap());
        let proxy = Arc::new(ProxyDriver::new(
            "/bin/true",
            dir.path().join("verify.sock"),
            dir.path().join("config-version.conf"),
        ));
        (Configurator::new(dir.path().to_path_buf(), template, proxy), dir)
    }

    fn sample_ex() -> IngressEx {
        IngressEx {
            key: "default/cafe".parse().unwrap(),
            source: Default::default(),
            rules: vec![crate::model::ResolvedRule {
                host: "cafe.example.com".into(),
                path: "/coffee".into(),
                backend: crate::model::BackendRef {
                    service_name: "coffee".into(),
                    service_port: crate::model::ServicePort::Number(80),
                },
                endpoints: vec!["10.0.0.1:80".into()],
            }],
            default_backend: None,
            tls_secrets: Default::default(),
            jwk_secret: None,
            health_checks: Default::default(),
            external_names: Default::default(),
        }
    }

    #[tokio::test]
    async fn add_or_update_writes_file_and_tracks_key() {
        let (cfg, dir) = test_configurator().await;
        let ex = sample_ex();
        // reload() will try to poll a nonexistent verify socket and time
        // out; we only assert on the file + map side effects here.
        let _ = cfg.add_or_update(&ex).await;
        let path = dir.path().join("conf.d/default-cafe.conf");
        assert!(path.exists());
        assert!(cfg.managed_keys().await.contains(&ex.key));
    }

    #[tokio::test]
    async fn delete_ingress_removes_file() {
        let (cfg, dir) = test_configurator().await;
        let ex = sample_ex();
        let _ = cfg.add_or_update(&ex).await;
        let _ = cfg.delete_ingress(&ex.key).await;
        let path = dir.path().join("conf.d/default-cafe.conf");
        assert!(!path.exists());
        assert!(!cfg.managed_keys().await.contains(&ex.key));
    }
}
