//! §4.I Template engine — external collaborator interface.
//!
//! The source spec treats the actual rendering engine as outside the
//! reconciliation core: consumed only via a `render(kind, data) -> bytes`
//! contract (§1, §4.I). What belongs here is that contract plus the
//! bootstrap load / hot-swap behaviour the configurator depends on — not a
//! templating language of our own. `handlebars` fills the engine role,
//! registered with one template per `TemplateKind`, loaded from disk at
//! bootstrap (§4.I "Template text is loaded from disk at bootstrap") and
//! re-registerable at runtime for the hot-swap path (§4.I, open question c
//! in §9 — see DESIGN.md for the chosen behaviour).

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use handlebars::Handlebars;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateKind {
    Main,
    Ingress,
    IngressPlus,
    MainPlus,
    Version,
}

impl TemplateKind {
    fn name(self) -> &'static str {
        match self {
            TemplateKind::Main => "main",
            TemplateKind::Ingress => "ingress",
            TemplateKind::IngressPlus => "ingress-plus",
            TemplateKind::MainPlus => "main-plus",
            TemplateKind::Version => "version",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("template {0} not registered")]
    NotRegistered(&'static str),
    #[error("handlebars render error: {0}")]
    Handlebars(#[from] handlebars::RenderError),
    #[error("handlebars template error: {0}")]
    Template(#[from] handlebars::TemplateError),
    #[error("io error loading template: {0}")]
    Io(#[from] std::io::Error),
}

/// Paths to the on-disk template files, one per kind, read once at
/// bootstrap (§4.I).
pub struct TemplatePaths {
    pub main: PathBuf,
    pub ingress: PathBuf,
    pub ingress_plus: PathBuf,
    pub main_plus: PathBuf,
    pub version: PathBuf,
}

pub struct TemplateEngine {
    handlebars: RwLock<Handlebars<'static>>,
}

impl TemplateEngine {
    /// Bootstrap load: a failure here is fatal per §6 ("template parse
    /// failure at bootstrap" terminates the process).
    pub fn bootstrap(paths: &TemplatePaths) -> Result<Self, RenderError> {
        let mut hb = Handlebars::new();
        hb.set_strict_mode(true);
        register(&mut hb, TemplateKind::Main, &paths.main)?;
        register(&mut hb, TemplateKind::Ingress, &paths.ingress)?;
        register(&mut hb, TemplateKind::IngressPlus, &paths.ingress_plus)?;
        register(&mut hb, TemplateKind::MainPlus, &paths.main_plus)?;
        register(&mut hb, TemplateKind::Version, &paths.version)?;
        Ok(Self {
            handlebars: RwLock::new(hb),
        })
    }

    /// Re-registers one template from a new source, the hot-swap path
    /// driven by the global config-map's custom-template fields.
    pub fn reload(&self, kind: TemplateKind, source: &str) -> Result<(), RenderError> {
        let mut hb = self.handlebars.write().expect("template lock poisoned");
        hb.register_template_string(kind.name(), source)?;
        Ok(())
    }

    /// Restores a template to what was loaded from disk at bootstrap —
    /// taken when a custom-template config-map field is cleared after
    /// being set (see DESIGN.md for why we revert rather than keep-last).
    pub fn revert_to_bootstrap(&self, kind: TemplateKind, path: &Path) -> Result<(), RenderError> {
        let mut hb = self.handlebars.write().expect("template lock poisoned");
        hb.register_template_file(kind.name(), path)?;
        Ok(())
    }

    pub fn render<T: Serialize>(&self, kind: TemplateKind, data: &T) -> Result<Vec<u8>, RenderError> {
        let hb = self.handlebars.read().expect("template lock poisoned");
        if !hb.has_template(kind.name()) {
            return Err(RenderError::NotRegistered(kind.name()));
        }
        let rendered = hb.render(kind.name(), data)?;
        Ok(rendered.into_bytes())
    }
}

fn register(hb: &mut Handlebars<'static>, kind: TemplateKind, path: &Path) -> Result<(), RenderError> {
    hb.register_template_file(kind.name(), path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_template(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn renders_registered_template() {
        let dir = tempfile::tempdir().unwrap();
        let main = write_template(&dir, "main.tmpl", "worker_processes {{worker_processes}};");
        let ingress = write_template(&dir, "ingress.tmpl", "server { {{name}} }");
        let paths = TemplatePaths {
            main,
            ingress: ingress.clone(),
            ingress_plus: ingress.clone(),
            main_plus: ingress.clone(),
            version: ingress,
        };
        let engine = TemplateEngine::bootstrap(&paths).unwrap();
        let out = engine
            .render(TemplateKind::Main, &serde_json::json!({"worker_processes": "4"}))
            .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "worker_processes 4;");
    }

    #[test]
    fn hot_swap_then_revert() {
        let dir = tempfile::tempdir().unwrap();
        let ingress = write_template(&dir, "ingress.tmpl", "bootstrap:{{name}}");
        let paths = TemplatePaths {
            main: ingress.clone(),
            ingress: ingress.clone(),
            ingress_plus: ingress.clone(),
            main_plus: ingress.clone(),
            version: ingress.clone(),
        };
        let engine = TemplateEngine::bootstrap(&paths).unwrap();
        engine.reload(TemplateKind::Ingress, "custom:{{name}}").unwrap();
        let out = engine
            .render(TemplateKind::Ingress, &serde_json::json!({"name": "cafe"}))
            .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "custom:cafe");

        engine.revert_to_bootstrap(TemplateKind::Ingress, &ingress).unwrap();
        let out = engine
            .render(TemplateKind::Ingress, &serde_json::json!({"name": "cafe"}))
            .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "bootstrap:cafe");
    }
}
