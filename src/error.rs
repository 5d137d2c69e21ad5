use crate::key::Key;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("kube api error: {0}")]
    Kube(#[from] kube::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{key}: rejected: {reason}")]
    Rejected { key: Key, reason: String },

    #[error("template render failed: {0}")]
    Render(#[from] crate::template::RenderError),

    #[error("proxy driver: {0}")]
    Proxy(#[from] crate::proxy::ProxyError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
