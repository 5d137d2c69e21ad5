//! §4.F Proxy driver — starts/stops the proxy subprocess, drives reloads
//! and polls the verify socket (§6) until a reload has observably taken
//! effect (§9 "reload-version coupling").

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::process::{Child, Command};
use tracing::{info, warn};

use crate::model::ConfigVersion;

const VERIFY_RETRY_COUNT: usize = 160;
const VERIFY_RETRY_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("failed to start proxy: {0}")]
    Start(#[source] std::io::Error),
    #[error("failed to signal proxy ({signal}): {source}")]
    Signal {
        signal: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("reload never converged to version {expected} after {tries} tries")]
    VerifyTimeout { expected: u64, tries: usize },
    #[error("verify socket protocol error: {0}")]
    Protocol(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct ProxyDriver {
    binary: PathBuf,
    verify_socket: PathBuf,
    version_file: PathBuf,
    version: AtomicU64,
    child: Mutex<Option<Child>>,
}

impl ProxyDriver {
    pub fn new(binary: impl Into<PathBuf>, verify_socket: impl Into<PathBuf>, version_file: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            verify_socket: verify_socket.into(),
            version_file: version_file.into(),
            version: AtomicU64::new(ConfigVersion::INITIAL.0),
            child: Mutex::new(None),
        }
    }

    pub fn current_version(&self) -> ConfigVersion {
        ConfigVersion(self.version.load(Ordering::SeqCst))
    }

    /// Starts the proxy subprocess once at bootstrap. Failure to start, or
    /// to reach the expected version afterwards, is fatal (§6).
    pub async fn start(&self) -> Result<(), ProxyError> {
        let mut cmd = Command::new(&self.binary);
        cmd.stdout(std::process::Stdio::inherit());
        cmd.stderr(std::process::Stdio::inherit());
        let child = cmd.spawn().map_err(ProxyError::Start)?;
        *self.child.lock().expect("proxy child lock poisoned") = Some(child);
        info!(binary = %self.binary.display(), "proxy started");
        Ok(())
    }

    /// §4.F Reload: increment `configVersion`, materialise the version
    /// config file atomically, signal the proxy, then block the calling
    /// (single) worker thread until the verify socket reports the new
    /// version (§5 "intentional": no event is processed mid-reload).
    pub async fn reload(&self, version_config_bytes: &[u8]) -> Result<ConfigVersion, ProxyError> {
        let next = ConfigVersion(self.version.fetch_add(1, Ordering::SeqCst) + 1);

        crate::atomic_file::write_atomic(&self.version_file, version_config_bytes, 0o644).await?;

        self.signal("reload").await?;
        self.verify(next).await?;
        Ok(next)
    }

    pub async fn quit(&self) -> Result<(), ProxyError> {
        self.signal("quit").await
    }

    async fn signal(&self, action: &'static str) -> Result<(), ProxyError> {
        let status = Command::new(&self.binary)
            .arg("-s")
            .arg(action)
            .status()
            .await
            .map_err(|source| ProxyError::Signal { signal: action, source })?;
        if !status.success() {
            warn!(action, ?status, "proxy signal exited non-zero");
        }
        Ok(())
    }

    /// Polls the verify socket until it reports `expected`, bounded by
    /// `VERIFY_RETRY_COUNT` x `VERIFY_RETRY_INTERVAL` (≈160 x 25ms, §4.F).
    async fn verify(&self, expected: ConfigVersion) -> Result<(), ProxyError> {
        for attempt in 0..VERIFY_RETRY_COUNT {
            match self.fetch_version().await {
                Ok(reported) if reported == expected.0 => return Ok(()),
                Ok(_) | Err(_) => {
                    tokio::time::sleep(VERIFY_RETRY_INTERVAL).await;
                    let _ = attempt;
                }
            }
        }
        Err(ProxyError::VerifyTimeout {
            expected: expected.0,
            tries: VERIFY_RETRY_COUNT,
        })
    }

    /// `GET /configVersion` over the proxy's unix-domain verify socket
    /// (§6). Hand-rolled HTTP/1.0 framing: this is a single narrow,
    /// in-process call, not worth pulling in a full HTTP client stack for.
    async fn fetch_version(&self) -> Result<u64, ProxyError> {
        let response = http_get_over_uds(&self.verify_socket, "/configVersion").await?;
        response
            .trim()
            .parse::<u64>()
            .map_err(|_| ProxyError::Protocol(format!("non-integer body: {response:?}")))
    }
}

async fn http_get_over_uds(socket: &Path, path: &str) -> Result<String, ProxyError> {
    let mut stream = UnixStream::connect(socket).await?;
    let request = format!(
        "GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await?;

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    let text = String::from_utf8_lossy(&buf);

    let (head, body) = text
        .split_once("\r\n\r\n")
        .ok_or_else(|| ProxyError::Protocol("missing header/body separator".into()))?;

    let status_line = head
        .lines()
        .next()
        .ok_or_else(|| ProxyError::Protocol("empty response".into()))?;
    if !status_line.contains(" 200 ") {
        return Err(ProxyError::Protocol(format!("unexpected status: {status_line}")));
    }

    Ok(body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reload_requires_reachable_socket_and_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let driver = ProxyDriver::new(
            "/bin/true",
            dir.path().join("missing.sock"),
            dir.path().join("config-version.conf"),
        );
        let err = driver.verify(ConfigVersion(1)).await.unwrap_err();
        assert!(matches!(err, ProxyError::VerifyTimeout { .. }));
    }

    #[test]
    fn config_version_increments_from_initial() {
        let driver = ProxyDriver::new("/bin/true", "/tmp/x.sock", "/tmp/x.conf");
        assert_eq!(driver.current_version(), ConfigVersion::INITIAL);
    }
}
