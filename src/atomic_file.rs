//! File atomicity discipline shared by the configurator and the proxy
//! driver (§4.E, §4.F, §5): `create(tmp)` → `chmod` → `write` → `close` →
//! `rename(tmp, final)`, so no consumer ever observes a partial file
//! (§8 P2).

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use tokio::fs;
use tokio::io::AsyncWriteExt;

pub async fn write_atomic(path: &Path, bytes: &[u8], mode: u32) -> std::io::Result<()> {
    let tmp_path = tmp_path_for(path);
    {
        let mut file = fs::File::create(&tmp_path).await?;
        file.set_permissions(std::fs::Permissions::from_mode(mode))
            .await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
    }
    fs::rename(&tmp_path, path).await?;
    Ok(())
}

pub async fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn tmp_path_for(path: &Path) -> std::path::PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_atomic_creates_final_file_with_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.conf");

        write_atomic(&path, b"hello", 0o600).await.unwrap();

        let contents = tokio::fs::read(&path).await.unwrap();
        assert_eq!(contents, b"hello");
        let meta = tokio::fs::metadata(&path).await.unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);

        let tmp = tmp_path_for(&path);
        assert!(!tmp.exists(), "temp file must not survive a successful write");
    }
}
