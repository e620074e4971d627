//! Writing images to disk
//!
//! Files are written to `<name>.part` and renamed into place, so a reader
//! never sees a half-written image. A target that already holds the same
//! bytes is left untouched.

use crate::download::DownloadError;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// What happened to the target file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Written,

    /// The file already existed with identical content
    Unchanged,
}

/// Hex-encoded SHA-256 of `bytes`
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}

/// Stores `bytes` at `path` unless identical content is already there
///
/// Cancellation observed around the write removes the partial file.
pub async fn persist_image(
    path: &Path,
    bytes: &[u8],
    cancel: &CancellationToken,
) -> Result<PersistOutcome, DownloadError> {
    if let Ok(existing) = tokio::fs::read(path).await {
        if sha256_hex(&existing) == sha256_hex(bytes) {
            tracing::debug!("{} already stored with identical content", path.display());
            return Ok(PersistOutcome::Unchanged);
        }
        tracing::debug!("Replacing {} with new content", path.display());
    }

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    if cancel.is_cancelled() {
        return Err(DownloadError::Cancelled);
    }

    let part = part_path(path);
    if let Err(e) = tokio::fs::write(&part, bytes).await {
        let _ = tokio::fs::remove_file(&part).await;
        return Err(e.into());
    }

    if cancel.is_cancelled() {
        let _ = tokio::fs::remove_file(&part).await;
        return Err(DownloadError::Cancelled);
    }

    if let Err(e) = tokio::fs::rename(&part, path).await {
        let _ = tokio::fs::remove_file(&part).await;
        return Err(e.into());
    }

    Ok(PersistOutcome::Written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_part_path() {
        assert_eq!(
            part_path(Path::new("/out/danbooru/42.png")),
            PathBuf::from("/out/danbooru/42.png.part")
        );
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_write_then_unchanged() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("site").join("1.png");
        let cancel = CancellationToken::new();

        let first = persist_image(&path, b"image-bytes", &cancel).await.unwrap();
        assert_eq!(first, PersistOutcome::Written);
        assert_eq!(std::fs::read(&path).unwrap(), b"image-bytes");
        assert!(!part_path(&path).exists());

        let second = persist_image(&path, b"image-bytes", &cancel).await.unwrap();
        assert_eq!(second, PersistOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_different_content_replaced() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("2.jpg");
        let cancel = CancellationToken::new();

        persist_image(&path, b"old", &cancel).await.unwrap();
        let outcome = persist_image(&path, b"new", &cancel).await.unwrap();
        assert_eq!(outcome, PersistOutcome::Written);
        assert_eq!(std::fs::read(&path).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_cancelled_write_leaves_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("3.png");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = persist_image(&path, b"bytes", &cancel).await;
        assert!(matches!(result, Err(DownloadError::Cancelled)));
        assert!(!path.exists());
        assert!(!part_path(&path).exists());
    }
}
