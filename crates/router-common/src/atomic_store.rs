//! Atomic single-file JSON persistence: write-temp, fsync, rename, keep one backup.
//!
//! Used by `ModelStats` persistence and the two pattern-catalog files. A crash
//! mid-write must never leave the target file unparsable (invariant 7): the new
//! content always lands in a sibling temp file first, is fsync'd, and only then
//! renamed over the target, which is atomic on the same filesystem. The previous
//! good file is kept once, as `<path>.bak`, so a corrupt-looking write can be
//! manually rolled back.

use crate::error::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Write `value` to `path` as pretty JSON, atomically.
///
/// A per-path mutex is the caller's responsibility (see `router-common::retry`
/// callers and each component's own `_write_pending` guard) — this function does
/// not serialise concurrent writers to the same path itself.
pub async fn write_json_atomic<T: Serialize + Sync>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let path = path.as_ref();
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes).await
}

/// Read and deserialize `path` as JSON. Returns `Ok(None)` if the file does not exist.
pub async fn read_json_opt<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Option<T>> {
    let path = path.as_ref();
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::Persistence(format!("reading {}: {e}", path.display()))),
    }
}

/// Write raw bytes to `path` atomically, keeping one backup of the previous contents.
pub async fn write_atomic(path: impl AsRef<Path>, bytes: &[u8]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::Persistence(format!("creating {}: {e}", parent.display())))?;
    }

    let tmp_path = tmp_path_for(path);
    {
        let mut file = tokio::fs::File::create(&tmp_path)
            .await
            .map_err(|e| Error::Persistence(format!("creating {}: {e}", tmp_path.display())))?;
        file.write_all(bytes)
            .await
            .map_err(|e| Error::Persistence(format!("writing {}: {e}", tmp_path.display())))?;
        file.sync_all()
            .await
            .map_err(|e| Error::Persistence(format!("fsync {}: {e}", tmp_path.display())))?;
    }

    if tokio::fs::metadata(path).await.is_ok() {
        let backup_path = backup_path_for(path);
        tokio::fs::copy(path, &backup_path)
            .await
            .map_err(|e| Error::Persistence(format!("backing up {}: {e}", path.display())))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Persistence(format!("renaming {} -> {}: {e}", tmp_path.display(), path.display())))?;

    Ok(())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

fn backup_path_for(path: &Path) -> PathBuf {
    let mut bak = path.as_os_str().to_owned();
    bak.push(".bak");
    PathBuf::from(bak)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        count: u32,
    }

    #[tokio::test]
    async fn round_trip_persists_and_reloads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stats.json");

        write_json_atomic(&path, &Sample { count: 1 }).await.unwrap();
        let loaded: Option<Sample> = read_json_opt(&path).await.unwrap();
        assert_eq!(loaded, Some(Sample { count: 1 }));
    }

    #[tokio::test]
    async fn second_write_keeps_one_backup_of_prior_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stats.json");

        write_json_atomic(&path, &Sample { count: 1 }).await.unwrap();
        write_json_atomic(&path, &Sample { count: 2 }).await.unwrap();

        let current: Sample = serde_json::from_slice(&tokio::fs::read(&path).await.unwrap()).unwrap();
        assert_eq!(current, Sample { count: 2 });

        let backup: Sample =
            serde_json::from_slice(&tokio::fs::read(backup_path_for(&path)).await.unwrap()).unwrap();
        assert_eq!(backup, Sample { count: 1 });
    }

    #[tokio::test]
    async fn missing_file_reads_as_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let loaded: Option<Sample> = read_json_opt(&path).await.unwrap();
        assert_eq!(loaded, None);
    }
}
