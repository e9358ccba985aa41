//! JSON snapshot files backing the in-memory metadata stores.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::StorageResult;

/// Loads a snapshot; a missing file is an empty store.
pub(crate) async fn load<T: DeserializeOwned>(path: &Path) -> StorageResult<Option<T>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Writes a snapshot next to `path` and renames it into place.
pub(crate) async fn save<T: Serialize>(path: &Path, value: &T) -> StorageResult<()> {
    let data = serde_json::to_vec(value)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let tmp = path.with_extension("json.tmp");
    let mut file = fs::File::create(&tmp).await?;
    file.write_all(&data).await?;
    file.flush().await?;
    file.sync_data().await?;
    drop(file);

    fs::rename(&tmp, path).await?;
    Ok(())
}
