//! Result store - persists submitted results as `result_<name>` files.

use std::path::PathBuf;

use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use lanrun_core::unit::result_file_name;
use lanrun_core::{validate_unit_name, CoreError, ResultUnit};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Result store unavailable: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    InvalidName(#[from] CoreError),
}

/// Directory of persisted results, keyed by work-unit name.
pub struct ResultStore {
    dir: PathBuf,
}

impl ResultStore {
    /// Open (creating if needed) the results directory.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        info!(dir = %dir.display(), "Result store opened");
        Ok(Self { dir })
    }

    /// Persist a result, replacing any earlier result for the same unit.
    ///
    /// The bytes land in a unique dot-file first and are renamed over the
    /// final name, so concurrent submissions for one unit leave exactly one
    /// complete file behind (last writer wins).
    pub async fn save(&self, result: &ResultUnit) -> Result<PathBuf, StoreError> {
        validate_unit_name(&result.name)?;

        let path = self.dir.join(result.file_name());
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", result.file_name(), Uuid::new_v4()));

        fs::write(&tmp, &result.payload).await?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!(
            unit = %result.name,
            bytes = result.payload.len(),
            path = %path.display(),
            "Result stored"
        );
        Ok(path)
    }

    /// Read back the result stored for the unit called `name`.
    pub async fn load(&self, name: &str) -> Result<Option<ResultUnit>, StoreError> {
        validate_unit_name(name)?;

        match fs::read(self.dir.join(result_file_name(name))).await {
            Ok(payload) => Ok(Some(ResultUnit::new(name, payload))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanrun_core::unit::MAX_UNIT_NAME_LEN;

    #[tokio::test]
    async fn test_save_uses_result_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path()).await.unwrap();

        let path = store
            .save(&ResultUnit::new("a.zip", b"out".to_vec()))
            .await
            .unwrap();

        assert_eq!(path, dir.path().join("result_a.zip"));
        assert_eq!(std::fs::read(path).unwrap(), b"out");
    }

    #[tokio::test]
    async fn test_second_save_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path()).await.unwrap();

        store.save(&ResultUnit::new("a.zip", b"first".to_vec())).await.unwrap();
        store.save(&ResultUnit::new("a.zip", b"second".to_vec())).await.unwrap();

        let loaded = store.load("a.zip").await.unwrap().unwrap();
        assert_eq!(loaded.payload, b"second");

        // No temporary files left behind.
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path()).await.unwrap();
        assert!(store.load("nope.zip").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_traversal_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path()).await.unwrap();

        let result = store.save(&ResultUnit::new("../../x", vec![])).await;
        assert!(matches!(result, Err(StoreError::InvalidName(_))));
    }

    #[tokio::test]
    async fn test_longest_valid_name_fits_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path()).await.unwrap();
        let name = format!("{}.zip", "n".repeat(MAX_UNIT_NAME_LEN - 4));

        store.save(&ResultUnit::new(name.clone(), b"out".to_vec())).await.unwrap();
        assert!(store.load(&name).await.unwrap().is_some());

        let too_long = format!("{}.zip", "n".repeat(216));
        let result = store.save(&ResultUnit::new(too_long, vec![])).await;
        assert!(matches!(result, Err(StoreError::InvalidName(_))));
    }
}
