use std::io::ErrorKind;
use std::path::PathBuf;

use futures::future::{BoxFuture, FutureExt};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::service::DrawState;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored draw state is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Durable home of the single draw record.
///
/// The record is always written whole; `load` returns `None` when nothing
/// has been stored yet.
pub trait StateStore: Send + Sync {
    fn load(&self) -> BoxFuture<'_, Result<Option<DrawState>, StorageError>>;

    fn save<'a>(&'a self, state: &'a DrawState) -> BoxFuture<'a, Result<(), StorageError>>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    record: RwLock<Option<DrawState>>,
}

impl MemoryStore {
    pub fn with_state(state: DrawState) -> Self {
        Self {
            record: RwLock::new(Some(state)),
        }
    }
}

impl StateStore for MemoryStore {
    fn load(&self) -> BoxFuture<'_, Result<Option<DrawState>, StorageError>> {
        async move { Ok(self.record.read().await.clone()) }.boxed()
    }

    fn save<'a>(&'a self, state: &'a DrawState) -> BoxFuture<'a, Result<(), StorageError>> {
        async move {
            *self.record.write().await = Some(state.clone());
            Ok(())
        }
        .boxed()
    }
}

/// Keeps the record as pretty-printed JSON in one file. Writes go to a
/// sibling temp file first and are renamed into place.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    async fn read_record(&self) -> Result<Option<DrawState>, StorageError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    async fn write_record(&self, state: &DrawState) -> Result<(), StorageError> {
        let json = serde_json::to_vec_pretty(state)?;
        let staging = self.staging_path();
        tokio::fs::write(&staging, json).await?;
        tokio::fs::rename(&staging, &self.path).await?;
        Ok(())
    }
}

impl StateStore for JsonFileStore {
    fn load(&self) -> BoxFuture<'_, Result<Option<DrawState>, StorageError>> {
        self.read_record().boxed()
    }

    fn save<'a>(&'a self, state: &'a DrawState) -> BoxFuture<'a, Result<(), StorageError>> {
        self.write_record(state).boxed()
    }
}
