use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use multiview_proto::ViewState;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("view store io error: {0}")]
    Io(#[from] io::Error),
    #[error("view store codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Save-on-change persistence for the controlled role's view.
#[async_trait]
pub trait ViewStore: Send + Sync {
    async fn load(&self) -> Result<Option<ViewState>, StoreError>;

    async fn save(&self, state: &ViewState) -> Result<(), StoreError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStore;

#[async_trait]
impl ViewStore for NoopStore {
    async fn load(&self) -> Result<Option<ViewState>, StoreError> {
        Ok(None)
    }

    async fn save(&self, _state: &ViewState) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Pretty-printed JSON file, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ViewStore for JsonFileStore {
    async fn load(&self) -> Result<Option<ViewState>, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn save(&self, state: &ViewState) -> Result<(), StoreError> {
        let encoded = serde_json::to_vec_pretty(state)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let staging = self.path.with_extension("json.tmp");
        tokio::fs::write(&staging, encoded).await?;
        tokio::fs::rename(&staging, &self.path).await?;
        debug!(path = %self.path.display(), "view saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use multiview_proto::FeedRef;

    fn scratch_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("multiview-store-{}", uuid::Uuid::new_v4().simple()))
            .join("view.json")
    }

    #[tokio::test]
    async fn missing_file_loads_nothing() {
        let store = JsonFileStore::new(scratch_path());
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn saved_view_loads_back() {
        let path = scratch_path();
        let store = JsonFileStore::new(&path);
        let mut state = ViewState::new();
        state
            .set_slot(4, Some(FeedRef::new("a", "A", "https://embed.example/a")))
            .unwrap();
        state.set_gap(12).unwrap();

        store.save(&state).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(state));

        if let Some(dir) = path.parent() {
            let _ = tokio::fs::remove_dir_all(dir).await;
        }
    }
}
