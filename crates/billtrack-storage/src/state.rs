use std::path::{Path, PathBuf};

use anyhow::Context;
use billtrack_core::{DestinationSnapshot, SyncState};
use serde::Serialize;
use tokio::fs;
use tracing::warn;
use uuid::Uuid;

pub const SYNC_STATE_FILE: &str = "bill_metadata.json";
pub const DESTINATION_SNAPSHOT_FILE: &str = "pinecone_metadata.json";

/// Key-value directory holding the sync state and the last destination snapshot.
#[derive(Debug, Clone)]
pub struct StateStore {
    root: PathBuf,
}

impl StateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sync_state_path(&self) -> PathBuf {
        self.root.join(SYNC_STATE_FILE)
    }

    /// Previous sync state. A missing or malformed file reads as `None`.
    pub async fn load_sync_state(&self) -> Option<SyncState> {
        let path = self.sync_state_path();
        let text = match fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "error reading previous sync state");
                return None;
            }
        };
        match serde_json::from_str(&text) {
            Ok(state) => Some(state),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "error parsing previous sync state");
                None
            }
        }
    }

    pub async fn save_sync_state(&self, state: &SyncState) -> anyhow::Result<()> {
        self.write_json(&self.sync_state_path(), state).await
    }

    pub async fn save_destination_snapshot(
        &self,
        snapshot: &DestinationSnapshot,
    ) -> anyhow::Result<PathBuf> {
        let path = self.root.join(DESTINATION_SNAPSHOT_FILE);
        self.write_json(&path, snapshot).await?;
        Ok(path)
    }

    async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> anyhow::Result<()> {
        fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("creating state directory {}", self.root.display()))?;
        let bytes = serde_json::to_vec_pretty(value).context("serializing state")?;
        let temp_path = self.root.join(format!(".{}.tmp", Uuid::new_v4()));
        fs::write(&temp_path, bytes)
            .await
            .with_context(|| format!("writing temp state file {}", temp_path.display()))?;
        if let Err(err) = fs::rename(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "atomically renaming temp state {} -> {}",
                    temp_path.display(),
                    path.display()
                )
            });
        }
        Ok(())
    }
}
