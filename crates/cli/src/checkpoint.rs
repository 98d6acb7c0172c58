// Run state persisted as a JSON file between sessions

use anyhow::{Context, Result};
use stagegraph_core::{CheckpointSink, RunState};
use std::path::{Path, PathBuf};

/// Checkpoint sink that rewrites one JSON file after every step.
///
/// Writes go to a sibling temp file and are renamed into place so a crash
/// mid-write leaves the previous checkpoint intact.
pub struct JsonFileCheckpoint {
    path: PathBuf,
}

impl JsonFileCheckpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read a run state written by a previous session
    pub async fn load(path: &Path) -> Result<RunState> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read checkpoint {}", path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse checkpoint {}", path.display()))
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait::async_trait]
impl CheckpointSink for JsonFileCheckpoint {
    async fn save(&self, state: &RunState) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let json = serde_json::to_vec_pretty(state)?;
        let tmp = self.temp_path();
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to move checkpoint into {}", self.path.display()))?;

        tracing::debug!(
            run_id = %state.run_id,
            path = %self.path.display(),
            visited = state.completed_nodes.len() + state.skipped_nodes.len(),
            "Checkpoint saved"
        );
        Ok(())
    }
}
