//! File-backed state store
//!
//! Crash recovery for the safety layer. The whole durable state (policy,
//! breaker, cooldowns, journal) lives in one JSON document under the
//! data directory; a missing or empty file reads as a fresh start.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs;
use tracing::{debug, info};

use crate::ports::state::{PersistedState, StateError, StatePort};

/// Default state file name
pub const STATE_FILE: &str = "gexbot_state.json";

/// JSON state store rooted at a single file path.
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the default file name inside `data_dir`.
    pub fn in_dir(data_dir: impl AsRef<Path>) -> Self {
        Self::new(data_dir.as_ref().join(STATE_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_json(path: &Path, state: &PersistedState) -> Result<(), StateError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(state)?;
        fs::write(path, content).await?;
        Ok(())
    }
}

#[async_trait]
impl StatePort for FileStateStore {
    async fn load(&self) -> Result<Option<PersistedState>, StateError> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(None);
        }

        let state: PersistedState = serde_json::from_str(&content)?;
        info!(
            path = %self.path.display(),
            updated_at = %state.updated_at,
            "state loaded"
        );
        Ok(Some(state))
    }

    async fn save(&self, state: &PersistedState) -> Result<(), StateError> {
        Self::write_json(&self.path, state).await?;
        debug!(path = %self.path.display(), "state saved");
        Ok(())
    }

    async fn write_snapshot(
        &self,
        label: &str,
        state: &PersistedState,
    ) -> Result<String, StateError> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let path = dir.join(format!("state_{label}_{stamp}.json"));
        Self::write_json(&path, state).await?;
        info!(path = %path.display(), label, "state snapshot written");
        Ok(path.display().to_string())
    }
}
