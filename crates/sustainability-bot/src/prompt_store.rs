//! The system prompt template, kept in a small JSON file (`{"prompt": "..."}`).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::error::{ChatError, Result};

#[derive(Debug, Serialize, Deserialize)]
struct PromptFile {
    prompt: String,
}

pub struct PromptStore {
    path: PathBuf,
    // Serializes writers; readers go to disk so external edits are picked up.
    lock: RwLock<()>,
}

impl PromptStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: RwLock::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` when the file does not exist or holds an empty prompt.
    pub async fn load(&self) -> Result<Option<String>> {
        let _read = self.lock.read().await;
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ChatError::Storage(format!("reading prompt file: {}", e))),
        };
        let file: PromptFile = serde_json::from_str(&raw)?;
        Ok(Some(file.prompt).filter(|p| !p.trim().is_empty()))
    }

    /// Replace the prompt. Written to a sibling file first, then renamed over.
    pub async fn save(&self, prompt: &str) -> Result<()> {
        if prompt.trim().is_empty() {
            return Err(ChatError::Validation("prompt must not be empty".to_string()));
        }
        let _write = self.lock.write().await;

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| ChatError::Storage(format!("creating prompt directory: {}", e)))?;
        }
        let body = serde_json::to_string_pretty(&PromptFile { prompt: prompt.to_string() })?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| ChatError::Storage(format!("writing prompt file: {}", e)))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| ChatError::Storage(format!("replacing prompt file: {}", e)))?;

        info!(path = %self.path.display(), chars = prompt.chars().count(), "prompt updated");
        Ok(())
    }
}
