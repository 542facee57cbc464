use crate::domain::ports::ScriptStore;
use crate::utils::error::{EtlError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::Duration;

const SCRIPT_PREFIX: &str = "generated_etl_";
const SCRIPT_EXTENSION: &str = ".py";

/// Keeps rendered scripts as `generated_etl_<uuid>.py` files and deletes them
/// once they are older than the retention period.
#[derive(Debug, Clone)]
pub struct TempScriptStore {
    base_path: PathBuf,
    retention: Duration,
}

impl TempScriptStore {
    pub fn new(base_path: impl Into<PathBuf>, retention: Duration) -> Self {
        Self {
            base_path: base_path.into(),
            retention,
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn is_script_file(name: &str) -> bool {
        name.starts_with(SCRIPT_PREFIX) && name.ends_with(SCRIPT_EXTENSION)
    }
}

#[async_trait]
impl ScriptStore for TempScriptStore {
    async fn persist(&self, code: &str) -> Result<Option<PathBuf>> {
        tokio::fs::create_dir_all(&self.base_path).await?;

        let file_name = format!(
            "{}{}{}",
            SCRIPT_PREFIX,
            uuid::Uuid::new_v4().simple(),
            SCRIPT_EXTENSION
        );
        let full_path = self.base_path.join(file_name);
        tokio::fs::write(&full_path, code).await?;

        Ok(Some(full_path))
    }

    async fn sweep(&self) -> Result<usize> {
        let retention = chrono::Duration::from_std(self.retention).map_err(|e| EtlError::Internal {
            message: format!("retention period out of range: {}", e),
        })?;
        let now = Utc::now();

        let mut entries = match tokio::fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            // 目錄還沒建立代表沒有任何腳本
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !Self::is_script_file(name) {
                continue;
            }

            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            if !metadata.is_file() {
                continue;
            }
            let modified: DateTime<Utc> = metadata.modified()?.into();
            if now.signed_duration_since(modified) < retention {
                continue;
            }

            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                // Another sweeper got there first
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        if removed > 0 {
            tracing::info!(
                "🧹 Removed {} expired scripts from {}",
                removed,
                self.base_path.display()
            );
        }
        Ok(removed)
    }
}

/// Used when `output.persist_scripts` is off. Nothing is written.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledScriptStore;

#[async_trait]
impl ScriptStore for DisabledScriptStore {
    async fn persist(&self, _code: &str) -> Result<Option<PathBuf>> {
        Ok(None)
    }

    async fn sweep(&self) -> Result<usize> {
        Ok(0)
    }
}
