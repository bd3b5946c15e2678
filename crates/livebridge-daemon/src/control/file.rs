//! Control document kept in a local file

use super::ControlClient;
use livebridge_core::control::{ControlError, ControlDocument, DocumentFormat};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;
use tracing::{debug, info};
use uuid::Uuid;

/// Reads and writes a YAML, JSON or TOML file. A change is a modification
/// time different from the one seen at the last load.
#[derive(Debug, Default)]
pub struct FileControl {
    loaded_mtime: Mutex<Option<SystemTime>>,
}

impl FileControl {
    pub fn new() -> Self {
        Self::default()
    }

    fn io_error(path: &Path, source: std::io::Error) -> ControlError {
        if source.kind() == std::io::ErrorKind::NotFound {
            ControlError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            ControlError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }

    async fn mtime(path: &Path) -> Result<SystemTime, ControlError> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| Self::io_error(path, e))?;
        meta.modified().map_err(|e| Self::io_error(path, e))
    }

    fn remember(&self, mtime: Option<SystemTime>) {
        *self.loaded_mtime.lock().unwrap_or_else(|e| e.into_inner()) = mtime;
    }
}

#[async_trait::async_trait]
impl ControlClient for FileControl {
    fn name(&self) -> &str {
        "file"
    }

    async fn load(&self, path: &str) -> Result<ControlDocument, ControlError> {
        let file = PathBuf::from(path);
        let mtime = Self::mtime(&file).await?;
        let body = tokio::fs::read_to_string(&file)
            .await
            .map_err(|e| Self::io_error(&file, e))?;
        let doc = ControlDocument::parse(&body, DocumentFormat::from_path(&file))?;

        self.remember(Some(mtime));
        debug!("Loaded {} bridge(s) from {}", doc.bridges.len(), file.display());
        Ok(doc)
    }

    async fn save(&self, path: &str, doc: &ControlDocument) -> Result<(), ControlError> {
        let file = PathBuf::from(path);
        let body = doc.render(DocumentFormat::from_path(&file))?;

        // Atomic write: temp file + rename
        let temp = file.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&temp, body.as_bytes())
            .await
            .map_err(|e| Self::io_error(&temp, e))?;
        if let Err(e) = tokio::fs::rename(&temp, &file).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(Self::io_error(&file, e));
        }

        info!("Saved control document to {}", file.display());
        Ok(())
    }

    async fn check_for_change(&self, path: &str) -> Result<bool, ControlError> {
        let current = Self::mtime(Path::new(path)).await?;
        let loaded = *self.loaded_mtime.lock().unwrap_or_else(|e| e.into_inner());
        Ok(loaded != Some(current))
    }
}
