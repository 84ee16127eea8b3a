use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{Alert, AlertChannel, AlertError};

/// Appends every alert to a JSON array on disk.
pub struct JsonFileNotifier {
    path: PathBuf,
    // serializes read-modify-write cycles from concurrent sends
    write_lock: Mutex<()>,
}

impl JsonFileNotifier {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    async fn read_existing(&self) -> Result<Vec<serde_json::Value>, AlertError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AlertError::File(e.to_string())),
        };
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&raw).map_err(|e| {
            AlertError::File(format!("{} is not a JSON array: {}", self.path.display(), e))
        })
    }
}

#[async_trait]
impl AlertChannel for JsonFileNotifier {
    async fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AlertError::File(e.to_string()))?;
        }

        let mut alerts = self.read_existing().await?;
        alerts.push(serde_json::to_value(alert).map_err(|e| AlertError::File(e.to_string()))?);

        let body =
            serde_json::to_string_pretty(&alerts).map_err(|e| AlertError::File(e.to_string()))?;
        tokio::fs::write(&self.path, body)
            .await
            .map_err(|e| AlertError::File(e.to_string()))?;

        Ok(())
    }

    fn name(&self) -> &str {
        "json-file"
    }
}
