// Scratch space for sync checkouts. Each run clones into its own directory,
// keyed by project and lease, and removes it when done.

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::error::{AppError, Result};

#[derive(Clone)]
pub struct CheckoutStore {
    base_path: PathBuf,
}

impl CheckoutStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Creates the base directory and drops checkouts left behind by a
    /// previous process.
    pub async fn init(&self) -> Result<()> {
        if fs::try_exists(&self.base_path).await.unwrap_or(false) {
            fs::remove_dir_all(&self.base_path).await.map_err(|e| {
                AppError::Internal(format!("Failed to clear checkout directory: {e}"))
            })?;
        }
        fs::create_dir_all(&self.base_path)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to create checkout directory: {e}")))?;
        Ok(())
    }

    pub fn checkout_path(&self, project_id: i64, lease: &str) -> PathBuf {
        self.base_path.join(project_id.to_string()).join(lease)
    }

    /// Returns an empty, not-yet-existing destination for a clone.
    pub async fn prepare(&self, project_id: i64, lease: &str) -> Result<PathBuf> {
        let path = self.checkout_path(project_id, lease);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::Internal(format!("Failed to create directories: {e}")))?;
        }
        self.discard(&path).await;
        Ok(path)
    }

    pub async fn discard(&self, path: &Path) {
        if fs::try_exists(path).await.unwrap_or(false) {
            if let Err(e) = fs::remove_dir_all(path).await {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove checkout");
            }
        }
    }
}
