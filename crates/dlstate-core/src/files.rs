//! File-system collaborator used by delete-file cleanup

use crate::error::DlstateError;
use async_trait::async_trait;
use dlstate_types::Download;
use std::path::Path;
use tokio::fs;
use tracing::{debug, warn};

/// File operations the delegate needs when a cleanup policy removes files
#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn exists(&self, path: &Path) -> bool;

    async fn delete_file(&self, path: &Path) -> Result<(), DlstateError>;

    /// Remove the intermediate files a download left under `temp_dir`
    async fn delete_temp_files(&self, temp_dir: &Path, download: &Download)
        -> Result<(), DlstateError>;
}

/// [`FileSystem`] backed by the local disk
///
/// Temporary files of a download are the entries of `temp_dir` whose name
/// starts with `"{id}_"` (for example `{id}_segment_0.part`) and the
/// `.dlstate.meta` sidecar next to the target file.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn exists(&self, path: &Path) -> bool {
        fs::try_exists(path).await.unwrap_or(false)
    }

    async fn delete_file(&self, path: &Path) -> Result<(), DlstateError> {
        fs::remove_file(path).await?;
        debug!("Deleted file {:?}", path);
        Ok(())
    }

    async fn delete_temp_files(
        &self,
        temp_dir: &Path,
        download: &Download,
    ) -> Result<(), DlstateError> {
        let meta_path = download.meta_path();
        if self.exists(&meta_path).await {
            if let Err(e) = fs::remove_file(&meta_path).await {
                warn!("Failed to remove meta file {:?}: {}", meta_path, e);
            }
        }

        if !self.exists(temp_dir).await {
            return Ok(());
        }

        let prefix = format!("{}_", download.id);
        let mut entries = fs::read_dir(temp_dir).await?;
        let mut removed = 0usize;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(&prefix) {
                continue;
            }
            let path = entry.path();
            if let Err(e) = fs::remove_file(&path).await {
                warn!("Failed to remove temp file {:?}: {}", path, e);
            } else {
                removed += 1;
            }
        }

        debug!("Removed {} temp file(s) for download {}", removed, download.id);
        Ok(())
    }
}
