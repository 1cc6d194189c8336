use crate::config::Config;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

/// On-disk layout for collection files
///
/// - `collections_folder/<id>`: finalized images of a collection
/// - `upload_tmp_folder/<id>`: chunks of in-progress direct uploads
/// - `temp_folder/<id>`: files fetched from import sources, waiting for conversion
#[derive(Debug, Clone)]
pub struct CollectionStorage {
    collections_folder: PathBuf,
    upload_tmp_folder: PathBuf,
    temp_folder: PathBuf,
}

/// What a best-effort cleanup managed to remove
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

impl CollectionStorage {
    pub fn new(config: &Config) -> Self {
        CollectionStorage {
            collections_folder: config.collections_folder.clone(),
            upload_tmp_folder: config.upload_tmp_folder.clone(),
            temp_folder: config.temp_folder.clone(),
        }
    }

    pub fn collection_folder(&self, collection_id: &str) -> PathBuf {
        self.collections_folder.join(collection_id)
    }

    pub fn upload_tmp_folder(&self, collection_id: &str) -> PathBuf {
        self.upload_tmp_folder.join(collection_id)
    }

    pub fn staging_folder(&self, collection_id: &str) -> PathBuf {
        self.temp_folder.join(collection_id)
    }

    /// Create (if needed) and return the staging folder of a collection
    pub async fn ensure_staging_folder(&self, collection_id: &str) -> std::io::Result<PathBuf> {
        let folder = self.staging_folder(collection_id);
        fs::create_dir_all(&folder).await?;
        Ok(folder)
    }

    /// Write fetched bytes into the staging folder under the file's leaf name.
    ///
    /// Files with the same leaf name overwrite each other.
    pub async fn stage_file(
        &self,
        collection_id: &str,
        file_name: &str,
        data: &[u8],
    ) -> std::io::Result<PathBuf> {
        let folder = self.ensure_staging_folder(collection_id).await?;
        let leaf = Path::new(file_name)
            .file_name()
            .map(|name| name.to_os_string())
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("Invalid file name: {}", file_name),
                )
            })?;
        let path = folder.join(leaf);
        fs::write(&path, data).await?;
        Ok(path)
    }

    /// Remove every folder belonging to a collection.
    ///
    /// Failures are logged and reported, never raised.
    pub async fn remove_collection_folders(&self, collection_id: &str) -> CleanupReport {
        let mut report = CleanupReport::default();

        for folder in [
            self.collection_folder(collection_id),
            self.upload_tmp_folder(collection_id),
            self.staging_folder(collection_id),
        ] {
            match fs::remove_dir_all(&folder).await {
                Ok(()) => {
                    info!("Removed {}", folder.display());
                    report.removed.push(folder);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!("Was not able to delete folder {}: {}", folder.display(), e);
                    report.failed.push(folder);
                }
            }
        }

        report
    }
}
