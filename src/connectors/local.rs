use super::{select_files, ConnectorError, FileRef, ListRequest, SourceConnector};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Imports from a folder on the machine running the backend
#[derive(Debug, Clone, Default)]
pub struct LocalFolderConnector {
    /// Relative folders resolve against this root and may not escape it
    root: Option<PathBuf>,
}

impl LocalFolderConnector {
    pub fn new(root: Option<PathBuf>) -> Self {
        LocalFolderConnector { root }
    }

    /// Resolve a user-supplied folder to an existing directory
    pub async fn resolve(&self, folder: &str) -> Result<PathBuf, ConnectorError> {
        let folder = folder.trim();
        if folder.is_empty() {
            return Err(ConnectorError::InvalidParameters(
                "Folder path is empty".to_string(),
            ));
        }

        let not_found = || ConnectorError::NotFound(format!("Folder '{}' not found.", folder));

        let resolved = match &self.root {
            Some(root) => {
                let root = fs::canonicalize(root).await.map_err(|_| not_found())?;
                let candidate = root.join(folder.trim_start_matches('/'));
                let candidate = fs::canonicalize(&candidate).await.map_err(|_| not_found())?;
                if !candidate.starts_with(&root) {
                    return Err(ConnectorError::InvalidParameters(format!(
                        "Folder '{}' is outside of the import root",
                        folder
                    )));
                }
                candidate
            }
            None => fs::canonicalize(folder).await.map_err(|_| not_found())?,
        };

        if !fs::metadata(&resolved).await?.is_dir() {
            return Err(not_found());
        }
        Ok(resolved)
    }

    async fn collect_files(
        &self,
        folder: &Path,
        recursive: bool,
    ) -> Result<Vec<FileRef>, ConnectorError> {
        let mut files = Vec::new();
        let mut queue = VecDeque::from([folder.to_path_buf()]);

        while let Some(dir) = queue.pop_front() {
            let mut entries = fs::read_dir(&dir).await?;
            let mut level = Vec::new();
            let mut sub_dirs = Vec::new();

            while let Some(entry) = entries.next_entry().await? {
                let metadata = entry.metadata().await?;
                if metadata.is_dir() {
                    if recursive {
                        sub_dirs.push(entry.path());
                    }
                } else if metadata.is_file() {
                    level.push(FileRef {
                        locator: entry.path().to_string_lossy().into_owned(),
                        name: entry.file_name().to_string_lossy().into_owned(),
                        size: Some(metadata.len()),
                    });
                }
            }

            level.sort_by(|a, b| a.name.cmp(&b.name));
            sub_dirs.sort();
            files.extend(level);
            queue.extend(sub_dirs);
        }

        Ok(files)
    }
}

#[async_trait::async_trait]
impl SourceConnector for LocalFolderConnector {
    async fn list(&self, request: &ListRequest) -> Result<Vec<FileRef>, ConnectorError> {
        let folder = self.resolve(&request.folder).await?;
        let candidates = self.collect_files(&folder, request.recursive).await?;
        debug!("Found {} files in {}", candidates.len(), folder.display());

        select_files(candidates, &request.filter, || {
            ConnectorError::EmptyFolder(format!("'{}' is empty.", request.folder))
        })
    }

    async fn fetch(&self, file: &FileRef) -> Result<Vec<u8>, ConnectorError> {
        Ok(fs::read(&file.locator).await?)
    }
}
