// # Source Connectors
//
// One capability, three sources:
// - **LocalFolderConnector**: backend-local directory tree
// - **ObjectStoreConnector**: S3 bucket prefix, per-collection access keys
// - **DriveConnector**: Google Drive folder resolved segment by segment
//
// Every variant lists a finite, ordered sequence of `FileRef`s and fetches
// the bytes of one `FileRef`. The import orchestrator only sees the trait.

mod drive;
mod local;
mod object_store;

pub use drive::{DriveApi, DriveConnector, DriveFile, DriveFileList, GoogleDriveClient};
pub use local::LocalFolderConnector;
pub use object_store::{select_object_keys, ObjectStoreConnector, S3Credentials, S3Object};

use crate::access::Caller;
use crate::config::Config;
use crate::db::{DbCollection, ImportMethod};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    EmptyFolder(String),
    #[error("No files found with the requested file extensions")]
    NoMatchingFiles,
    #[error("{0}")]
    AmbiguousFolder(String),
    #[error("Authentication failed: {0}")]
    Authentication(String),
    #[error("Invalid source parameters: {0}")]
    InvalidParameters(String),
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("S3 SDK error: {0}")]
    Sdk(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A file discovered by a connector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    /// Source-specific locator: absolute path, object key or drive file id
    pub locator: String,
    /// Leaf file name; sub-folders are flattened away
    pub name: String,
    /// Size in bytes when the listing reports it
    pub size: Option<u64>,
}

/// Where and how to list files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRequest {
    pub folder: String,
    pub filter: ExtensionFilter,
    pub recursive: bool,
}

impl ListRequest {
    /// Build the listing parameters stored on a collection
    pub fn from_collection(collection: &DbCollection) -> Result<Self, ConnectorError> {
        let (folder, extensions, recursive) = match collection.import_method {
            ImportMethod::BackendImport => (&collection.source_backend_import, &None, false),
            ImportMethod::S3Import => (
                &collection.s3_folder_name,
                &collection.s3_file_extensions,
                collection.s3_recursive,
            ),
            ImportMethod::GdriveImport => (
                &collection.gdrive_folder_name,
                &collection.gdrive_file_extensions,
                collection.gdrive_recursive,
            ),
            other => {
                return Err(ConnectorError::InvalidParameters(format!(
                    "Import method {} has no source connector",
                    other.as_str()
                )))
            }
        };

        let folder = folder
            .clone()
            .ok_or_else(|| ConnectorError::InvalidParameters("Folder path is empty".to_string()))?;

        Ok(ListRequest {
            folder,
            filter: ExtensionFilter::parse(extensions.as_deref()),
            recursive,
        })
    }
}

/// Logical OR over user-supplied file name suffixes.
///
/// Accepts `.tif, .png` as well as the quoted form `'.tif', '.png'`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionFilter {
    suffixes: Vec<String>,
}

impl ExtensionFilter {
    pub fn parse(raw: Option<&str>) -> Self {
        let suffixes = raw
            .map(|raw| {
                raw.split(',')
                    .map(|part| part.trim().trim_matches(|c| c == '\'' || c == '"').trim())
                    .filter(|part| !part.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        ExtensionFilter { suffixes }
    }

    pub fn is_active(&self) -> bool {
        !self.suffixes.is_empty()
    }

    pub fn matches(&self, file_name: &str) -> bool {
        !self.is_active() || self.suffixes.iter().any(|s| file_name.ends_with(s.as_str()))
    }
}

/// Last path segment of a slash-delimited name
pub fn leaf_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Apply the extension filter, distinguishing "nothing there" from "nothing matched"
pub(crate) fn select_files(
    candidates: Vec<FileRef>,
    filter: &ExtensionFilter,
    empty: impl FnOnce() -> ConnectorError,
) -> Result<Vec<FileRef>, ConnectorError> {
    if candidates.is_empty() {
        return Err(empty());
    }

    let selected: Vec<FileRef> = candidates
        .into_iter()
        .filter(|file| filter.matches(&file.name))
        .collect();

    if selected.is_empty() {
        return Err(ConnectorError::NoMatchingFiles);
    }
    Ok(selected)
}

/// Capability every import source exposes
#[async_trait::async_trait]
pub trait SourceConnector: Send + Sync {
    /// List the files to import, in import order
    async fn list(&self, request: &ListRequest) -> Result<Vec<FileRef>, ConnectorError>;

    /// Fetch the bytes of one listed file
    async fn fetch(&self, file: &FileRef) -> Result<Vec<u8>, ConnectorError>;
}

/// Builds the connector matching a collection's import method and credentials
#[async_trait::async_trait]
pub trait ConnectorFactory: Send + Sync {
    async fn connector_for(
        &self,
        collection: &DbCollection,
        caller: &Caller,
    ) -> Result<Arc<dyn SourceConnector>, ConnectorError>;
}

/// Production connectors configured from `Config`
#[derive(Debug, Clone)]
pub struct DefaultConnectorFactory {
    config: Config,
}

impl DefaultConnectorFactory {
    pub fn new(config: Config) -> Self {
        DefaultConnectorFactory { config }
    }
}

#[async_trait::async_trait]
impl ConnectorFactory for DefaultConnectorFactory {
    async fn connector_for(
        &self,
        collection: &DbCollection,
        caller: &Caller,
    ) -> Result<Arc<dyn SourceConnector>, ConnectorError> {
        match collection.import_method {
            ImportMethod::BackendImport => Ok(Arc::new(LocalFolderConnector::new(
                self.config.local_import_root.clone(),
            ))),
            ImportMethod::S3Import => {
                let credentials = S3Credentials {
                    bucket_name: collection.s3_bucket_name.clone().unwrap_or_default(),
                    access_key_id: collection.s3_access_key_id.clone().unwrap_or_default(),
                    secret_access_key: collection.s3_secret_access_key.clone().unwrap_or_default(),
                    region: self.config.s3_region.clone(),
                    endpoint_url: self.config.s3_endpoint_url.clone(),
                };
                Ok(Arc::new(ObjectStoreConnector::new(credentials).await?))
            }
            ImportMethod::GdriveImport => {
                let client = GoogleDriveClient::authenticate(
                    &self.config.gdrive_credentials_path(),
                    &self.config.gdrive_tokens_dir(),
                    &caller.user_id,
                    collection.gdrive_code.as_deref(),
                )
                .await?;
                Ok(Arc::new(DriveConnector::new(Arc::new(client))))
            }
            other => Err(ConnectorError::InvalidParameters(format!(
                "Import method {} has no source connector",
                other.as_str()
            ))),
        }
    }
}
