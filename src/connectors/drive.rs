use super::{leaf_name, select_files, ConnectorError, FileRef, ListRequest, SourceConnector};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

const DRIVE_FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
const ROOT_FOLDER_ID: &str = "root";
const PAGE_SIZE: u32 = 1000;

/// A Drive file or folder as returned by the files endpoint
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
    /// Drive reports sizes as decimal strings; folders and native docs have none
    #[serde(default)]
    pub size: Option<String>,
}

impl DriveFile {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }
}

/// One page of a files listing
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFileList {
    #[serde(default)]
    pub files: Vec<DriveFile>,
    pub next_page_token: Option<String>,
}

/// The slice of the Drive API the connector needs (allows mocking for tests)
#[async_trait::async_trait]
pub trait DriveApi: Send + Sync {
    /// Folders named `name` directly under `parent_id`
    async fn find_folders(
        &self,
        parent_id: &str,
        name: &str,
    ) -> Result<Vec<DriveFile>, ConnectorError>;

    /// One page of the non-trashed children of `parent_id`
    async fn list_children(
        &self,
        parent_id: &str,
        include_folders: bool,
        page_token: Option<&str>,
    ) -> Result<DriveFileList, ConnectorError>;

    async fn download(&self, file_id: &str) -> Result<Vec<u8>, ConnectorError>;
}

/// Imports from a Google Drive folder addressed by a slash-delimited path
pub struct DriveConnector {
    api: Arc<dyn DriveApi>,
}

impl DriveConnector {
    pub fn new(api: Arc<dyn DriveApi>) -> Self {
        DriveConnector { api }
    }

    /// Walk the path one segment at a time from the Drive root
    pub async fn resolve_folder(&self, path: &str) -> Result<String, ConnectorError> {
        let mut folder_id = ROOT_FOLDER_ID.to_string();

        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let mut matches = self.api.find_folders(&folder_id, segment).await?;
            folder_id = match matches.len() {
                0 => {
                    return Err(ConnectorError::NotFound(format!(
                        "Folder '{}' not found in the Google Drive.",
                        segment
                    )))
                }
                1 => matches.remove(0).id,
                n => {
                    return Err(ConnectorError::AmbiguousFolder(format!(
                        "Found {} folders named '{}' in the Google Drive.",
                        n, segment
                    )))
                }
            };
        }

        Ok(folder_id)
    }

    async fn list_all_children(
        &self,
        parent_id: &str,
        include_folders: bool,
    ) -> Result<Vec<DriveFile>, ConnectorError> {
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self
                .api
                .list_children(parent_id, include_folders, page_token.as_deref())
                .await?;
            files.extend(page.files);
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(files)
    }

    /// Breadth-first over the folder tree, files of shallower folders first
    async fn list_recursive(&self, folder_id: &str) -> Result<Vec<DriveFile>, ConnectorError> {
        let mut files = Vec::new();
        let mut queue = VecDeque::from([folder_id.to_string()]);

        while let Some(current) = queue.pop_front() {
            for child in self.list_all_children(&current, true).await? {
                if child.is_folder() {
                    queue.push_back(child.id);
                } else {
                    files.push(child);
                }
            }
        }

        Ok(files)
    }
}

#[async_trait::async_trait]
impl SourceConnector for DriveConnector {
    async fn list(&self, request: &ListRequest) -> Result<Vec<FileRef>, ConnectorError> {
        let folder_id = self.resolve_folder(&request.folder).await?;

        let files = if request.recursive {
            self.list_recursive(&folder_id).await?
        } else {
            self.list_all_children(&folder_id, false).await?
        };
        debug!("Drive folder {} has {} files", request.folder, files.len());

        let candidates = files
            .into_iter()
            .map(|file| FileRef {
                size: file.size.as_deref().and_then(|s| s.parse().ok()),
                // Drive names may contain '/'
                name: leaf_name(&file.name).to_string(),
                locator: file.id,
            })
            .collect();

        select_files(candidates, &request.filter, || {
            ConnectorError::EmptyFolder(format!("'{}' is empty.", request.folder))
        })
    }

    async fn fetch(&self, file: &FileRef) -> Result<Vec<u8>, ConnectorError> {
        self.api.download(&file.locator).await
    }
}

/// Escape a value for use inside a single-quoted Drive query literal
fn escape_query_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// OAuth client as found in a Google `credentials.json`
#[derive(Debug, Clone, Deserialize)]
struct ClientSecrets {
    client_id: String,
    client_secret: String,
    #[serde(default)]
    token_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    web: Option<ClientSecrets>,
    installed: Option<ClientSecrets>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// What is kept per user between imports
#[derive(Debug, Serialize, Deserialize)]
struct StoredToken {
    refresh_token: String,
}

/// Authenticated Drive REST client
pub struct GoogleDriveClient {
    client: Client,
    access_token: String,
}

impl GoogleDriveClient {
    /// Obtain an access token for `user_id`.
    ///
    /// With an authorization `code`, the code is exchanged and the resulting
    /// refresh token stored for the user. Without one, the stored refresh
    /// token is used. Either way the refresh round-trip validates the token.
    pub async fn authenticate(
        credentials_path: &Path,
        tokens_dir: &Path,
        user_id: &str,
        code: Option<&str>,
    ) -> Result<Self, ConnectorError> {
        let secrets = load_client_secrets(credentials_path).await?;
        let token_uri = secrets
            .token_uri
            .clone()
            .unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string());
        let client = Client::new();
        let token_path = token_path(tokens_dir, user_id);

        let refresh_token = match code.map(str::trim).filter(|c| !c.is_empty()) {
            Some(code) => {
                let response = client
                    .post(&token_uri)
                    .form(&[
                        ("code", code),
                        ("client_id", secrets.client_id.as_str()),
                        ("client_secret", secrets.client_secret.as_str()),
                        ("redirect_uri", "postmessage"),
                        ("grant_type", "authorization_code"),
                    ])
                    .send()
                    .await?;

                if !response.status().is_success() {
                    warn!("Authorization code exchange failed: {}", response.status());
                    return Err(ConnectorError::Authentication(
                        "The authorization code was rejected.".to_string(),
                    ));
                }

                let token: TokenResponse = response.json().await?;
                match token.refresh_token {
                    Some(refresh_token) => {
                        store_token(&token_path, &refresh_token).await?;
                        info!("Stored Google credentials for user {}", user_id);
                        refresh_token
                    }
                    None => {
                        // No offline access granted; the fresh access token is still usable
                        return Ok(GoogleDriveClient {
                            client,
                            access_token: token.access_token,
                        });
                    }
                }
            }
            None => load_token(&token_path).await?.refresh_token,
        };

        let response = client
            .post(&token_uri)
            .form(&[
                ("refresh_token", refresh_token.as_str()),
                ("client_id", secrets.client_id.as_str()),
                ("client_secret", secrets.client_secret.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            warn!("Token refresh failed for user {}: {}", user_id, response.status());
            return Err(ConnectorError::Authentication(
                "Refreshing issue: Token might be invalid.".to_string(),
            ));
        }

        let token: TokenResponse = response.json().await?;
        Ok(GoogleDriveClient {
            client,
            access_token: token.access_token,
        })
    }

    async fn request_files(
        &self,
        query: &str,
        page_token: Option<&str>,
    ) -> Result<DriveFileList, ConnectorError> {
        let page_size = PAGE_SIZE.to_string();
        let mut params = vec![
            ("q", query),
            ("spaces", "drive"),
            ("pageSize", page_size.as_str()),
            ("fields", "nextPageToken, files(id, name, mimeType, size)"),
            ("supportsAllDrives", "true"),
            ("includeItemsFromAllDrives", "true"),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }

        let response = self
            .client
            .get(DRIVE_FILES_URL)
            .query(&params)
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(response.json().await?),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(ConnectorError::Authentication(format!(
                    "Google Drive refused the request: {}",
                    response.status()
                )))
            }
            _ => Err(response.error_for_status().err().map_or_else(
                || ConnectorError::Sdk("Unexpected Google Drive response".to_string()),
                ConnectorError::Request,
            )),
        }
    }
}

#[async_trait::async_trait]
impl DriveApi for GoogleDriveClient {
    async fn find_folders(
        &self,
        parent_id: &str,
        name: &str,
    ) -> Result<Vec<DriveFile>, ConnectorError> {
        let query = format!(
            "mimeType='{}' and name = '{}' and '{}' in parents and trashed = false",
            FOLDER_MIME_TYPE,
            escape_query_value(name),
            escape_query_value(parent_id)
        );
        Ok(self.request_files(&query, None).await?.files)
    }

    async fn list_children(
        &self,
        parent_id: &str,
        include_folders: bool,
        page_token: Option<&str>,
    ) -> Result<DriveFileList, ConnectorError> {
        let query = if include_folders {
            format!("'{}' in parents and trashed = false", escape_query_value(parent_id))
        } else {
            format!(
                "'{}' in parents and mimeType != '{}' and trashed = false",
                escape_query_value(parent_id),
                FOLDER_MIME_TYPE
            )
        };
        self.request_files(&query, page_token).await
    }

    async fn download(&self, file_id: &str) -> Result<Vec<u8>, ConnectorError> {
        let url = format!("{}/{}", DRIVE_FILES_URL, file_id);
        let response = self
            .client
            .get(&url)
            .query(&[("alt", "media"), ("supportsAllDrives", "true")])
            .bearer_auth(&self.access_token)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

async fn load_client_secrets(path: &Path) -> Result<ClientSecrets, ConnectorError> {
    let raw = fs::read_to_string(path).await.map_err(|_| {
        ConnectorError::Authentication(format!(
            "Google API credentials not found at {}",
            path.display()
        ))
    })?;
    let file: ClientSecretsFile = serde_json::from_str(&raw)?;
    file.web.or(file.installed).ok_or_else(|| {
        ConnectorError::Authentication("Google API credentials file has no client".to_string())
    })
}

/// One token file per user; the hex-encoded id keeps distinct users apart
fn token_path(tokens_dir: &Path, user_id: &str) -> PathBuf {
    tokens_dir.join(format!("{}.json", hex::encode(user_id.as_bytes())))
}

async fn store_token(path: &Path, refresh_token: &str) -> Result<(), ConnectorError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let stored = StoredToken {
        refresh_token: refresh_token.to_string(),
    };
    fs::write(path, serde_json::to_vec(&stored)?).await?;
    Ok(())
}

async fn load_token(path: &Path) -> Result<StoredToken, ConnectorError> {
    match fs::read(path).await {
        Ok(raw) => Ok(serde_json::from_slice(&raw)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ConnectorError::Authentication(
            "No Google credentials found.\nPlease sign in first.".to_string(),
        )),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::ExtensionFilter;
    use std::collections::HashMap;
    use tempfile::TempDir;

    /// In-memory drive: parent id -> children, served two per page
    #[derive(Default)]
    struct FakeDrive {
        children: HashMap<String, Vec<DriveFile>>,
    }

    impl FakeDrive {
        fn add(&mut self, parent: &str, id: &str, name: &str, folder: bool) {
            self.children
                .entry(parent.to_string())
                .or_default()
                .push(DriveFile {
                    id: id.to_string(),
                    name: name.to_string(),
                    mime_type: if folder {
                        FOLDER_MIME_TYPE.to_string()
                    } else {
                        "image/tiff".to_string()
                    },
                    size: if folder { None } else { Some("7".to_string()) },
                });
        }
    }

    #[async_trait::async_trait]
    impl DriveApi for FakeDrive {
        async fn find_folders(
            &self,
            parent_id: &str,
            name: &str,
        ) -> Result<Vec<DriveFile>, ConnectorError> {
            Ok(self
                .children
                .get(parent_id)
                .into_iter()
                .flatten()
                .filter(|f| f.is_folder() && f.name == name)
                .cloned()
                .collect())
        }

        async fn list_children(
            &self,
            parent_id: &str,
            include_folders: bool,
            page_token: Option<&str>,
        ) -> Result<DriveFileList, ConnectorError> {
            let all: Vec<DriveFile> = self
                .children
                .get(parent_id)
                .into_iter()
                .flatten()
                .filter(|f| include_folders || !f.is_folder())
                .cloned()
                .collect();
            let start: usize = page_token.map(|t| t.parse().unwrap()).unwrap_or(0);
            let end = (start + 2).min(all.len());
            Ok(DriveFileList {
                files: all[start..end].to_vec(),
                next_page_token: (end < all.len()).then(|| end.to_string()),
            })
        }

        async fn download(&self, file_id: &str) -> Result<Vec<u8>, ConnectorError> {
            Ok(file_id.as_bytes().to_vec())
        }
    }

    fn request(folder: &str, recursive: bool) -> ListRequest {
        ListRequest {
            folder: folder.to_string(),
            filter: ExtensionFilter::parse(Some(".tif")),
            recursive,
        }
    }

    fn connector() -> DriveConnector {
        let mut drive = FakeDrive::default();
        drive.add("root", "f-exp", "experiments", true);
        drive.add("f-exp", "f-run", "run1", true);
        drive.add("f-run", "i1", "a.tif", false);
        drive.add("f-run", "i2", "b.tif", false);
        drive.add("f-run", "n1", "notes.txt", false);
        drive.add("f-run", "f-sub", "sub", true);
        drive.add("f-sub", "i3", "c.tif", false);
        drive.add("root", "f-empty", "empty", true);
        DriveConnector::new(Arc::new(drive))
    }

    #[tokio::test]
    async fn test_resolves_nested_folder_and_lists_across_pages() {
        let connector = connector();

        assert_eq!(connector.resolve_folder("/").await.unwrap(), "root");
        assert_eq!(
            connector.resolve_folder("/experiments/run1/").await.unwrap(),
            "f-run"
        );

        let files = connector.list(&request("experiments/run1", false)).await.unwrap();
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a.tif", "b.tif"]);
        assert_eq!(files[0].locator, "i1");
        assert_eq!(files[0].size, Some(7));
    }

    #[tokio::test]
    async fn test_recursive_listing_descends_breadth_first() {
        let files = connector()
            .list(&request("experiments/run1", true))
            .await
            .unwrap();
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a.tif", "b.tif", "c.tif"]);
    }

    #[tokio::test]
    async fn test_missing_segment_and_empty_folder() {
        let connector = connector();

        let missing = connector
            .list(&request("experiments/run2", false))
            .await
            .unwrap_err();
        assert_eq!(
            missing.to_string(),
            "Folder 'run2' not found in the Google Drive."
        );

        let empty = connector.list(&request("empty", false)).await.unwrap_err();
        assert_eq!(empty.to_string(), "'empty' is empty.");
    }

    #[tokio::test]
    async fn test_duplicate_folder_names_are_ambiguous() {
        let mut drive = FakeDrive::default();
        drive.add("root", "f1", "scans", true);
        drive.add("root", "f2", "scans", true);
        let connector = DriveConnector::new(Arc::new(drive));

        let err = connector.resolve_folder("scans").await.unwrap_err();
        assert!(matches!(err, ConnectorError::AmbiguousFolder(_)));
    }

    #[test]
    fn test_token_paths_never_collide() {
        let dir = Path::new("/tokens");
        assert_ne!(token_path(dir, "a.b"), token_path(dir, "a_b"));
        assert_ne!(token_path(dir, "a/b"), token_path(dir, "a_b"));
        assert_eq!(token_path(dir, "a_b"), token_path(dir, "a_b"));
        assert_eq!(token_path(dir, "../x").parent(), Some(dir));
    }

    #[tokio::test]
    async fn test_listed_names_are_leaf_names() {
        let mut drive = FakeDrive::default();
        drive.add("root", "f-run", "run1", true);
        drive.add("f-run", "i1", "../../escaped.tif", false);
        drive.add("f-run", "i2", "plate/a.tif", false);
        let connector = DriveConnector::new(Arc::new(drive));

        let files = connector.list(&request("run1", false)).await.unwrap();
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["escaped.tif", "a.tif"]);
        assert_eq!(files[0].locator, "i1");
    }

    #[test]
    fn test_query_values_are_escaped() {
        assert_eq!(escape_query_value("it's"), "it\\'s");
        assert_eq!(escape_query_value("a\\b"), "a\\\\b");
    }

    #[tokio::test]
    async fn test_missing_stored_token_asks_for_sign_in() {
        let temp_dir = TempDir::new().unwrap();
        let path = token_path(temp_dir.path(), "alice@example.org");
        assert_eq!(path.parent(), Some(temp_dir.path()));

        let err = load_token(&path).await.unwrap_err();
        assert!(err.to_string().contains("Please sign in first."));

        store_token(&path, "refresh-1").await.unwrap();
        assert_eq!(load_token(&path).await.unwrap().refresh_token, "refresh-1");
    }
}
