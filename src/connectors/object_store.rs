use super::{leaf_name, select_files, ConnectorError, FileRef, ListRequest, SourceConnector};
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::Client;
use tracing::{debug, info};

const AUTH_ERROR_CODES: &[&str] = &[
    "InvalidAccessKeyId",
    "SignatureDoesNotMatch",
    "AccessDenied",
];

/// Access keys and location of one collection's bucket
#[derive(Clone)]
pub struct S3Credentials {
    pub bucket_name: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    /// For MinIO/S3-compatible services
    pub endpoint_url: Option<String>,
}

impl std::fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Credentials")
            .field("bucket_name", &self.bucket_name)
            .field("region", &self.region)
            .field("endpoint_url", &self.endpoint_url)
            .finish_non_exhaustive()
    }
}

impl S3Credentials {
    pub fn validate(&self) -> Result<(), ConnectorError> {
        if self.bucket_name.trim().is_empty() {
            return Err(ConnectorError::InvalidParameters(
                "Bucket name cannot be empty".to_string(),
            ));
        }
        if self.region.trim().is_empty() {
            return Err(ConnectorError::InvalidParameters(
                "Region cannot be empty".to_string(),
            ));
        }
        if self.access_key_id.trim().is_empty() {
            return Err(ConnectorError::InvalidParameters(
                "Access key ID cannot be empty".to_string(),
            ));
        }
        if self.secret_access_key.trim().is_empty() {
            return Err(ConnectorError::InvalidParameters(
                "Secret access key cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// A listed object, before prefix and filter selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Object {
    pub key: String,
    pub size: Option<u64>,
}

/// Turn raw listing output into import candidates.
///
/// - keys ending in `/` are folder placeholders and are skipped
/// - the file name is the key with the prefix removed
/// - names under a sub-folder are kept as their leaf only when recursive,
///   skipped otherwise
pub fn select_object_keys(
    prefix: &str,
    objects: Vec<S3Object>,
    request: &ListRequest,
) -> Result<Vec<FileRef>, ConnectorError> {
    if objects.is_empty() {
        return Err(ConnectorError::NotFound(
            "Prefix/Folder not found.".to_string(),
        ));
    }

    let mut candidates = Vec::new();
    for object in objects {
        if object.key.ends_with('/') {
            continue;
        }
        let relative = object.key.strip_prefix(prefix).unwrap_or(&object.key);
        let relative = relative.trim_start_matches('/');
        if relative.contains('/') && !request.recursive {
            continue;
        }
        candidates.push(FileRef {
            name: leaf_name(relative).to_string(),
            locator: object.key.clone(),
            size: object.size,
        });
    }

    select_files(candidates, &request.filter, || {
        ConnectorError::EmptyFolder(
            "The prefix does not match with any actual file. (Empty folder)".to_string(),
        )
    })
}

/// Lists and downloads objects under a bucket prefix
pub struct ObjectStoreConnector {
    client: Client,
    bucket_name: String,
}

impl ObjectStoreConnector {
    /// Build a client bound to the collection's own access keys
    pub async fn new(credentials: S3Credentials) -> Result<Self, ConnectorError> {
        credentials.validate()?;

        let aws_credentials = Credentials::new(
            credentials.access_key_id,
            credentials.secret_access_key,
            None,
            None,
            "image-collections-import",
        );

        let mut aws_config_builder = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(credentials.region))
            .credentials_provider(aws_credentials);

        if let Some(endpoint) = credentials.endpoint_url {
            aws_config_builder = aws_config_builder.endpoint_url(endpoint);
        }

        let aws_config = aws_config_builder.load().await;
        let client = Client::new(&aws_config);

        Ok(ObjectStoreConnector {
            client,
            bucket_name: credentials.bucket_name,
        })
    }

    async fn list_all_objects(&self, prefix: &str) -> Result<Vec<S3Object>, ConnectorError> {
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket_name)
                .prefix(prefix)
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .map_err(|e| {
                    let service_error = e.into_service_error();
                    if service_error.is_no_such_bucket() {
                        ConnectorError::NotFound(format!(
                            "Bucket '{}' not found.",
                            self.bucket_name
                        ))
                    } else if service_error
                        .code()
                        .is_some_and(|code| AUTH_ERROR_CODES.contains(&code))
                    {
                        ConnectorError::Authentication(service_error.to_string())
                    } else {
                        ConnectorError::Sdk(format!("List objects failed: {}", service_error))
                    }
                })?;

            for object in response.contents() {
                if let Some(key) = object.key() {
                    objects.push(S3Object {
                        key: key.to_string(),
                        size: object.size().and_then(|size| u64::try_from(size).ok()),
                    });
                }
            }

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation_token = Some(token.to_string());
                }
                _ => break,
            }
        }

        Ok(objects)
    }
}

#[async_trait::async_trait]
impl SourceConnector for ObjectStoreConnector {
    async fn list(&self, request: &ListRequest) -> Result<Vec<FileRef>, ConnectorError> {
        let prefix = request.folder.trim_start_matches('/');
        if prefix.is_empty() {
            return Err(ConnectorError::InvalidParameters(
                "Folder path is empty".to_string(),
            ));
        }

        let objects = self.list_all_objects(prefix).await?;
        debug!(
            "Listed {} objects under s3://{}/{}",
            objects.len(),
            self.bucket_name,
            prefix
        );

        let files = select_object_keys(prefix, objects, request)?;
        info!(
            "Found {} files to import in s3://{}/{}",
            files.len(),
            self.bucket_name,
            prefix
        );
        Ok(files)
    }

    async fn fetch(&self, file: &FileRef) -> Result<Vec<u8>, ConnectorError> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket_name)
            .key(&file.locator)
            .send()
            .await
            .map_err(|e| ConnectorError::Sdk(format!("Get object failed: {}", e)))?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| ConnectorError::Sdk(format!("Reading object body failed: {}", e)))?
            .into_bytes();

        debug!("Downloaded {} ({} bytes)", file.locator, data.len());
        Ok(data.to_vec())
    }
}
