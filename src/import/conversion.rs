// # Conversion pipeline seam
//
// The import loop hands every staged file to a `ConversionPipeline` and moves
// on. The pipeline reports the result later through the `ConversionCompletion`
// bundled with the request, which clears the image's importing flag exactly once.

use crate::counters::CounterCache;
use crate::db::DbImage;
use crate::storage::CollectionStorage;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("Conversion pipeline unavailable: {0}")]
    Unavailable(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of extracting one image
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionOutcome {
    Converted,
    Failed(String),
}

impl ConversionOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, ConversionOutcome::Failed(_))
    }
}

/// Callback that finishes one image
#[derive(Debug, Clone)]
pub struct ConversionCompletion {
    counters: CounterCache,
    collection_id: String,
    image_id: String,
}

impl ConversionCompletion {
    pub(crate) fn new(counters: CounterCache, collection_id: &str, image_id: &str) -> Self {
        ConversionCompletion {
            counters,
            collection_id: collection_id.to_string(),
            image_id: image_id.to_string(),
        }
    }

    pub fn image_id(&self) -> &str {
        &self.image_id
    }

    /// Clear the importing flag and record the outcome.
    ///
    /// Returns false if the image had already been finished.
    pub async fn complete(&self, outcome: ConversionOutcome) -> Result<bool, sqlx::Error> {
        if let ConversionOutcome::Failed(reason) = &outcome {
            warn!("Conversion of image {} failed: {}", self.image_id, reason);
        }
        self.counters
            .finish_image(&self.collection_id, &self.image_id, outcome.is_failure())
            .await
    }
}

/// A staged file waiting for extraction
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub collection_id: String,
    pub image: DbImage,
    pub source_path: PathBuf,
    pub completion: ConversionCompletion,
}

/// External format-extraction collaborator.
///
/// `submit` only reports whether the file was accepted; the extraction result
/// arrives through `request.completion`.
#[async_trait::async_trait]
pub trait ConversionPipeline: Send + Sync {
    async fn submit(&self, request: ConversionRequest) -> Result<(), ConversionError>;
}

/// Moves staged files into the collection folder as-is.
///
/// Used where no extraction service is wired in (admin tooling).
#[derive(Debug, Clone)]
pub struct PassthroughPipeline {
    storage: CollectionStorage,
}

impl PassthroughPipeline {
    pub fn new(storage: CollectionStorage) -> Self {
        PassthroughPipeline { storage }
    }

    async fn finalize(&self, request: &ConversionRequest) -> Result<PathBuf, std::io::Error> {
        let leaf = Path::new(&request.image.file_name)
            .file_name()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("Invalid file name: {}", request.image.file_name),
                )
            })?;
        let folder = self.storage.collection_folder(&request.collection_id);
        fs::create_dir_all(&folder).await?;
        let target = folder.join(leaf);
        if fs::rename(&request.source_path, &target).await.is_err() {
            // Staging and collection folders may live on different filesystems
            fs::copy(&request.source_path, &target).await?;
            fs::remove_file(&request.source_path).await?;
        }
        Ok(target)
    }
}

#[async_trait::async_trait]
impl ConversionPipeline for PassthroughPipeline {
    async fn submit(&self, request: ConversionRequest) -> Result<(), ConversionError> {
        let outcome = match self.finalize(&request).await {
            Ok(target) => {
                debug!("Stored {}", target.display());
                ConversionOutcome::Converted
            }
            Err(e) => ConversionOutcome::Failed(e.to_string()),
        };

        request
            .completion
            .complete(outcome)
            .await
            .map_err(|e| ConversionError::Unavailable(e.to_string()))?;
        Ok(())
    }
}
