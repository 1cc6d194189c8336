use crate::connectors::ConnectorError;
use thiserror::Error;

/// Progress updates during a connector-driven import
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportProgress {
    Started {
        collection_id: String,
        total: usize,
    },
    FileRegistered {
        collection_id: String,
        image_id: String,
        file_name: String,
    },
    FileFailed {
        collection_id: String,
        file_name: String,
        error: String,
    },
    Complete {
        collection_id: String,
        imported: usize,
        failed: usize,
    },
    /// Listing failed; the collection no longer exists
    RolledBack {
        collection_id: String,
        reason: String,
    },
}

impl ImportProgress {
    pub fn collection_id(&self) -> &str {
        match self {
            ImportProgress::Started { collection_id, .. }
            | ImportProgress::FileRegistered { collection_id, .. }
            | ImportProgress::FileFailed { collection_id, .. }
            | ImportProgress::Complete { collection_id, .. }
            | ImportProgress::RolledBack { collection_id, .. } => collection_id,
        }
    }
}

/// Outcome of an import whose listing succeeded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    pub collection_id: String,
    /// Files fetched and handed to the conversion pipeline
    pub imported: usize,
    /// Files recorded with an import error
    pub failed: usize,
}

/// Failure of a single file; recorded on its image, never propagated
#[derive(Error, Debug)]
pub enum FileImportError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] ConnectorError),
    #[error("Staging failed: {0}")]
    Stage(#[from] std::io::Error),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Conversion submission failed: {0}")]
    Submit(String),
}
