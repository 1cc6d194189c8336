// Database models for the image collection store
//
// - A collection is a named, owned container of images with one fixed import method
// - Images and metadata files belong to exactly one collection
// - Aggregate counters are cached on the collection row and only moved through
//   `CounterCache`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Type;
use uuid::Uuid;

// String constants for SQL DEFAULT clauses (keep in sync with as_str())
pub(crate) const IMPORT_STATUS_IMPORTING: &str = "importing";
pub(crate) const IMPORT_STATUS_READY: &str = "ready";

/// Source used to populate a collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportMethod {
    Uploaded,
    Job,
    Catalog,
    BackendImport,
    S3Import,
    GdriveImport,
}

impl ImportMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportMethod::Uploaded => "uploaded",
            ImportMethod::Job => "job",
            ImportMethod::Catalog => "catalog",
            ImportMethod::BackendImport => "backend_import",
            ImportMethod::S3Import => "s3_import",
            ImportMethod::GdriveImport => "gdrive_import",
        }
    }

    /// True for methods populated asynchronously through a `SourceConnector`
    pub fn uses_connector(&self) -> bool {
        matches!(
            self,
            ImportMethod::BackendImport | ImportMethod::S3Import | ImportMethod::GdriveImport
        )
    }
}

/// Stored import status of a collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ImportStatus {
    Importing, // Connector import launched, file list not fully registered yet
    Ready,     // No import loop running
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::Importing => IMPORT_STATUS_IMPORTING,
            ImportStatus::Ready => IMPORT_STATUS_READY,
        }
    }
}

/// State reported to clients, derived from the stored status and the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CollectionState {
    Importing,
    ImportFailed,
    Ready,
}

/// Cached aggregates of a collection (read-only to clients)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionCounters {
    pub number_of_images: i64,
    pub images_total_size: i64,
    pub number_importing_images: i64,
    pub number_of_import_errors: i64,
    pub number_of_metadata_files: i64,
    pub metadata_files_total_size: i64,
}

/// Signed increments applied atomically to `CollectionCounters`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterDelta {
    pub images: i64,
    pub images_size: i64,
    pub importing: i64,
    pub import_errors: i64,
    pub metadata_files: i64,
    pub metadata_size: i64,
}

impl CounterDelta {
    /// A new image entered the collection, still importing
    pub fn image_registered(size_bytes: i64) -> Self {
        CounterDelta {
            images: 1,
            images_size: size_bytes,
            importing: 1,
            ..Default::default()
        }
    }

    /// Size of an image became known after its bytes were fetched
    pub fn size_resolved(size_bytes: i64) -> Self {
        CounterDelta {
            images_size: size_bytes,
            ..Default::default()
        }
    }

    /// An importing image finished, successfully or not
    pub fn import_finished(failed: bool) -> Self {
        CounterDelta {
            importing: -1,
            import_errors: if failed { 1 } else { 0 },
            ..Default::default()
        }
    }

    pub fn metadata_file_added(size_bytes: i64) -> Self {
        CounterDelta {
            metadata_files: 1,
            metadata_size: size_bytes,
            ..Default::default()
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == CounterDelta::default()
    }
}

/// Image collection record
///
/// `owner`, `creation_date`, `import_method`, `source_job` and `source_catalog`
/// never change after creation. Source credentials are write-only: they are
/// accepted on input but never serialized back out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DbCollection {
    pub id: String,
    pub name: String,
    pub owner: String,
    pub creation_date: DateTime<Utc>,
    pub import_method: ImportMethod,
    pub source_job: Option<String>,
    pub source_catalog: Option<String>,
    /// Backend path for BACKEND_IMPORT
    pub source_backend_import: Option<String>,
    pub notes: Option<String>,
    pub pattern: Option<String>,
    pub locked: bool,
    pub publicly_shared: bool,

    pub s3_bucket_name: Option<String>,
    pub s3_folder_name: Option<String>,
    #[serde(skip_serializing, default)]
    pub s3_access_key_id: Option<String>,
    #[serde(skip_serializing, default)]
    pub s3_secret_access_key: Option<String>,
    pub s3_file_extensions: Option<String>,
    #[serde(default)]
    pub s3_recursive: bool,

    #[serde(skip_serializing, default)]
    pub gdrive_code: Option<String>,
    pub gdrive_folder_name: Option<String>,
    pub gdrive_file_extensions: Option<String>,
    #[serde(default)]
    pub gdrive_recursive: bool,

    pub import_status: ImportStatus,
    #[serde(flatten)]
    pub counters: CollectionCounters,
}

impl DbCollection {
    /// Derived lifecycle state
    pub fn state(&self) -> CollectionState {
        if self.import_status == ImportStatus::Importing
            || self.counters.number_importing_images > 0
        {
            CollectionState::Importing
        } else if self.counters.number_of_import_errors > 0 {
            CollectionState::ImportFailed
        } else {
            CollectionState::Ready
        }
    }
}

/// Image registered in a collection
///
/// Created by the import pipeline with `importing = true`; the conversion
/// pipeline later clears `importing` and may set `import_error`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DbImage {
    pub id: String,
    pub collection_id: String,
    pub file_name: String,
    pub original_file_name: String,
    pub size_bytes: i64,
    pub importing: bool,
    pub import_error: bool,
    pub created_at: DateTime<Utc>,
}

impl DbImage {
    pub fn new_importing(collection_id: &str, file_name: &str, size_bytes: i64) -> Self {
        DbImage {
            id: Uuid::new_v4().to_string(),
            collection_id: collection_id.to_string(),
            file_name: file_name.to_string(),
            original_file_name: file_name.to_string(),
            size_bytes,
            importing: true,
            import_error: false,
            created_at: Utc::now(),
        }
    }
}

/// Metadata file (stage positions, acquisition logs, ...) attached to a collection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DbMetadataFile {
    pub id: String,
    pub collection_id: String,
    pub file_name: String,
    pub size_bytes: i64,
    pub created_at: DateTime<Utc>,
}

impl DbMetadataFile {
    pub fn new(collection_id: &str, file_name: &str, size_bytes: i64) -> Self {
        DbMetadataFile {
            id: Uuid::new_v4().to_string(),
            collection_id: collection_id.to_string(),
            file_name: file_name.to_string(),
            size_bytes,
            created_at: Utc::now(),
        }
    }
}
