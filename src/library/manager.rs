use crate::access::{AccessControl, Caller, OwnerOrAdmin};
use crate::config::Config;
use crate::connectors::{ConnectorFactory, LocalFolderConnector};
use crate::counters::CounterCache;
use crate::db::{Database, DbCollection, DbImage, DbMetadataFile, ImportMethod};
use crate::import::{ConversionPipeline, ImportHandle};
use crate::library::types::{CollectionDraft, CollectionPatch};
use crate::library::validation;
use crate::storage::{CleanupReport, CollectionStorage};
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum CollectionError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    /// Listing the import source failed; the collection was rolled back
    #[error("{0}")]
    Import(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CollectionError {
    /// Caused by the request rather than by the service
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            CollectionError::Validation(_)
                | CollectionError::NotFound(_)
                | CollectionError::Forbidden(_)
                | CollectionError::Import(_)
        )
    }
}

fn not_found(collection_id: &str) -> CollectionError {
    CollectionError::NotFound(format!(
        "Image collection with id {} not found",
        collection_id
    ))
}

/// Map UNIQUE violations on insert/update to client errors
fn unique_violation(e: sqlx::Error, collection: &DbCollection) -> CollectionError {
    match &e {
        sqlx::Error::Database(db_error) if db_error.is_unique_violation() => {
            if db_error.message().contains("source_job") {
                CollectionError::Validation(format!(
                    "A collection already exists for job {}.",
                    collection.source_job.as_deref().unwrap_or_default()
                ))
            } else {
                CollectionError::Validation(format!(
                    "An images collection named '{}' already exists.",
                    collection.name
                ))
            }
        }
        _ => CollectionError::Database(e),
    }
}

/// Lifecycle gates for image collections
///
/// Handles:
/// - create/update/delete validation and authorization
/// - launching connector imports after a successful create
/// - cascade cleanup after delete
/// - direct uploads of images and metadata files
#[derive(Clone)]
pub struct CollectionManager {
    database: Database,
    counters: CounterCache,
    storage: CollectionStorage,
    imports: ImportHandle,
    access: Arc<dyn AccessControl>,
    local_sources: LocalFolderConnector,
}

impl CollectionManager {
    pub fn new(
        database: Database,
        counters: CounterCache,
        storage: CollectionStorage,
        imports: ImportHandle,
        access: Arc<dyn AccessControl>,
        local_sources: LocalFolderConnector,
    ) -> Self {
        CollectionManager {
            database,
            counters,
            storage,
            imports,
            access,
            local_sources,
        }
    }

    /// Open the database and wire every collaborator from configuration
    pub async fn open(
        config: &Config,
        connectors: Arc<dyn ConnectorFactory>,
        pipeline: Arc<dyn ConversionPipeline>,
        runtime_handle: tokio::runtime::Handle,
    ) -> Result<Self, CollectionError> {
        if let Some(parent) = config.database_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let database = Database::new(&config.database_path.to_string_lossy()).await?;
        let counters = CounterCache::new(database.clone());
        let storage = CollectionStorage::new(config);
        let imports = ImportHandle::start(
            database.clone(),
            counters.clone(),
            storage.clone(),
            connectors,
            pipeline,
            runtime_handle,
        );

        Ok(CollectionManager::new(
            database,
            counters,
            storage,
            imports,
            Arc::new(OwnerOrAdmin),
            LocalFolderConnector::new(config.local_import_root.clone()),
        ))
    }

    pub fn imports(&self) -> &ImportHandle {
        &self.imports
    }

    pub fn counters(&self) -> &CounterCache {
        &self.counters
    }

    pub fn storage(&self) -> &CollectionStorage {
        &self.storage
    }

    async fn find(&self, collection_id: &str) -> Result<DbCollection, CollectionError> {
        self.database
            .get_collection_by_id(collection_id)
            .await?
            .ok_or_else(|| not_found(collection_id))
    }

    async fn assert_name_unique(
        &self,
        name: &str,
        excluding_id: Option<&str>,
    ) -> Result<(), CollectionError> {
        if self.database.collection_name_exists(name, excluding_id).await? {
            return Err(CollectionError::Validation(format!(
                "An images collection named '{}' already exists.",
                name
            )));
        }
        Ok(())
    }

    /// Turn a draft into the collection to persist.
    ///
    /// Stamps owner and creation date from the caller, defaults the import
    /// method to UPLOADED and locks CATALOG collections.
    pub async fn validate_create(
        &self,
        caller: &Caller,
        draft: CollectionDraft,
    ) -> Result<DbCollection, CollectionError> {
        let collection = draft.into_collection(&caller.user_id, Utc::now());

        validation::check_new_collection(&collection)?;
        self.assert_name_unique(&collection.name, None).await?;

        if let Some(job_id) = &collection.source_job {
            if self.database.get_collection_by_source_job(job_id).await?.is_some() {
                return Err(CollectionError::Validation(format!(
                    "A collection already exists for job {}.",
                    job_id
                )));
            }
        }

        if collection.import_method == ImportMethod::BackendImport {
            let folder = collection.source_backend_import.as_deref().unwrap_or_default();
            self.local_sources
                .resolve(folder)
                .await
                .map_err(|e| CollectionError::Validation(e.to_string()))?;
        }

        Ok(collection)
    }

    /// Validate, persist and, for connector-backed methods, launch the import.
    ///
    /// Returns as soon as the record exists; the import runs in the background.
    pub async fn create_collection(
        &self,
        caller: &Caller,
        draft: CollectionDraft,
    ) -> Result<DbCollection, CollectionError> {
        let collection = self.validate_create(caller, draft).await?;

        self.database
            .insert_collection(&collection)
            .await
            .map_err(|e| unique_violation(e, &collection))?;

        info!(
            "Created {} collection '{}' ({}) for {}",
            collection.import_method.as_str(),
            collection.name,
            collection.id,
            collection.owner
        );

        if collection.import_method.uses_connector() {
            self.imports.launch(collection.clone(), caller.clone());
        }

        Ok(collection)
    }

    /// Gate an update from `old` to `new`.
    ///
    /// `old` must be a snapshot read while holding the collection's counter
    /// guard when the update locks the collection.
    pub async fn validate_update(
        &self,
        old: &DbCollection,
        new: &DbCollection,
    ) -> Result<(), CollectionError> {
        validation::check_sharing(old, new)?;
        validation::check_immutable_fields(old, new)?;

        if new.name.is_empty() {
            return Err(CollectionError::Validation(
                "Collection name is required.".to_string(),
            ));
        }
        if new.name != old.name {
            self.assert_name_unique(&new.name, Some(&old.id)).await?;
        }

        if validation::check_lock_transition(old, new)? {
            validation::check_lockable(old)?;
        }
        Ok(())
    }

    /// Apply a patch as one validated new state
    pub async fn update_collection(
        &self,
        caller: &Caller,
        collection_id: &str,
        patch: CollectionPatch,
    ) -> Result<DbCollection, CollectionError> {
        // Counter writers hold the same guard, so the importing/error snapshot
        // cannot move between the lock decision and the write
        let _guard = self.counters.lock(collection_id).await;

        let old = self.find(collection_id).await?;
        if !self.access.can_update(caller, &old) {
            return Err(CollectionError::Forbidden(format!(
                "Not allowed to update collection {}",
                collection_id
            )));
        }

        let new = patch.apply_to(&old);
        self.validate_update(&old, &new).await?;

        if !self
            .database
            .update_collection(&new)
            .await
            .map_err(|e| unique_violation(e, &new))?
        {
            return Err(not_found(collection_id));
        }

        if new.locked && !old.locked {
            info!("Locked collection '{}' ({})", new.name, new.id);
        }
        if new.publicly_shared && !old.publicly_shared {
            info!("Collection '{}' ({}) is now public", new.name, new.id);
        }

        Ok(new)
    }

    /// Existence and authorization check before a delete
    pub async fn validate_delete(
        &self,
        caller: &Caller,
        collection_id: &str,
    ) -> Result<DbCollection, CollectionError> {
        let collection = self.find(collection_id).await?;
        if !self.access.can_delete(caller, &collection) {
            return Err(CollectionError::Forbidden(format!(
                "Not allowed to delete collection {}",
                collection_id
            )));
        }
        Ok(collection)
    }

    /// Delete the record, then everything it owns
    pub async fn delete_collection(
        &self,
        caller: &Caller,
        collection_id: &str,
    ) -> Result<CleanupReport, CollectionError> {
        let collection = self.validate_delete(caller, collection_id).await?;

        if !self.database.delete_collection(collection_id).await? {
            return Err(not_found(collection_id));
        }
        info!("Deleted collection '{}' ({})", collection.name, collection.id);

        self.after_delete(&collection).await
    }

    /// Cascade to images and metadata files, then remove folders.
    ///
    /// Folder removal is best effort; failures are logged and reported only.
    pub async fn after_delete(
        &self,
        collection: &DbCollection,
    ) -> Result<CleanupReport, CollectionError> {
        let images = self
            .database
            .delete_images_for_collection(&collection.id)
            .await?;
        let metadata_files = self
            .database
            .delete_metadata_files_for_collection(&collection.id)
            .await?;
        self.counters.forget(&collection.id);

        let report = self.storage.remove_collection_folders(&collection.id).await;
        if !report.failed.is_empty() {
            warn!(
                "Collection {} deleted but {} folder(s) could not be removed",
                collection.id,
                report.failed.len()
            );
        }
        info!(
            "Cleaned up collection {}: {} images, {} metadata files, {} folders",
            collection.id,
            images,
            metadata_files,
            report.removed.len()
        );

        Ok(report)
    }

    pub async fn get_collection(
        &self,
        caller: &Caller,
        collection_id: &str,
    ) -> Result<DbCollection, CollectionError> {
        let collection = self.find(collection_id).await?;
        if !self.access.can_read(caller, &collection) {
            // Hidden collections look the same as missing ones
            return Err(not_found(collection_id));
        }
        Ok(collection)
    }

    /// Every collection the caller may read
    pub async fn list_collections(
        &self,
        caller: &Caller,
    ) -> Result<Vec<DbCollection>, CollectionError> {
        let collections = self.database.get_collections().await?;
        Ok(collections
            .into_iter()
            .filter(|c| self.access.can_read(caller, c))
            .collect())
    }

    pub async fn list_images(
        &self,
        caller: &Caller,
        collection_id: &str,
    ) -> Result<Vec<DbImage>, CollectionError> {
        self.get_collection(caller, collection_id).await?;
        Ok(self.database.get_images_for_collection(collection_id).await?)
    }

    pub async fn list_metadata_files(
        &self,
        caller: &Caller,
        collection_id: &str,
    ) -> Result<Vec<DbMetadataFile>, CollectionError> {
        self.get_collection(caller, collection_id).await?;
        Ok(self
            .database
            .get_metadata_files_for_collection(collection_id)
            .await?)
    }

    /// The collection created for a pipeline job, if any
    pub async fn find_by_source_job(
        &self,
        caller: &Caller,
        job_id: &str,
    ) -> Result<Option<DbCollection>, CollectionError> {
        Ok(self
            .database
            .get_collection_by_source_job(job_id)
            .await?
            .filter(|c| self.access.can_read(caller, c)))
    }

    async fn find_writable(
        &self,
        caller: &Caller,
        collection_id: &str,
    ) -> Result<DbCollection, CollectionError> {
        let collection = self.find(collection_id).await?;
        if !self.access.can_update(caller, &collection) {
            return Err(CollectionError::Forbidden(format!(
                "Not allowed to modify collection {}",
                collection_id
            )));
        }
        if collection.locked {
            return Err(CollectionError::Validation(
                "Collection is locked, no files can be added.".to_string(),
            ));
        }
        // Connector-backed and derived collections are only filled by their import
        if collection.import_method != ImportMethod::Uploaded {
            return Err(CollectionError::Validation(format!(
                "Files can not be added to a {} collection.",
                collection.import_method.as_str()
            )));
        }
        Ok(collection)
    }

    /// Register a directly uploaded image; it stays importing until converted.
    ///
    /// Only UPLOADED collections accept direct files.
    pub async fn register_uploaded_image(
        &self,
        caller: &Caller,
        collection_id: &str,
        file_name: &str,
        size_bytes: i64,
    ) -> Result<DbImage, CollectionError> {
        // Held across the lock check so a concurrent lock cannot slip in
        let guard = self.counters.lock(collection_id).await;
        self.find_writable(caller, collection_id).await?;

        let image = DbImage::new_importing(collection_id, file_name, size_bytes);
        self.counters.register_image_locked(&guard, &image).await?;
        Ok(image)
    }

    /// Attach a metadata file to an unlocked UPLOADED collection
    pub async fn add_metadata_file(
        &self,
        caller: &Caller,
        collection_id: &str,
        file_name: &str,
        size_bytes: i64,
    ) -> Result<DbMetadataFile, CollectionError> {
        let guard = self.counters.lock(collection_id).await;
        self.find_writable(caller, collection_id).await?;

        let file = DbMetadataFile::new(collection_id, file_name, size_bytes);
        self.counters.register_metadata_file_locked(&guard, &file).await?;
        Ok(file)
    }
}
