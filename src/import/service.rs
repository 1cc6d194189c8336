// # Import Orchestrator
//
// Drives one connector-backed import from listing to the last file:
//
// 1. Build the connector for the collection's import method
// 2. List. Any failure here rolls the whole collection back
// 3. Per file, in order: register image -> count it -> fetch -> stage -> submit
// 4. Mark the collection ready
//
// A per-file failure is recorded on that image and the loop moves on.

use crate::access::Caller;
use crate::connectors::{ConnectorError, ConnectorFactory, FileRef, ListRequest, SourceConnector};
use crate::counters::CounterCache;
use crate::db::{CounterDelta, Database, DbCollection, DbImage, ImportStatus};
use crate::import::conversion::{
    ConversionCompletion, ConversionOutcome, ConversionPipeline, ConversionRequest,
};
use crate::import::types::{FileImportError, ImportProgress, ImportSummary};
use crate::library::CollectionError;
use crate::storage::CollectionStorage;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

pub struct ImportOrchestrator {
    database: Database,
    counters: CounterCache,
    storage: CollectionStorage,
    connectors: Arc<dyn ConnectorFactory>,
    pipeline: Arc<dyn ConversionPipeline>,
    progress_tx: mpsc::UnboundedSender<ImportProgress>,
}

impl ImportOrchestrator {
    pub fn new(
        database: Database,
        counters: CounterCache,
        storage: CollectionStorage,
        connectors: Arc<dyn ConnectorFactory>,
        pipeline: Arc<dyn ConversionPipeline>,
        progress_tx: mpsc::UnboundedSender<ImportProgress>,
    ) -> Self {
        ImportOrchestrator {
            database,
            counters,
            storage,
            connectors,
            pipeline,
            progress_tx,
        }
    }

    fn emit(&self, progress: ImportProgress) {
        // No dispatcher means nobody is listening
        let _ = self.progress_tx.send(progress);
    }

    /// Populate a freshly created collection from its source.
    ///
    /// Returns `CollectionError::Import` after rolling the collection back when
    /// the source cannot be listed or holds nothing to import.
    pub async fn run_import(
        &self,
        collection: &DbCollection,
        caller: &Caller,
    ) -> Result<ImportSummary, CollectionError> {
        info!(
            "Starting {} import for collection '{}' ({})",
            collection.import_method.as_str(),
            collection.name,
            collection.id
        );

        let (connector, files) = match self.list_source(collection, caller).await {
            Ok(listing) => listing,
            Err(e) => {
                let reason = e.to_string();
                self.rollback(collection, &reason).await?;
                return Err(CollectionError::Import(reason));
            }
        };

        let total = files.len();
        info!("Importing {} files into '{}'", total, collection.name);
        self.emit(ImportProgress::Started {
            collection_id: collection.id.clone(),
            total,
        });

        let mut imported = 0;
        let mut failed = 0;
        for file in &files {
            match self.import_file(collection, connector.as_ref(), file).await {
                Ok(image_id) => {
                    imported += 1;
                    self.emit(ImportProgress::FileRegistered {
                        collection_id: collection.id.clone(),
                        image_id,
                        file_name: file.name.clone(),
                    });
                }
                Err(e) => {
                    failed += 1;
                    warn!("Failed to import {}: {}", file.locator, e);
                    self.emit(ImportProgress::FileFailed {
                        collection_id: collection.id.clone(),
                        file_name: file.name.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        self.database
            .update_collection_status(&collection.id, ImportStatus::Ready)
            .await?;

        info!(
            "Import of '{}' finished: {} imported, {} failed",
            collection.name, imported, failed
        );
        self.emit(ImportProgress::Complete {
            collection_id: collection.id.clone(),
            imported,
            failed,
        });

        Ok(ImportSummary {
            collection_id: collection.id.clone(),
            imported,
            failed,
        })
    }

    async fn list_source(
        &self,
        collection: &DbCollection,
        caller: &Caller,
    ) -> Result<(Arc<dyn SourceConnector>, Vec<FileRef>), ConnectorError> {
        let request = ListRequest::from_collection(collection)?;
        let connector = self.connectors.connector_for(collection, caller).await?;
        let files = connector.list(&request).await?;
        if files.is_empty() {
            return Err(ConnectorError::EmptyFolder(format!(
                "'{}' is empty.",
                request.folder
            )));
        }
        Ok((connector, files))
    }

    /// Delete everything the collection owns, including the record itself
    async fn rollback(
        &self,
        collection: &DbCollection,
        reason: &str,
    ) -> Result<(), CollectionError> {
        warn!(
            "Rolling back collection '{}' ({}): {}",
            collection.name, collection.id, reason
        );

        self.database
            .delete_images_for_collection(&collection.id)
            .await?;
        self.database
            .delete_metadata_files_for_collection(&collection.id)
            .await?;
        self.database.delete_collection(&collection.id).await?;
        self.counters.forget(&collection.id);
        self.storage.remove_collection_folders(&collection.id).await;

        self.emit(ImportProgress::RolledBack {
            collection_id: collection.id.clone(),
            reason: reason.to_string(),
        });
        Ok(())
    }

    /// Register, fetch, stage and submit one file.
    ///
    /// The image is counted before its bytes are fetched. Any failure after
    /// registration finishes the image with an error.
    async fn import_file(
        &self,
        collection: &DbCollection,
        connector: &dyn SourceConnector,
        file: &FileRef,
    ) -> Result<String, FileImportError> {
        let known_size = file.size.and_then(|s| i64::try_from(s).ok()).unwrap_or(0);
        let image = DbImage::new_importing(&collection.id, &file.name, known_size);
        self.counters.register_image(&image).await?;

        if let Err(e) = self.transfer(collection, connector, file, &image).await {
            if let Err(finish_error) = self
                .counters
                .finish_image(&collection.id, &image.id, true)
                .await
            {
                error!(
                    "Could not record import error on image {}: {}",
                    image.id, finish_error
                );
            }
            return Err(e);
        }

        Ok(image.id)
    }

    async fn transfer(
        &self,
        collection: &DbCollection,
        connector: &dyn SourceConnector,
        file: &FileRef,
        image: &DbImage,
    ) -> Result<(), FileImportError> {
        let data = connector.fetch(file).await?;

        if file.size.is_none() {
            let size = i64::try_from(data.len()).unwrap_or(i64::MAX);
            self.database.update_image_size(&image.id, size).await?;
            self.counters
                .apply_delta(&collection.id, CounterDelta::size_resolved(size))
                .await?;
        }

        let source_path = self
            .storage
            .stage_file(&collection.id, &file.name, &data)
            .await?;

        let request = ConversionRequest {
            collection_id: collection.id.clone(),
            image: image.clone(),
            source_path,
            completion: ConversionCompletion::new(
                self.counters.clone(),
                &collection.id,
                &image.id,
            ),
        };
        self.pipeline
            .submit(request)
            .await
            .map_err(|e| FileImportError::Submit(e.to_string()))
    }

    /// Conversion callback by image id.
    ///
    /// Returns false if the image had already finished importing.
    pub async fn complete_conversion(
        &self,
        image_id: &str,
        outcome: ConversionOutcome,
    ) -> Result<bool, CollectionError> {
        let image = self
            .database
            .get_image_by_id(image_id)
            .await?
            .ok_or_else(|| CollectionError::NotFound(format!("Image {} not found", image_id)))?;

        let completion =
            ConversionCompletion::new(self.counters.clone(), &image.collection_id, &image.id);
        Ok(completion.complete(outcome).await?)
    }
}
