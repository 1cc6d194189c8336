// # Import Handle
//
// Launches connector-backed imports as independent background tasks and keeps
// their join handles so callers can optionally wait for one to finish.

use crate::access::Caller;
use crate::connectors::ConnectorFactory;
use crate::counters::CounterCache;
use crate::db::{Database, DbCollection};
use crate::import::conversion::{ConversionOutcome, ConversionPipeline};
use crate::import::progress::ImportProgressHandle;
use crate::import::service::ImportOrchestrator;
use crate::import::types::{ImportProgress, ImportSummary};
use crate::library::CollectionError;
use crate::storage::CollectionStorage;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

type ImportTask = JoinHandle<Result<ImportSummary, CollectionError>>;

/// Handle for launching imports and subscribing to their progress
#[derive(Clone)]
pub struct ImportHandle {
    orchestrator: Arc<ImportOrchestrator>,
    progress_handle: ImportProgressHandle,
    runtime_handle: tokio::runtime::Handle,
    tasks: Arc<Mutex<HashMap<String, ImportTask>>>,
}

impl ImportHandle {
    /// Build the orchestrator and its progress dispatcher on the given runtime
    pub fn start(
        database: Database,
        counters: CounterCache,
        storage: CollectionStorage,
        connectors: Arc<dyn ConnectorFactory>,
        pipeline: Arc<dyn ConversionPipeline>,
        runtime_handle: tokio::runtime::Handle,
    ) -> Self {
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let orchestrator = ImportOrchestrator::new(
            database,
            counters,
            storage,
            connectors,
            pipeline,
            progress_tx,
        );
        let progress_handle = ImportProgressHandle::new(progress_rx, runtime_handle.clone());

        ImportHandle {
            orchestrator: Arc::new(orchestrator),
            progress_handle,
            runtime_handle,
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Spawn the import of a collection and return immediately
    pub fn launch(&self, collection: DbCollection, caller: Caller) {
        let collection_id = collection.id.clone();
        let orchestrator = self.orchestrator.clone();

        let task = self.runtime_handle.spawn(async move {
            let result = orchestrator.run_import(&collection, &caller).await;
            if let Err(e) = &result {
                warn!("Import of collection {} did not run: {}", collection.id, e);
            }
            result
        });

        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        // Nobody waits on most imports; drop the ones that already finished
        tasks.retain(|_, task| !task.is_finished());
        tasks.insert(collection_id.clone(), task);
        drop(tasks);
        info!("Queued import for collection {}", collection_id);
    }

    /// Wait for a launched import to finish.
    ///
    /// Returns None if no import was launched for the collection, if it was
    /// already waited for, or if it finished before a later launch pruned it.
    pub async fn wait(
        &self,
        collection_id: &str,
    ) -> Option<Result<ImportSummary, CollectionError>> {
        let task = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(collection_id)?;

        Some(match task.await {
            Ok(result) => result,
            Err(e) => Err(CollectionError::Import(format!("Import task failed: {}", e))),
        })
    }

    /// Whether an import for the collection is still running
    pub fn is_running(&self, collection_id: &str) -> bool {
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(collection_id)
            .is_some_and(|task| !task.is_finished())
    }

    /// Number of import tasks still held for `wait`
    pub fn tracked_imports(&self) -> usize {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Conversion callback for pipelines that only know the image id
    pub async fn complete_conversion(
        &self,
        image_id: &str,
        outcome: ConversionOutcome,
    ) -> Result<bool, CollectionError> {
        self.orchestrator.complete_conversion(image_id, outcome).await
    }

    /// Subscribe to progress updates for a specific collection
    pub fn subscribe_collection(
        &self,
        collection_id: String,
    ) -> mpsc::UnboundedReceiver<ImportProgress> {
        self.progress_handle.subscribe_collection(collection_id)
    }

    /// Subscribe to progress updates of every import
    pub fn subscribe_all(&self) -> mpsc::UnboundedReceiver<ImportProgress> {
        self.progress_handle.subscribe_all()
    }
}
