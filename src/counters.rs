use crate::db::{CollectionCounters, CounterDelta, Database, DbImage, DbMetadataFile};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

/// Serialized access to the cached counters of each collection.
///
/// Every counter write for a collection happens while holding that
/// collection's guard, so increments from concurrent file completions are
/// applied one at a time. Different collections use different guards and never
/// wait on each other. The guard is also what lifecycle decisions (locking)
/// hold to read a consistent snapshot.
#[derive(Debug, Clone)]
pub struct CounterCache {
    database: Database,
    guards: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

/// Exclusive access to one collection's counters
pub struct CounterGuard {
    collection_id: String,
    _guard: OwnedMutexGuard<()>,
}

impl CounterGuard {
    pub fn collection_id(&self) -> &str {
        &self.collection_id
    }
}

impl CounterCache {
    pub fn new(database: Database) -> Self {
        CounterCache {
            database,
            guards: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn guard_for(&self, collection_id: &str) -> Arc<AsyncMutex<()>> {
        let mut guards = self.guards.lock().unwrap_or_else(|e| e.into_inner());
        guards
            .entry(collection_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Take the single-writer guard of a collection
    pub async fn lock(&self, collection_id: &str) -> CounterGuard {
        let guard = self.guard_for(collection_id).lock_owned().await;
        CounterGuard {
            collection_id: collection_id.to_string(),
            _guard: guard,
        }
    }

    /// Apply a delta to a collection's counters.
    ///
    /// Returns the counters after the increment, or None if the collection no
    /// longer exists.
    pub async fn apply_delta(
        &self,
        collection_id: &str,
        delta: CounterDelta,
    ) -> Result<Option<CollectionCounters>, sqlx::Error> {
        let guard = self.lock(collection_id).await;
        self.apply_delta_locked(&guard, delta).await
    }

    /// Apply a delta while already holding the collection's guard
    pub async fn apply_delta_locked(
        &self,
        guard: &CounterGuard,
        delta: CounterDelta,
    ) -> Result<Option<CollectionCounters>, sqlx::Error> {
        if delta.is_zero() {
            return self.database.get_counters(guard.collection_id()).await;
        }

        let counters = self
            .database
            .apply_counter_delta(guard.collection_id(), &delta)
            .await?;

        match &counters {
            Some(counters) => debug!(
                "Counters for {}: {} images ({} importing, {} errors)",
                guard.collection_id(),
                counters.number_of_images,
                counters.number_importing_images,
                counters.number_of_import_errors
            ),
            None => warn!(
                "Dropped counter delta for missing collection {}",
                guard.collection_id()
            ),
        }

        Ok(counters)
    }

    /// Insert an image record and count it, in that order, under the guard.
    ///
    /// A reader never observes a counted image without its record.
    pub async fn register_image(
        &self,
        image: &DbImage,
    ) -> Result<Option<CollectionCounters>, sqlx::Error> {
        let guard = self.lock(&image.collection_id).await;
        self.register_image_locked(&guard, image).await
    }

    /// `register_image` for a caller already holding the collection's guard
    pub async fn register_image_locked(
        &self,
        guard: &CounterGuard,
        image: &DbImage,
    ) -> Result<Option<CollectionCounters>, sqlx::Error> {
        self.database.insert_image(image).await?;
        self.apply_delta_locked(guard, CounterDelta::image_registered(image.size_bytes))
            .await
    }

    /// Insert a metadata file record and count it
    pub async fn register_metadata_file(
        &self,
        file: &DbMetadataFile,
    ) -> Result<Option<CollectionCounters>, sqlx::Error> {
        let guard = self.lock(&file.collection_id).await;
        self.register_metadata_file_locked(&guard, file).await
    }

    pub async fn register_metadata_file_locked(
        &self,
        guard: &CounterGuard,
        file: &DbMetadataFile,
    ) -> Result<Option<CollectionCounters>, sqlx::Error> {
        self.database.insert_metadata_file(file).await?;
        self.apply_delta_locked(guard, CounterDelta::metadata_file_added(file.size_bytes))
            .await
    }

    /// Clear an image's importing flag and move the counters accordingly.
    ///
    /// At most once per image: returns false without touching the counters if
    /// the image had already finished.
    pub async fn finish_image(
        &self,
        collection_id: &str,
        image_id: &str,
        failed: bool,
    ) -> Result<bool, sqlx::Error> {
        let guard = self.lock(collection_id).await;
        if !self.database.finish_image_import(image_id, failed).await? {
            return Ok(false);
        }
        self.apply_delta_locked(&guard, CounterDelta::import_finished(failed))
            .await?;
        Ok(true)
    }

    /// Rebuild every counter of a collection from its image and metadata records
    pub async fn recompute(
        &self,
        collection_id: &str,
    ) -> Result<Option<CollectionCounters>, sqlx::Error> {
        let _guard = self.lock(collection_id).await;
        let counters = self.database.compute_counters(collection_id).await?;
        if self.database.set_counters(collection_id, &counters).await? {
            Ok(Some(counters))
        } else {
            Ok(None)
        }
    }

    /// Forget the guard of a deleted collection
    pub fn forget(&self, collection_id: &str) {
        let mut guards = self.guards.lock().unwrap_or_else(|e| e.into_inner());
        guards.remove(collection_id);
    }
}
