use crate::import::types::ImportProgress;
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};
use tokio::sync::mpsc as tokio_mpsc;
use tracing::info;

type SubscriptionId = u64;

/// Filter criteria for progress subscriptions
#[derive(Debug, Clone)]
enum SubscriptionFilter {
    Collection { collection_id: String },
    All,
}

impl SubscriptionFilter {
    fn matches(&self, progress: &ImportProgress) -> bool {
        match self {
            SubscriptionFilter::Collection { collection_id } => {
                progress.collection_id() == collection_id
            }
            SubscriptionFilter::All => true,
        }
    }
}

struct Subscription {
    filter: SubscriptionFilter,
    tx: tokio_mpsc::UnboundedSender<ImportProgress>,
}

/// Handle for subscribing to import progress updates
#[derive(Clone)]
pub struct ImportProgressHandle {
    subscriptions: Arc<Mutex<HashMap<SubscriptionId, Subscription>>>,
    next_id: Arc<AtomicU64>,
}

impl ImportProgressHandle {
    /// Create a new progress handle and spawn background task to process progress updates
    pub fn new(
        mut progress_rx: tokio_mpsc::UnboundedReceiver<ImportProgress>,
        runtime_handle: tokio::runtime::Handle,
    ) -> Self {
        let subscriptions: Arc<Mutex<HashMap<SubscriptionId, Subscription>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let subscriptions_clone = subscriptions.clone();

        runtime_handle.spawn(async move {
            while let Some(progress) = progress_rx.recv().await {
                let mut subs = subscriptions_clone
                    .lock()
                    .unwrap_or_else(|e| e.into_inner());
                let mut to_remove = Vec::new();

                for (id, subscription) in subs.iter() {
                    if subscription.filter.matches(&progress) {
                        // Receiver dropped
                        if subscription.tx.send(progress.clone()).is_err() {
                            to_remove.push(*id);
                        }
                    }
                }

                for id in to_remove {
                    subs.remove(&id);
                }
            }
            info!("Progress channel closed, exiting");
        });

        Self {
            subscriptions,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    fn subscribe(&self, filter: SubscriptionFilter) -> tokio_mpsc::UnboundedReceiver<ImportProgress> {
        let (tx, rx) = tokio_mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, Subscription { filter, tx });
        rx
    }

    /// Subscribe to progress updates for one collection.
    /// The subscription is removed once the receiver is dropped.
    pub fn subscribe_collection(
        &self,
        collection_id: String,
    ) -> tokio_mpsc::UnboundedReceiver<ImportProgress> {
        self.subscribe(SubscriptionFilter::Collection { collection_id })
    }

    /// Subscribe to progress updates of every import
    pub fn subscribe_all(&self) -> tokio_mpsc::UnboundedReceiver<ImportProgress> {
        self.subscribe(SubscriptionFilter::All)
    }
}
