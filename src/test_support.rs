// Test support utilities for both unit and integration tests

use crate::access::Caller;
use crate::connectors::{
    select_files, ConnectorError, ConnectorFactory, FileRef, ListRequest, SourceConnector,
};
use crate::db::{DbCollection, ImportMethod};
use crate::import::{ConversionError, ConversionOutcome, ConversionPipeline, ConversionRequest};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// In-memory import source
///
/// Lists the files it was given (extension filter applied) and serves their
/// bytes. Listing or individual fetches can be made to fail.
#[derive(Default)]
pub struct MockConnector {
    files: Vec<FileRef>,
    data: HashMap<String, Vec<u8>>,
    failing_fetches: HashSet<String>,
    list_failure: Option<String>,
    fetches: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A file whose size the listing reports
    pub fn with_file(mut self, name: &str, data: &[u8]) -> Self {
        self.push(name, data, Some(data.len() as u64));
        self
    }

    /// A file whose size is only known once fetched (drive-style listings)
    pub fn with_unsized_file(mut self, name: &str, data: &[u8]) -> Self {
        self.push(name, data, None);
        self
    }

    /// A listed file whose fetch fails
    pub fn with_failing_file(mut self, name: &str) -> Self {
        self.push(name, b"", Some(1));
        self.failing_fetches.insert(name.to_string());
        self
    }

    /// Listing fails with `ConnectorError::NotFound(message)`
    pub fn failing_list(message: &str) -> Self {
        MockConnector {
            list_failure: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn push(&mut self, name: &str, data: &[u8], size: Option<u64>) {
        let locator = format!("mock://{}/{}", self.files.len(), name);
        self.data.insert(locator.clone(), data.to_vec());
        self.files.push(FileRef {
            locator,
            name: name.to_string(),
            size,
        });
    }
}

#[async_trait::async_trait]
impl SourceConnector for MockConnector {
    async fn list(&self, request: &ListRequest) -> Result<Vec<FileRef>, ConnectorError> {
        if let Some(message) = &self.list_failure {
            return Err(ConnectorError::NotFound(message.clone()));
        }
        select_files(self.files.clone(), &request.filter, || {
            ConnectorError::EmptyFolder(format!("'{}' is empty.", request.folder))
        })
    }

    async fn fetch(&self, file: &FileRef) -> Result<Vec<u8>, ConnectorError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing_fetches.contains(&file.name) {
            return Err(ConnectorError::Sdk(format!(
                "Simulated fetch failure for {}",
                file.name
            )));
        }
        self.data
            .get(&file.locator)
            .cloned()
            .ok_or_else(|| ConnectorError::NotFound(format!("{} not found", file.locator)))
    }
}

/// Hands out the same mock connector for every connector-backed collection
pub struct MockConnectorFactory {
    connector: Arc<MockConnector>,
    requested: Mutex<Vec<(String, ImportMethod)>>,
}

impl MockConnectorFactory {
    pub fn new(connector: MockConnector) -> Self {
        MockConnectorFactory {
            connector: Arc::new(connector),
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn connector(&self) -> &MockConnector {
        &self.connector
    }

    /// Collection ids and methods connectors were built for
    pub fn requested(&self) -> Vec<(String, ImportMethod)> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ConnectorFactory for MockConnectorFactory {
    async fn connector_for(
        &self,
        collection: &DbCollection,
        _caller: &Caller,
    ) -> Result<Arc<dyn SourceConnector>, ConnectorError> {
        self.requested
            .lock()
            .unwrap()
            .push((collection.id.clone(), collection.import_method));
        Ok(self.connector.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineMode {
    Hold,
    Complete,
    FailConversion,
    Reject,
}

/// Conversion pipeline that records every submission
pub struct RecordingConversionPipeline {
    mode: PipelineMode,
    requests: Mutex<Vec<ConversionRequest>>,
}

impl RecordingConversionPipeline {
    fn with_mode(mode: PipelineMode) -> Self {
        RecordingConversionPipeline {
            mode,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Accepts files and leaves them importing until `complete_all`
    pub fn holding() -> Self {
        Self::with_mode(PipelineMode::Hold)
    }

    /// Reports every file converted as soon as it is submitted
    pub fn completing() -> Self {
        Self::with_mode(PipelineMode::Complete)
    }

    /// Reports every file as failed extraction as soon as it is submitted
    pub fn failing_conversion() -> Self {
        Self::with_mode(PipelineMode::FailConversion)
    }

    /// Refuses every submission
    pub fn rejecting() -> Self {
        Self::with_mode(PipelineMode::Reject)
    }

    pub fn requests(&self) -> Vec<ConversionRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Finish every recorded request with the same outcome
    pub async fn complete_all(&self, outcome: ConversionOutcome) {
        for request in self.requests() {
            request.completion.complete(outcome.clone()).await.unwrap();
        }
    }
}

#[async_trait::async_trait]
impl ConversionPipeline for RecordingConversionPipeline {
    async fn submit(&self, request: ConversionRequest) -> Result<(), ConversionError> {
        if self.mode == PipelineMode::Reject {
            return Err(ConversionError::Unavailable("pipeline offline".to_string()));
        }

        self.requests.lock().unwrap().push(request.clone());

        match self.mode {
            PipelineMode::Complete => {
                request
                    .completion
                    .complete(ConversionOutcome::Converted)
                    .await
                    .map_err(|e| ConversionError::Unavailable(e.to_string()))?;
            }
            PipelineMode::FailConversion => {
                request
                    .completion
                    .complete(ConversionOutcome::Failed("unsupported format".to_string()))
                    .await
                    .map_err(|e| ConversionError::Unavailable(e.to_string()))?;
            }
            PipelineMode::Hold | PipelineMode::Reject => {}
        }
        Ok(())
    }
}
