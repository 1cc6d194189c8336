#![allow(dead_code)]

use image_collections::access::Caller;
use image_collections::config::Config;
use image_collections::db::{Database, DbCollection, ImportMethod};
use image_collections::library::{CollectionDraft, CollectionManager};
use image_collections::test_support::{
    MockConnector, MockConnectorFactory, RecordingConversionPipeline,
};
use std::sync::Arc;
use tempfile::TempDir;

/// Initialize tracing for tests with proper test output handling
pub fn tracing_init() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// A manager wired to a mock import source and a recording conversion pipeline
pub struct TestEnv {
    pub manager: CollectionManager,
    pub database: Database,
    pub config: Config,
    pub connectors: Arc<MockConnectorFactory>,
    pub pipeline: Arc<RecordingConversionPipeline>,
    pub temp_dir: TempDir,
}

impl TestEnv {
    pub async fn new(connector: MockConnector, pipeline: RecordingConversionPipeline) -> Self {
        Self::with_config(connector, pipeline, |_| {}).await
    }

    /// Like `new`, with the all-under-temp-dir config adjusted before opening
    pub async fn with_config(
        connector: MockConnector,
        pipeline: RecordingConversionPipeline,
        adjust: impl FnOnce(&mut Config),
    ) -> Self {
        tracing_init();

        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::for_root(temp_dir.path());
        adjust(&mut config);
        let connectors = Arc::new(MockConnectorFactory::new(connector));
        let pipeline = Arc::new(pipeline);

        let manager = CollectionManager::open(
            &config,
            connectors.clone(),
            pipeline.clone(),
            tokio::runtime::Handle::current(),
        )
        .await
        .expect("Failed to open collection manager");

        // Second pool on the same file, for assertions on raw rows
        let database = Database::new(config.database_path.to_str().unwrap())
            .await
            .expect("Failed to open database");

        TestEnv {
            manager,
            database,
            config,
            connectors,
            pipeline,
            temp_dir,
        }
    }

    /// No import source, conversions finish as soon as they are submitted
    pub async fn empty() -> Self {
        Self::new(MockConnector::new(), RecordingConversionPipeline::completing()).await
    }

    pub async fn collection(&self, id: &str) -> Option<DbCollection> {
        self.database.get_collection_by_id(id).await.unwrap()
    }
}

pub fn alice() -> Caller {
    Caller::user("alice")
}

pub fn bob() -> Caller {
    Caller::user("bob")
}

pub fn s3_draft(name: &str) -> CollectionDraft {
    CollectionDraft {
        import_method: Some(ImportMethod::S3Import),
        s3_bucket_name: Some("microscopy".to_string()),
        s3_folder_name: Some("/plates/p1/".to_string()),
        s3_access_key_id: Some("AKIAEXAMPLE".to_string()),
        s3_secret_access_key: Some("secret".to_string()),
        ..CollectionDraft::named(name)
    }
}

pub fn gdrive_draft(name: &str, folder: &str) -> CollectionDraft {
    CollectionDraft {
        import_method: Some(ImportMethod::GdriveImport),
        gdrive_folder_name: Some(folder.to_string()),
        gdrive_code: Some("auth-code".to_string()),
        ..CollectionDraft::named(name)
    }
}
